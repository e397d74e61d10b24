//! The TFTP protocol engine: listener/dispatcher plus per-transfer read
//! and write handlers. All state lives in the shared [`BlobStore`]; each
//! transfer owns its own ephemeral UDP socket (the TFTP TID discipline).

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

use crate::blob_store::{BlobBuilder, BlobStore, PublishOutcome};
use crate::codec::{BLOCK_SIZE, MAX_PACKET, Packet};
use crate::error::{Result, TftpError, wire_code};

/// How long a handler waits for the next datagram before retrying.
pub const TIMEOUT: Duration = Duration::from_secs(2);

/// Consecutive timeouts tolerated before a transfer gives up.
pub const MAX_RETRIES: u32 = 3;

/// Bind the well-known listening socket and serve forever. Each RRQ/WRQ
/// spawns an independent handler task on a fresh ephemeral socket;
/// the dispatcher itself never blocks on a handler and never replies
/// to ordinary requests from the listening socket.
pub async fn run(sock: UdpSocket, store: BlobStore) -> Result<()> {
    info!(addr = ?sock.local_addr()?, "tftp server listening");

    let mut buf = vec![0u8; MAX_PACKET];
    loop {
        let (n, peer) = sock.recv_from(&mut buf).await?;

        let pkt = match Packet::from_bytes(&buf[..n]) {
            Ok(p) => p,
            Err(TftpError::UnsupportedMode(mode)) => {
                debug!(%peer, mode, "rejecting unsupported transfer mode");
                send_error(&sock, peer, wire_code::ILLEGAL_OPERATION, "Illegal operation").await;
                continue;
            }
            Err(e) => {
                debug!(%peer, error = %e, "dropped malformed datagram");
                continue;
            }
        };

        match pkt {
            Packet::RRQ { filename, .. } => {
                let store = store.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_rrq(peer, filename.clone(), store).await {
                        warn!(%peer, filename = %String::from_utf8_lossy(&filename), error = %e, "read transfer failed");
                    }
                });
            }
            Packet::WRQ { filename, .. } => {
                let store = store.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_wrq(peer, filename.clone(), store).await {
                        warn!(%peer, filename = %String::from_utf8_lossy(&filename), error = %e, "write transfer failed");
                    }
                });
            }
            Packet::ERROR { code, msg } => {
                debug!(%peer, code, %msg, "peer sent error to listener, dropping");
            }
            other => {
                debug!(%peer, ?other, "unexpected opcode on listener");
                send_error(&sock, peer, wire_code::ILLEGAL_OPERATION, "Illegal operation").await;
            }
        }
    }
}

/// Open a fresh ephemeral UDP socket "connected" to `peer`: datagrams
/// from any other address are discarded by the kernel before they ever
/// reach `recv()`, enforcing the TID discipline without an explicit
/// address check in handler code.
async fn bind_transfer_socket(peer: SocketAddr) -> std::io::Result<UdpSocket> {
    let bind_addr = if peer.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
    let sock = UdpSocket::bind(bind_addr).await?;
    sock.connect(peer).await?;
    Ok(sock)
}

/// Best-effort ERROR send. Transmission failure is not itself reported.
async fn send_error(sock: &UdpSocket, peer: SocketAddr, code: u16, msg: &str) {
    let pkt = Packet::error(code, msg);
    if let Err(e) = sock.send_to(&pkt.to_bytes(), peer).await {
        debug!(%peer, error = %e, "failed to send ERROR packet");
    }
}

async fn send_error_connected(sock: &UdpSocket, code: u16, msg: &str) {
    let pkt = Packet::error(code, msg);
    let _ = sock.send(&pkt.to_bytes()).await;
}

// ---------------------------------------------------------------------------
// RRQ handler — client downloads a blob from the store
// ---------------------------------------------------------------------------

async fn handle_rrq(peer: SocketAddr, filename: Vec<u8>, store: BlobStore) -> Result<()> {
    let name_for_log = String::from_utf8_lossy(&filename).to_string();

    let blob = match store.get(&filename).await {
        Some(b) => b,
        None => {
            let sock = bind_transfer_socket(peer).await?;
            info!(%peer, filename = %name_for_log, "RRQ: file not found");
            send_error_connected(&sock, wire_code::FILE_NOT_FOUND, "File not found").await;
            return Ok(());
        }
    };

    let sock = bind_transfer_socket(peer).await?;
    info!(%peer, filename = %name_for_log, bytes = blob.len(), "RRQ started");

    let mut recv_buf = vec![0u8; MAX_PACKET];
    let blocks = blob.blocks();
    let needs_trailing_empty =
        !blocks.is_empty() && blocks.last().map(Vec::len) == Some(BLOCK_SIZE);

    // Total count of DATA packets to send: one per stored block, plus a
    // trailing empty block if the last stored block was exactly
    // BLOCK_SIZE bytes (including the degenerate all-empty blob case).
    let total = blocks.len().max(1) + usize::from(needs_trailing_empty);

    for seq in 0..total {
        let block_num = (seq + 1) as u16;
        let payload: &[u8] = blocks.get(seq).map(Vec::as_slice).unwrap_or(&[]);
        let pkt_bytes = Packet::DATA {
            block_num,
            data: payload.to_vec(),
        }
        .to_bytes();

        // Send the block exactly once. A timeout or a non-matching
        // reply does NOT trigger a retransmit here, deliberately — the
        // handler just keeps waiting, up to `MAX_RETRIES` timeouts.
        sock.send(&pkt_bytes).await?;

        let mut retries = 0u32;
        loop {
            match timeout(TIMEOUT, sock.recv(&mut recv_buf)).await {
                Ok(Ok(n)) => match Packet::from_bytes(&recv_buf[..n]) {
                    Ok(Packet::ACK { block_num: bn }) if bn == block_num => break,
                    Ok(Packet::ERROR { code, msg }) => {
                        debug!(%peer, filename = %name_for_log, code, %msg, "client aborted read");
                        return Ok(());
                    }
                    // Wrong block number, or any other packet: a no-op,
                    // loop back to waiting without retransmitting.
                    _ => continue,
                },
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    retries += 1;
                    if retries >= MAX_RETRIES {
                        return Err(TftpError::RetriesExceeded(retries));
                    }
                    // Known quirk: increment and re-wait WITHOUT
                    // retransmitting the DATA block.
                    continue;
                }
            }
        }
    }

    info!(%peer, filename = %name_for_log, "RRQ complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// WRQ handler — client uploads a blob into the store
// ---------------------------------------------------------------------------

async fn handle_wrq(peer: SocketAddr, filename: Vec<u8>, store: BlobStore) -> Result<()> {
    let name_for_log = String::from_utf8_lossy(&filename).to_string();

    if store.contains(&filename).await {
        let sock = bind_transfer_socket(peer).await?;
        info!(%peer, filename = %name_for_log, "WRQ: file already exists");
        send_error_connected(&sock, wire_code::FILE_ALREADY_EXISTS, "File already exists").await;
        return Ok(());
    }

    let sock = bind_transfer_socket(peer).await?;
    info!(%peer, filename = %name_for_log, "WRQ started");

    let mut recv_buf = vec![0u8; MAX_PACKET];
    let mut builder = BlobBuilder::new();
    let mut expected_block: u16 = 1;
    let mut transferred: u64 = 0;

    // ACK 0 acknowledges the WRQ itself.
    send_ack(&sock, 0).await?;

    loop {
        let mut retries = 0u32;
        let data = loop {
            match timeout(TIMEOUT, sock.recv(&mut recv_buf)).await {
                Ok(Ok(n)) => match Packet::from_bytes(&recv_buf[..n]) {
                    Ok(Packet::DATA { block_num, data }) if block_num == expected_block => {
                        break data;
                    }
                    Ok(Packet::DATA { block_num, .. }) => {
                        debug!(%peer, filename = %name_for_log, expected_block, block_num, "out of sequence DATA, aborting");
                        return Err(TftpError::OutOfSequence {
                            expected: expected_block,
                            got: block_num,
                        });
                    }
                    Ok(Packet::ERROR { code, msg }) => {
                        debug!(%peer, filename = %name_for_log, code, %msg, "client aborted write");
                        return Ok(());
                    }
                    Ok(_) | Err(_) => return Err(TftpError::UnexpectedPacket),
                },
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    retries += 1;
                    if retries >= MAX_RETRIES {
                        return Err(TftpError::RetriesExceeded(retries));
                    }
                    // The client may have lost our last ACK: resend it.
                    send_ack(&sock, expected_block.wrapping_sub(1)).await?;
                }
            }
        };

        let is_last = data.len() < BLOCK_SIZE;
        transferred += data.len() as u64;
        builder.push(data);

        send_ack(&sock, expected_block).await?;

        if is_last {
            break;
        }
        expected_block = expected_block.wrapping_add(1);
    }

    let blob = builder.finish();
    match store.publish(filename, blob).await {
        PublishOutcome::Published => {
            info!(%peer, filename = %name_for_log, bytes = transferred, "WRQ complete");
        }
        PublishOutcome::AlreadyExists => {
            // A concurrent writer won the race. Our ACKs are already
            // sent and cannot be unsent; we simply don't install our
            // blob.
            info!(%peer, filename = %name_for_log, "WRQ lost publish race, discarding upload");
        }
    }
    Ok(())
}

async fn send_ack(sock: &UdpSocket, block_num: u16) -> Result<()> {
    let pkt = Packet::ACK { block_num };
    sock.send(&pkt.to_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Packet;
    use tokio::net::UdpSocket as TokioUdpSocket;

    async fn spawn_server() -> (SocketAddr, BlobStore) {
        let store = BlobStore::new();
        let sock = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = sock.local_addr().unwrap();
        let store2 = store.clone();
        tokio::spawn(async move {
            let _ = run(sock, store2).await;
        });
        (addr, store)
    }

    #[tokio::test]
    async fn rrq_on_missing_file_sends_file_not_found() {
        let (addr, _store) = spawn_server().await;
        let client = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(
                &Packet::RRQ {
                    filename: b"nope".to_vec(),
                    mode: "octet".into(),
                }
                .to_bytes(),
                addr,
            )
            .await
            .unwrap();

        let mut buf = vec![0u8; MAX_PACKET];
        let (n, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(from, addr); // reply comes from a fresh ephemeral TID
        match Packet::from_bytes(&buf[..n]).unwrap() {
            Packet::ERROR { code, .. } => assert_eq!(code, wire_code::FILE_NOT_FOUND),
            other => panic!("expected ERROR, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrq_then_rrq_round_trip() {
        let (addr, _store) = spawn_server().await;
        let client = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();

        client
            .send_to(
                &Packet::WRQ {
                    filename: b"a.txt".to_vec(),
                    mode: "octet".into(),
                }
                .to_bytes(),
                addr,
            )
            .await
            .unwrap();

        let mut buf = vec![0u8; MAX_PACKET];
        let (n, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        match Packet::from_bytes(&buf[..n]).unwrap() {
            Packet::ACK { block_num: 0 } => {}
            other => panic!("expected ACK 0, got {other:?}"),
        }

        client
            .send_to(
                &Packet::DATA {
                    block_num: 1,
                    data: b"hello".to_vec(),
                }
                .to_bytes(),
                from,
            )
            .await
            .unwrap();

        let (n, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        match Packet::from_bytes(&buf[..n]).unwrap() {
            Packet::ACK { block_num: 1 } => {}
            other => panic!("expected ACK 1, got {other:?}"),
        }

        // Give the handler a moment to publish before reading back.
        tokio::time::sleep(Duration::from_millis(50)).await;

        client
            .send_to(
                &Packet::RRQ {
                    filename: b"a.txt".to_vec(),
                    mode: "octet".into(),
                }
                .to_bytes(),
                addr,
            )
            .await
            .unwrap();

        let (n, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        match Packet::from_bytes(&buf[..n]).unwrap() {
            Packet::DATA { block_num: 1, data } => assert_eq!(data, b"hello"),
            other => panic!("expected DATA 1, got {other:?}"),
        }
        client
            .send_to(&Packet::ACK { block_num: 1 }.to_bytes(), from)
            .await
            .unwrap();
    }
}
