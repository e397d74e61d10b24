//! Wire framing for the five RFC 1350 packet types. Big-endian integers,
//! NUL-delimited strings in requests. No RFC 2347 option negotiation —
//! this server only ever speaks unextended octet-mode TFTP.

use crate::error::{Result, TftpError};

const OPCODE_RRQ: u16 = 1;
const OPCODE_WRQ: u16 = 2;
const OPCODE_DATA: u16 = 3;
const OPCODE_ACK: u16 = 4;
const OPCODE_ERROR: u16 = 5;

/// Payload size of every DATA block except possibly the last.
pub const BLOCK_SIZE: usize = 512;

/// Largest legal unextended-TFTP datagram: 4-byte header + max payload.
pub const MAX_PACKET: usize = 4 + BLOCK_SIZE;

/// A fully parsed TFTP packet.
#[derive(Debug, Clone)]
#[allow(clippy::upper_case_acronyms)]
pub enum Packet {
    RRQ { filename: Vec<u8>, mode: String },
    WRQ { filename: Vec<u8>, mode: String },
    DATA { block_num: u16, data: Vec<u8> },
    ACK { block_num: u16 },
    ERROR { code: u16, msg: String },
}

impl Packet {
    /// Parse raw datagram bytes into a `Packet`.
    ///
    /// Datagrams larger than [`MAX_PACKET`] are the caller's
    /// responsibility to reject before calling this (the receive buffer
    /// is sized to `MAX_PACKET`, so the OS already truncates/discards
    /// anything bigger for a connected UDP socket).
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(TftpError::MalformedPacket);
        }
        let opcode = u16::from_be_bytes([buf[0], buf[1]]);
        match opcode {
            OPCODE_RRQ => parse_request(buf, true),
            OPCODE_WRQ => parse_request(buf, false),
            OPCODE_DATA => parse_data(buf),
            OPCODE_ACK => parse_ack(buf),
            OPCODE_ERROR => parse_error(buf),
            _ => Err(TftpError::MalformedPacket),
        }
    }

    /// Serialize the packet to bytes for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Packet::RRQ { filename, mode } => encode_request(OPCODE_RRQ, filename, mode),
            Packet::WRQ { filename, mode } => encode_request(OPCODE_WRQ, filename, mode),
            Packet::DATA { block_num, data } => {
                let mut buf = Vec::with_capacity(4 + data.len());
                buf.extend_from_slice(&OPCODE_DATA.to_be_bytes());
                buf.extend_from_slice(&block_num.to_be_bytes());
                buf.extend_from_slice(data);
                buf
            }
            Packet::ACK { block_num } => {
                let mut buf = Vec::with_capacity(4);
                buf.extend_from_slice(&OPCODE_ACK.to_be_bytes());
                buf.extend_from_slice(&block_num.to_be_bytes());
                buf
            }
            Packet::ERROR { code, msg } => {
                let mut buf = Vec::with_capacity(5 + msg.len());
                buf.extend_from_slice(&OPCODE_ERROR.to_be_bytes());
                buf.extend_from_slice(&code.to_be_bytes());
                buf.extend_from_slice(msg.as_bytes());
                buf.push(0);
                buf
            }
        }
    }

    /// Build an ERROR packet from a numeric code and message.
    pub fn error(code: u16, msg: impl Into<String>) -> Self {
        Packet::ERROR {
            code,
            msg: msg.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal parsing helpers
// ---------------------------------------------------------------------------

/// Parse RRQ / WRQ: 2-byte opcode | filename\0 | mode\0
fn parse_request(buf: &[u8], is_rrq: bool) -> Result<Packet> {
    let payload = &buf[2..];
    let mut fields = payload.splitn(3, |&b| b == 0);

    let filename = fields.next().ok_or(TftpError::MalformedPacket)?;
    let mode_bytes = fields.next().ok_or(TftpError::MalformedPacket)?;
    // splitn(3, ...) yields a third (possibly empty) piece only if a
    // second NUL terminator was actually present in the input.
    fields.next().ok_or(TftpError::MalformedPacket)?;

    if filename.is_empty() {
        return Err(TftpError::MalformedPacket);
    }

    let mode = String::from_utf8_lossy(mode_bytes).to_ascii_lowercase();
    if mode != "octet" {
        return Err(TftpError::UnsupportedMode(mode));
    }

    let filename = filename.to_vec();
    if is_rrq {
        Ok(Packet::RRQ { filename, mode })
    } else {
        Ok(Packet::WRQ { filename, mode })
    }
}

/// Parse DATA: 2-byte opcode | 2-byte block# | 0..512 bytes
fn parse_data(buf: &[u8]) -> Result<Packet> {
    if buf.len() < 4 {
        return Err(TftpError::MalformedPacket);
    }
    let block_num = u16::from_be_bytes([buf[2], buf[3]]);
    let data = buf[4..].to_vec();
    Ok(Packet::DATA { block_num, data })
}

/// Parse ACK: 2-byte opcode | 2-byte block#
fn parse_ack(buf: &[u8]) -> Result<Packet> {
    if buf.len() != 4 {
        return Err(TftpError::MalformedPacket);
    }
    let block_num = u16::from_be_bytes([buf[2], buf[3]]);
    Ok(Packet::ACK { block_num })
}

/// Parse ERROR: 2-byte opcode | 2-byte code | msg\0
fn parse_error(buf: &[u8]) -> Result<Packet> {
    if buf.len() < 5 {
        return Err(TftpError::MalformedPacket);
    }
    let code = u16::from_be_bytes([buf[2], buf[3]]);
    let msg_bytes = &buf[4..];
    let end = msg_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(msg_bytes.len());
    let msg = String::from_utf8_lossy(&msg_bytes[..end]).to_string();
    Ok(Packet::ERROR { code, msg })
}

fn encode_request(opcode: u16, filename: &[u8], mode: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + filename.len() + mode.len());
    buf.extend_from_slice(&opcode.to_be_bytes());
    buf.extend_from_slice(filename);
    buf.push(0);
    buf.extend_from_slice(mode.as_bytes());
    buf.push(0);
    buf
}
