//! Command-line surface: a single `host:port` listen argument, with
//! `port` required to be in `[1024, 65536)` and never `59`.

use std::net::{IpAddr, SocketAddr};

use clap::Parser;

/// An in-memory TFTP (RFC 1350) server.
#[derive(Parser, Debug)]
#[command(name = "tftp-rs", version, about)]
pub struct Cli {
    /// Address to listen on, as `host:port`. `host` may be empty to
    /// bind all interfaces (e.g. `:6900`).
    pub listen: String,

    /// Increase log verbosity (repeatable: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse and validate a `host:port` listen argument into a bindable
/// [`SocketAddr`].
pub fn parse_listen_addr(listen: &str) -> anyhow::Result<SocketAddr> {
    let (host, port) = listen
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected host:port, got {listen:?}"))?;

    let port: u16 = port
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid port {port:?}"))?;
    if !(1024..65536).contains(&usize::from(port)) || port == 59 {
        anyhow::bail!("port must be in [1024, 65536) and not 59, got {port}");
    }

    let ip: IpAddr = if host.is_empty() {
        IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
    } else {
        host.parse()
            .map_err(|_| anyhow::anyhow!("invalid host {host:?}"))?
    };

    Ok(SocketAddr::new(ip, port))
}
