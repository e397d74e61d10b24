use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UdpSocket;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tftpd_mem::blob_store::BlobStore;
use tftpd_mem::cli::{Cli, parse_listen_addr};
use tftpd_mem::server;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let addr = parse_listen_addr(&cli.listen).context("invalid listen address")?;

    let sock = UdpSocket::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "starting tftpd-mem");

    let store = BlobStore::new();
    server::run(sock, store).await?;

    Ok(())
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "tftpd_mem=info",
        1 => "tftpd_mem=debug",
        _ => "tftpd_mem=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
