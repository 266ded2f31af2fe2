//! wharf-ftpd - Entry Point
//!
//! FTP server with FTPS, passive/active data connections and bandwidth shaping.

use clap::Parser;
use log::{error, info};
use std::path::PathBuf;

use wharf_ftpd::{Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "wharf-ftpd", version, about = "FTP server")]
struct Args {
    /// Configuration file; defaults to /etc/wharf-ftpd/config.toml then ./config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the server root directory
    #[arg(short, long)]
    root: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig::load(args.config.as_deref(), args.root.as_deref())?;

    info!("Launching FTP server...");
    let server = Server::bind(config).await?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                shutdown.cancel();
            }
            Err(e) => error!("Cannot listen for interrupt: {}", e),
        }
    });

    server.run().await
}
