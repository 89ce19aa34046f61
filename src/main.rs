use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use minidhcpd::{Config, Dispatcher, Result};

#[derive(Parser)]
#[command(name = "minidhcpd")]
#[command(author, version, about = "A minimal interface-aware DHCPv4 server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "minidhcpd.toml")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load_or_default(&cli.config).await;
    info!(config = %cli.config.display(), pools = config.pools.len(), "starting DHCP server");

    let dispatcher = Dispatcher::new(config)?;
    dispatcher.run().await
}
