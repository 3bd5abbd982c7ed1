//! Shared coordination store binary

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fleetcoord-store")]
#[command(about = "Shared TTL key-value store for a fleetcoord cluster")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the store server
    Serve {
        /// Bind address for HTTP
        #[arg(long, default_value = "0.0.0.0:7000")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind } => {
            let bind_addr: SocketAddr = bind.parse()?;
            tracing::info!("Starting fleetcoord store {}", fleetcoord::BUILD_INFO);
            fleetcoord::store::server::serve(bind_addr).await?;
        }
    }

    Ok(())
}
