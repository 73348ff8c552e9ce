pub mod bridge;
pub mod config;
pub mod mqtt;
pub mod persistence;
pub mod relay;

use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::bridge::{BridgeCoordinator, Connecting};
use crate::persistence::load_config;

/// Bridges Socket Giant relay boards to Home Assistant over MQTT.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Configuration file (.toml or .json). Searched in the default
    /// locations when omitted.
    #[arg(short, long, env = "SOCKET_GIANT_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum log level (trace, debug, info, warn, error)
    #[arg(long, env = "SOCKET_GIANT_LOG", default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup(cli.log_level)?;

    info!("Starting socket-giant-bridge {}", env!("CARGO_PKG_VERSION"));
    let config = load_config(cli.config.as_deref()).await?;

    BridgeCoordinator::<Connecting>::create(config)?
        .connect()
        .await?
        .announce()
        .await?
        .run_until_shutdown(shutdown_signal())
        .await
        .finish()
        .await?;

    info!("Goodbye");
    Ok(())
}

fn setup(level: Level) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env(level);
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Resolves on Ctrl-C, or SIGTERM on unix (what container runtimes send).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
