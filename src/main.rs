//! lksocks - SOCKS5 relay with an encrypted tunnel
//!
//! This is the main entry point for the lksocks application.

use anyhow::Result;
use clap::Parser;
use lksocks::config::{load_config, LogConfig};
use lksocks::server::{probe, run_server};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// lksocks - SOCKS5 relay with an optional Blowfish-encrypted tunnel
#[derive(Parser, Debug)]
#[command(name = "lksocks")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log filter (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,

    /// Send a GET_URL probe to the tunnel server and exit
    #[arg(long, value_name = "URL")]
    probe: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args.config)?;

    // Setup logging, command line flags win over the [log] table
    let mut log = config.log.clone();
    if let Some(level) = &args.log_level {
        log.level = level.clone();
    }
    log.json |= args.json_log;
    setup_logging(&log)?;

    info!("lksocks v{}", lksocks::VERSION);
    info!("Configuration loaded from: {:?}", args.config);

    if let Some(url) = &args.probe {
        let echoed = probe(&config.relay, url).await?;
        info!("Tunnel server echoed: {}", echoed);
        println!("{}", echoed);
        return Ok(());
    }

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    run_server(config.relay, shutdown_rx).await
}

/// Wait for Ctrl+C, or SIGTERM on unix
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down...");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down...");
                    }
                }
                return;
            }
            Err(e) => warn!("Failed to setup SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down...");
}

/// Setup logging based on configuration
fn setup_logging(log: &LogConfig) -> Result<()> {
    // RUST_LOG takes precedence when set
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if log.json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
