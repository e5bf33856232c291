//! Servlet Connector
//!
//! Runs the connector's HTTP, HTTPS and AJP13 listeners with the built-in
//! echo application.
//!
//! ```text
//!   HTTP  :8080 ─┐
//!   HTTPS :8443 ─┼─▶ acceptors ─submit─▶ dispatch pool ─▶ session ─▶ Router
//!   AJP13 :8009 ─┘                          (bounded)      (keep-alive)
//! ```

use std::path::PathBuf;

use clap::Parser;

use servlet_connector::config::{load_config, ConnectorConfig};
use servlet_connector::lifecycle::signals::shutdown_signal;
use servlet_connector::observability::{logging, metrics};
use servlet_connector::{EchoRouter, Server, Shutdown};

#[derive(Parser)]
#[command(name = "servlet-connector")]
#[command(about = "HTTP/HTTPS/AJP13 connector for a servlet container", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ConnectorConfig::default(),
    };

    logging::init(&config.observability.log_level);
    tracing::info!("servlet-connector v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        protocols = ?config.enabled_protocols(),
        max_workers = config.pool.max_workers,
        keep_alive_ms = config.timeouts.keep_alive_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let server = Server::new(config, EchoRouter).bind().await?;

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.trigger();
    });

    server.run(shutdown).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
