//! kafka-bridge
//!
#![doc = "kafka-bridge - Kafka to CloudEvents HTTP bridge"]
#![doc = "Main entry point for the bridge binary."]

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use kafka_bridge::cli::Cli;
use kafka_bridge::config::AdapterConfig;
use kafka_bridge::logging::init_logging;
use kafka_bridge::Adapter;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/bridge.yaml");
    let config = AdapterConfig::load(config_path, &cli)?;

    init_logging(&config.logging)?;

    // Validate configuration
    config.validate()?;

    let adapter = Adapter::new(config)?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    if let Err(e) = adapter.start(shutdown).await {
        tracing::error!(error = %e, "Bridge stopped with error");
        return Err(e.into());
    }

    Ok(())
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    shutdown.cancel();
}
