use anyhow::{Context, Result};
use faultline_core::config::Config;
use faultline_worker::daemon::Daemon;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    faultline_telemetry::logging::init_logging("faultline-worker", "info");

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "faultline-worker starting"
    );

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });

    let daemon = Daemon::new(config).await.context("failed to initialize daemon")?;
    let shutdown = daemon.shutdown_handle();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        shutdown.trigger();
    });

    info!(
        host = %daemon.config().server.host,
        port = daemon.config().server.port,
        "ingest server starting"
    );

    daemon.run().await.context("daemon execution failed")?;

    info!("faultline-worker stopped");
    Ok(())
}
