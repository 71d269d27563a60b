use clap::Parser;
use numlog_server::{
    CliArgs, IngestServer, ServerConfig,
    server::telemetry::init_telemetry,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let server = IngestServer::bind(config.clone()).await?;
    log_startup_info(&server, &config);

    tokio::spawn(shutdown_signal(server.shutdown_handle()));

    let summary = server.run().await?;
    info!(
        "Service shut down successfully: {} unique records, {} written, {} connections closed",
        summary.unique_total, summary.records_written, summary.connections_closed
    );

    providers.shutdown();
    Ok(())
}

fn log_startup_info(server: &IngestServer, config: &ServerConfig) {
    if cfg!(debug_assertions) {
        info!(
            "Starting ingestion service on {} with full config: {:#?}",
            server.local_addr(),
            config
        );
    } else {
        info!(
            "Starting ingestion service on {} (max {} connections, log {})",
            server.local_addr(),
            config.max_connections,
            config.log_file.display()
        );
    }
}

/// Raises the shutdown flag on Ctrl+C or SIGTERM. Returns early without
/// raising it if the server shuts down first.
async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = shutdown.cancelled() => return,
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }

    info!("Shutdown signal received, terminating gracefully...");
    shutdown.cancel();
}
