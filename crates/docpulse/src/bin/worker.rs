//! Worker service binary: processing RPC surface + execution engine

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docpulse::config::Config;
use docpulse::events::RedisEventBus;
use docpulse::storage::PgStore;
use docpulse::worker::{rpc_server, WorkerService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docpulse=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!("configuration loaded");
    tracing::info!(
        "  - simulated pages: {}, page delay: {} ms",
        config.processing.simulated_pages,
        config.processing.page_delay_ms
    );

    let store = Arc::new(PgStore::connect(&config.database).await?);
    let bus = Arc::new(RedisEventBus::connect(&config.events).await?);
    let service = WorkerService::new(store, bus, config.processing.clone());

    let addr: SocketAddr = format!("{}:{}", config.worker.host, config.worker.port).parse()?;
    let router = rpc_server::router(service);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    tracing::error!(error = %err, "failed to install SIGTERM handler");
                    return;
                }
            };
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(sigint) => sigint,
                Err(err) => {
                    tracing::error!(error = %err, "failed to install SIGINT handler");
                    return;
                }
            };
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }
            shutdown.cancel();
        });
    }

    tracing::info!("worker service listening on http://{addr}");

    // In-flight execution tasks are abandoned on shutdown; a job left
    // Running is safe to re-drive.
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("worker service stopped");
    Ok(())
}
