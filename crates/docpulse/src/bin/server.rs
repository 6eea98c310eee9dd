//! Front service binary: ingest orchestrator + progress stream bridge
//! + collaboration fan-out

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docpulse::config::Config;
use docpulse::events::RedisEventBus;
use docpulse::rpc::HttpProcessingRpc;
use docpulse::server::{build_router, state::AppState};
use docpulse::storage::{FsObjectStore, PgStore};

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
    tracing::info!("  - database: pool of {}", config.database.max_connections);
    tracing::info!("  - worker: {}", config.worker.base_url);
    tracing::info!("  - upload cap: {} bytes", config.server.max_upload_bytes);

    let store = Arc::new(PgStore::connect(&config.database).await?);
    let bus = Arc::new(RedisEventBus::connect(&config.events).await?);
    let objects = Arc::new(FsObjectStore::new(config.storage.root.clone()));
    let rpc = Arc::new(HttpProcessingRpc::new(
        config.worker.base_url.clone(),
        config.server.dispatch_timeout(),
    ));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = AppState::new(config, store, bus, objects, rpc);
    let router = build_router(state);

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

    tracing::info!("front service listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("front service stopped");
    Ok(())
}
