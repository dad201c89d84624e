use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use valet_alerts::AlertDispatcher;
use valet_scheduler::SchedulerEngine;
use valet_store::Store;

mod app;
mod events;
mod http;
mod metadata_sync;
mod workers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "valet_gateway=info,tower_http=debug".into()),
        )
        .init();

    // Load config: explicit VALET_CONFIG path > ~/.valet/valet.toml.
    let config_path = std::env::var("VALET_CONFIG").ok();
    let config = valet_core::config::ValetConfig::load(config_path.as_deref())?;

    let store = Store::open(&config.database.path)?;
    let state = Arc::new(app::AppState::new(config.clone(), store.clone())?);

    // Background workers share one shutdown signal; each is awaited on
    // exit so in-flight work finishes.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker_handles = Vec::new();

    let (fired_tx, fired_rx) = mpsc::channel(64);
    let engine = SchedulerEngine::new(
        state.tasks.clone(),
        config.scheduler.poll_secs,
        fired_tx,
    );
    worker_handles.push(tokio::spawn(engine.run(shutdown_rx.clone())));
    worker_handles.push(tokio::spawn(workers::run_action_router(
        fired_rx,
        state.registry.clone(),
        state.notifier.clone(),
        store.clone(),
        shutdown_rx.clone(),
    )));

    let mut dispatcher = AlertDispatcher::new(state.alerts.clone());
    if let Some(notifier) = &state.notifier {
        dispatcher.register_channel(Arc::new(workers::AdminNotifyChannel::new(
            state.users.clone(),
            notifier.clone(),
        )));
    }
    worker_handles.push(tokio::spawn(workers::run_alert_dispatch(
        Arc::new(dispatcher),
        shutdown_rx.clone(),
    )));

    worker_handles.push(tokio::spawn(workers::run_audit_retention(
        store.clone(),
        config.audit.retention_days,
        shutdown_rx.clone(),
    )));

    if let Some(sync_config) = config.metadata_sync.clone() {
        worker_handles.push(tokio::spawn(metadata_sync::run_metadata_sync(
            sync_config,
            shutdown_rx.clone(),
        )));
    }

    let router = app::build_router(state.clone());
    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    info!("valet gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Stop the background loops and let them drain.
    let _ = shutdown_tx.send(true);
    for handle in worker_handles {
        if let Err(e) = handle.await {
            warn!("worker task failed to join: {e}");
        }
    }
    info!("valet gateway stopped");
    Ok(())
}
