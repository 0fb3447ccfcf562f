use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing_subscriber::EnvFilter;
use warp::Filter;

mod api;
mod config;
mod monitor;
mod scheduler;
mod service;
mod store;

use scheduler::{Scheduler, SystemClock};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "classwatchd starting");

    let config = config::Config::load().context("failed to load configuration")?;
    tracing::info!(
        bind = %config.bind_addr,
        db = %config.db_path.display(),
        presence_fraction = config.presence_fraction,
        threshold = config.detection_threshold,
        poll_secs = config.poll_interval_secs,
        "configuration loaded"
    );

    let store = store::Store::open(&config.db_path)
        .await
        .context("failed to open attendance database")?;

    let clock = Arc::new(SystemClock);
    let monitor = monitor::spawn_monitor(config.detection_threshold, config.log_cap());
    let service = service::AttendanceService::new(
        store.clone(),
        monitor,
        clock.clone(),
        config.presence_fraction,
    );

    let (events_tx, events_rx) = mpsc::channel(64);
    let schedule_changed = Arc::new(Notify::new());
    let scheduler = Scheduler::new(clock, events_tx);
    tokio::spawn(service.clone().run_events(events_rx));
    tokio::spawn(scheduler.run(
        store,
        Duration::from_secs(config.poll_interval_secs),
        schedule_changed.clone(),
    ));

    let bind_addr = config.bind_addr;
    let state = api::AppState {
        service,
        config: Arc::new(config),
        schedule_changed,
    };
    let routes = api::routes(state).with(warp::trace::request());

    let (addr, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(bind_addr, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
        })
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!(%addr, "classwatchd ready");
    server.await;
    tracing::info!("classwatchd shutting down");

    Ok(())
}
