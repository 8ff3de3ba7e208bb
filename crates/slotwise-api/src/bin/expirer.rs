//! `slotwise-expirer` binary entrypoint.
//!
//! Runs the expiry worker as its own process; the API server only serves
//! HTTP. The worker must own the data directory while it runs; the
//! embedded store is single-process.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use tokio::sync::watch;

use slotwise_api::config::Config;
use slotwise_core::SystemClock;
use slotwise_core::observability::{LogFormat, init_logging};
use slotwise_engine::lock::{RedisLocker, SlotLockManager};
use slotwise_engine::store::SledStore;
use slotwise_engine::{ExpiryWorker, ReservationEngine};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("load configuration")?;
    init_logging(if config.env.is_dev() {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    });

    tracing::info!(
        env = %config.env,
        interval_secs = config.worker_interval.as_secs(),
        "expiry worker starting"
    );

    let store = Arc::new(
        SledStore::open(&config.data_dir)
            .await
            .context("open reservation store")?,
    );
    tracing::info!(data_dir = %config.data_dir, "opened reservation store");

    let locker = Arc::new(
        RedisLocker::connect(&config.redis_url)
            .await
            .context("connect to lock store")?,
    );
    tracing::info!("connected to lock store");

    let locks = SlotLockManager::new(locker, config.lock_ttl);
    let hold_ttl = ChronoDuration::from_std(config.appointment_ttl)
        .context("appointment TTL out of range")?;
    let engine = ReservationEngine::new(store, locks, Arc::new(SystemClock), hold_ttl);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    ExpiryWorker::new(engine, config.worker_interval)
        .run(shutdown_rx)
        .await;

    tracing::info!("expiry worker stopped");
    Ok(())
}
