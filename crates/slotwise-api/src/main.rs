//! `slotwise-api` binary entrypoint.
//!
//! Loads configuration from environment variables, wires the engine to
//! its durable store and the Redis lock store, and serves HTTP until a
//! shutdown signal arrives. Expiry runs in the separate
//! `slotwise-expirer` process.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use tokio::sync::watch;

use slotwise_api::config::Config;
use slotwise_api::server::{AppState, Server};
use slotwise_core::SystemClock;
use slotwise_core::observability::{LogFormat, init_logging};
use slotwise_engine::ReservationEngine;
use slotwise_engine::lock::{RedisLocker, SlotLockManager};
use slotwise_engine::store::SledStore;

fn choose_log_format(config: &Config) -> LogFormat {
    if config.env.is_dev() {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("load configuration")?;
    init_logging(choose_log_format(&config));

    tracing::info!(
        env = %config.env,
        http_port = config.http_port,
        appointment_ttl_secs = config.appointment_ttl.as_secs(),
        lock_ttl_secs = config.lock_ttl.as_secs(),
        shutdown_timeout_secs = config.shutdown_timeout.as_secs(),
        "slotwise API starting"
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

    let locks = SlotLockManager::new(locker.clone(), config.lock_ttl);
    let hold_ttl = ChronoDuration::from_std(config.appointment_ttl)
        .context("appointment TTL out of range")?;
    let engine = ReservationEngine::new(store, locks, Arc::new(SystemClock), hold_ttl);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let shutdown_timeout = config.shutdown_timeout;
    let server = Server::new(AppState::new(config, engine, locker));

    let mut serve_rx = shutdown_rx.clone();
    let shutdown = async move {
        let _ = serve_rx.wait_for(|stopping| *stopping).await;
    };
    let mut server_handle = tokio::spawn(server.serve(shutdown));

    let mut signal_rx = shutdown_rx;
    tokio::select! {
        joined = &mut server_handle => {
            // The server exited on its own (e.g. bind failure).
            joined.context("server task failed")??;
            return Ok(());
        }
        _ = signal_rx.wait_for(|stopping| *stopping) => {}
    }

    tracing::info!("shutdown signal received");

    match tokio::time::timeout(shutdown_timeout, &mut server_handle).await {
        Ok(joined) => {
            joined.context("server task failed")??;
            tracing::info!("http server shut down gracefully");
        }
        Err(_) => {
            tracing::warn!("graceful shutdown timed out; aborting server");
            server_handle.abort();
        }
    }

    tracing::info!("slotwise API stopped");
    Ok(())
}
