//! API server implementation.
//!
//! Provides liveness, readiness, and appointment endpoints.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use slotwise_core::{Error, Result};
use slotwise_engine::{ReservationEngine, SlotLocker};

use crate::config::Config;
use crate::context::request_id_middleware;
use crate::routes;

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// The reservation engine.
    pub engine: ReservationEngine,
    /// Lock store handle, probed by readiness.
    pub locker: Arc<dyn SlotLocker>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .field("locker", &"<SlotLocker>")
            .finish()
    }
}

impl AppState {
    /// Creates new application state.
    #[must_use]
    pub fn new(config: Config, engine: ReservationEngine, locker: Arc<dyn SlotLocker>) -> Self {
        Self {
            config,
            engine,
            locker,
        }
    }
}

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    /// Service status.
    pub status: String,
    /// Deployment environment.
    pub env: String,
}

/// Readiness response with per-dependency status.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// Overall status: `ok`, `degraded`, or `error`.
    pub status: String,
    /// Deployment environment.
    pub env: String,
    /// Per-dependency status (`ok` / `down`).
    pub dependencies: BTreeMap<String, String>,
}

/// Shallow liveness probe; does not verify dependencies.
async fn live(State(state): State<AppState>) -> impl IntoResponse {
    Json(LivenessResponse {
        status: "ok".to_string(),
        env: state.config.env.to_string(),
    })
}

/// Readiness probe: pings the reservation store and the lock store.
///
/// The store being down is an error (nothing works without it); the lock
/// store being down alone is degraded, because confirm and expiry still
/// function.
async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let mut dependencies = BTreeMap::new();
    let mut status = "ok";

    match state.engine.store().ping().await {
        Ok(()) => {
            dependencies.insert("store".to_string(), "ok".to_string());
        }
        Err(e) => {
            tracing::warn!(error = %e, "store readiness probe failed");
            dependencies.insert("store".to_string(), "down".to_string());
            status = "error";
        }
    }

    match state.locker.ping().await {
        Ok(()) => {
            dependencies.insert("lock_store".to_string(), "ok".to_string());
        }
        Err(e) => {
            tracing::warn!(error = %e, "lock store readiness probe failed");
            dependencies.insert("lock_store".to_string(), "down".to_string());
            status = if status == "ok" { "degraded" } else { "error" };
        }
    }

    let http_status = if status == "error" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        http_status,
        Json(ReadinessResponse {
            status: status.to_string(),
            env: state.config.env.to_string(),
            dependencies,
        }),
    )
}

/// Builds the full router with middleware for the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .merge(routes::appointment_routes())
        // Middleware (order matters): trace outermost, request-id inside
        // it so the span carries the ID.
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The slotwise API server.
#[derive(Debug)]
pub struct Server {
    state: AppState,
}

impl Server {
    /// Creates a new server over prepared state.
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Returns the router, e.g. for in-process tests.
    #[must_use]
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Starts the server and blocks until `shutdown` resolves and
    /// in-flight requests drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind its port or fails
    /// while serving.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let port = self.state.config.http_port;
        let router = self.router();

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal {
                message: format!("failed to bind {addr}: {e}"),
            })?;

        tracing::info!(port, "slotwise API server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Internal {
                message: format!("server error: {e}"),
            })
    }
}
