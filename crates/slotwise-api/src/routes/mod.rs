//! HTTP route handlers.

pub mod appointments;

use axum::Router;
use axum::routing::{get, post};

use crate::server::AppState;

/// Builds the appointment routes.
pub fn appointment_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/appointments",
            post(appointments::create).get(appointments::list),
        )
        .route("/appointments/:id", get(appointments::get_detail))
        .route("/appointments/:id/confirm", post(appointments::confirm))
}
