//! Observability infrastructure for slotwise.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors used across the API
//! server and the expiry worker.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `slotwise_engine=debug`)
///
/// # Example
///
/// ```rust
/// use slotwise_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for reservation engine operations with standard fields.
///
/// # Example
///
/// ```rust
/// use slotwise_core::observability::reservation_span;
///
/// let span = reservation_span("create", "01890000-0000-4000-8000-000000000000");
/// let _guard = span.enter();
/// // ... run engine operation
/// ```
#[must_use]
pub fn reservation_span(operation: &str, slot_id: &str) -> Span {
    tracing::info_span!("reservation", op = operation, slot_id = slot_id)
}

/// Creates a span for expiry worker runs.
#[must_use]
pub fn expirer_span(run: u64) -> Span {
    tracing::info_span!("expirer", run = run)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }

    #[test]
    fn span_helpers_create_spans() {
        let span = reservation_span("create", "some-slot");
        let _guard = span.enter();
        tracing::info!("test message in span");

        let span = expirer_span(1);
        let _guard = span.enter();
        tracing::info!("expirer message");
    }
}
