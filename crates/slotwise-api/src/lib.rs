//! # slotwise-api
//!
//! The request gateway for the slotwise reservation service: env-driven
//! configuration, the axum HTTP surface with stable wire error codes,
//! and the server with graceful shutdown. The `slotwise-api` binary
//! serves HTTP; `slotwise-expirer` runs the background expiry worker as
//! its own process.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod context;
pub mod error;
pub mod routes;
pub mod server;

pub use config::{Config, Environment};
pub use error::{ApiError, ApiResult};
pub use server::{AppState, Server};
