//! Promobot service library.
//!
//! Wires the storage layer and the Telegram adapter into a runnable
//! service: the payment webhook endpoint (with its idempotency gate), the
//! health check, the AI backend client, and the shared application state.
//! The binary in `main.rs` adds the ingestion loop and graceful shutdown
//! on top.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod generator;
pub mod routes;
pub mod state;
pub mod webhook;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use generator::HttpGenerator;
pub use routes::create_router;
pub use state::AppState;
