//! HTTP server exposing the conversation loop.
//!
//! # Endpoints
//!
//! - `GET  /health`       - Liveness check
//! - `GET  /capabilities` - List stored capabilities
//! - `GET  /metrics`      - Registry counters
//! - `POST /chat`         - Run one tool-calling turn

pub mod routes;

pub use routes::{app_router, AppState};
