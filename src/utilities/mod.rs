//! Shared utilities: error taxonomy and configuration.

pub mod config;
pub mod errors;

pub use config::{SclConfig, StoreBackend};
pub use errors::{BoxError, SclError, StoreError};
