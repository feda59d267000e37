//! Error types for the capability core.
//!
//! Two families: [`SclError`] is what registry and conversation callers see,
//! [`StoreError`] is what storage backends report from administrative
//! operations. Read paths of a store never surface a `StoreError`; they
//! degrade to empty results instead.

use thiserror::Error;

/// Fault type returned by capability callables.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the registry and the conversation loop.
#[derive(Debug, Error)]
pub enum SclError {
    /// Argument mismatch or runtime failure inside a capability body.
    #[error("Invocation of '{name}' failed: {reason}")]
    Invocation {
        name: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A skill-type capability was passed to `invoke`.
    #[error("Capability '{name}' is a skill and cannot be invoked")]
    InvalidCapabilityType { name: String },

    /// The embedding or completion provider failed or timed out.
    #[error("Upstream provider '{provider}' unavailable: {message}")]
    UpstreamUnavailable { provider: String, message: String },

    /// Store not initialized or unreachable on a path that cannot degrade.
    #[error("Capability store unavailable: {0}")]
    StoreUnavailable(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SclError {
    /// Invocation failure without an underlying fault.
    pub fn invocation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invocation {
            name: name.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Invocation failure wrapping the fault raised by the capability body.
    pub fn invocation_fault(name: impl Into<String>, fault: BoxError) -> Self {
        Self::Invocation {
            name: name.into(),
            reason: fault.to_string(),
            source: Some(fault),
        }
    }

    pub fn upstream(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// Leading part of an upstream response body, cut at a char boundary.
pub fn body_preview(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Errors from capability store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Name uniqueness violated on insert.
    #[error("Capability '{0}' already exists")]
    Duplicate(String),

    /// Update or delete of a capability that is not stored.
    #[error("Capability '{0}' not found")]
    NotFound(String),

    /// The backend cannot hold this kind of capability.
    #[error("Unsupported by this store: {0}")]
    Unsupported(String),

    /// A stored record could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The backend has not been initialized.
    #[error("Store not initialized: {0}")]
    Uninitialized(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Embedding the description during insert failed.
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// A blocking storage task panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<SclError> for StoreError {
    fn from(err: SclError) -> Self {
        StoreError::Embedding(err.to_string())
    }
}
