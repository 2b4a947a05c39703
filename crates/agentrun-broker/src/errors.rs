//! Broker error types.

use thiserror::Error;

/// Errors returned by broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The backing service could not be reached or refused the operation.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The subscription or connection has been closed.
    #[error("broker connection closed")]
    Closed,
    /// A key or channel name is malformed.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl BrokerError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
