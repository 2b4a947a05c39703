//! Runtime error types.

use agentrun_broker::BrokerError;
use agentrun_store::StoreError;

use crate::coordinator::RunOutcome;

/// Errors surfaced by the runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The run finished but its terminal status could not be persisted.
    ///
    /// Teardown has still run; `outcome` is what the store should have
    /// recorded.
    #[error("terminal status could not be persisted: {source}")]
    Finalize {
        /// The outcome that was not persisted.
        outcome: Box<RunOutcome>,
        /// Last store error.
        #[source]
        source: StoreError,
    },

    /// Broker operation failed.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Status store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A spawned task panicked or was cancelled.
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Internal / unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure reported by an event producer.
///
/// The message becomes the run's error text.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ExecutionError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ExecutionError {
    /// Error with a message only.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The message recorded as the run's error.
    pub fn message(&self) -> &str {
        &self.message
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
