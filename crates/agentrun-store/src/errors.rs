//! Status store error types.

use agentrun_core::RunStatus;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors returned by status store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Which migration failed and why.
        message: String,
    },

    /// No record exists for the run.
    #[error("run not found: {0}")]
    NotFound(String),

    /// The write contradicts an existing record.
    #[error("conflicting write for run {run_id}: {reason}")]
    Conflict {
        /// Run the write targeted.
        run_id: String,
        /// What the stored record already says.
        reason: String,
    },

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded, or a blocking task failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Conflict on a record that is already terminal with a different outcome.
    pub fn terminal_conflict(run_id: &str, stored: RunStatus, attempted: RunStatus) -> Self {
        Self::Conflict {
            run_id: run_id.to_owned(),
            reason: format!("record is already {stored}, refusing {attempted}"),
        }
    }

    /// Whether repeating the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Sqlite(err) => matches!(
                err.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            ),
            Self::Pool(_) | Self::Unavailable(_) => true,
            Self::Serde(_)
            | Self::Migration { .. }
            | Self::NotFound(_)
            | Self::Conflict { .. }
            | Self::Internal(_) => false,
        }
    }
}

/// Result type for status store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
