//! Run lifecycle status.
//!
//! A run is created `running` by the scheduler and moves exactly once to one
//! of the terminal statuses. Terminal records are never rewritten.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Durable status of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Executing on some instance.
    Running,
    /// The producer finished cleanly (or declared completion).
    Completed,
    /// The producer raised an error or declared failure.
    #[serde(alias = "error")]
    Failed,
    /// A stop was requested, or the producer declared itself stopped.
    Stopped,
}

impl RunStatus {
    /// Whether no further transitions are permitted.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Wire representation (`running`, `completed`, `failed`, `stopped`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status string that is not one of the known run statuses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown run status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for RunStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" | "error" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_is_non_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Stopped.is_terminal());
    }

    #[test]
    fn parse_accepts_error_alias() {
        assert_eq!("error".parse::<RunStatus>().unwrap(), RunStatus::Failed);
        assert_eq!("stopped".parse::<RunStatus>().unwrap(), RunStatus::Stopped);
        assert_eq!(
            "paused".parse::<RunStatus>().unwrap_err(),
            UnknownStatus("paused".into())
        );
    }

    #[test]
    fn serde_uses_lowercase_and_alias() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Completed).unwrap(),
            "\"completed\""
        );
        let failed: RunStatus = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(failed, RunStatus::Failed);
    }

    #[test]
    fn display_matches_wire() {
        for status in [
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Stopped,
        ] {
            assert_eq!(status.to_string().parse::<RunStatus>().unwrap(), status);
        }
    }
}
