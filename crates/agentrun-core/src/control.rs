//! Out-of-band control signals.
//!
//! The wire payload on a control channel is a bare token (`STOP`,
//! `END_STREAM`, `ERROR`) so other processes can publish with plain strings.
//! Inside the crates the token is decoded into [`ControlSignal`] as soon as it
//! is received.

use std::fmt;
use std::str::FromStr;

use crate::status::RunStatus;

/// A signal delivered over an instance-scoped or run-scoped control channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlSignal {
    /// Request cancellation, or announce that a run ended stopped.
    Stop,
    /// The run completed and its log is final.
    EndStream,
    /// The run failed and its log is final.
    Error,
}

impl ControlSignal {
    /// Wire token for this signal.
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Stop => "STOP",
            Self::EndStream => "END_STREAM",
            Self::Error => "ERROR",
        }
    }

    /// Signal announcing a terminal status on the run-scoped channel.
    ///
    /// `Running` has no terminal signal and maps to `Stop`, which is also what
    /// a reader waiting on a run should treat as "no more events".
    pub fn for_terminal(status: RunStatus) -> Self {
        match status {
            RunStatus::Completed => Self::EndStream,
            RunStatus::Failed => Self::Error,
            RunStatus::Stopped | RunStatus::Running => Self::Stop,
        }
    }
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A payload on a control channel that is not a known token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown control signal: {0:?}")]
pub struct UnknownSignal(pub String);

impl FromStr for ControlSignal {
    type Err = UnknownSignal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "STOP" => Ok(Self::Stop),
            "END_STREAM" => Ok(Self::EndStream),
            "ERROR" => Ok(Self::Error),
            other => Err(UnknownSignal(other.to_owned())),
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
    fn decode_known_tokens() {
        assert_eq!("STOP".parse::<ControlSignal>().unwrap(), ControlSignal::Stop);
        assert_eq!(
            "END_STREAM".parse::<ControlSignal>().unwrap(),
            ControlSignal::EndStream
        );
        assert_eq!("ERROR".parse::<ControlSignal>().unwrap(), ControlSignal::Error);
    }

    #[test]
    fn decode_is_case_sensitive() {
        let err = "stop".parse::<ControlSignal>().unwrap_err();
        assert_eq!(err, UnknownSignal("stop".into()));
    }

    #[test]
    fn terminal_mapping() {
        assert_eq!(
            ControlSignal::for_terminal(RunStatus::Completed),
            ControlSignal::EndStream
        );
        assert_eq!(
            ControlSignal::for_terminal(RunStatus::Failed),
            ControlSignal::Error
        );
        assert_eq!(
            ControlSignal::for_terminal(RunStatus::Stopped),
            ControlSignal::Stop
        );
    }

    #[test]
    fn display_is_wire_token() {
        assert_eq!(ControlSignal::EndStream.to_string(), "END_STREAM");
    }
}
