//! Events appended to a run's response log.
//!
//! Every event serializes as a JSON object with a `type` discriminator, e.g.
//! `{"type":"status","status":"completed","message":"..."}` or
//! `{"type":"assistant","content":"hi"}`. The log for a run always ends with a
//! `status` event carrying the run's terminal status.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::RunStatus;

/// A single record in a run's response log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// Lifecycle status. Terminal values end the run.
    Status {
        /// Status being reported.
        status: RunStatus,
        /// Optional human-readable detail (error text for failures).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Assistant output.
    Assistant {
        /// Content produced by the model.
        content: Value,
    },
    /// Result of a tool invocation.
    ToolResult {
        /// Tool name, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Tool output.
        content: Value,
    },
    /// Side-channel context (e.g. browser state, attachments).
    Context {
        /// Arbitrary context payload.
        content: Value,
    },
    /// Extension point for producer-specific event kinds.
    Custom {
        /// Producer-defined kind.
        name: String,
        /// Producer-defined payload.
        #[serde(default)]
        payload: Value,
    },
}

impl RunEvent {
    /// Assistant output event.
    pub fn assistant(content: impl Into<Value>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    /// Anonymous tool result event.
    pub fn tool_result(content: impl Into<Value>) -> Self {
        Self::ToolResult {
            name: None,
            content: content.into(),
        }
    }

    /// Status event.
    pub fn status(status: RunStatus, message: Option<String>) -> Self {
        Self::Status { status, message }
    }

    /// Synthesized completion event.
    pub fn completed() -> Self {
        Self::status(
            RunStatus::Completed,
            Some("Agent run completed successfully".into()),
        )
    }

    /// Failure event carrying the error text.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::status(RunStatus::Failed, Some(message.into()))
    }

    /// Stopped event, optionally carrying a reason.
    pub fn stopped(message: Option<String>) -> Self {
        Self::status(RunStatus::Stopped, message)
    }

    /// Short type tag, matching the `type` field on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Assistant { .. } => "assistant",
            Self::ToolResult { .. } => "tool_result",
            Self::Context { .. } => "context",
            Self::Custom { .. } => "custom",
        }
    }

    /// Terminal status carried by this event, if it is a terminal status event.
    pub fn terminal_status(&self) -> Option<RunStatus> {
        match self {
            Self::Status { status, .. } if status.is_terminal() => Some(*status),
            _ => None,
        }
    }

    /// Message attached to a status event.
    pub fn status_message(&self) -> Option<&str> {
        match self {
            Self::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
