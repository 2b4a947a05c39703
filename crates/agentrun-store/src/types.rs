//! Run record types.

use agentrun_core::{InstanceId, RunEvent, RunId, RunStatus, ThreadId};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Initial record written when a run is scheduled.
#[derive(Clone, Debug, PartialEq)]
pub struct NewRun {
    /// Run identifier.
    pub id: RunId,
    /// Conversation the run belongs to.
    pub thread_id: ThreadId,
    /// Worker instance that will execute the run.
    pub instance_id: InstanceId,
    /// Scheduling time.
    pub started_at: DateTime<Utc>,
}

impl NewRun {
    /// A run scheduled now.
    pub fn new(id: RunId, thread_id: ThreadId, instance_id: InstanceId) -> Self {
        Self {
            id,
            thread_id,
            instance_id,
            started_at: Utc::now(),
        }
    }
}

/// Durable record of one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    /// Run identifier.
    pub id: RunId,
    /// Conversation the run belongs to.
    pub thread_id: ThreadId,
    /// Worker instance that executed the run.
    pub instance_id: InstanceId,
    /// Current status.
    pub status: RunStatus,
    /// Scheduling time.
    pub started_at: DateTime<Utc>,
    /// Set once, by the terminal write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure or stop reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Full response log snapshot taken at the terminal write.
    pub responses: Vec<RunEvent>,
}

impl RunRecord {
    /// A fresh `running` record.
    pub fn running(new: &NewRun) -> Self {
        Self {
            id: new.id.clone(),
            thread_id: new.thread_id.clone(),
            instance_id: new.instance_id.clone(),
            status: RunStatus::Running,
            started_at: new.started_at,
            completed_at: None,
            error: None,
            responses: Vec::new(),
        }
    }

    /// Whether the record holds a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether applying `update` would leave the record unchanged.
    pub fn matches(&self, update: &RunUpdate) -> bool {
        self.status == update.status
            && self.completed_at.map(encode_timestamp)
                == Some(encode_timestamp(update.completed_at))
            && self.error == update.error
            && self.responses == update.responses
    }

    /// Apply a terminal update.
    pub fn apply(&mut self, update: RunUpdate) {
        self.status = update.status;
        self.completed_at = Some(update.completed_at);
        self.error = update.error;
        self.responses = update.responses;
    }
}

/// The terminal write for a run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunUpdate {
    /// Terminal status.
    pub status: RunStatus,
    /// Completion time. Fixed once so retries write identical values.
    pub completed_at: DateTime<Utc>,
    /// Failure or stop reason.
    pub error: Option<String>,
    /// Full response log snapshot.
    pub responses: Vec<RunEvent>,
}

/// Canonical text form of a timestamp, as stored.
pub fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
