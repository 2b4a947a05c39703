//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may name only the values it changes. Each type implements [`Default`]
//! with production values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use agentrun_core::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for a worker process.
///
/// ```json
/// {
///   "coordinator": { "renewEveryEvents": 25 },
///   "store": { "dbPath": "/var/lib/agentrun/runs.db" },
///   "logging": { "format": "json" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentRunSettings {
    /// Per-run coordination timing.
    pub coordinator: CoordinatorSettings,
    /// Retry policy for the terminal status write.
    pub finalize_retry: RetryPolicy,
    /// Stale-run reconciliation.
    pub reconciler: ReconcilerSettings,
    /// Response log tailing.
    pub tailer: TailerSettings,
    /// Durable status store.
    pub store: StoreSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Identity of this worker process.
    pub instance: InstanceSettings,
}

impl AgentRunSettings {
    /// Reject combinations that would break coordination.
    pub fn validate(&self) -> Result<()> {
        let c = &self.coordinator;
        if c.renew_every_events == 0 {
            return Err(invalid("coordinator.renewEveryEvents must be at least 1"));
        }
        if c.flush_every_events == 0 {
            return Err(invalid("coordinator.flushEveryEvents must be at least 1"));
        }
        if c.writer_queue_capacity == 0 {
            return Err(invalid("coordinator.writerQueueCapacity must be at least 1"));
        }
        if c.renew_interval_secs >= c.liveness_ttl_secs {
            return Err(invalid(
                "coordinator.renewIntervalSecs must be shorter than livenessTtlSecs",
            ));
        }
        if self.finalize_retry.max_attempts == 0 {
            return Err(invalid("finalizeRetry.maxAttempts must be at least 1"));
        }
        if self.store.pool_size == 0 {
            return Err(invalid("store.poolSize must be at least 1"));
        }
        if self.reconciler.batch_size == 0 {
            return Err(invalid("reconciler.batchSize must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> SettingsError {
    SettingsError::InvalidValue(msg.to_owned())
}

/// Timing for a single coordinated run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinatorSettings {
    /// Expiry of the liveness marker.
    pub liveness_ttl_secs: u64,
    /// Renew the marker every this many consumed events.
    pub renew_every_events: u64,
    /// Renew the marker at least this often, even with no events.
    pub renew_interval_secs: u64,
    /// Bounded wait for one control-channel poll.
    pub control_poll_timeout_ms: u64,
    /// Retention of the response log after the run ends.
    pub response_log_ttl_secs: u64,
    /// Upper bound on waiting for outstanding writes at teardown.
    pub drain_timeout_secs: u64,
    /// Capacity of the response writer queue.
    pub writer_queue_capacity: usize,
    /// Await a writer flush every this many events.
    pub flush_every_events: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            liveness_ttl_secs: 86_400,
            renew_every_events: 50,
            renew_interval_secs: 3_600,
            control_poll_timeout_ms: 500,
            response_log_ttl_secs: 86_400,
            drain_timeout_secs: 30,
            writer_queue_capacity: 256,
            flush_every_events: 50,
        }
    }
}

impl CoordinatorSettings {
    /// Liveness marker expiry.
    pub fn liveness_ttl(&self) -> Duration {
        Duration::from_secs(self.liveness_ttl_secs)
    }

    /// Time-based renewal interval.
    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_secs)
    }

    /// Control poll timeout.
    pub fn control_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.control_poll_timeout_ms)
    }

    /// Response log retention.
    pub fn response_log_ttl(&self) -> Duration {
        Duration::from_secs(self.response_log_ttl_secs)
    }

    /// Teardown drain timeout.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Stale-run reconciliation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcilerSettings {
    /// Run the periodic sweep inside the worker.
    pub enabled: bool,
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// Maximum records examined per sweep.
    pub batch_size: usize,
    /// Records younger than this are never reconciled.
    pub grace_secs: u64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            batch_size: 100,
            grace_secs: 120,
        }
    }
}

/// Response log tailing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TailerSettings {
    /// Fallback poll interval when no change notification arrives.
    pub poll_interval_ms: u64,
}

impl Default for TailerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
        }
    }
}

/// Durable status store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Database path. Relative paths resolve against the agentrun home directory.
    pub db_path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// `SQLite` busy timeout.
    pub busy_timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "database/runs.db".to_string(),
            pool_size: 8,
            busy_timeout_ms: 30_000,
        }
    }
}

impl StoreSettings {
    /// Resolve [`Self::db_path`] against `home`.
    pub fn resolve_db_path(&self, home: &Path) -> PathBuf {
        let path = Path::new(&self.db_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            home.join(path)
        }
    }
}

/// Output format for log lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level when `RUST_LOG` is unset.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Identity of this worker process.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceSettings {
    /// Fixed instance id. A short random id is generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_match_documented_values() {
        let s = AgentRunSettings::default();
        assert_eq!(s.coordinator.liveness_ttl(), Duration::from_secs(86_400));
        assert_eq!(s.coordinator.renew_every_events, 50);
        assert_eq!(s.coordinator.control_poll_timeout(), Duration::from_millis(500));
        assert_eq!(s.coordinator.drain_timeout(), Duration::from_secs(30));
        assert_eq!(s.finalize_retry.max_attempts, 3);
        assert_eq!(s.finalize_retry.base_delay_ms, 500);
        assert_eq!(s.tailer.poll_interval_ms, 1_000);
        assert_eq!(s.logging.format, LogFormat::Compact);
        assert!(s.instance.instance_id.is_none());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(AgentRunSettings::default()).unwrap();
        assert_eq!(value["coordinator"]["livenessTtlSecs"], 86_400);
        assert_eq!(value["finalizeRetry"]["maxAttempts"], 3);
        assert_eq!(value["logging"]["format"], "compact");
        assert!(value["instance"].get("instanceId").is_none());
    }

    #[test]
    fn relative_db_path_resolves_under_home() {
        let store = StoreSettings::default();
        let home = Path::new("/home/w/.agentrun");
        assert_eq!(
            store.resolve_db_path(home),
            PathBuf::from("/home/w/.agentrun/database/runs.db")
        );
    }

    #[test]
    fn absolute_db_path_kept() {
        let store = StoreSettings {
            db_path: "/var/lib/runs.db".into(),
            ..StoreSettings::default()
        };
        assert_eq!(
            store.resolve_db_path(Path::new("/ignored")),
            PathBuf::from("/var/lib/runs.db")
        );
    }

    #[test]
    fn zero_renew_cadence_rejected() {
        let mut s = AgentRunSettings::default();
        s.coordinator.renew_every_events = 0;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn renew_interval_must_be_below_ttl() {
        let mut s = AgentRunSettings::default();
        s.coordinator.renew_interval_secs = s.coordinator.liveness_ttl_secs;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("renewIntervalSecs"));
    }
}
