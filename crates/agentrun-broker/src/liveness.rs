//! Liveness registry contract.
//!
//! A run that is executing keeps an expiring marker under
//! `active_run:{instance}:{run}`. Absence of the marker means the run is
//! either finished or its owner died; the TTL bounds how long a dead owner
//! can look alive.

use std::time::Duration;

use agentrun_core::keys::active_run_key;
use agentrun_core::{InstanceId, RunId};
use async_trait::async_trait;

use crate::errors::Result;

/// Value stored under every liveness marker.
pub const MARKER_VALUE: &str = "running";

/// Identifies a registered marker. Renewals always target the same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MarkerHandle {
    instance_id: InstanceId,
    run_id: RunId,
    key: String,
}

impl MarkerHandle {
    /// Handle for the marker of `run` on `instance`.
    pub fn new(instance_id: InstanceId, run_id: RunId) -> Self {
        let key = active_run_key(&instance_id, &run_id);
        Self {
            instance_id,
            run_id,
            key,
        }
    }

    /// Storage key of the marker.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Owning instance.
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Run the marker belongs to.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }
}

/// Expiring per-run liveness markers.
#[async_trait]
pub trait LivenessRegistry: Send + Sync {
    /// Set the marker with expiry `ttl`. Overwrites an existing marker.
    async fn register(
        &self,
        instance_id: &InstanceId,
        run_id: &RunId,
        ttl: Duration,
    ) -> Result<MarkerHandle>;

    /// Extend the marker's expiry to `ttl` from now.
    ///
    /// Returns `Ok(false)` when the marker no longer exists; it is not
    /// recreated.
    async fn renew(&self, handle: &MarkerHandle, ttl: Duration) -> Result<bool>;

    /// Delete the marker.
    async fn release(&self, handle: &MarkerHandle) -> Result<()>;

    /// Whether a live marker exists for `run` on `instance`.
    async fn is_alive(&self, instance_id: &InstanceId, run_id: &RunId) -> Result<bool>;

    /// Runs holding a live marker for `instance`.
    async fn list_instance_runs(&self, instance_id: &InstanceId) -> Result<Vec<RunId>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
