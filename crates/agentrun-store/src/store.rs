//! Status store contract.

use agentrun_core::{RunId, RunStatus};
use async_trait::async_trait;

use crate::errors::Result;
use crate::types::{NewRun, RunRecord, RunUpdate};

/// Durable per-run status records.
///
/// Terminal records are immutable: [`finalize`](Self::finalize) with the
/// exact update already stored is a no-op, anything else on a terminal
/// record is [`StoreError::Conflict`](crate::StoreError::Conflict).
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Insert the initial `running` record.
    async fn insert_running(&self, run: &NewRun) -> Result<RunRecord>;

    /// Fetch a record.
    async fn get(&self, run_id: &RunId) -> Result<Option<RunRecord>>;

    /// Write the terminal status and return the stored record.
    async fn finalize(&self, run_id: &RunId, update: &RunUpdate) -> Result<RunRecord>;

    /// Up to `limit` records with `status`, oldest first.
    async fn list_by_status(&self, status: RunStatus, limit: usize) -> Result<Vec<RunRecord>>;
}
