//! In-memory status store.

use agentrun_core::{RunId, RunStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::errors::{Result, StoreError};
use crate::store::StatusStore;
use crate::types::{NewRun, RunRecord, RunUpdate};

/// [`StatusStore`] over a concurrent map. State is lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    records: DashMap<RunId, RunRecord>,
}

impl MemoryStatusStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn insert_running(&self, run: &NewRun) -> Result<RunRecord> {
        match self.records.entry(run.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict {
                run_id: run.id.to_string(),
                reason: "record already exists".into(),
            }),
            Entry::Vacant(slot) => {
                let record = RunRecord::running(run);
                let _ = slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn get(&self, run_id: &RunId) -> Result<Option<RunRecord>> {
        Ok(self.records.get(run_id).map(|r| r.value().clone()))
    }

    async fn finalize(&self, run_id: &RunId, update: &RunUpdate) -> Result<RunRecord> {
        let mut record = self
            .records
            .get_mut(run_id)
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;
        if record.is_terminal() {
            if record.matches(update) {
                return Ok(record.clone());
            }
            return Err(StoreError::terminal_conflict(
                run_id.as_str(),
                record.status,
                update.status,
            ));
        }
        record.apply(update.clone());
        Ok(record.clone())
    }

    async fn list_by_status(&self, status: RunStatus, limit: usize) -> Result<Vec<RunRecord>> {
        let mut matching: Vec<RunRecord> = self
            .records
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.value().clone())
            .collect();
        matching.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        matching.truncate(limit);
        Ok(matching)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use agentrun_core::{InstanceId, RunEvent, ThreadId};
    use assert_matches::assert_matches;
    use chrono::{Duration, Utc};

    use super::*;

    fn new_run(id: &str) -> NewRun {
        NewRun::new(RunId::from(id), ThreadId::from("t"), InstanceId::from("i"))
    }

    fn completed() -> RunUpdate {
        RunUpdate {
            status: RunStatus::Completed,
            completed_at: Utc::now(),
            error: None,
            responses: vec![RunEvent::assistant("hi"), RunEvent::completed()],
        }
    }

    #[tokio::test]
    async fn insert_then_get() {
        let store = MemoryStatusStore::new();
        let _ = store.insert_running(&new_run("r")).await.unwrap();
        let record = store.get(&RunId::from("r")).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Running);
        assert!(store.get(&RunId::from("x")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = MemoryStatusStore::new();
        let _ = store.insert_running(&new_run("r")).await.unwrap();
        assert_matches!(
            store.insert_running(&new_run("r")).await,
            Err(StoreError::Conflict { .. })
        );
    }

    #[tokio::test]
    async fn finalize_is_idempotent() {
        let store = MemoryStatusStore::new();
        let _ = store.insert_running(&new_run("r")).await.unwrap();
        let update = completed();

        let first = store.finalize(&RunId::from("r"), &update).await.unwrap();
        let second = store.finalize(&RunId::from("r"), &update).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.status, RunStatus::Completed);
        assert_eq!(second.responses.len(), 2);
    }

    #[tokio::test]
    async fn differing_terminal_write_conflicts() {
        let store = MemoryStatusStore::new();
        let _ = store.insert_running(&new_run("r")).await.unwrap();
        let update = completed();
        let _ = store.finalize(&RunId::from("r"), &update).await.unwrap();

        let other = RunUpdate {
            status: RunStatus::Failed,
            error: Some("late".into()),
            ..update
        };
        assert_matches!(
            store.finalize(&RunId::from("r"), &other).await,
            Err(StoreError::Conflict { .. })
        );
        let record = store.get(&RunId::from("r")).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn finalize_missing_is_not_found() {
        let store = MemoryStatusStore::new();
        assert_matches!(
            store.finalize(&RunId::from("nope"), &completed()).await,
            Err(StoreError::NotFound(id)) if id == "nope"
        );
    }

    #[tokio::test]
    async fn list_by_status_oldest_first() {
        let store = MemoryStatusStore::new();
        let now = Utc::now();
        for (id, age) in [("new", 1), ("old", 10), ("mid", 5)] {
            let mut run = new_run(id);
            run.started_at = now - Duration::minutes(age);
            let _ = store.insert_running(&run).await.unwrap();
        }
        let _ = store.finalize(&RunId::from("mid"), &completed()).await.unwrap();

        let running = store.list_by_status(RunStatus::Running, 10).await.unwrap();
        let ids: Vec<&str> = running.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["old", "new"]);

        let limited = store.list_by_status(RunStatus::Running, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
