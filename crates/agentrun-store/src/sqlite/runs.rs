//! Run repository: synchronous queries against the `runs` table.

use agentrun_core::{RunEvent, RunStatus};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::errors::{Result, StoreError};
use crate::types::{NewRun, RunRecord, RunUpdate, encode_timestamp};

/// Raw row from the `runs` table.
#[derive(Clone, Debug)]
struct RunRow {
    id: String,
    thread_id: String,
    instance_id: String,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    error: Option<String>,
    responses: String,
}

impl RunRow {
    fn into_record(self) -> Result<RunRecord> {
        let status: RunStatus = self
            .status
            .parse()
            .map_err(|e| StoreError::Internal(format!("run {}: {e}", self.id)))?;
        let responses: Vec<RunEvent> = serde_json::from_str(&self.responses)?;
        Ok(RunRecord {
            started_at: decode_timestamp(&self.id, &self.started_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(|ts| decode_timestamp(&self.id, ts))
                .transpose()?,
            id: self.id.into(),
            thread_id: self.thread_id.into(),
            instance_id: self.instance_id.into(),
            status,
            error: self.error,
            responses,
        })
    }
}

fn decode_timestamp(run_id: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Internal(format!("run {run_id}: bad timestamp {raw:?}: {e}")))
}

/// Queries over the `runs` table.
pub struct RunRepo;

impl RunRepo {
    const COLUMNS: &'static str =
        "id, thread_id, instance_id, status, started_at, completed_at, error, responses";

    fn map_row(row: &Row<'_>) -> rusqlite::Result<RunRow> {
        Ok(RunRow {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            instance_id: row.get(2)?,
            status: row.get(3)?,
            started_at: row.get(4)?,
            completed_at: row.get(5)?,
            error: row.get(6)?,
            responses: row.get(7)?,
        })
    }

    /// Insert a `running` record. A duplicate id is a conflict.
    pub fn insert(conn: &Connection, run: &NewRun) -> Result<RunRecord> {
        let inserted = conn.execute(
            "INSERT INTO runs (id, thread_id, instance_id, status, started_at, responses)
             VALUES (?1, ?2, ?3, 'running', ?4, '[]')
             ON CONFLICT(id) DO NOTHING",
            params![
                run.id.as_str(),
                run.thread_id.as_str(),
                run.instance_id.as_str(),
                encode_timestamp(run.started_at),
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::Conflict {
                run_id: run.id.to_string(),
                reason: "record already exists".into(),
            });
        }
        Self::get(conn, run.id.as_str())?.ok_or_else(|| StoreError::NotFound(run.id.to_string()))
    }

    /// Fetch one record.
    pub fn get(conn: &Connection, run_id: &str) -> Result<Option<RunRecord>> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", Self::COLUMNS);
        conn.query_row(&sql, params![run_id], Self::map_row)
            .optional()?
            .map(RunRow::into_record)
            .transpose()
    }

    /// Write a terminal update inside one transaction.
    pub fn finalize(conn: &mut Connection, run_id: &str, update: &RunUpdate) -> Result<RunRecord> {
        let tx = conn.transaction()?;
        let current = Self::get(&tx, run_id)?.ok_or_else(|| StoreError::NotFound(run_id.into()))?;

        if current.is_terminal() {
            if current.matches(update) {
                return Ok(current);
            }
            return Err(StoreError::terminal_conflict(
                run_id,
                current.status,
                update.status,
            ));
        }

        let _ = tx.execute(
            "UPDATE runs SET status = ?2, completed_at = ?3, error = ?4, responses = ?5
             WHERE id = ?1 AND status = 'running'",
            params![
                run_id,
                update.status.as_str(),
                encode_timestamp(update.completed_at),
                update.error,
                serde_json::to_string(&update.responses)?,
            ],
        )?;
        let stored = Self::get(&tx, run_id)?.ok_or_else(|| StoreError::NotFound(run_id.into()))?;
        tx.commit()?;
        Ok(stored)
    }

    /// Up to `limit` records with `status`, oldest first.
    pub fn list_by_status(
        conn: &Connection,
        status: RunStatus,
        limit: usize,
    ) -> Result<Vec<RunRecord>> {
        let sql = format!(
            "SELECT {} FROM runs WHERE status = ?1 ORDER BY started_at ASC, id ASC LIMIT ?2",
            Self::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![status.as_str(), limit], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(RunRow::into_record).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use agentrun_core::{InstanceId, RunId, ThreadId};
    use assert_matches::assert_matches;

    use super::*;
    use crate::sqlite::migrations::run_migrations;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        let _ = run_migrations(&conn).unwrap();
        conn
    }

    fn new_run(id: &str) -> NewRun {
        NewRun::new(RunId::from(id), ThreadId::from("t1"), InstanceId::from("i1"))
    }

    fn failed_update() -> RunUpdate {
        RunUpdate {
            status: RunStatus::Failed,
            completed_at: Utc::now(),
            error: Some("tool crashed".into()),
            responses: vec![RunEvent::assistant("hi"), RunEvent::failed("tool crashed")],
        }
    }

    #[test]
    fn insert_and_get_roundtrip_fields() {
        let conn = setup();
        let inserted = RunRepo::insert(&conn, &new_run("r1")).unwrap();
        assert_eq!(inserted.status, RunStatus::Running);
        assert_eq!(inserted.thread_id.as_str(), "t1");
        assert!(inserted.completed_at.is_none());
        assert!(RunRepo::get(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn duplicate_insert_conflicts() {
        let conn = setup();
        let _ = RunRepo::insert(&conn, &new_run("r1")).unwrap();
        assert_matches!(
            RunRepo::insert(&conn, &new_run("r1")),
            Err(StoreError::Conflict { .. })
        );
    }

    #[test]
    fn finalize_writes_terminal_fields() {
        let mut conn = setup();
        let _ = RunRepo::insert(&conn, &new_run("r1")).unwrap();
        let update = failed_update();

        let stored = RunRepo::finalize(&mut conn, "r1", &update).unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("tool crashed"));
        assert_eq!(stored.responses, update.responses);
        assert!(stored.matches(&update));
    }

    #[test]
    fn identical_finalize_is_noop() {
        let mut conn = setup();
        let _ = RunRepo::insert(&conn, &new_run("r1")).unwrap();
        let update = failed_update();

        let first = RunRepo::finalize(&mut conn, "r1", &update).unwrap();
        let second = RunRepo::finalize(&mut conn, "r1", &update).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn differing_finalize_conflicts() {
        let mut conn = setup();
        let _ = RunRepo::insert(&conn, &new_run("r1")).unwrap();
        let update = failed_update();
        let _ = RunRepo::finalize(&mut conn, "r1", &update).unwrap();

        let later = RunUpdate {
            completed_at: update.completed_at + chrono::Duration::seconds(1),
            ..update
        };
        assert_matches!(
            RunRepo::finalize(&mut conn, "r1", &later),
            Err(StoreError::Conflict { .. })
        );
    }

    #[test]
    fn finalize_missing_is_not_found() {
        let mut conn = setup();
        assert_matches!(
            RunRepo::finalize(&mut conn, "nope", &failed_update()),
            Err(StoreError::NotFound(_))
        );
    }

    #[test]
    fn list_by_status_orders_and_limits() {
        let conn = setup();
        let now = Utc::now();
        for (id, age) in [("b", 2), ("a", 3), ("c", 1)] {
            let mut run = new_run(id);
            run.started_at = now - chrono::Duration::seconds(age);
            let _ = RunRepo::insert(&conn, &run).unwrap();
        }
        let all = RunRepo::list_by_status(&conn, RunStatus::Running, 10).unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);

        let first = RunRepo::list_by_status(&conn, RunStatus::Running, 1).unwrap();
        assert_eq!(first.len(), 1);
        assert!(
            RunRepo::list_by_status(&conn, RunStatus::Completed, 10)
                .unwrap()
                .is_empty()
        );
    }
}
