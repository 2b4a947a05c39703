//! `SQLite`-backed status store.
//!
//! Queries are synchronous ([`runs::RunRepo`]); [`SqliteStatusStore`] runs
//! each one on a pooled connection inside `spawn_blocking`.

pub mod connection;
pub mod migrations;
pub mod runs;

use std::path::Path;

use agentrun_core::{RunId, RunStatus};
use async_trait::async_trait;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{Result, StoreError};
use crate::store::StatusStore;
use crate::types::{NewRun, RunRecord, RunUpdate};
use connection::{ConnectionConfig, ConnectionPool};
use runs::RunRepo;

/// [`StatusStore`] over an r2d2 `SQLite` pool.
#[derive(Clone)]
pub struct SqliteStatusStore {
    pool: ConnectionPool,
}

impl SqliteStatusStore {
    /// Open (or create) the database at `path` and apply migrations.
    pub fn open(path: &Path, config: &ConnectionConfig) -> Result<Self> {
        info!(path = %path.display(), pool_size = config.pool_size, "opening run store");
        Self::from_pool(connection::new_file(path, config)?)
    }

    /// Single-connection in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::from_pool(connection::new_in_memory()?)
    }

    /// Wrap an existing pool and apply migrations.
    pub fn from_pool(pool: ConnectionPool) -> Result<Self> {
        let conn = pool.get()?;
        let applied = migrations::run_migrations(&conn)?;
        debug!(applied, "run store schema ready");
        drop(conn);
        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("blocking store task failed: {e}")))?
    }
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn insert_running(&self, run: &NewRun) -> Result<RunRecord> {
        let run = run.clone();
        self.with_conn(move |conn| RunRepo::insert(conn, &run)).await
    }

    async fn get(&self, run_id: &RunId) -> Result<Option<RunRecord>> {
        let run_id = run_id.clone();
        self.with_conn(move |conn| RunRepo::get(conn, run_id.as_str()))
            .await
    }

    async fn finalize(&self, run_id: &RunId, update: &RunUpdate) -> Result<RunRecord> {
        let run_id = run_id.clone();
        let update = update.clone();
        self.with_conn(move |conn| RunRepo::finalize(conn, run_id.as_str(), &update))
            .await
    }

    async fn list_by_status(&self, status: RunStatus, limit: usize) -> Result<Vec<RunRecord>> {
        self.with_conn(move |conn| RunRepo::list_by_status(conn, status, limit))
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
