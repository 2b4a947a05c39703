//! # agentrun-store
//!
//! Durable record of each run's lifecycle. The scheduler inserts a `running`
//! record once; the run coordinator writes the terminal status, completion
//! time, error and full event log exactly once through [`StatusStore::finalize`].
//!
//! - [`SqliteStatusStore`]: r2d2-pooled `SQLite` with WAL and versioned migrations
//! - [`MemoryStatusStore`]: same semantics over a concurrent map
//!
//! Stores never retry. Callers decide using [`StoreError::is_retryable`].

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod types;

pub use errors::{Result, StoreError};
pub use memory::MemoryStatusStore;
pub use sqlite::SqliteStatusStore;
pub use store::StatusStore;
pub use types::{NewRun, RunRecord, RunUpdate};
