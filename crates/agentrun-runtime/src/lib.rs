//! # agentrun-runtime
//!
//! Coordination of long-running agent runs across worker instances.
//!
//! - [`Coordinator`]: drives one run from liveness registration through
//!   terminal persistence and teardown
//! - [`ResponseWriter`]: single ordered writer into a run's response log
//! - [`RunControl`]: stop requests on the instance- and run-scoped channels
//! - [`ResponseTailer`]: follows a run's log until its terminal event
//! - [`Reconciler`]: finalizes runs whose worker stopped renewing its marker
//!
//! Every component is built from a [`WorkerContext`].

#![deny(unsafe_code)]

pub mod context;
pub mod control;
pub mod coordinator;
pub mod errors;
pub mod reconciler;
pub mod tailer;
mod watcher;
pub mod writer;

pub use context::WorkerContext;
pub use control::{RunControl, StopReceipt, StopTarget};
pub use coordinator::{Coordinator, EventStream, RunOutcome};
pub use errors::{ExecutionError, RuntimeError};
pub use reconciler::{ReconcileReport, Reconciler, ReconcilerConfig, spawn_reconciler};
pub use tailer::ResponseTailer;
pub use writer::{ResponseWriter, WriteStats};
