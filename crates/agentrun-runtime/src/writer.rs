//! Response writer: ordered appends through a single bounded worker.
//!
//! Every event of a run goes through one MPSC queue to one consumer task,
//! which appends to the response log and then publishes the change ping, in
//! queue order. The queue is bounded, so a slow log applies backpressure to
//! the producer instead of piling up detached writes.

use std::sync::Arc;
use std::time::Duration;

use agentrun_broker::ResponseLog;
use agentrun_core::{RunEvent, RunId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::errors::RuntimeError;

/// Counters reported by the writer worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Events appended successfully.
    pub appended: u64,
    /// Events the log rejected.
    pub failed: u64,
}

enum WriteRequest {
    Append(RunEvent),
    Flush(oneshot::Sender<WriteStats>),
}

/// Single-writer handle for one run's response log.
pub struct ResponseWriter {
    run_id: RunId,
    tx: mpsc::Sender<WriteRequest>,
    worker: JoinHandle<WriteStats>,
}

impl ResponseWriter {
    /// Spawn the worker with a queue of `capacity` events.
    pub fn spawn(run_id: RunId, log: Arc<dyn ResponseLog>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(write_worker(rx, log, run_id.clone()));
        Self { run_id, tx, worker }
    }

    /// Queue `event`, waiting for queue space.
    pub async fn write(&self, event: RunEvent) -> Result<(), RuntimeError> {
        self.tx
            .send(WriteRequest::Append(event))
            .await
            .map_err(|_| self.closed_error())
    }

    /// Wait until every previously queued event has been handled.
    pub async fn flush(&self) -> Result<WriteStats, RuntimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WriteRequest::Flush(reply_tx))
            .await
            .map_err(|_| self.closed_error())?;
        reply_rx.await.map_err(|_| self.closed_error())
    }

    /// Close the queue and wait up to `timeout` for outstanding writes.
    ///
    /// Returns `None` when the drain timed out or the worker died; both are
    /// logged.
    pub async fn close(self, timeout: Duration) -> Option<WriteStats> {
        let Self { run_id, tx, worker } = self;
        drop(tx);
        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(stats)) => {
                debug!(%run_id, appended = stats.appended, failed = stats.failed, "response writer drained");
                Some(stats)
            }
            Ok(Err(join_err)) => {
                error!(%run_id, error = %join_err, "response writer task failed");
                None
            }
            Err(_) => {
                warn!(
                    %run_id,
                    timeout_secs = timeout.as_secs(),
                    "timed out waiting for outstanding response writes"
                );
                None
            }
        }
    }

    fn closed_error(&self) -> RuntimeError {
        if self.worker.is_finished() {
            RuntimeError::Internal(format!("response writer for {} exited", self.run_id))
        } else {
            RuntimeError::Internal(format!("response writer for {} closed", self.run_id))
        }
    }
}

async fn write_worker(
    mut rx: mpsc::Receiver<WriteRequest>,
    log: Arc<dyn ResponseLog>,
    run_id: RunId,
) -> WriteStats {
    let mut stats = WriteStats::default();
    while let Some(request) = rx.recv().await {
        match request {
            WriteRequest::Append(event) => match log.append(&run_id, &event).await {
                Ok(seq) => {
                    stats.appended += 1;
                    if let Err(e) = log.notify_change(&run_id).await {
                        warn!(%run_id, seq, error = %e, "change notification failed");
                    }
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(%run_id, kind = event.kind(), error = %e, "failed to append run event");
                }
            },
            WriteRequest::Flush(reply) => {
                let _ = reply.send(stats);
            }
        }
    }
    stats
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
