//! Response log contract.
//!
//! Each run owns an append-only list of [`RunEvent`]s under
//! `agent_run:{run}:responses`. Appends are totally ordered by their 0-based
//! sequence. After each append the writer publishes a content-free ping on
//! `agent_run:{run}:new_response` so tailers know to re-read; pings may be
//! missed, so tailers must also poll.

use std::time::Duration;

use agentrun_core::{RunEvent, RunId};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::pubsub::BrokerMessage;

/// Per-run append-only event log.
#[async_trait]
pub trait ResponseLog: Send + Sync {
    /// Append `event` and return its sequence number.
    async fn append(&self, run_id: &RunId, event: &RunEvent) -> Result<u64>;

    /// Events with sequence in `from..to`, or `from..` when `to` is `None`.
    async fn read_range(&self, run_id: &RunId, from: u64, to: Option<u64>)
    -> Result<Vec<RunEvent>>;

    /// Number of events appended so far.
    async fn len(&self, run_id: &RunId) -> Result<u64>;

    /// Publish a change ping. Returns the number of receivers.
    async fn notify_change(&self, run_id: &RunId) -> Result<usize>;

    /// Subscribe to change pings for `run`.
    async fn subscribe_changes(&self, run_id: &RunId) -> Result<ChangeFeed>;

    /// Bound retention of the log to `ttl` from now.
    ///
    /// Returns `false` when the log does not exist.
    async fn expire(&self, run_id: &RunId, ttl: Duration) -> Result<bool>;
}

/// Stream of change pings for one run.
///
/// Dropping the feed unsubscribes.
#[derive(Debug)]
pub struct ChangeFeed {
    rx: mpsc::UnboundedReceiver<BrokerMessage>,
}

impl ChangeFeed {
    /// Wrap a receiver fed by the broker's subscription.
    pub fn new(rx: mpsc::UnboundedReceiver<BrokerMessage>) -> Self {
        Self { rx }
    }

    /// Wait for the next ping. Returns `false` once the feed is closed.
    pub async fn changed(&mut self) -> bool {
        let got = self.rx.recv().await.is_some();
        // Coalesce bursts: one re-read covers every queued ping.
        while self.rx.try_recv().is_ok() {}
        got
    }
}
