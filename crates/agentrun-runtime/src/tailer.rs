//! Follow a run's response log as it grows.
//!
//! Readers wake on the log's change pings, on a fallback poll interval, and on
//! terminal signals published to the run-scoped control channel. Reads are
//! by sequence cursor, so a spurious or duplicated wake-up only costs one
//! empty read.

use std::sync::Arc;
use std::time::Duration;

use agentrun_broker::{
    BrokerError, ChangeFeed, ControlChannel, ControlMessage, ControlSubscription, ResponseLog,
};
use agentrun_core::keys::run_control_channel;
use agentrun_core::{ControlSignal, RunEvent, RunId};
use futures::Stream;
use tracing::{debug, warn};

use crate::context::WorkerContext;
use crate::errors::RuntimeError;

enum Wake {
    Changed,
    FeedClosed,
    Poll,
    Signal(ControlSignal),
    SignalsLost,
}

/// Streams a run's events to readers.
#[derive(Clone)]
pub struct ResponseTailer {
    log: Arc<dyn ResponseLog>,
    control: Arc<dyn ControlChannel>,
    poll_interval: Duration,
}

impl ResponseTailer {
    /// Tailer over the services in `ctx`, polling at `tailer.pollIntervalMs`.
    pub fn new(ctx: &WorkerContext) -> Self {
        Self {
            log: Arc::clone(&ctx.log),
            control: Arc::clone(&ctx.control),
            poll_interval: Duration::from_millis(ctx.settings.tailer.poll_interval_ms),
        }
    }

    /// Override the fallback poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Events of `run_id` from sequence `from` onwards, as `(sequence, event)`.
    ///
    /// Ends after yielding a terminal status event, or when a terminal signal
    /// arrives and the log holds nothing further. A read error is yielded once
    /// and ends the stream.
    pub fn tail(
        &self,
        run_id: RunId,
        from: u64,
    ) -> impl Stream<Item = Result<(u64, RunEvent), RuntimeError>> + Send + 'static {
        let log = Arc::clone(&self.log);
        let control = Arc::clone(&self.control);
        let poll_interval = self.poll_interval;

        async_stream::stream! {
            // Subscribe before the first read so no ping is missed in between.
            let mut feed = match log.subscribe_changes(&run_id).await {
                Ok(feed) => Some(feed),
                Err(e) => {
                    warn!(%run_id, error = %e, "change feed unavailable; polling only");
                    None
                }
            };
            let mut signals = match control.subscribe(&[run_control_channel(&run_id)]).await {
                Ok(subscription) => Some(subscription),
                Err(e) => {
                    warn!(%run_id, error = %e, "control subscription unavailable for tailer");
                    None
                }
            };

            let mut cursor = from;
            let mut ended_by_signal = false;
            'tail: loop {
                let events = match log.read_range(&run_id, cursor, None).await {
                    Ok(events) => events,
                    Err(e) => {
                        yield Err(RuntimeError::from(e));
                        break 'tail;
                    }
                };
                for event in events {
                    let sequence = cursor;
                    cursor += 1;
                    let terminal = event.terminal_status().is_some();
                    yield Ok((sequence, event));
                    if terminal {
                        break 'tail;
                    }
                }
                if ended_by_signal {
                    debug!(%run_id, cursor, "terminal signal with no terminal event in log");
                    break 'tail;
                }

                let wake = tokio::select! {
                    changed = wait_for_change(&mut feed) => {
                        if changed { Wake::Changed } else { Wake::FeedClosed }
                    }
                    polled = wait_for_signal(&mut signals, poll_interval) => match polled {
                        Ok(Some(message)) => Wake::Signal(message.signal),
                        Ok(None) => Wake::Poll,
                        Err(_) => Wake::SignalsLost,
                    },
                    () = tokio::time::sleep(poll_interval) => Wake::Poll,
                };
                match wake {
                    Wake::Changed | Wake::Poll => {}
                    Wake::FeedClosed => {
                        warn!(%run_id, "change feed closed; polling only");
                        feed = None;
                    }
                    Wake::SignalsLost => {
                        warn!(%run_id, "control subscription lost; polling only");
                        signals = None;
                    }
                    // STOP only means the run will write its stopped event soon.
                    Wake::Signal(ControlSignal::Stop) => {}
                    Wake::Signal(signal) => {
                        debug!(%run_id, %signal, "terminal signal received");
                        ended_by_signal = true;
                    }
                }
            }

            if let Some(mut subscription) = signals {
                let _ = subscription.unsubscribe().await;
            }
        }
    }
}

impl std::fmt::Debug for ResponseTailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseTailer")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

async fn wait_for_change(feed: &mut Option<ChangeFeed>) -> bool {
    match feed {
        Some(feed) => feed.changed().await,
        None => std::future::pending().await,
    }
}

async fn wait_for_signal(
    signals: &mut Option<Box<dyn ControlSubscription>>,
    timeout: Duration,
) -> Result<Option<ControlMessage>, BrokerError> {
    match signals {
        Some(subscription) => subscription.next_message(timeout).await,
        None => std::future::pending().await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
