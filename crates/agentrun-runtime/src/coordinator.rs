//! Run coordinator: drives one run from registration to teardown.
//!
//! For each run:
//! 1. Register the liveness marker. If that keeps failing the run ends as
//!    failed before the producer is polled.
//! 2. Subscribe to the instance-scoped and run-scoped control channels and
//!    start the watcher (remote stop + marker renewal).
//! 3. Consume the producer, writing each event through the response writer.
//!    Cancellation is checked between events, never during one.
//! 4. Append the terminal status event when the producer did not.
//! 5. Flush, read back the log and persist the terminal record, retrying
//!    retryable store errors with exponential backoff.
//! 6. Publish the terminal signal on the run-scoped channel.
//! 7. Tear down: stop the watcher, release the marker, bound log retention,
//!    drain the writer.
//!
//! Every failure after step 3 is logged and the remaining steps still run.

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use agentrun_broker::{BrokerError, MarkerHandle};
use agentrun_core::keys::{instance_control_channel, run_control_channel};
use agentrun_core::{ControlSignal, RunEvent, RunId, RunStatus};
use agentrun_store::{RunRecord, RunUpdate, StoreError};
use chrono::Utc;
use futures::{FutureExt, Stream, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::context::WorkerContext;
use crate::errors::{ExecutionError, RuntimeError};
use crate::watcher::{Watch, WatchConfig, WatchReport};
use crate::writer::ResponseWriter;

/// Events produced by an agent run.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RunEvent, ExecutionError>> + Send>>;

/// Message of the synthesized event for a producer-declared failure or stop
/// that carried no message of its own.
pub(crate) fn default_end_message(status: RunStatus) -> String {
    format!("Run ended with status: {status}")
}

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    /// Run identifier.
    pub run_id: RunId,
    /// Terminal status.
    pub status: RunStatus,
    /// Failure or stop reason.
    pub error: Option<String>,
    /// Events the producer yielded that were written.
    pub events_produced: u64,
    /// Length of the persisted response log.
    pub log_len: usize,
}

/// Why the consume loop ended.
#[derive(Debug)]
enum Ending {
    Exhausted,
    Stopped,
    Declared(RunStatus, Option<String>),
    Failed(String),
}

impl Ending {
    /// Terminal status and error text.
    fn resolve(&self) -> (RunStatus, Option<String>) {
        match self {
            Self::Exhausted => (RunStatus::Completed, None),
            Self::Stopped => (RunStatus::Stopped, None),
            Self::Declared(RunStatus::Completed, _) => (RunStatus::Completed, None),
            Self::Declared(status, message) => (
                *status,
                Some(
                    message
                        .clone()
                        .unwrap_or_else(|| default_end_message(*status)),
                ),
            ),
            Self::Failed(message) => (RunStatus::Failed, Some(message.clone())),
        }
    }

    /// Event to append so the log ends in a terminal status.
    fn synthesized_event(&self) -> Option<RunEvent> {
        match self {
            Self::Exhausted => Some(RunEvent::completed()),
            Self::Stopped => Some(RunEvent::stopped(None)),
            Self::Failed(message) => Some(RunEvent::failed(message.clone())),
            Self::Declared(..) => None,
        }
    }
}

/// Drives runs for one worker instance.
#[derive(Clone, Debug)]
pub struct Coordinator {
    ctx: WorkerContext,
}

impl Coordinator {
    /// Coordinator over `ctx`.
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Context this coordinator runs with.
    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Run `producer` to completion as `run_id` on a spawned task.
    pub fn spawn(
        &self,
        run_id: RunId,
        producer: EventStream,
    ) -> JoinHandle<Result<RunOutcome, RuntimeError>> {
        let this = self.clone();
        tokio::spawn(async move { this.run(run_id, producer).await })
    }

    /// Drive one run.
    ///
    /// Returns [`RuntimeError::Finalize`] when the terminal record could not
    /// be written; teardown has still completed in that case.
    #[instrument(skip_all, fields(run_id = %run_id, instance_id = %self.ctx.instance_id))]
    pub async fn run(
        &self,
        run_id: RunId,
        producer: EventStream,
    ) -> Result<RunOutcome, RuntimeError> {
        let cfg = &self.ctx.settings.coordinator;
        info!("run starting");

        let writer = ResponseWriter::spawn(
            run_id.clone(),
            Arc::clone(&self.ctx.log),
            cfg.writer_queue_capacity,
        );
        let shutdown = CancellationToken::new();
        let mut written = Vec::new();

        // 1-4. Register, watch, consume. A run that cannot be registered is
        // never started: the producer is dropped unpolled.
        let (marker, watcher, ending, events_produced) =
            match self.register_with_retry(&run_id).await {
                Ok(marker) => {
                    let stop = CancellationToken::new();
                    let consumed = Arc::new(AtomicU64::new(0));
                    let watcher = self
                        .start_watcher(&run_id, &marker, &stop, &shutdown, &consumed)
                        .await;
                    let (ending, produced) = self
                        .consume(producer, &writer, &stop, &consumed, &mut written)
                        .await;
                    (Some(marker), Some(watcher), ending, produced)
                }
                Err(e) => {
                    error!(error = %e, "liveness registration failed; run not started");
                    drop(producer);
                    let ending = Ending::Failed(format!("liveness registration failed: {e}"));
                    (None, None, ending, 0)
                }
            };
        if let Some(event) = ending.synthesized_event() {
            if let Err(e) = writer.write(event.clone()).await {
                error!(error = %e, "failed to queue terminal event");
            }
            written.push(event);
        }
        let (status, error) = ending.resolve();
        info!(%status, events_produced, "run ended");

        // 5. Persist the terminal record.
        if let Err(e) = writer.flush().await {
            warn!(error = %e, "response writer flush failed");
        }
        let responses = match self.ctx.log.read_range(&run_id, 0, None).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "response log read-back failed; persisting written events");
                written
            }
        };
        let outcome = RunOutcome {
            run_id: run_id.clone(),
            status,
            error: error.clone(),
            events_produced,
            log_len: responses.len(),
        };
        let update = RunUpdate {
            status,
            completed_at: Utc::now(),
            error,
            responses,
        };
        let persisted = self.finalize_with_retry(&run_id, &update).await;
        if let Err(e) = &persisted {
            error!(
                %status,
                error = %e,
                "terminal inconsistency: run ended but its status could not be persisted"
            );
        }

        // 6. Terminal signal.
        let signal = ControlSignal::for_terminal(status);
        if let Err(e) = self
            .ctx
            .control
            .publish(&run_control_channel(&run_id), signal)
            .await
        {
            warn!(%signal, error = %e, "failed to publish terminal signal");
        }

        // 7. Teardown.
        shutdown.cancel();
        if let Some(watcher) = watcher {
            match watcher.await {
                Ok(report) => debug!(
                    renewals = report.renewals,
                    stop_requested = report.stop_requested,
                    "watcher finished"
                ),
                Err(e) if e.is_cancelled() => debug!("watcher cancelled"),
                Err(e) => warn!(error = %e, "watcher task failed"),
            }
        }
        if let Some(marker) = marker {
            if let Err(e) = self.ctx.liveness.release(&marker).await {
                warn!(error = %e, "failed to release liveness marker");
            }
        }
        if let Err(e) = self.ctx.log.expire(&run_id, cfg.response_log_ttl()).await {
            warn!(error = %e, "failed to set response log retention");
        }
        let _ = writer.close(cfg.drain_timeout()).await;

        match persisted {
            Ok(_) => Ok(outcome),
            Err(source) => Err(RuntimeError::Finalize {
                outcome: Box::new(outcome),
                source,
            }),
        }
    }

    /// Step 1: register the liveness marker, retrying transient broker
    /// errors on the finalize backoff.
    async fn register_with_retry(&self, run_id: &RunId) -> Result<MarkerHandle, BrokerError> {
        let policy = &self.ctx.settings.finalize_retry;
        let ttl = self.ctx.settings.coordinator.liveness_ttl();
        let mut attempt = 0u32;
        loop {
            match self
                .ctx
                .liveness
                .register(&self.ctx.instance_id, run_id, ttl)
                .await
            {
                Ok(marker) => return Ok(marker),
                Err(e) if e.is_transient() && policy.allows_another(attempt + 1) => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "liveness registration failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Step 2: subscribe to both control channels and spawn the watcher.
    async fn start_watcher(
        &self,
        run_id: &RunId,
        marker: &MarkerHandle,
        stop: &CancellationToken,
        shutdown: &CancellationToken,
        consumed: &Arc<AtomicU64>,
    ) -> JoinHandle<WatchReport> {
        let cfg = &self.ctx.settings.coordinator;
        let channels = [
            instance_control_channel(run_id, &self.ctx.instance_id),
            run_control_channel(run_id),
        ];
        let subscription = match self.ctx.control.subscribe(&channels).await {
            Ok(sub) => Some(sub),
            Err(e) => {
                warn!(error = %e, "control subscription failed; remote stop unavailable");
                None
            }
        };
        tokio::spawn(
            Watch {
                config: WatchConfig {
                    poll_timeout: cfg.control_poll_timeout(),
                    renew_every_events: cfg.renew_every_events,
                    renew_interval: cfg.renew_interval(),
                    liveness_ttl: cfg.liveness_ttl(),
                },
                subscription,
                liveness: Arc::clone(&self.ctx.liveness),
                marker: marker.clone(),
                consumed: Arc::clone(consumed),
                stop: stop.clone(),
                shutdown: shutdown.clone(),
            }
            .run(),
        )
    }

    /// Steps 3-4: pull events until the producer ends, fails, declares a
    /// terminal status, or a stop is requested.
    async fn consume(
        &self,
        mut producer: EventStream,
        writer: &ResponseWriter,
        stop: &CancellationToken,
        consumed: &AtomicU64,
        written: &mut Vec<RunEvent>,
    ) -> (Ending, u64) {
        let flush_every = self.ctx.settings.coordinator.flush_every_events.max(1);
        let mut produced = 0u64;

        let ending = loop {
            if stop.is_cancelled() {
                break Ending::Stopped;
            }
            // The step in flight always runs to completion.
            let next = AssertUnwindSafe(producer.next()).catch_unwind().await;
            if stop.is_cancelled() {
                debug!("discarding event received after stop");
                break Ending::Stopped;
            }

            let event = match next {
                Ok(None) => break Ending::Exhausted,
                Ok(Some(Ok(event))) => event,
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "producer failed");
                    break Ending::Failed(e.message().to_owned());
                }
                Err(panic) => {
                    let msg = panic_message(panic.as_ref());
                    error!(panic = %msg, "producer panicked");
                    break Ending::Failed(format!("producer panicked: {msg}"));
                }
            };

            let declared = event
                .terminal_status()
                .map(|status| Ending::Declared(status, event.status_message().map(str::to_owned)));
            if let Err(e) = writer.write(event.clone()).await {
                error!(error = %e, "response writer unavailable");
                break Ending::Failed(e.to_string());
            }
            written.push(event);
            produced += 1;
            let _ = consumed.fetch_add(1, Ordering::Relaxed);

            if let Some(declared) = declared {
                break declared;
            }
            if produced % flush_every == 0 {
                if let Err(e) = writer.flush().await {
                    warn!(error = %e, "response writer flush failed");
                }
            }
        };

        drop(producer);
        (ending, produced)
    }

    /// Step 5: terminal write with bounded retries on retryable errors.
    async fn finalize_with_retry(
        &self,
        run_id: &RunId,
        update: &RunUpdate,
    ) -> Result<RunRecord, StoreError> {
        let policy = &self.ctx.settings.finalize_retry;
        let mut attempt = 0u32;
        loop {
            match self.ctx.store.finalize(run_id, update).await {
                Ok(record) => {
                    debug!(attempt = attempt + 1, "terminal status persisted");
                    return Ok(record);
                }
                Err(e) if e.is_retryable() && policy.allows_another(attempt + 1) => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "terminal status write failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_owned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_failure_without_message_gets_default() {
        let (status, error) = Ending::Declared(RunStatus::Failed, None).resolve();
        assert_eq!(status, RunStatus::Failed);
        assert_eq!(error.as_deref(), Some("Run ended with status: failed"));
    }

    #[test]
    fn declared_stop_keeps_message() {
        let ending = Ending::Declared(RunStatus::Stopped, Some("user cancelled".into()));
        assert_eq!(
            ending.resolve(),
            (RunStatus::Stopped, Some("user cancelled".into()))
        );
        assert!(ending.synthesized_event().is_none());
    }

    #[test]
    fn declared_completion_has_no_error() {
        let ending = Ending::Declared(RunStatus::Completed, Some("done".into()));
        assert_eq!(ending.resolve(), (RunStatus::Completed, None));
    }

    #[test]
    fn exhaustion_synthesizes_completion() {
        let ending = Ending::Exhausted;
        assert_eq!(ending.resolve(), (RunStatus::Completed, None));
        assert_eq!(ending.synthesized_event(), Some(RunEvent::completed()));
    }

    #[test]
    fn stop_synthesizes_stopped_event() {
        let ending = Ending::Stopped;
        assert_eq!(ending.resolve(), (RunStatus::Stopped, None));
        assert_eq!(
            ending.synthesized_event().and_then(|e| e.terminal_status()),
            Some(RunStatus::Stopped)
        );
    }

    #[test]
    fn failure_carries_message_into_event() {
        let ending = Ending::Failed("boom".into());
        assert_eq!(ending.resolve(), (RunStatus::Failed, Some("boom".into())));
        assert_eq!(ending.synthesized_event(), Some(RunEvent::failed("boom")));
    }

    #[test]
    fn panic_message_extracts_payload() {
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("bad state"));
        assert_eq!(panic_message(owned.as_ref()), "bad state");
        let literal: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(literal.as_ref()), "static");
        let other: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
