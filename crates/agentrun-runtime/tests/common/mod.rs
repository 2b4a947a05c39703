#![allow(dead_code, missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use agentrun_broker::{
    BrokerError, ControlChannel, ControlSubscription, LivenessRegistry, MarkerHandle, MemoryBroker,
};
use agentrun_core::keys::ChannelName;
use agentrun_core::{ControlSignal, InstanceId, RunEvent, RunId, RunStatus, ThreadId};
use agentrun_runtime::{EventStream, ExecutionError, WorkerContext};
use agentrun_settings::AgentRunSettings;
use agentrun_store::{
    MemoryStatusStore, NewRun, RunRecord, RunUpdate, StatusStore, StoreError,
};
use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

pub const INSTANCE: &str = "worker-a";

/// Defaults with short polls and retry delays.
pub fn fast_settings() -> AgentRunSettings {
    let mut settings = AgentRunSettings::default();
    settings.coordinator.control_poll_timeout_ms = 10;
    settings.finalize_retry.base_delay_ms = 10;
    settings.finalize_retry.max_delay_ms = 100;
    settings
}

pub fn memory_context(broker: &MemoryBroker, store: Arc<dyn StatusStore>) -> WorkerContext {
    WorkerContext::with_memory_broker(InstanceId::from(INSTANCE), broker, store, fast_settings())
}

pub async fn insert_run(store: &dyn StatusStore, run_id: &RunId) -> RunRecord {
    let new = NewRun::new(run_id.clone(), ThreadId::from("thread-1"), InstanceId::from(INSTANCE));
    store.insert_running(&new).await.unwrap()
}

/// Producer yielding `items` back to back.
pub fn scripted(items: Vec<Result<RunEvent, ExecutionError>>) -> EventStream {
    Box::pin(stream::iter(items))
}

/// Producer yielding `events`, sleeping `gap` before each one.
pub fn paced(events: Vec<RunEvent>, gap: Duration) -> EventStream {
    Box::pin(async_stream::stream! {
        for event in events {
            tokio::time::sleep(gap).await;
            yield Ok(event);
        }
    })
}

/// Producer yielding `first`, then spending two seconds on the step that
/// yields `second`.
pub fn stalling(first: RunEvent, second: RunEvent) -> EventStream {
    Box::pin(async_stream::stream! {
        yield Ok(first);
        tokio::time::sleep(Duration::from_secs(2)).await;
        yield Ok(second);
    })
}

/// Like [`stalling`], but raises `step_done` once the slow step has run to
/// its end, just before yielding `second`.
pub fn flagged_step(first: RunEvent, second: RunEvent, step_done: Arc<AtomicBool>) -> EventStream {
    Box::pin(async_stream::stream! {
        yield Ok(first);
        tokio::time::sleep(Duration::from_secs(2)).await;
        step_done.store(true, Ordering::SeqCst);
        yield Ok(second);
    })
}

/// Producer that raises `polled` the first time it is asked for an event.
pub fn watched(events: Vec<RunEvent>, polled: Arc<AtomicBool>) -> EventStream {
    Box::pin(async_stream::stream! {
        polled.store(true, Ordering::SeqCst);
        for event in events {
            yield Ok(event);
        }
    })
}

pub fn assistant(text: &str) -> RunEvent {
    RunEvent::assistant(text)
}

/// Asserts the log's last event carries `status` and nothing else is terminal.
pub fn assert_single_terminal(events: &[RunEvent], status: RunStatus) {
    let terminal: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.terminal_status().is_some())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(terminal, vec![events.len() - 1], "log: {events:?}");
    assert_eq!(events.last().and_then(RunEvent::terminal_status), Some(status));
}

/// Waits until the run's log holds at least `len` events.
pub async fn wait_for_log_len(ctx: &WorkerContext, run_id: &RunId, len: u64) {
    tokio::time::timeout(Duration::from_secs(60), async {
        while ctx.log.len(run_id).await.unwrap() < len {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("log never reached expected length");
}

// ─────────────────────────────────────────────────────────────────────────────
// Service wrappers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness registry that records every key it touches.
#[derive(Default)]
pub struct RecordingLiveness {
    pub inner: MemoryBroker,
    pub registered: Mutex<Vec<String>>,
    pub renewed: Mutex<Vec<String>>,
}

impl RecordingLiveness {
    pub fn new(inner: MemoryBroker) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn renewals(&self) -> usize {
        self.renewed.lock().len()
    }
}

#[async_trait]
impl LivenessRegistry for RecordingLiveness {
    async fn register(
        &self,
        instance_id: &InstanceId,
        run_id: &RunId,
        ttl: Duration,
    ) -> agentrun_broker::Result<MarkerHandle> {
        let handle = self.inner.register(instance_id, run_id, ttl).await?;
        self.registered.lock().push(handle.key().to_owned());
        Ok(handle)
    }

    async fn renew(&self, handle: &MarkerHandle, ttl: Duration) -> agentrun_broker::Result<bool> {
        self.renewed.lock().push(handle.key().to_owned());
        self.inner.renew(handle, ttl).await
    }

    async fn release(&self, handle: &MarkerHandle) -> agentrun_broker::Result<()> {
        self.inner.release(handle).await
    }

    async fn is_alive(
        &self,
        instance_id: &InstanceId,
        run_id: &RunId,
    ) -> agentrun_broker::Result<bool> {
        self.inner.is_alive(instance_id, run_id).await
    }

    async fn list_instance_runs(
        &self,
        instance_id: &InstanceId,
    ) -> agentrun_broker::Result<Vec<RunId>> {
        self.inner.list_instance_runs(instance_id).await
    }
}

/// Liveness registry whose first `failures` registrations are unavailable.
pub struct RefusingLiveness {
    pub inner: MemoryBroker,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl RefusingLiveness {
    pub fn refusing(inner: MemoryBroker, failures: u32) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn register_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LivenessRegistry for RefusingLiveness {
    async fn register(
        &self,
        instance_id: &InstanceId,
        run_id: &RunId,
        ttl: Duration,
    ) -> agentrun_broker::Result<MarkerHandle> {
        let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
        let refusing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refusing {
            return Err(BrokerError::Unavailable("connection refused".into()));
        }
        self.inner.register(instance_id, run_id, ttl).await
    }

    async fn renew(&self, handle: &MarkerHandle, ttl: Duration) -> agentrun_broker::Result<bool> {
        self.inner.renew(handle, ttl).await
    }

    async fn release(&self, handle: &MarkerHandle) -> agentrun_broker::Result<()> {
        self.inner.release(handle).await
    }

    async fn is_alive(
        &self,
        instance_id: &InstanceId,
        run_id: &RunId,
    ) -> agentrun_broker::Result<bool> {
        self.inner.is_alive(instance_id, run_id).await
    }

    async fn list_instance_runs(
        &self,
        instance_id: &InstanceId,
    ) -> agentrun_broker::Result<Vec<RunId>> {
        self.inner.list_instance_runs(instance_id).await
    }
}

/// Control channel whose subscriptions always fail.
pub struct UnsubscribableControl {
    pub inner: MemoryBroker,
}

#[async_trait]
impl ControlChannel for UnsubscribableControl {
    async fn subscribe(
        &self,
        _channels: &[ChannelName],
    ) -> agentrun_broker::Result<Box<dyn ControlSubscription>> {
        Err(BrokerError::Unavailable("pub/sub connection refused".into()))
    }

    async fn publish(
        &self,
        channel: &ChannelName,
        signal: ControlSignal,
    ) -> agentrun_broker::Result<usize> {
        self.inner.publish(channel, signal).await
    }
}

/// Status store whose first `failures` finalize calls are unavailable.
pub struct FlakyStore {
    pub inner: MemoryStatusStore,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl FlakyStore {
    pub fn failing(failures: u32) -> Self {
        Self {
            inner: MemoryStatusStore::new(),
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn finalize_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusStore for FlakyStore {
    async fn insert_running(&self, run: &NewRun) -> agentrun_store::Result<RunRecord> {
        self.inner.insert_running(run).await
    }

    async fn get(&self, run_id: &RunId) -> agentrun_store::Result<Option<RunRecord>> {
        self.inner.get(run_id).await
    }

    async fn finalize(
        &self,
        run_id: &RunId,
        update: &RunUpdate,
    ) -> agentrun_store::Result<RunRecord> {
        let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.finalize(run_id, update).await
    }

    async fn list_by_status(
        &self,
        status: RunStatus,
        limit: usize,
    ) -> agentrun_store::Result<Vec<RunRecord>> {
        self.inner.list_by_status(status, limit).await
    }
}
