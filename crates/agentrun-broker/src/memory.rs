//! In-process broker.
//!
//! [`MemoryBroker`] implements [`LivenessRegistry`], [`ResponseLog`] and
//! [`ControlChannel`] over one shared state: a key/value map with expiry, a
//! map of append-only lists with expiry, and channel-based pub/sub with one
//! unbounded queue per subscription. Expired entries are evicted lazily on
//! access, and a sweep at most once per [`SWEEP_INTERVAL`] reclaims expired
//! keys, dead subscribers and channel history idle for longer than
//! [`HISTORY_RETENTION`]. Time comes from [`tokio::time::Instant`], so a
//! paused test clock drives expiry.
//!
//! Clones share state, so one broker can back the coordinator, a tailer and
//! a stop requester in the same process.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use agentrun_core::keys::{
    NEW_RESPONSE_PING, active_run_prefix, new_response_channel, parse_active_run_key,
    responses_key,
};
use agentrun_core::{ChannelName, ControlSignal, InstanceId, RunEvent, RunId};
use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::control::{ControlChannel, ControlMessage, ControlSubscription};
use crate::errors::{BrokerError, Result};
use crate::liveness::{LivenessRegistry, MARKER_VALUE, MarkerHandle};
use crate::pubsub::BrokerMessage;
use crate::response_log::{ChangeFeed, ResponseLog};

/// Most recent published payloads kept per channel.
const PUBLISHED_HISTORY: usize = 1024;

/// Minimum time between two full sweeps of the broker state.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A channel's history is dropped once nothing was published on it for this
/// long.
pub const HISTORY_RETENTION: Duration = Duration::from_secs(86_400);

struct Expiring<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Expiring<T> {
    fn persistent(value: T) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

fn live_entry<'a, T>(
    map: &'a mut HashMap<String, Expiring<T>>,
    key: &str,
    now: Instant,
) -> Option<&'a mut Expiring<T>> {
    if map.get(key).is_some_and(|entry| !entry.live(now)) {
        let _ = map.remove(key);
    }
    map.get_mut(key)
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<BrokerMessage>,
}

struct History {
    payloads: VecDeque<String>,
    last_at: Instant,
}

impl History {
    fn retained(&self, now: Instant) -> bool {
        self.last_at + HISTORY_RETENTION > now
    }
}

/// Entry counts, for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Live keys (liveness markers).
    pub values: usize,
    /// Live lists (response logs).
    pub lists: usize,
    /// Channels with at least one subscriber.
    pub channels: usize,
    /// Channels with retained publish history.
    pub histories: usize,
}

#[derive(Default)]
struct State {
    values: HashMap<String, Expiring<String>>,
    lists: HashMap<String, Expiring<Vec<String>>>,
    channels: HashMap<ChannelName, Vec<Subscriber>>,
    published: HashMap<ChannelName, History>,
    next_subscriber: u64,
    last_sweep: Option<Instant>,
}

impl State {
    fn maybe_sweep(&mut self, now: Instant) {
        if self
            .last_sweep
            .is_some_and(|at| now.saturating_duration_since(at) < SWEEP_INTERVAL)
        {
            return;
        }
        self.last_sweep = Some(now);

        let before = self.stats();
        self.values.retain(|_, entry| entry.live(now));
        self.lists.retain(|_, entry| entry.live(now));
        self.channels.retain(|_, subs| {
            subs.retain(|s| !s.tx.is_closed());
            !subs.is_empty()
        });
        self.published.retain(|_, history| history.retained(now));
        let after = self.stats();
        if after != before {
            debug!(?before, ?after, "broker state swept");
        }
    }

    fn stats(&self) -> BrokerStats {
        BrokerStats {
            values: self.values.len(),
            lists: self.lists.len(),
            channels: self.channels.len(),
            histories: self.published.len(),
        }
    }

    fn subscribe(
        &mut self,
        channels: &[ChannelName],
    ) -> (u64, mpsc::UnboundedReceiver<BrokerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.next_subscriber += 1;
        let id = self.next_subscriber;
        for channel in channels {
            self.channels
                .entry(channel.clone())
                .or_default()
                .push(Subscriber { id, tx: tx.clone() });
        }
        (id, rx)
    }

    fn unsubscribe(&mut self, id: u64, channels: &[ChannelName]) {
        for channel in channels {
            if let Some(subs) = self.channels.get_mut(channel) {
                subs.retain(|s| s.id != id);
                if subs.is_empty() {
                    let _ = self.channels.remove(channel);
                }
            }
        }
    }

    fn publish(&mut self, channel: &ChannelName, payload: &str, now: Instant) -> usize {
        let history = self
            .published
            .entry(channel.clone())
            .or_insert_with(|| History {
                payloads: VecDeque::new(),
                last_at: now,
            });
        if history.payloads.len() == PUBLISHED_HISTORY {
            let _ = history.payloads.pop_front();
        }
        history.payloads.push_back(payload.to_owned());
        history.last_at = now;

        let Some(subs) = self.channels.get_mut(channel) else {
            return 0;
        };
        subs.retain(|s| {
            s.tx.send(BrokerMessage::new(channel.clone(), payload))
                .is_ok()
        });
        subs.len()
    }
}

/// In-process implementation of every broker contract.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the shared state, sweeping it first when a sweep is due.
    fn locked(&self) -> MutexGuard<'_, State> {
        let mut state = self.state.lock();
        state.maybe_sweep(Instant::now());
        state
    }

    /// Current entry counts.
    pub fn stats(&self) -> BrokerStats {
        self.locked().stats()
    }

    /// Time until `key` expires. `None` for missing keys and keys without expiry.
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let state = &mut *self.locked();
        let expires_at = match live_entry(&mut state.values, key, now) {
            Some(entry) => entry.expires_at,
            None => live_entry(&mut state.lists, key, now)?.expires_at,
        };
        expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Whether `key` holds a live value or list.
    pub fn exists(&self, key: &str) -> bool {
        let now = Instant::now();
        let state = &mut *self.locked();
        live_entry(&mut state.values, key, now).is_some()
            || live_entry(&mut state.lists, key, now).is_some()
    }

    /// Payloads published on `channel`, oldest first.
    pub fn published(&self, channel: &ChannelName) -> Vec<String> {
        let now = Instant::now();
        self.locked()
            .published
            .get(channel)
            .filter(|h| h.retained(now))
            .map(|h| h.payloads.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &ChannelName) -> usize {
        let mut state = self.locked();
        state.channels.get_mut(channel).map_or(0, |subs| {
            subs.retain(|s| !s.tx.is_closed());
            subs.len()
        })
    }
}

#[async_trait]
impl LivenessRegistry for MemoryBroker {
    async fn register(
        &self,
        instance_id: &InstanceId,
        run_id: &RunId,
        ttl: Duration,
    ) -> Result<MarkerHandle> {
        let handle = MarkerHandle::new(instance_id.clone(), run_id.clone());
        let entry = Expiring {
            value: MARKER_VALUE.to_owned(),
            expires_at: Some(Instant::now() + ttl),
        };
        let _ = self
            .locked()
            .values
            .insert(handle.key().to_owned(), entry);
        debug!(key = handle.key(), ttl_secs = ttl.as_secs(), "liveness marker set");
        Ok(handle)
    }

    async fn renew(&self, handle: &MarkerHandle, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut state = self.locked();
        Ok(match live_entry(&mut state.values, handle.key(), now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            None => false,
        })
    }

    async fn release(&self, handle: &MarkerHandle) -> Result<()> {
        let _ = self.locked().values.remove(handle.key());
        Ok(())
    }

    async fn is_alive(&self, instance_id: &InstanceId, run_id: &RunId) -> Result<bool> {
        let handle = MarkerHandle::new(instance_id.clone(), run_id.clone());
        let now = Instant::now();
        let mut state = self.locked();
        Ok(live_entry(&mut state.values, handle.key(), now).is_some())
    }

    async fn list_instance_runs(&self, instance_id: &InstanceId) -> Result<Vec<RunId>> {
        let prefix = active_run_prefix(instance_id);
        let now = Instant::now();
        let mut state = self.locked();
        state.values.retain(|_, entry| entry.live(now));
        let mut runs: Vec<RunId> = state
            .values
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .filter_map(|key| parse_active_run_key(key))
            .map(|(_, run)| run)
            .collect();
        runs.sort();
        Ok(runs)
    }
}

#[async_trait]
impl ResponseLog for MemoryBroker {
    async fn append(&self, run_id: &RunId, event: &RunEvent) -> Result<u64> {
        let encoded = serde_json::to_string(event)?;
        let key = responses_key(run_id);
        let now = Instant::now();
        let mut state = self.locked();
        if live_entry(&mut state.lists, &key, now).is_none() {
            let _ = state
                .lists
                .insert(key.clone(), Expiring::persistent(Vec::new()));
        }
        let list = state
            .lists
            .get_mut(&key)
            .ok_or_else(|| BrokerError::Unavailable(format!("list {key} vanished")))?;
        list.value.push(encoded);
        Ok(list.value.len() as u64 - 1)
    }

    async fn read_range(
        &self,
        run_id: &RunId,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<RunEvent>> {
        let key = responses_key(run_id);
        let now = Instant::now();
        let raw: Vec<String> = {
            let mut state = self.locked();
            let Some(list) = live_entry(&mut state.lists, &key, now) else {
                return Ok(Vec::new());
            };
            let len = list.value.len();
            let start = usize::try_from(from).unwrap_or(usize::MAX).min(len);
            let end = to
                .map_or(len, |t| usize::try_from(t).unwrap_or(usize::MAX))
                .clamp(start, len);
            list.value[start..end].to_vec()
        };
        raw.iter()
            .map(|s| serde_json::from_str(s).map_err(BrokerError::from))
            .collect()
    }

    async fn len(&self, run_id: &RunId) -> Result<u64> {
        let key = responses_key(run_id);
        let now = Instant::now();
        let mut state = self.locked();
        Ok(live_entry(&mut state.lists, &key, now).map_or(0, |l| l.value.len() as u64))
    }

    async fn notify_change(&self, run_id: &RunId) -> Result<usize> {
        let channel = new_response_channel(run_id);
        Ok(self.locked().publish(&channel, NEW_RESPONSE_PING, Instant::now()))
    }

    async fn subscribe_changes(&self, run_id: &RunId) -> Result<ChangeFeed> {
        let channel = new_response_channel(run_id);
        let (_, rx) = self.locked().subscribe(&[channel]);
        Ok(ChangeFeed::new(rx))
    }

    async fn expire(&self, run_id: &RunId, ttl: Duration) -> Result<bool> {
        let key = responses_key(run_id);
        let now = Instant::now();
        let mut state = self.locked();
        Ok(match live_entry(&mut state.lists, &key, now) {
            Some(list) => {
                list.expires_at = Some(now + ttl);
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl ControlChannel for MemoryBroker {
    async fn subscribe(&self, channels: &[ChannelName]) -> Result<Box<dyn ControlSubscription>> {
        let (id, rx) = self.locked().subscribe(channels);
        Ok(Box::new(MemorySubscription {
            id,
            channels: channels.to_vec(),
            rx,
            state: Arc::downgrade(&self.state),
            closed: false,
        }))
    }

    async fn publish(&self, channel: &ChannelName, signal: ControlSignal) -> Result<usize> {
        let receivers = self
            .locked()
            .publish(channel, signal.as_wire(), Instant::now());
        debug!(%channel, %signal, receivers, "control signal published");
        Ok(receivers)
    }
}

struct MemorySubscription {
    id: u64,
    channels: Vec<ChannelName>,
    rx: mpsc::UnboundedReceiver<BrokerMessage>,
    state: Weak<Mutex<State>>,
    closed: bool,
}

impl MemorySubscription {
    fn detach(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.rx.close();
        if let Some(state) = self.state.upgrade() {
            state.lock().unsubscribe(self.id, &self.channels);
        }
    }
}

#[async_trait]
impl ControlSubscription for MemorySubscription {
    async fn next_message(&mut self, timeout: Duration) -> Result<Option<ControlMessage>> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Err(_) => return Ok(None),
                Ok(None) => {
                    self.closed = true;
                    return Err(BrokerError::Closed);
                }
                Ok(Some(message)) => {
                    if let Some(decoded) = ControlMessage::decode(message) {
                        return Ok(Some(decoded));
                    }
                }
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.detach();
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.detach();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
