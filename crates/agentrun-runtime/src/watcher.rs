//! Background watcher for one run.
//!
//! Polls the run's control subscription with a bounded timeout. A `STOP` on
//! either channel sets the run's cancellation flag and ends the watch. In the
//! same loop it keeps the liveness marker fresh: a renewal whenever the
//! consumed-event counter crosses a multiple of the renew cadence, and
//! whenever the renew interval passes without one.
//!
//! Losing the subscription only costs remote stop; renewal carries on.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use agentrun_broker::{ControlSubscription, LivenessRegistry, MarkerHandle};
use agentrun_core::ControlSignal;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timing for the watch loop.
#[derive(Clone, Debug)]
pub(crate) struct WatchConfig {
    pub poll_timeout: Duration,
    pub renew_every_events: u64,
    pub renew_interval: Duration,
    pub liveness_ttl: Duration,
}

/// Everything the watch loop owns.
pub(crate) struct Watch {
    pub config: WatchConfig,
    pub subscription: Option<Box<dyn ControlSubscription>>,
    pub liveness: Arc<dyn LivenessRegistry>,
    pub marker: MarkerHandle,
    pub consumed: Arc<AtomicU64>,
    /// Set when a stop is requested.
    pub stop: CancellationToken,
    /// Set by the coordinator at teardown.
    pub shutdown: CancellationToken,
}

/// What the watch loop did, for the coordinator's logs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct WatchReport {
    pub stop_requested: bool,
    pub renewals: u64,
}

impl Watch {
    pub(crate) async fn run(mut self) -> WatchReport {
        let mut report = WatchReport::default();
        let renew_every = self.config.renew_every_events.max(1);
        let mut renewed_at_count = 0u64;
        let mut renewed_at = Instant::now();

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            if self.poll_control().await {
                report.stop_requested = true;
                break;
            }
            if self.shutdown.is_cancelled() {
                break;
            }

            let consumed = self.consumed.load(Ordering::Relaxed);
            let crossed = consumed / renew_every > renewed_at_count / renew_every;
            if crossed || renewed_at.elapsed() >= self.config.renew_interval {
                renew_marker(
                    &*self.liveness,
                    &self.marker,
                    self.config.liveness_ttl,
                    consumed,
                )
                .await;
                report.renewals += 1;
                renewed_at_count = consumed;
                renewed_at = Instant::now();
            }
        }

        if let Some(mut subscription) = self.subscription.take() {
            if let Err(e) = subscription.unsubscribe().await {
                warn!(error = %e, "control unsubscribe failed");
            }
        }
        report
    }

    /// One bounded wait for a control signal. Returns `true` on `STOP`.
    async fn poll_control(&mut self) -> bool {
        let timeout = self.config.poll_timeout;
        let Some(subscription) = self.subscription.as_mut() else {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {}
                () = tokio::time::sleep(timeout) => {}
            }
            return false;
        };

        let polled = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return false,
            polled = subscription.next_message(timeout) => polled,
        };

        match polled {
            Ok(Some(message)) if message.signal == ControlSignal::Stop => {
                info!(channel = %message.channel, "stop requested");
                self.stop.cancel();
                true
            }
            Ok(Some(message)) => {
                debug!(channel = %message.channel, signal = %message.signal, "ignoring control signal");
                false
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "control subscription lost; run will only end on its own");
                self.subscription = None;
                false
            }
        }
    }
}

/// Borrows only what renewal needs; `Watch` itself is not `Sync`.
async fn renew_marker(
    liveness: &dyn LivenessRegistry,
    marker: &MarkerHandle,
    ttl: Duration,
    consumed: u64,
) {
    match liveness.renew(marker, ttl).await {
        Ok(true) => debug!(key = marker.key(), consumed, "liveness marker renewed"),
        Ok(false) => warn!(key = marker.key(), "liveness marker missing at renewal"),
        Err(e) => warn!(key = marker.key(), error = %e, "liveness renewal failed"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
