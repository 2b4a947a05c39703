//! Stop requests addressed to a running run.
//!
//! A coordinator listens on two channels per run: the instance-scoped one
//! (`agent_run:{run}:control:{instance}`) and the run-scoped one
//! (`agent_run:{run}:control`).
//! [`StopTarget`] picks which of them a request goes to. STOP is
//! level-triggered in the coordinator, so sending on both is harmless.

use std::sync::Arc;

use agentrun_broker::{ControlChannel, LivenessRegistry};
use agentrun_core::keys::{ChannelName, instance_control_channel, run_control_channel};
use agentrun_core::{ControlSignal, InstanceId, RunId};
use tracing::{info, instrument, warn};

use crate::context::WorkerContext;
use crate::errors::RuntimeError;

/// Which control channel(s) a stop request is published on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopTarget {
    /// Run-scoped channel only. For requesters that do not know the owner.
    Run,
    /// Instance-scoped channel of the given owner only.
    Instance(InstanceId),
    /// Instance-scoped channel first, then the run-scoped channel.
    Everywhere(InstanceId),
}

impl StopTarget {
    fn channels(&self, run_id: &RunId) -> Vec<ChannelName> {
        match self {
            Self::Run => vec![run_control_channel(run_id)],
            Self::Instance(instance) => vec![instance_control_channel(run_id, instance)],
            Self::Everywhere(instance) => vec![
                instance_control_channel(run_id, instance),
                run_control_channel(run_id),
            ],
        }
    }
}

/// Result of a stop request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StopReceipt {
    /// Total receivers across every channel published to.
    pub delivered: usize,
    /// Channels the signal was published on.
    pub channels: Vec<ChannelName>,
}

/// Sends stop requests.
#[derive(Clone)]
pub struct RunControl {
    control: Arc<dyn ControlChannel>,
    liveness: Arc<dyn LivenessRegistry>,
}

impl RunControl {
    /// Stop requests over the services in `ctx`.
    pub fn new(ctx: &WorkerContext) -> Self {
        Self {
            control: Arc::clone(&ctx.control),
            liveness: Arc::clone(&ctx.liveness),
        }
    }

    /// Publish STOP for `run_id` on the channels selected by `target`.
    ///
    /// A failed publish on one channel is logged and the next one is still
    /// tried. Fails only when no channel accepted the signal.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn request_stop(
        &self,
        run_id: &RunId,
        target: StopTarget,
    ) -> Result<StopReceipt, RuntimeError> {
        let channels = target.channels(run_id);
        let mut delivered = 0usize;
        let mut published = Vec::with_capacity(channels.len());
        let mut last_error = None;

        for channel in channels {
            match self.control.publish(&channel, ControlSignal::Stop).await {
                Ok(receivers) => {
                    delivered += receivers;
                    published.push(channel);
                }
                Err(e) => {
                    warn!(%channel, error = %e, "stop publish failed");
                    last_error = Some(e);
                }
            }
        }

        if published.is_empty() {
            if let Some(e) = last_error {
                return Err(e.into());
            }
        }
        info!(delivered, channels = published.len(), "stop requested");
        Ok(StopReceipt {
            delivered,
            channels: published,
        })
    }

    /// Send STOP to every run `instance_id` still holds a marker for.
    ///
    /// Used when a worker shuts down. Returns the runs signalled.
    #[instrument(skip(self), fields(instance_id = %instance_id))]
    pub async fn stop_instance_runs(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<RunId>, RuntimeError> {
        let runs = self.liveness.list_instance_runs(instance_id).await?;
        let mut stopped = Vec::with_capacity(runs.len());
        for run_id in runs {
            let target = StopTarget::Instance(instance_id.clone());
            match self.request_stop(&run_id, target).await {
                Ok(_) => stopped.push(run_id),
                Err(e) => warn!(%run_id, error = %e, "failed to stop run during shutdown"),
            }
        }
        info!(count = stopped.len(), "stop sent to instance runs");
        Ok(stopped)
    }
}

impl std::fmt::Debug for RunControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunControl").finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
