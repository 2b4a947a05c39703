//! Background reconciliation of runs whose worker disappeared.
//!
//! A run still recorded as `running` whose liveness marker has lapsed belongs
//! to a worker that died or was partitioned away before writing the terminal
//! status. The sweep closes its log with a failed status event, finalizes the
//! record from that snapshot, and signals readers on the run channel.

use std::time::Duration;

use agentrun_core::keys::run_control_channel;
use agentrun_core::{ControlSignal, InstanceId, RunEvent, RunId, RunStatus};
use agentrun_settings::ReconcilerSettings;
use agentrun_store::{RunRecord, RunUpdate, StoreError};
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::context::WorkerContext;
use crate::coordinator::default_end_message;
use crate::errors::RuntimeError;

/// Configuration for the reconciler task.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How often to sweep.
    pub interval: Duration,
    /// Maximum `running` records examined per sweep.
    pub batch_size: usize,
    /// Records younger than this are left alone.
    pub grace: Duration,
    /// When set, only runs owned by this instance are examined. A sweep
    /// whose liveness registry only sees one worker's markers must be scoped
    /// to that worker.
    pub only_instance: Option<InstanceId>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from(&ReconcilerSettings::default())
    }
}

impl From<&ReconcilerSettings> for ReconcilerConfig {
    fn from(settings: &ReconcilerSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.interval_secs),
            batch_size: settings.batch_size,
            grace: Duration::from_secs(settings.grace_secs),
            only_instance: None,
        }
    }
}

/// Counts from one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// `running` records looked at.
    pub examined: usize,
    /// Records inside the grace period.
    pub skipped_recent: usize,
    /// Records owned by another instance than the one the sweep is scoped to.
    pub skipped_foreign: usize,
    /// Records whose marker is still live.
    pub alive: usize,
    /// Records finalized by this sweep.
    pub reconciled: Vec<RunId>,
    /// Records another writer finalized first.
    pub raced: usize,
    /// Records that could not be reconciled this time.
    pub failed: usize,
}

enum Verdict {
    Alive,
    Reconciled,
    Raced,
}

/// Finds and closes runs abandoned by their worker.
#[derive(Clone, Debug)]
pub struct Reconciler {
    ctx: WorkerContext,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Reconciler over the services in `ctx`.
    pub fn new(ctx: WorkerContext, config: ReconcilerConfig) -> Self {
        Self { ctx, config }
    }

    /// Run one sweep.
    pub async fn sweep_once(&self) -> Result<ReconcileReport, RuntimeError> {
        let records = self
            .ctx
            .store
            .list_by_status(RunStatus::Running, self.config.batch_size)
            .await?;
        let grace = chrono::Duration::from_std(self.config.grace)
            .map_err(|e| RuntimeError::Internal(format!("invalid reconciler grace: {e}")))?;
        let cutoff = Utc::now() - grace;

        let mut report = ReconcileReport {
            examined: records.len(),
            ..ReconcileReport::default()
        };
        for record in records {
            if self
                .config
                .only_instance
                .as_ref()
                .is_some_and(|owner| *owner != record.instance_id)
            {
                report.skipped_foreign += 1;
                continue;
            }
            if record.started_at > cutoff {
                report.skipped_recent += 1;
                continue;
            }
            match self.reconcile_run(&record).await {
                Ok(Verdict::Alive) => report.alive += 1,
                Ok(Verdict::Reconciled) => report.reconciled.push(record.id),
                Ok(Verdict::Raced) => report.raced += 1,
                Err(e) => {
                    warn!(run_id = %record.id, error = %e, "failed to reconcile run");
                    report.failed += 1;
                }
            }
        }

        if !report.reconciled.is_empty() {
            info!(
                count = report.reconciled.len(),
                examined = report.examined,
                "reconciled runs with lapsed liveness"
            );
        }
        Ok(report)
    }

    async fn reconcile_run(&self, record: &RunRecord) -> Result<Verdict, RuntimeError> {
        let run_id = &record.id;
        if self
            .ctx
            .liveness
            .is_alive(&record.instance_id, run_id)
            .await?
        {
            return Ok(Verdict::Alive);
        }

        let mut responses = self.ctx.log.read_range(run_id, 0, None).await?;
        let declared = responses.last().and_then(|event| {
            event
                .terminal_status()
                .map(|status| (status, event.status_message().map(str::to_owned)))
        });
        let (status, error) = match declared {
            // The worker got as far as the terminal event but not the store.
            Some((RunStatus::Completed, _)) => (RunStatus::Completed, None),
            Some((status, message)) => (
                status,
                Some(message.unwrap_or_else(|| default_end_message(status))),
            ),
            None => {
                let message = format!(
                    "liveness marker lapsed for instance {}",
                    record.instance_id
                );
                let event = RunEvent::failed(message.clone());
                let _ = self.ctx.log.append(run_id, &event).await?;
                if let Err(e) = self.ctx.log.notify_change(run_id).await {
                    warn!(%run_id, error = %e, "change notification failed");
                }
                responses.push(event);
                (RunStatus::Failed, Some(message))
            }
        };

        let update = RunUpdate {
            status,
            completed_at: Utc::now(),
            error,
            responses,
        };
        match self.ctx.store.finalize(run_id, &update).await {
            Ok(_) => {}
            Err(StoreError::Conflict { .. }) => {
                debug!(%run_id, "run finalized concurrently");
                return Ok(Verdict::Raced);
            }
            Err(e) => return Err(e.into()),
        }
        info!(%run_id, instance_id = %record.instance_id, %status, "stale run reconciled");

        let signal = ControlSignal::for_terminal(status);
        if let Err(e) = self
            .ctx
            .control
            .publish(&run_control_channel(run_id), signal)
            .await
        {
            warn!(%run_id, error = %e, "failed to publish terminal signal");
        }
        let ttl = self.ctx.settings.coordinator.response_log_ttl();
        if let Err(e) = self.ctx.log.expire(run_id, ttl).await {
            warn!(%run_id, error = %e, "failed to set response log retention");
        }
        Ok(Verdict::Reconciled)
    }

    /// Sweep every `interval` until `shutdown_rx` flips to `true`.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval.as_millis(),
            batch_size = self.config.batch_size,
            grace_secs = self.config.grace.as_secs(),
            "reconciler task started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("reconciler task shutting down");
                        break;
                    }
                }
                () = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "reconciler sweep failed");
                    }
                }
            }
        }
    }
}

/// Spawn the periodic reconciler. Send `true` on the returned sender to stop it.
pub fn spawn_reconciler(
    ctx: WorkerContext,
    config: ReconcilerConfig,
) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Reconciler::new(ctx, config).run(shutdown_rx));
    (handle, shutdown_tx)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agentrun_broker::MemoryBroker;
    use agentrun_core::ThreadId;
    use agentrun_settings::AgentRunSettings;
    use agentrun_store::{MemoryStatusStore, NewRun};

    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    fn context(broker: &MemoryBroker) -> WorkerContext {
        WorkerContext::with_memory_broker(
            InstanceId::from("sweeper"),
            broker,
            Arc::new(MemoryStatusStore::new()),
            AgentRunSettings::default(),
        )
    }

    async fn insert(ctx: &WorkerContext, run: &str, instance: &str, age: Duration) {
        let mut new = NewRun::new(RunId::from(run), ThreadId::from("t"), InstanceId::from(instance));
        new.started_at = Utc::now() - chrono::Duration::from_std(age).unwrap();
        let _ = ctx.store.insert_running(&new).await.unwrap();
    }

    #[tokio::test]
    async fn default_config_matches_settings() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(300));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.grace, Duration::from_secs(120));
        assert_eq!(config.only_instance, None);
    }

    #[tokio::test]
    async fn scoped_sweep_leaves_other_instances_alone() {
        let broker = MemoryBroker::new();
        let ctx = context(&broker);
        insert(&ctx, "mine", "sweeper", Duration::from_secs(600)).await;
        insert(&ctx, "theirs", "other-host", Duration::from_secs(600)).await;

        let config = ReconcilerConfig {
            only_instance: Some(InstanceId::from("sweeper")),
            ..ReconcilerConfig::default()
        };
        let report = Reconciler::new(ctx.clone(), config).sweep_once().await.unwrap();

        assert_eq!(report.examined, 2);
        assert_eq!(report.skipped_foreign, 1);
        assert_eq!(report.reconciled, vec![RunId::from("mine")]);
        let theirs = ctx.store.get(&RunId::from("theirs")).await.unwrap().unwrap();
        assert_eq!(theirs.status, RunStatus::Running);
        assert!(broker.published(&run_control_channel(&RunId::from("theirs"))).is_empty());
    }

    #[tokio::test]
    async fn already_terminal_log_is_finalized_with_its_status() {
        let broker = MemoryBroker::new();
        let ctx = context(&broker);
        insert(&ctx, "r1", "gone", Duration::from_secs(600)).await;
        let run = RunId::from("r1");
        let _ = ctx.log.append(&run, &RunEvent::assistant("hi")).await.unwrap();
        let _ = ctx.log.append(&run, &RunEvent::completed()).await.unwrap();

        let report = Reconciler::new(ctx.clone(), ReconcilerConfig::default())
            .sweep_once()
            .await
            .unwrap();

        assert_eq!(report.reconciled, vec![run.clone()]);
        let record = ctx.store.get(&run).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.error, None);
        assert_eq!(record.responses.len(), 2);
        assert_eq!(broker.published(&run_control_channel(&run)), vec!["END_STREAM"]);
    }

    #[tokio::test]
    async fn live_marker_keeps_run_running() {
        let broker = MemoryBroker::new();
        let ctx = context(&broker);
        insert(&ctx, "r1", "w1", Duration::from_secs(600)).await;
        let _ = ctx
            .liveness
            .register(&InstanceId::from("w1"), &RunId::from("r1"), DAY)
            .await
            .unwrap();

        let report = Reconciler::new(ctx.clone(), ReconcilerConfig::default())
            .sweep_once()
            .await
            .unwrap();

        assert_eq!(report.alive, 1);
        assert!(report.reconciled.is_empty());
        let record = ctx.store.get(&RunId::from("r1")).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn spawned_task_stops_on_shutdown() {
        let broker = MemoryBroker::new();
        let (handle, shutdown_tx) = spawn_reconciler(context(&broker), ReconcilerConfig::default());
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reconciler did not stop")
            .unwrap();
    }
}
