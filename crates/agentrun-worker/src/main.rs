//! # agentrun-worker
//!
//! Worker binary: wires settings, logging, the status store and an in-process
//! broker into a [`WorkerContext`], then runs one command.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agentrun_broker::MemoryBroker;
use agentrun_core::{InstanceId, RunEvent, RunId, ThreadId};
use agentrun_runtime::{
    Coordinator, EventStream, ExecutionError, ReconcilerConfig, Reconciler, ResponseTailer,
    RunControl, RuntimeError, StopTarget, WorkerContext, spawn_reconciler,
};
use agentrun_settings::LogFormat;
use agentrun_store::sqlite::connection::ConnectionConfig;
use agentrun_store::{NewRun, SqliteStatusStore, StatusStore};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use tracing::{info, warn};

/// Agent run worker.
#[derive(Parser, Debug)]
#[command(name = "agentrun-worker", about = "Coordinate long-running agent runs")]
struct Cli {
    /// Settings file (defaults to `~/.agentrun/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Path to the `SQLite` run store (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Log line format (overrides settings).
    #[arg(long, global = true, value_enum)]
    log_format: Option<FormatArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Compact,
    Json,
}

impl From<FormatArg> for LogFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Compact => Self::Compact,
            FormatArg::Json => Self::Json,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scripted producer through the coordinator and tail its log.
    Demo {
        /// Events the producer yields.
        #[arg(long, default_value = "5")]
        events: u64,
        /// Delay before each event, in milliseconds.
        #[arg(long, default_value = "200")]
        delay_ms: u64,
        /// Request a stop once this many events have been read back.
        #[arg(long)]
        stop_after: Option<u64>,
        /// Fail the producer after this many events.
        #[arg(long, conflicts_with = "stop_after")]
        fail_after: Option<u64>,
    },
    /// Run one reconciliation sweep over every instance's runs.
    ///
    /// This process cannot see other workers' liveness markers, so every
    /// `running` record past the grace period is treated as abandoned and
    /// marked failed, including runs another process is still executing.
    Reconcile {
        /// Confirm that no other worker is executing runs against this store.
        #[arg(long)]
        assume_all_workers_dead: bool,
    },
    /// Print a run record as JSON.
    Show {
        /// Run to show.
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli
        .settings
        .clone()
        .unwrap_or_else(agentrun_settings::settings_path);
    let mut settings = agentrun_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    if let Some(format) = cli.log_format {
        settings.logging.format = format.into();
    }
    agentrun_logging::init_from_settings(&settings.logging);

    let db_path = cli
        .db_path
        .clone()
        .unwrap_or_else(|| settings.store.resolve_db_path(&agentrun_settings::agentrun_home()));
    let config = ConnectionConfig {
        pool_size: settings.store.pool_size,
        busy_timeout_ms: settings.store.busy_timeout_ms,
    };
    let store: Arc<dyn StatusStore> = Arc::new(
        SqliteStatusStore::open(&db_path, &config)
            .with_context(|| format!("Failed to open run store at {}", db_path.display()))?,
    );

    let instance_id = settings
        .instance
        .instance_id
        .clone()
        .map_or_else(InstanceId::short, InstanceId::from);
    info!(%instance_id, db_path = %db_path.display(), "worker starting");
    let broker = MemoryBroker::new();
    let ctx = WorkerContext::with_memory_broker(instance_id, &broker, store, settings);

    match cli.command {
        Command::Demo {
            events,
            delay_ms,
            stop_after,
            fail_after,
        } => {
            let producer = scripted_producer(events, Duration::from_millis(delay_ms), fail_after);
            demo(&ctx, producer, stop_after).await
        }
        Command::Reconcile {
            assume_all_workers_dead,
        } => reconcile(&ctx, assume_all_workers_dead).await,
        Command::Show { run_id } => show(&ctx, &RunId::from(run_id)).await,
    }
}

fn scripted_producer(events: u64, delay: Duration, fail_after: Option<u64>) -> EventStream {
    Box::pin(async_stream::stream! {
        for i in 0..events {
            if fail_after == Some(i) {
                yield Err(ExecutionError::new(format!("scripted failure after {i} events")));
                break;
            }
            tokio::time::sleep(delay).await;
            yield Ok(RunEvent::assistant(format!("chunk {i}")));
        }
    })
}

async fn demo(ctx: &WorkerContext, producer: EventStream, stop_after: Option<u64>) -> Result<()> {
    let run_id = RunId::new();
    let new = NewRun::new(run_id.clone(), ThreadId::new(), ctx.instance_id.clone());
    let _ = ctx
        .store
        .insert_running(&new)
        .await
        .context("Failed to create run record")?;

    // Only this process's markers are visible, so the sweep is scoped to it.
    let reconciler = ctx.settings.reconciler.enabled.then(|| {
        let config = ReconcilerConfig {
            only_instance: Some(ctx.instance_id.clone()),
            ..ReconcilerConfig::from(&ctx.settings.reconciler)
        };
        spawn_reconciler(ctx.clone(), config)
    });

    let tail = ResponseTailer::new(ctx).tail(run_id.clone(), 0);
    let handle = Coordinator::new(ctx.clone()).spawn(run_id.clone(), producer);
    let control = RunControl::new(ctx);

    tokio::pin!(tail);
    loop {
        tokio::select! {
            item = tail.next() => {
                let Some(item) = item else { break };
                let (seq, event) = item.context("Failed to tail response log")?;
                println!("{}", serde_json::json!({ "seq": seq, "event": event }));
                if stop_after == Some(seq + 1) {
                    let _ = control
                        .request_stop(&run_id, StopTarget::Everywhere(ctx.instance_id.clone()))
                        .await?;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                info!("interrupted; stopping active runs");
                let stopped = control.stop_instance_runs(&ctx.instance_id).await?;
                info!(count = stopped.len(), "stop sent");
            }
        }
    }

    let outcome = match handle.await? {
        Ok(outcome) => outcome,
        Err(RuntimeError::Finalize { outcome, source }) => {
            warn!(error = %source, "run finished but its record was not updated");
            *outcome
        }
        Err(e) => return Err(e.into()),
    };
    info!(status = %outcome.status, events = outcome.events_produced, "run finished");

    if let Some((task, shutdown_tx)) = reconciler {
        let _ = shutdown_tx.send(true);
        task.await?;
    }

    show(ctx, &run_id).await
}

async fn reconcile(ctx: &WorkerContext, assume_all_workers_dead: bool) -> Result<()> {
    if !assume_all_workers_dead {
        bail!(
            "reconcile cannot see other workers' liveness markers and would fail their live runs; \
             pass --assume-all-workers-dead once no other worker is using this store"
        );
    }
    let config = ReconcilerConfig::from(&ctx.settings.reconciler);
    let report = Reconciler::new(ctx.clone(), config).sweep_once().await?;
    println!(
        "{}",
        serde_json::json!({
            "examined": report.examined,
            "skippedRecent": report.skipped_recent,
            "skippedForeign": report.skipped_foreign,
            "alive": report.alive,
            "reconciled": report.reconciled,
            "raced": report.raced,
            "failed": report.failed,
        })
    );
    Ok(())
}

async fn show(ctx: &WorkerContext, run_id: &RunId) -> Result<()> {
    let Some(record) = ctx.store.get(run_id).await? else {
        bail!("run not found: {run_id}");
    };
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
