//! Run lifecycle: resolve, launch, aggregate, await, tear down.

use std::path::PathBuf;
use std::time::Duration;

use parbuild_core::{resolve_config, Annotated, BuildStats, RunId, BATCH_INTERVAL};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::adapter::ChannelAdapter;
use crate::aggregator::{combine, Aggregate};
use crate::error::RunnerError;
use crate::launcher::{launch, LaunchOptions};
use crate::presenter::Presenter;

/// What to run.
#[derive(Debug, Clone)]
pub struct RunInput {
    pub config_path: PathBuf,
    /// Worker entry point.
    pub worker_program: PathBuf,
    pub cwd: PathBuf,
    pub watch: bool,
    /// Print the complete log of every worker once the run is over.
    pub full_report: bool,
    /// Hide worker log lines while the run is in progress.
    pub silent: bool,
}

/// Tunables for a run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Worker-side batching tick.
    pub batch_interval: Duration,
    /// How long workers get to exit after a Shutdown before they are killed.
    /// Also bounds how long their remaining output is read after the ends.
    pub shutdown_grace: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_interval: BATCH_INTERVAL,
            shutdown_grace: Duration::from_millis(500),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every worker ended without errors.
    Succeeded,
    /// Every worker ended and at least one reported errors.
    Failed,
    /// The run was cancelled. Partial results are discarded.
    Cancelled,
    /// A worker's message channel closed before it reported a result.
    Incomplete,
}

impl RunOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Succeeded | RunOutcome::Cancelled => 0,
            RunOutcome::Failed | RunOutcome::Incomplete => 1,
        }
    }
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub outcome: RunOutcome,
    /// End payloads in worker index order. Empty unless every worker ended.
    pub ends: Vec<Annotated<BuildStats>>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }
}

/// Run every build configuration of `input.config_path` in its own worker.
///
/// Only config resolution and worker spawning fail the run; build failures
/// are reported through the returned [`RunReport`]. Workers are terminated
/// and the presenter disposed on every path that gets as far as launching.
pub async fn run(
    input: &RunInput,
    config: &RunConfig,
    presenter: &mut dyn Presenter,
    cancel: CancellationToken,
) -> Result<RunReport, RunnerError> {
    let run_id = RunId::generate();
    let span = info_span!("run", run_id = %run_id.short());
    run_inner(run_id, input, config, presenter, cancel)
        .instrument(span)
        .await
}

async fn run_inner(
    run_id: RunId,
    input: &RunInput,
    config: &RunConfig,
    presenter: &mut dyn Presenter,
    cancel: CancellationToken,
) -> Result<RunReport, RunnerError> {
    let configs = resolve_config(&input.config_path)?;
    info!(
        builds = configs.len(),
        names = ?configs.names(),
        watch = input.watch,
        "Resolved build configurations"
    );

    if cancel.is_cancelled() {
        presenter.dispose(RunOutcome::Cancelled);
        return Ok(RunReport {
            run_id,
            outcome: RunOutcome::Cancelled,
            ends: Vec::new(),
        });
    }

    let options = LaunchOptions {
        program: input.worker_program.clone(),
        cwd: input.cwd.clone(),
        watch: input.watch,
        batch_interval: config.batch_interval,
    };
    let (mut workers, handles) = launch(&configs, &options).await?;
    let adapters = handles.into_iter().map(ChannelAdapter::from_handle).collect();
    let mut aggregate = combine(adapters);

    let (outcome, ends) = await_ends(&mut aggregate, presenter, &cancel).await;
    if outcome != RunOutcome::Cancelled {
        drain_output(&mut aggregate, presenter, config.shutdown_grace).await;
    }

    workers.terminate_all(config.shutdown_grace).await;
    drop(aggregate);
    presenter.dispose(outcome);

    info!(?outcome, workers = workers.len(), "Run finished");
    Ok(RunReport {
        run_id,
        outcome,
        ends,
    })
}

/// Feed frames to the presenter until every worker has ended or the run is
/// cancelled.
async fn await_ends(
    aggregate: &mut Aggregate,
    presenter: &mut dyn Presenter,
    cancel: &CancellationToken,
) -> (RunOutcome, Vec<Annotated<BuildStats>>) {
    let mut progress_open = true;
    let mut logs_open = true;
    let mut watch_open = true;
    let mut starts_open = true;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("Run cancelled");
                return (RunOutcome::Cancelled, Vec::new());
            }
            frame = aggregate.ends.next() => {
                let Some(frame) = frame else {
                    return (RunOutcome::Incomplete, Vec::new());
                };
                presenter.ends(&frame);
                let outcome = if frame.iter().all(|end| end.payload.is_success()) {
                    RunOutcome::Succeeded
                } else {
                    RunOutcome::Failed
                };
                return (outcome, frame);
            }
            frame = aggregate.progress.next(), if progress_open => match frame {
                Some(frame) => presenter.progress(&frame),
                None => progress_open = false,
            },
            frame = aggregate.logs.next(), if logs_open => match frame {
                Some(frame) => presenter.logs(&frame),
                None => logs_open = false,
            },
            frame = aggregate.watch.next(), if watch_open => match frame {
                Some(frame) => presenter.watch(&frame),
                None => watch_open = false,
            },
            start = aggregate.starts.next(), if starts_open => match start {
                Some((index, start)) => debug!(worker_index = index, name = %start.payload.name, "Worker reported start"),
                None => starts_open = false,
            },
        }
    }
}

/// Once the ends are in, keep handing over frames until every worker's
/// streams have closed, so output written just before an End is not lost.
/// Gives up after `limit` if some worker keeps its output open.
async fn drain_output(aggregate: &mut Aggregate, presenter: &mut dyn Presenter, limit: Duration) {
    let drain = async {
        let mut progress_open = true;
        let mut logs_open = true;
        while progress_open || logs_open {
            tokio::select! {
                frame = aggregate.progress.next(), if progress_open => match frame {
                    Some(frame) => presenter.progress(&frame),
                    None => progress_open = false,
                },
                frame = aggregate.logs.next(), if logs_open => match frame {
                    Some(frame) => presenter.logs(&frame),
                    None => logs_open = false,
                },
            }
        }
    };
    if tokio::time::timeout(limit, drain).await.is_err() {
        debug!("Worker output still open after the last End");
    }
}
