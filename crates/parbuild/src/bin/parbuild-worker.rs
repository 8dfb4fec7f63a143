//! parbuild worker - runs one build configuration for a parbuild parent.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use parbuild_core::WorkerArgs;
use parbuild_worker::{init_tracing, run_worker, SessionOutcome, WorkerCli};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("warn");

    let args: WorkerArgs = WorkerCli::parse().into();
    let index = args.worker_index;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || on_interrupt.cancel())?;

    match run_worker(args, cancel).await {
        Ok(SessionOutcome::Completed(stats)) => {
            info!(worker_index = index, errors = stats.errors.len(), "Build finished");
        }
        Ok(SessionOutcome::Stopped) => {
            info!(worker_index = index, "Stopped before the build finished");
        }
        Err(e) => {
            error!(worker_index = index, error = %e, "Worker failed");
            return Err(e.into());
        }
    }

    Ok(())
}
