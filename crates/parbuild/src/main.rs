//! parbuild CLI - run several build configurations in parallel.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use parbuild::{default_worker_program, init_tracing, run, ConsolePresenter, RunConfig, RunInput};

/// parbuild - parallel builds with one combined view
#[derive(Parser)]
#[command(name = "parbuild")]
#[command(about = "Run build configurations in parallel worker processes", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every configuration in a config file
    Run {
        /// Config file defining the builds
        #[arg(short, long)]
        config: PathBuf,

        /// Working directory for the builds
        #[arg(short = 'd', long, default_value = ".")]
        cwd: PathBuf,

        /// Worker executable (defaults to parbuild-worker next to this binary)
        #[arg(long)]
        worker_bin: Option<PathBuf>,

        /// Keep rebuilding on change until interrupted
        #[arg(short, long)]
        watch: bool,

        /// Print every worker's full log at the end
        #[arg(long)]
        full_report: bool,

        /// Hide worker logs while building
        #[arg(short, long)]
        silent: bool,

        /// Worker event batching interval in milliseconds
        #[arg(long, default_value_t = 100)]
        batch_interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing("parbuild=info");

    match cli.command {
        Commands::Run {
            config,
            cwd,
            worker_bin,
            watch,
            full_report,
            silent,
            batch_interval_ms,
        } => {
            let worker_program = match worker_bin {
                Some(path) => path,
                None => default_worker_program()?,
            };
            let input = RunInput {
                config_path: config,
                worker_program,
                cwd,
                watch,
                full_report,
                silent,
            };
            let run_config = RunConfig {
                batch_interval: Duration::from_millis(batch_interval_ms),
                ..RunConfig::default()
            };

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            ctrlc::set_handler(move || on_interrupt.cancel())?;

            let mut presenter = ConsolePresenter::stdout(input.silent, input.full_report);
            let report = run(&input, &run_config, &mut presenter, cancel).await?;

            info!(run_id = %report.run_id, exit_code = report.exit_code(), "Exiting");
            std::process::exit(report.exit_code());
        }
    }
}
