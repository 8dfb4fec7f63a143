//! parbuild worker-side adapter.
//!
//! Runs inside every worker process. It wraps a [`Compiler`], turns its
//! progress and results into protocol events, batches them, and writes them
//! to the parent's message channel. The parent talks back over the same
//! channel with [`Directive`](parbuild_core::Directive)s.

pub mod batcher;
pub mod cli;
pub mod command;
pub mod compiler;
pub mod crash;
pub mod error;
pub mod hook;
pub mod logging;
pub mod session;

pub use cli::WorkerCli;
pub use command::CommandCompiler;
pub use compiler::{Compiler, UnavailableCompiler};
pub use error::{CompileError, WorkerError};
pub use hook::ProgressHook;
pub use logging::init_tracing;
pub use session::{run_session, SessionConfig, SessionOutcome};

use parbuild_core::{resolve_config, BuildConfig, CoreError, WorkerArgs};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Connect to the parent and run the build this worker was launched for.
///
/// Failing to resolve the config is not fatal here: it is reported to the
/// parent as a failed build, like any other compiler error.
pub async fn run_worker(
    args: WorkerArgs,
    cancel: CancellationToken,
) -> Result<SessionOutcome, WorkerError> {
    crash::install();

    let stream = TcpStream::connect(args.ipc)
        .await
        .map_err(|source| WorkerError::Connect {
            addr: args.ipc,
            source,
        })?;
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    info!(worker_index = args.worker_index, ipc = %args.ipc, "Connected to parent");

    let mut config = SessionConfig {
        name: format!("C{}", args.worker_index),
        watch: args.watch,
        batch_interval: args.batch_interval,
        crashes: Some(crash::subscribe()),
    };

    let build = select_build(&args).map_err(|e| e.to_string()).and_then(|build| {
        config.name = build.name.clone();
        CommandCompiler::from_config(&build, &args.cwd).map_err(|e| e.to_string())
    });

    match build {
        Ok(compiler) => run_session(compiler, config, reader, writer, cancel).await,
        Err(reason) => {
            warn!(worker_index = args.worker_index, %reason, "No runnable build");
            let compiler = UnavailableCompiler::new(reason);
            run_session(compiler, config, reader, writer, cancel).await
        }
    }
}

fn select_build(args: &WorkerArgs) -> Result<BuildConfig, CoreError> {
    let configs = resolve_config(&args.config)?;
    configs.get(args.worker_index).cloned()
}
