//! The worker session: one compiler, one message channel.

use std::sync::Arc;
use std::time::Duration;

use parbuild_core::wire::decode_directive;
use parbuild_core::{BuildStats, Directive, Event, Start, BATCH_INTERVAL};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batcher::run_batcher;
use crate::compiler::Compiler;
use crate::crash::{self, CrashSignal};
use crate::error::{CompileError, WorkerError};
use crate::hook::ProgressHook;

/// Settings for one worker session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Build name reported in the Start event.
    pub name: String,
    pub watch: bool,
    pub batch_interval: Duration,
    /// Panics anywhere in the process end the build when set.
    pub crashes: Option<CrashSignal>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "C0".to_string(),
            watch: false,
            batch_interval: BATCH_INTERVAL,
            crashes: None,
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// The compiler finished (or failed) and an End event was sent.
    Completed(BuildStats),
    /// The session was cancelled before the compiler finished; no End was sent.
    Stopped,
}

/// Run `compiler` to completion, streaming its events to `writer`.
///
/// Directives from the parent are read from `reader`. A Shutdown directive,
/// the parent closing the channel, or `cancel` firing all stop the session.
pub async fn run_session<C, R, W>(
    compiler: C,
    config: SessionConfig,
    reader: R,
    writer: W,
    cancel: CancellationToken,
) -> Result<SessionOutcome, WorkerError>
where
    C: Compiler,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let batcher = tokio::spawn(run_batcher(rx, writer, config.batch_interval));
    let listener = tokio::spawn(listen_for_directives(reader, cancel.clone()));

    let hook = Arc::new(ProgressHook::new(tx));
    hook.emit(Event::Start(Start {
        name: config.name.clone(),
        watch: config.watch,
    }));
    info!(name = %config.name, watch = config.watch, "Starting compile");

    let mut crashes = config.crashes;
    let mut compile = tokio::spawn(drive(compiler, Arc::clone(&hook), config.watch));
    let outcome = tokio::select! {
        biased;

        joined = &mut compile => {
            let stats = match joined {
                Ok(Ok(stats)) => stats,
                Ok(Err(e)) => {
                    warn!(error = %e, "Compiler failed");
                    BuildStats::failure(e.to_string())
                }
                Err(e) => {
                    warn!(error = %e, "Compiler crashed");
                    crash::crash_stats(e)
                }
            };
            SessionOutcome::Completed(stats)
        }
        report = next_crash(&mut crashes) => {
            warn!("Worker panicked, ending the build");
            compile.abort();
            let _ = compile.await;
            SessionOutcome::Completed(BuildStats::failure(report))
        }
        _ = cancel.cancelled() => {
            info!("Session cancelled");
            compile.abort();
            // Wait for the task to drop its handle on the hook.
            let _ = compile.await;
            SessionOutcome::Stopped
        }
    };

    if let SessionOutcome::Completed(stats) = &outcome {
        info!(
            errors = stats.errors.len(),
            warnings = stats.warnings.len(),
            "Compile finished"
        );
        hook.emit(Event::End(stats.clone()));
    }

    listener.abort();
    drop(hook);
    let _writer = batcher.await??;
    Ok(outcome)
}

/// Run one compile, or compile passes forever in watch mode.
async fn drive<C: Compiler>(
    mut compiler: C,
    hook: Arc<ProgressHook>,
    watch: bool,
) -> Result<BuildStats, CompileError> {
    if !watch {
        return compiler.compile(&hook).await;
    }

    loop {
        hook.reset();
        let stats = match compiler.compile(&hook).await {
            Ok(stats) => stats,
            Err(e) => BuildStats::failure(e.to_string()),
        };
        hook.report(1.0, "done", "", "");
        debug!(errors = stats.errors.len(), "Watch pass finished");
        hook.emit(Event::Watch(stats));
        compiler.wait_for_change().await?;
    }
}

async fn next_crash(crashes: &mut Option<CrashSignal>) -> String {
    match crashes {
        Some(signal) => signal.recv().await,
        None => std::future::pending().await,
    }
}

/// Read directives until the parent asks us to stop or goes away.
async fn listen_for_directives<R>(reader: R, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match decode_directive(&line) {
                Ok(Directive::Shutdown) => {
                    info!("Shutdown requested by parent");
                    break;
                }
                Err(e) => warn!(error = %e, "Ignoring malformed directive"),
            },
            Ok(None) => {
                debug!("Parent closed the message channel");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Message channel read failed");
                break;
            }
        }
    }
    cancel.cancel();
}
