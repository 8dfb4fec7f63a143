//! Worker process launching and teardown.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use parbuild_core::{Directive, ResolvedConfigs, WorkerArgs, WorkerIdentity};
use tokio::net::TcpListener;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::RunnerError;

/// How workers are started.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Worker entry point.
    pub program: PathBuf,
    pub cwd: PathBuf,
    pub watch: bool,
    pub batch_interval: Duration,
}

/// The parent's end of one freshly spawned worker.
///
/// The worker connects back to `ipc` once it is up; `directives` carries
/// what the parent wants to send over that connection.
#[derive(Debug)]
pub struct WorkerHandle {
    pub identity: WorkerIdentity,
    pub ipc: TcpListener,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    pub directives: mpsc::UnboundedReceiver<Directive>,
}

struct Worker {
    identity: WorkerIdentity,
    child: Child,
    directives: mpsc::UnboundedSender<Directive>,
}

/// Owns every worker process of a run.
///
/// Dropping the set kills any worker still running, so no exit path of the
/// parent leaves workers behind.
pub struct WorkerSet {
    workers: Vec<Worker>,
}

impl WorkerSet {
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn identities(&self) -> Vec<WorkerIdentity> {
        self.workers.iter().map(|w| w.identity.clone()).collect()
    }

    /// Ask every worker to shut down, then kill whatever is still running
    /// after `grace`. Every worker has been reaped when this returns.
    pub async fn terminate_all(&mut self, grace: Duration) {
        for worker in &self.workers {
            // The adapter may already be gone, which is fine.
            let _ = worker.directives.send(Directive::Shutdown);
        }

        let deadline = tokio::time::Instant::now() + grace;
        for worker in &mut self.workers {
            let index = worker.identity.index;
            match tokio::time::timeout_at(deadline, worker.child.wait()).await {
                Ok(Ok(status)) => debug!(worker_index = index, %status, "Worker exited"),
                Ok(Err(e)) => warn!(worker_index = index, error = %e, "Failed to wait for worker"),
                Err(_) => {
                    info!(worker_index = index, "Killing worker");
                    if let Err(e) = worker.child.kill().await {
                        warn!(worker_index = index, error = %e, "Failed to kill worker");
                    }
                }
            }
        }
    }
}

impl Drop for WorkerSet {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            let _ = worker.child.start_kill();
        }
    }
}

/// Spawn one worker per config, in index order.
///
/// Fails on the first worker that cannot be started; workers spawned before
/// it are killed when the partial set is dropped.
pub async fn launch(
    configs: &ResolvedConfigs,
    options: &LaunchOptions,
) -> Result<(WorkerSet, Vec<WorkerHandle>), RunnerError> {
    // Workers run in `cwd`, so they need a path that does not depend on ours.
    let config_path = std::fs::canonicalize(configs.path())?;

    let mut set = WorkerSet {
        workers: Vec::with_capacity(configs.len()),
    };
    let mut handles = Vec::with_capacity(configs.len());

    for (index, build) in configs.iter().enumerate() {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|source| RunnerError::Ipc { index, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| RunnerError::Ipc { index, source })?;

        let args = WorkerArgs::new(config_path.clone(), index, options.cwd.clone(), addr)
            .with_watch(options.watch)
            .with_batch_interval(options.batch_interval);

        let mut child = spawn_worker(&options.program, &options.cwd, &args).map_err(|source| {
            error!(worker_index = index, error = %source, "Failed to spawn worker");
            RunnerError::Spawn {
                index,
                program: options.program.clone(),
                source,
            }
        })?;

        let identity = WorkerIdentity::new(index, child.id().unwrap_or_default(), build.name.clone());
        info!(worker_index = index, pid = identity.pid, name = %identity.name, "Spawned worker");

        let (tx, rx) = mpsc::unbounded_channel();
        handles.push(WorkerHandle {
            identity: identity.clone(),
            ipc: listener,
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            directives: rx,
        });
        set.workers.push(Worker {
            identity,
            child,
            directives: tx,
        });
    }

    Ok((set, handles))
}

fn spawn_worker(program: &Path, cwd: &Path, args: &WorkerArgs) -> std::io::Result<Child> {
    Command::new(program)
        .args(args.to_args())
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

/// The worker binary installed next to the running executable.
pub fn default_worker_program() -> std::io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    Ok(exe.with_file_name(format!("parbuild-worker{}", std::env::consts::EXE_SUFFIX)))
}
