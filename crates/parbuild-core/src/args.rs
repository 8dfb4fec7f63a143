//! Command-line contract between the launcher and the worker binary.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::BATCH_INTERVAL;

/// Everything a worker process needs to know to run its build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerArgs {
    /// Config file, resolved by the worker exactly as the parent resolved it.
    pub config: PathBuf,

    /// Which entry of the resolved config to build.
    pub worker_index: usize,

    /// Keep recompiling on change instead of finishing after one compile.
    pub watch: bool,

    /// Working directory for the compiler.
    pub cwd: PathBuf,

    /// Address of the parent's message channel listener.
    pub ipc: SocketAddr,

    /// Outbound batching tick.
    pub batch_interval: Duration,
}

impl WorkerArgs {
    pub fn new(config: PathBuf, worker_index: usize, cwd: PathBuf, ipc: SocketAddr) -> Self {
        Self {
            config,
            worker_index,
            watch: false,
            cwd,
            ipc,
            batch_interval: BATCH_INTERVAL,
        }
    }

    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    /// Encode as worker process arguments.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--config".into(),
            self.config.clone().into(),
            "--worker-index".into(),
            self.worker_index.to_string().into(),
            "--cwd".into(),
            self.cwd.clone().into(),
            "--ipc".into(),
            self.ipc.to_string().into(),
            "--batch-interval-ms".into(),
            self.batch_interval.as_millis().to_string().into(),
        ];
        if self.watch {
            args.push("--watch".into());
        }
        args
    }
}
