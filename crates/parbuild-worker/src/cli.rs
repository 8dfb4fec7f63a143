//! Worker command line.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use parbuild_core::WorkerArgs;

/// Arguments the launcher passes to every worker process.
#[derive(Debug, Parser)]
#[command(name = "parbuild-worker")]
#[command(about = "Runs one parbuild build configuration and reports to the parent")]
#[command(version)]
pub struct WorkerCli {
    /// Config file to resolve
    #[arg(long)]
    pub config: PathBuf,

    /// Index of the build configuration to run
    #[arg(long)]
    pub worker_index: usize,

    /// Working directory for the build
    #[arg(long)]
    pub cwd: PathBuf,

    /// Address of the parent's message channel
    #[arg(long)]
    pub ipc: SocketAddr,

    /// Outbound event batching interval in milliseconds
    #[arg(long, default_value_t = 100)]
    pub batch_interval_ms: u64,

    /// Keep rebuilding on change
    #[arg(long)]
    pub watch: bool,
}

impl From<WorkerCli> for WorkerArgs {
    fn from(cli: WorkerCli) -> Self {
        WorkerArgs::new(cli.config, cli.worker_index, cli.cwd, cli.ipc)
            .with_watch(cli.watch)
            .with_batch_interval(Duration::from_millis(cli.batch_interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[test]
    fn test_parses_launcher_arguments() {
        let addr: SocketAddr = "127.0.0.1:5123".parse().unwrap();
        let expected = WorkerArgs::new("builds.json".into(), 1, "/work".into(), addr)
            .with_watch(true)
            .with_batch_interval(Duration::from_millis(250));

        let argv = std::iter::once(OsString::from("parbuild-worker")).chain(expected.to_args());
        let parsed: WorkerArgs = WorkerCli::try_parse_from(argv).unwrap().into();

        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_ipc_address_required() {
        let result = WorkerCli::try_parse_from([
            "parbuild-worker",
            "--config",
            "builds.json",
            "--worker-index",
            "0",
            "--cwd",
            ".",
        ]);
        assert!(result.is_err());
    }
}
