//! Errors that abort a run.

use std::io;
use std::path::PathBuf;

use parbuild_core::CoreError;
use thiserror::Error;

/// Errors that reject a run. Build failures are not errors: they show up in
/// the End payloads and the run's exit code.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The config file could not be resolved. No worker was started.
    #[error(transparent)]
    Config(#[from] CoreError),

    /// A worker process could not be created.
    #[error("Failed to spawn worker {index} ('{}'): {source}", program.display())]
    Spawn {
        index: usize,
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The message channel for a worker could not be set up.
    #[error("Failed to open message channel for worker {index}: {source}")]
    Ipc {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
