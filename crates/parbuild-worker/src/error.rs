//! Error types for the worker side.

use std::io;
use std::net::SocketAddr;

use parbuild_core::CoreError;
use thiserror::Error;

/// Errors that end a worker session without an End event reaching the parent.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Could not connect to the parent's message channel.
    #[error("Cannot reach parent at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Writing to the message channel failed.
    #[error("Message channel error: {0}")]
    Channel(#[from] io::Error),

    /// A batch could not be encoded.
    #[error(transparent)]
    Protocol(#[from] CoreError),

    /// The batching task died.
    #[error("Batcher task failed: {0}")]
    Batcher(#[from] tokio::task::JoinError),
}

/// Errors raised by a compiler. The session turns each into an End event
/// carrying the error message.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The build config cannot be run by this compiler.
    #[error("Invalid build config: {0}")]
    InvalidConfig(String),

    /// I/O failure inside the compiler.
    #[error("Compiler I/O error: {0}")]
    Io(#[from] io::Error),

    /// The compiler gave up.
    #[error("{0}")]
    Failed(String),
}
