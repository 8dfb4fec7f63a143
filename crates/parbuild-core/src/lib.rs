//! parbuild Core Types
//!
//! This crate contains the vocabulary shared by the parent process and its
//! build workers, with no dependencies on:
//! - An async runtime
//! - Process management
//! - Terminal rendering
//!
//! Everything that crosses the process boundary (events, directives, worker
//! arguments) and the config resolver both sides agree on lives here.

pub mod args;
pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod ids;
pub mod log;
pub mod wire;

// Re-export commonly used types
pub use args::WorkerArgs;
pub use config::{parse_config, resolve_config, BuildConfig, ResolvedConfigs};
pub use error::CoreError;
pub use event::{Annotated, BuildStats, Event, EventKind, Progress, Start};
pub use identity::WorkerIdentity;
pub use ids::RunId;
pub use log::{LogChannel, LogLine};
pub use wire::Directive;

use std::time::Duration;

/// Interval at which a worker flushes its outbound event batch.
pub const BATCH_INTERVAL: Duration = Duration::from_millis(100);
