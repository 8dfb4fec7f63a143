//! parbuild - parallel build orchestration.
//!
//! The parent side of parbuild: it launches one worker process per build
//! configuration, adapts each worker's channels into typed streams, combines
//! them across workers and drives the run to an exit code.

pub mod adapter;
pub mod aggregator;
pub mod combine;
pub mod error;
pub mod launcher;
pub mod logging;
pub mod orchestrator;
pub mod presenter;

pub use adapter::ChannelAdapter;
pub use aggregator::{combine, Aggregate, Frame};
pub use combine::CombineLatest;
pub use error::RunnerError;
pub use launcher::{default_worker_program, launch, LaunchOptions, WorkerHandle, WorkerSet};
pub use logging::init_tracing;
pub use orchestrator::{run, RunConfig, RunInput, RunOutcome, RunReport};
pub use presenter::{ConsolePresenter, Presenter};
