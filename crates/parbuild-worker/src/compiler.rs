//! The seam between the worker session and the build engine it wraps.

use async_trait::async_trait;
use parbuild_core::BuildStats;

use crate::error::CompileError;
use crate::hook::ProgressHook;

/// A build engine driven by a worker session.
///
/// The session calls [`compile`](Compiler::compile) once in one-shot mode.
/// In watch mode it alternates `compile` and
/// [`wait_for_change`](Compiler::wait_for_change) until the session is
/// cancelled. Build failures belong in the returned [`BuildStats`]; an `Err`
/// means the compiler itself could not run.
#[async_trait]
pub trait Compiler: Send + 'static {
    /// Run one compile pass, reporting progress through `progress`.
    async fn compile(&mut self, progress: &ProgressHook) -> Result<BuildStats, CompileError>;

    /// Resolve once the inputs have changed and settled.
    ///
    /// The default never resolves: a compiler without change detection
    /// compiles once and then idles until it is shut down.
    async fn wait_for_change(&mut self) -> Result<(), CompileError> {
        std::future::pending().await
    }
}

/// Stand-in used when no real compiler could be built for a worker, for
/// instance because its config failed to resolve. Every pass fails with the
/// stored reason, so the failure still reaches the parent as an End event.
#[derive(Debug, Clone)]
pub struct UnavailableCompiler {
    reason: String,
}

impl UnavailableCompiler {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Compiler for UnavailableCompiler {
    async fn compile(&mut self, _progress: &ProgressHook) -> Result<BuildStats, CompileError> {
        Err(CompileError::InvalidConfig(self.reason.clone()))
    }
}
