//! Worker identity assigned by the parent at launch.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who a worker is for the lifetime of a run.
///
/// `index` is the only correlation key: frames are ordered by it and every
/// lookup goes through it. `name` comes from the config file and is used for
/// display only, so two workers may share a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerIdentity {
    /// Position of the worker's config in the resolved config list.
    pub index: usize,

    /// OS process id of the worker.
    pub pid: u32,

    /// Display name of the build.
    pub name: String,
}

impl WorkerIdentity {
    /// Create a new WorkerIdentity.
    pub fn new(index: usize, pid: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            pid,
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} (pid {})", self.index, self.name, self.pid)
    }
}
