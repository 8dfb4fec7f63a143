//! Core domain errors.

use std::path::PathBuf;

use thiserror::Error;

/// Core errors for parbuild.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The config file could not be turned into build configurations.
    #[error("Cannot resolve config '{}': {reason}", path.display())]
    ConfigResolution { path: PathBuf, reason: String },

    /// A worker asked for a config index the file does not define.
    #[error("Config index {index} out of range ({available} configs available)")]
    ConfigIndex { index: usize, available: usize },

    /// A line on the message channel was not a valid frame.
    #[error("Malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn resolution(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConfigResolution {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
