//! Raw text output from workers.

use crate::identity::WorkerIdentity;
use serde::{Deserialize, Serialize};

/// Which output stream a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogChannel {
    Stdout,
    Stderr,
}

/// One line of worker output, stamped by the parent.
///
/// Log lines travel outside the event protocol and are never deduplicated:
/// two identical lines printed by a worker stay two entries, told apart by
/// `seq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogLine {
    pub identity: WorkerIdentity,
    pub channel: LogChannel,
    pub text: String,
    /// Per-worker sequence number, starting at 0.
    pub seq: u64,
    /// Unix timestamp (milliseconds) at which the parent read the line.
    pub timestamp_ms: i64,
}

impl LogLine {
    /// Create a log line stamped with the current time.
    pub fn new(
        identity: WorkerIdentity,
        channel: LogChannel,
        text: impl Into<String>,
        seq: u64,
    ) -> Self {
        Self {
            identity,
            channel,
            text: text.into(),
            seq,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.channel == LogChannel::Stderr
    }
}
