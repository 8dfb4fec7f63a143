//! Build events exchanged between workers and the parent.

use crate::identity::WorkerIdentity;
use serde::{Deserialize, Serialize};

/// A status event emitted by a worker.
///
/// Workers send bare events; the parent annotates them with the sending
/// worker's identity (see [`Annotated`]) when it decodes a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Event {
    /// The worker has loaded its config and is about to compile.
    Start(Start),
    /// Compiler progress report.
    Progress(Progress),
    /// One pass of a watching compiler finished.
    Watch(BuildStats),
    /// A one-shot compile finished, or the worker crashed.
    End(BuildStats),
}

impl Event {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Start(_) => EventKind::Start,
            Event::Progress(_) => EventKind::Progress,
            Event::Watch(_) => EventKind::Watch,
            Event::End(_) => EventKind::End,
        }
    }
}

/// Discriminant of [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Progress,
    Watch,
    End,
}

/// Payload of a Start event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Start {
    /// Build name as the worker resolved it.
    pub name: String,
    /// Whether the worker runs in watch mode.
    #[serde(default)]
    pub watch: bool,
}

/// Payload of a Progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Completion in `[0, 1]`.
    pub percent: f64,
    pub message: String,
    #[serde(default)]
    pub step: String,
    /// Module the compiler is currently working on.
    #[serde(default)]
    pub active: String,
}

impl Progress {
    /// Create a progress report, clamping `percent` into `[0, 1]`.
    pub fn new(
        percent: f64,
        message: impl Into<String>,
        step: impl Into<String>,
        active: impl Into<String>,
    ) -> Self {
        let percent = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 1.0)
        };
        Self {
            percent,
            message: message.into(),
            step: step.into(),
            active: active.into(),
        }
    }

    /// Value every worker's progress starts from before it reports anything.
    pub fn ready() -> Self {
        Self::new(0.0, "ready", "", "")
    }

    /// Report sent when a compile pass is complete.
    pub fn done() -> Self {
        Self::new(1.0, "done", "", "")
    }

    /// Whether two reports describe the same state.
    ///
    /// Only percent, step and message count; the active module changes far
    /// more often than anything worth showing.
    pub fn same_report(&self, other: &Progress) -> bool {
        self.percent == other.percent && self.step == other.step && self.message == other.message
    }

    pub fn is_complete(&self) -> bool {
        self.percent >= 1.0
    }
}

/// Condensed compiler result carried by Watch and End events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Names of the modules the compiler built.
    #[serde(default)]
    pub modules: Vec<String>,
    /// Number of modules left out of `modules`.
    #[serde(default)]
    pub filtered_modules: usize,
}

impl BuildStats {
    /// Stats describing a build that failed with a single error.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            errors: vec![error.into()],
            ..Self::default()
        }
    }

    /// A build succeeds when it reported no errors. Warnings do not count.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A payload annotated with the identity of the worker that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotated<T> {
    pub identity: WorkerIdentity,
    pub payload: T,
}

impl<T> Annotated<T> {
    pub fn new(identity: WorkerIdentity, payload: T) -> Self {
        Self { identity, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = Event::Progress(Progress::new(0.5, "building", "compile", "main.rs"));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["action"], "progress");
        assert_eq!(json["percent"], 0.5);
        assert_eq!(json["step"], "compile");
        assert_eq!(event.kind(), EventKind::Progress);
    }

    #[test]
    fn test_progress_clamped() {
        assert_eq!(Progress::new(1.7, "", "", "").percent, 1.0);
        assert_eq!(Progress::new(-0.2, "", "", "").percent, 0.0);
        assert_eq!(Progress::new(f64::NAN, "", "", "").percent, 0.0);
    }

    #[test]
    fn test_same_report_ignores_active_module() {
        let a = Progress::new(0.3, "building", "step", "a.rs");
        let b = Progress::new(0.3, "building", "step", "b.rs");
        let c = Progress::new(0.4, "building", "step", "a.rs");

        assert!(a.same_report(&b));
        assert!(!a.same_report(&c));
    }

    #[test]
    fn test_end_stats_defaults() {
        let event: Event = serde_json::from_str(r#"{"action":"end","errors":["boom"]}"#).unwrap();

        match event {
            Event::End(stats) => {
                assert_eq!(stats.errors, vec!["boom".to_string()]);
                assert!(stats.warnings.is_empty());
                assert!(!stats.is_success());
            }
            other => panic!("Expected End, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_stats() {
        let stats = BuildStats::failure("compiler crashed");
        assert_eq!(stats.errors.len(), 1);
        assert!(BuildStats::default().is_success());
    }
}
