//! Progress hook handed to the compiler.

use std::sync::Mutex;

use parbuild_core::{Event, Progress};
use tokio::sync::mpsc;
use tracing::trace;

/// Turns compiler progress callbacks into Progress events.
///
/// Within a pass, percent never goes backwards: a report below the last
/// admitted percent is dropped, and nothing is admitted after a report of
/// 100%. Watch mode resets the gate before each pass.
pub struct ProgressHook {
    events: mpsc::UnboundedSender<Event>,
    gate: Mutex<ProgressGate>,
}

#[derive(Debug, Default)]
struct ProgressGate {
    last: Option<f64>,
    finished: bool,
}

impl ProgressGate {
    fn admit(&mut self, percent: f64) -> bool {
        if self.finished {
            return false;
        }
        if self.last.is_some_and(|last| percent < last) {
            return false;
        }
        self.last = Some(percent);
        self.finished = percent >= 1.0;
        true
    }
}

impl ProgressHook {
    pub(crate) fn new(events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            events,
            gate: Mutex::new(ProgressGate::default()),
        }
    }

    /// Report compiler progress.
    pub fn report(
        &self,
        percent: f64,
        message: impl Into<String>,
        step: impl Into<String>,
        active: impl Into<String>,
    ) {
        let progress = Progress::new(percent, message, step, active);
        let admitted = match self.gate.lock() {
            Ok(mut gate) => gate.admit(progress.percent),
            Err(poisoned) => poisoned.into_inner().admit(progress.percent),
        };
        if admitted {
            self.emit(Event::Progress(progress));
        } else {
            trace!(percent = progress.percent, "Dropping out-of-order progress");
        }
    }

    /// Start a new pass: percent may begin again from zero.
    pub(crate) fn reset(&self) {
        match self.gate.lock() {
            Ok(mut gate) => *gate = ProgressGate::default(),
            Err(poisoned) => *poisoned.into_inner() = ProgressGate::default(),
        }
    }

    /// Queue an event for the next batch. Returns false once the batcher is gone.
    pub(crate) fn emit(&self, event: Event) -> bool {
        self.events.send(event).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn percents(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<f64> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::Progress(p) = event {
                seen.push(p.percent);
            }
        }
        seen
    }

    #[test]
    fn test_percent_never_decreases() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hook = ProgressHook::new(tx);

        for percent in [0.1, 0.4, 0.2, 0.4, 0.9] {
            hook.report(percent, "building", "", "");
        }

        assert_eq!(percents(&mut rx), vec![0.1, 0.4, 0.4, 0.9]);
    }

    #[test]
    fn test_nothing_after_complete() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hook = ProgressHook::new(tx);

        hook.report(0.5, "building", "", "");
        hook.report(1.0, "done", "", "");
        hook.report(1.0, "done", "", "");
        hook.report(0.7, "late", "", "");

        assert_eq!(percents(&mut rx), vec![0.5, 1.0]);
    }

    #[test]
    fn test_reset_starts_new_pass() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hook = ProgressHook::new(tx);

        hook.report(1.0, "done", "", "");
        hook.reset();
        hook.report(0.2, "rebuilding", "", "");

        assert_eq!(percents(&mut rx), vec![1.0, 0.2]);
    }
}
