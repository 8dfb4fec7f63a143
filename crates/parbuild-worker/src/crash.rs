//! Crash reporting for the worker process.
//!
//! A panic anywhere in the worker must still reach the parent as an End
//! event. The panic hook publishes every report on a process-wide channel.
//! A session subscribed with [`subscribe`] ends the build as soon as a report
//! arrives, which covers tasks the compiler spawned and never joined. Panics
//! of the compile task itself also surface through its `JoinError`.

use std::any::Any;
use std::backtrace::Backtrace;
use std::sync::{Once, OnceLock};

use parbuild_core::BuildStats;
use tokio::sync::watch;
use tokio::task::JoinError;

static INSTALL: Once = Once::new();
static REPORTS: OnceLock<watch::Sender<Option<String>>> = OnceLock::new();

fn reports() -> &'static watch::Sender<Option<String>> {
    REPORTS.get_or_init(|| watch::channel(None).0)
}

/// Install the process-wide panic hook. Safe to call more than once.
///
/// The previous hook still runs, so the panic is also printed to stderr.
pub fn install() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let mut report = payload_message(info.payload());
            if let Some(location) = info.location() {
                report.push_str(&format!(" at {location}"));
            }
            report.push('\n');
            report.push_str(&Backtrace::force_capture().to_string());
            reports().send_replace(Some(report));
            previous(info);
        }));
    });
}

/// Panic reports published after the point of subscription.
#[derive(Debug, Clone)]
pub struct CrashSignal(watch::Receiver<Option<String>>);

impl CrashSignal {
    /// Wait for the next panic in the process and return its report.
    pub async fn recv(&mut self) -> String {
        loop {
            if self.0.changed().await.is_err() {
                return std::future::pending().await;
            }
            let report = self.0.borrow_and_update().clone();
            if let Some(report) = report {
                return report;
            }
        }
    }
}

/// Start listening for panics. Only panics after this call are seen.
pub fn subscribe() -> CrashSignal {
    CrashSignal(reports().subscribe())
}

/// Turn a failed compile task into the stats of a failed build.
pub fn crash_stats(err: JoinError) -> BuildStats {
    if !err.is_panic() {
        return BuildStats::failure("compiler task was cancelled");
    }
    let message = payload_message(err.into_panic().as_ref());
    let report = reports()
        .borrow()
        .clone()
        .filter(|report| report.starts_with(&message));
    BuildStats::failure(report.unwrap_or(message))
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "compiler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        install();
        let handle = tokio::spawn(async {
            panic!("resolver exploded");
        });
        let stats = crash_stats(handle.await.unwrap_err());

        assert_eq!(stats.errors.len(), 1);
        assert!(stats.errors[0].starts_with("resolver exploded"));
        assert!(!stats.is_success());
    }

    #[tokio::test]
    async fn test_subscriber_sees_detached_panic() {
        install();
        let mut signal = subscribe();
        let _ = tokio::spawn(async {
            panic!("plugin rejected");
        })
        .await;

        let report = tokio::time::timeout(std::time::Duration::from_secs(5), signal.recv())
            .await
            .unwrap();
        assert!(report.contains(" at "));
    }

    #[tokio::test]
    async fn test_cancelled_task() {
        let handle = tokio::spawn(std::future::pending::<()>());
        handle.abort();
        let stats = crash_stats(handle.await.unwrap_err());
        assert_eq!(stats.errors, vec!["compiler task was cancelled".to_string()]);
    }
}
