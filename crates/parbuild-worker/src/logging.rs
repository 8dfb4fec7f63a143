//! Tracing setup for worker processes.

use tracing_subscriber::EnvFilter;

/// Log to stderr, filtered by `RUST_LOG` or `default_directive`.
///
/// Worker stderr is forwarded to the parent as log lines, so the default
/// should stay quiet.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_ignored() {
        init_tracing("warn");
        init_tracing("debug");
        tracing::warn!("still logging");
    }
}
