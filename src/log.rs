//! Shared logging helper.
//!
//! Library diagnostics go through `tracing`; demo output goes through
//! [`log`], which prefixes every line with the current thread name so the
//! demos can show which worker a task resumed on.

use crate::config::LoggingConfig;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the fmt subscriber. `RUST_LOG` wins over the configured filter.
/// Calling this more than once is a no-op.
pub fn init(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        // A subscriber may already be set by a test harness.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_target(false)
            .try_init();
    });
}

pub fn format_line(thread: Option<&str>, message: &str) -> String {
    format!("[{}] {}", thread.unwrap_or("unnamed"), message)
}

pub fn log(message: impl AsRef<str>) {
    let current = std::thread::current();
    println!("{}", format_line(current.name(), message.as_ref()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_uses_thread_name() {
        assert_eq!(format_line(Some("main"), "hello"), "[main] hello");
        assert_eq!(format_line(None, "hello"), "[unnamed] hello");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init(&config);
        init(&config);
        log("still alive");
    }
}
