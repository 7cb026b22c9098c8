//! Structured logging with `tracing`.
//!
//! [`init_subscriber`] installs the process-wide subscriber. `RUST_LOG`
//! takes precedence over the configured level. [`capture_logs`] gives tests
//! a thread-local subscriber that records events for assertions.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Initialize the global tracing subscriber writing to stderr.
///
/// Call once at startup. Later calls are no-ops.
///
/// * `level` - minimum level when `RUST_LOG` is unset.
/// * `json` - emit JSON lines instead of the compact human format.
pub fn init_subscriber(level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails if a subscriber is already installed
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}
