//! Logging setup
//!
//! Plain `tracing` to stderr. Scenario logs, subprocess output and wait
//! progress all flow through the same subscriber.
//!
//! # Example
//!
//! ```no_run
//! use kogito_bdd::telemetry::init_logging;
//!
//! init_logging();
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize logging with tracing-subscriber
///
/// Uses RUST_LOG env var for filtering (default: info).
/// Safe to call more than once.
pub fn init_logging() {
    init_logging_with("info");
}

/// Initialize logging with `default_directive` when RUST_LOG is unset
pub fn init_logging_with(default_directive: &str) {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(true))
        .try_init();
}
