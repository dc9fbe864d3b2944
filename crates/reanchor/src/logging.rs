//! Log output for the `reanchor` binary.
//!
//! Logs go to stderr so that stdout carries only command output. The
//! filter comes from `RUST_LOG`, defaulting to `reanchor=info`, which
//! also covers the `reanchor_core` target.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "reanchor=info";

/// Install the global subscriber. Safe to call more than once.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
