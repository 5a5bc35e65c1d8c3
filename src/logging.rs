//! Logging setup for binaries and tests built on this crate.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing-subscriber` formatter filtered by `RUST_LOG`
/// (default `info`). Does nothing if a global subscriber is already set.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
