//! Process-wide `tracing` subscriber.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber at `level` (e.g. `info`, `debug`).
///
/// `RUST_LOG`, when set, takes precedence. Calling this more than once is
/// harmless; only the first subscriber is installed.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
