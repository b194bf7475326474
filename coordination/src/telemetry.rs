//! Tracing setup for embedding processes.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Filter defaults to `info` and is overridable via `RUST_LOG`. Output goes
/// to stderr so embedding processes can keep stdout for their own protocol.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
