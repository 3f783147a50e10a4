//! Shared test fixtures.

use tracing_subscriber::EnvFilter;

/// Initializes tracing for a test binary, honoring `RUST_LOG`. Safe to
/// call from every test; only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
