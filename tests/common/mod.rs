//! Shared setup for integration tests.

/// Install `env_logger` once, capturing output per-test the way `cargo
/// test`'s own harness expects. Safe to call from every test; later calls
/// after the first are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
