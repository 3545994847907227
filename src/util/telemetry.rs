//! Subscriber setup for the control plane's `tracing` output.
//!
//! Admission decisions log under this crate's target and the audit trail logs
//! under the `audit` target, so both are enabled at `info` when `RUST_LOG` is
//! absent.

use tracing_subscriber::EnvFilter;

/// Directives applied when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_LOG_DIRECTIVES: &str = "tenant_admission=info,audit=info";

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_LOG_DIRECTIVES`]. Does nothing if a global subscriber exists.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVES));
    install(filter);
}

/// Install a fmt subscriber with explicit filter directives, ignoring `RUST_LOG`.
pub fn init_tracing_with(directives: &str) {
    install(EnvFilter::new(directives));
}

fn install(filter: EnvFilter) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    // monitor and dispatcher threads are named, keep the names in output
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
