//! Tests for utility functions

use tenant_admission::util::{init_tracing, init_tracing_with, now_ms, DEFAULT_LOG_DIRECTIVES};

#[test]
fn test_now_ms_monotonic_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(b >= a);
    assert!(a > 1_600_000_000_000);
}

#[test]
fn test_init_tracing_twice() {
    init_tracing();
    init_tracing_with("debug");
    tracing::info!("tracing initialised");
}

#[test]
fn test_default_directives_parse() {
    let filter = tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_DIRECTIVES);
    assert!(filter.is_ok());
    assert!(DEFAULT_LOG_DIRECTIVES.contains("audit=info"));
}
