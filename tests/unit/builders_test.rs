//! Tests for builder modules

use std::sync::Arc;

use parking_lot::Mutex;
use tenant_admission::builders::{build_controller, build_controller_with_hooks, ControllerHooks};
use tenant_admission::config::ControlPlaneConfig;
use tenant_admission::core::{
    AuditAction, AuditSink, BreakerEvent, CircuitState, InMemoryAuditSink, TaskContext,
    TenantConfig,
};
use tenant_admission::infra::InMemoryDeadLetterQueue;

#[test]
fn test_build_controller_defaults() {
    let controller = build_controller(&ControlPlaneConfig::default(), None).unwrap();
    assert!(controller.registry().is_empty());
    assert!(controller.dead_letter_queue().is_none());
    assert_eq!(controller.retry_policy().max_retries, 3);
}

#[test]
fn test_build_controller_with_dlq() {
    let dlq = Arc::new(InMemoryDeadLetterQueue::new());
    let controller = build_controller(&ControlPlaneConfig::default(), Some(dlq)).unwrap();
    assert!(controller.dead_letter_queue().is_some());
}

#[test]
fn test_equal_priority_tenants_rotate_in_config_order() {
    let ids: Vec<String> = (0..8).map(|i| format!("t{i}")).collect();
    let cfg = ControlPlaneConfig {
        tenants: ids.iter().map(TenantConfig::new).collect(),
        ..ControlPlaneConfig::default()
    };
    let controller = build_controller(&cfg, None).unwrap();

    let picks: Vec<String> = (0..16)
        .map(|_| controller.next_tenant().unwrap().id().to_string())
        .collect();
    assert_eq!(picks[..8], ids[..]);
    assert_eq!(picks[8..], ids[..]);
}

#[test]
fn test_hooks_receive_events() {
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&transitions);
    let audit = Arc::new(InMemoryAuditSink::new(16));
    let sink: Arc<dyn AuditSink> = audit.clone();

    let mut cfg = ControlPlaneConfig::default();
    cfg.breaker.failure_threshold = 1;
    cfg.tenants.push(TenantConfig::new("acme"));
    let hooks = ControllerHooks {
        on_state_change: Some(Box::new(move |event: BreakerEvent| {
            seen.lock().push(event.to);
        })),
        audit: Some(sink),
        ..ControllerHooks::default()
    };
    let controller = build_controller_with_hooks(&cfg, None, hooks).unwrap();

    let _ = controller
        .breaker("embed")
        .call_blocking(|| Err::<(), _>("down"));
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while transitions.lock().is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert_eq!(*transitions.lock(), vec![CircuitState::Open]);

    let _permit = controller.admit(&TaskContext::new("acme")).unwrap();
    assert_eq!(audit.events_with(AuditAction::Admit).len(), 1);
}
