//! Tests for audit sink

use tenant_admission::core::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);

    let event = build_audit_event("task1", "embed", "tenant1", AuditAction::Admit, None);
    sink.record(event.clone());
    assert_eq!(sink.len(), 1);

    let events = sink.events();
    assert_eq!(events[0], event);
    assert_eq!(events[0].action, AuditAction::Admit);
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event("task1", "embed", "tenant1", AuditAction::Admit, None));
    sink.record(build_audit_event("task2", "embed", "tenant1", AuditAction::Admit, None));
    sink.record(build_audit_event("task3", "embed", "tenant1", AuditAction::Reject, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_id, "task2"); // First one popped
    assert_eq!(events[1].task_id, "task3");
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event(
        "task1",
        "embed",
        "tenant1",
        AuditAction::Fail,
        Some("timeout".to_string()),
    );

    assert_eq!(event.task_id, "task1");
    assert_eq!(event.task_type, "embed");
    assert_eq!(event.tenant, "tenant1");
    assert_eq!(event.action, AuditAction::Fail);
    assert_eq!(event.detail, Some("timeout".to_string()));
    assert!(event.created_at_ms > 0);
    assert_eq!(event.event_id.len(), 36);
}

#[test]
fn test_event_serializes_action_snake_case() {
    let event = build_audit_event("t", "x", "tenant", AuditAction::DeadLetter, None);
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["action"], "dead_letter");
}
