//! Tests for runtime API models

use tenant_admission::core::{AdmissionController, TaskContext, TenantConfig};
use tenant_admission::runtime::{health, tenant_reports};

#[test]
fn test_health_ok_by_default() {
    let controller = AdmissionController::default();
    let report = health(&controller);
    assert!(report.ok);
    assert!(!report.throttled);
    assert!(report.open_circuits.is_empty());
    assert!(report.resources.is_none());
}

#[test]
fn test_tenant_report_reflects_usage() {
    let controller = AdmissionController::default();
    controller
        .register_tenant(TenantConfig::new("acme").with_max_queue_size(3).with_priority(2))
        .unwrap();
    let _permit = controller.admit(&TaskContext::new("acme")).unwrap();
    controller.record_memory("acme", 2048).unwrap();

    let reports = tenant_reports(&controller);
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.tenant_id, "acme");
    assert_eq!(report.priority, 2);
    assert_eq!(report.quota.tasks_used, 1);
    assert_eq!(report.quota.tasks_limit, 3);
    assert_eq!(report.quota.memory_used_bytes, 2048);
    assert_eq!(report.stats.submitted, 1);
    assert!(!report.over_limits);
}

#[test]
fn test_reports_serialize() {
    let controller = AdmissionController::default();
    controller.register_tenant(TenantConfig::new("acme")).unwrap();
    let json = serde_json::to_value(health(&controller)).unwrap();
    assert_eq!(json["ok"], true);
    let json = serde_json::to_value(controller.tenant_reports()).unwrap();
    assert_eq!(json[0]["tenant_id"], "acme");
}
