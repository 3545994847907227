//! Tests for quotas and the tenant registry

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tenant_admission::core::{
    ControlError, ResourceQuota, TenantConfig, TenantRegistry, UnknownTenantPolicy,
};

#[test]
fn test_quota_never_over_reserves() {
    let quota = Arc::new(ResourceQuota::new(Duration::ZERO, 0, 5));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let quota = Arc::clone(&quota);
            thread::spawn(move || (0..100).filter(|_| quota.check_and_reserve()).count())
        })
        .collect();
    let reserved: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(reserved, 5);
    assert_eq!(quota.tasks_in_flight(), 5);
}

#[test]
fn test_release_balances_reserve() {
    let quota = Arc::new(ResourceQuota::new(Duration::ZERO, 0, 3));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let quota = Arc::clone(&quota);
            thread::spawn(move || {
                for _ in 0..500 {
                    if quota.check_and_reserve() {
                        assert!(quota.tasks_in_flight() <= 3);
                        quota.release();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(quota.tasks_in_flight(), 0);
    quota.release();
    assert_eq!(quota.tasks_in_flight(), 0);
}

#[test]
fn test_registry_quota_flow() {
    let registry = TenantRegistry::default();
    registry
        .register_tenant(TenantConfig::new("t1").with_max_queue_size(2))
        .unwrap();

    assert!(registry.check_quota("t1").unwrap());
    assert!(registry.check_quota("t1").unwrap());
    assert!(!registry.check_quota("t1").unwrap());
    registry.release_quota("t1").unwrap();
    assert!(registry.check_quota("t1").unwrap());
}

#[test]
fn test_unknown_tenant_adopted_and_stored() {
    let default = TenantConfig::default().with_max_queue_size(1);
    let registry = TenantRegistry::new(default, UnknownTenantPolicy::Adopt);

    let synthesized = registry.get_tenant("ghost");
    assert_eq!(synthesized.id(), "ghost");
    assert!(!registry.is_registered("ghost"));

    assert!(registry.check_quota("ghost").unwrap());
    assert!(registry.is_registered("ghost"));
    assert!(!registry.check_quota("ghost").unwrap());
    registry.release_quota("ghost").unwrap();
}

#[test]
fn test_unknown_tenant_rejected() {
    let registry = TenantRegistry::new(TenantConfig::default(), UnknownTenantPolicy::Reject);
    assert_eq!(
        registry.check_quota("ghost"),
        Err(ControlError::TenantNotFound("ghost".into()))
    );
    assert!(registry.record_task_submitted("ghost").is_err());
    assert!(registry.release_quota("never-seen").is_err());
    assert!(registry.is_empty());
}

#[test]
fn test_register_empty_id_fails() {
    let registry = TenantRegistry::default();
    assert!(matches!(
        registry.register_tenant(TenantConfig::new("")),
        Err(ControlError::InvalidConfig(_))
    ));
}

#[test]
fn test_memory_is_last_write_wins() {
    let registry = TenantRegistry::default();
    registry.register_tenant(TenantConfig::new("t1")).unwrap();
    registry.record_memory("t1", 4096).unwrap();
    registry.record_memory("t1", 1024).unwrap();
    let info = registry.get_tenant("t1");
    assert_eq!(info.usage().memory_used_bytes, 1024);
    assert_eq!(info.stats().snapshot().memory_bytes, 1024);
}

#[test]
fn test_completion_accumulates_cpu() {
    let registry = TenantRegistry::default();
    registry
        .register_tenant(TenantConfig::new("t1").with_resource_quota(10, 0))
        .unwrap();
    registry
        .record_task_completed("t1", Duration::from_millis(6))
        .unwrap();
    registry
        .record_task_completed("t1", Duration::from_millis(6))
        .unwrap();
    let info = registry.get_tenant("t1");
    assert_eq!(info.stats().snapshot().completed, 2);
    assert_eq!(info.usage().cpu_used_ms, 12);
    assert!(info.quota().over_resource_limits());
}
