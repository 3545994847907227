//! Tests for the tenant scheduler

use std::collections::HashMap;
use std::sync::Arc;

use tenant_admission::core::{TenantConfig, TenantInfo, TenantScheduler};

fn tenant(id: &str, priority: i32) -> Arc<TenantInfo> {
    Arc::new(TenantInfo::new(TenantConfig::new(id).with_priority(priority)))
}

fn ids(scheduler: &TenantScheduler, n: usize) -> Vec<String> {
    (0..n)
        .filter_map(|_| scheduler.schedule())
        .map(|t| t.id().to_string())
        .collect()
}

#[test]
fn test_empty_scheduler() {
    assert!(TenantScheduler::new().schedule().is_none());
}

#[test]
fn test_strict_priority_then_round_robin() {
    let scheduler = TenantScheduler::new();
    scheduler.add_tenant(tenant("low", 1));
    scheduler.add_tenant(tenant("a", 5));
    scheduler.add_tenant(tenant("b", 5));
    scheduler.add_tenant(tenant("c", 5));

    assert_eq!(ids(&scheduler, 7), vec!["a", "b", "c", "a", "b", "c", "a"]);
}

#[test]
fn test_priority_change_moves_tenant() {
    let scheduler = TenantScheduler::new();
    scheduler.add_tenant(tenant("a", 1));
    scheduler.add_tenant(tenant("b", 1));
    scheduler.add_tenant(tenant("b", 9));
    assert_eq!(scheduler.len(), 2);
    assert_eq!(ids(&scheduler, 2), vec!["b", "b"]);

    assert!(scheduler.remove_tenant("b"));
    assert_eq!(ids(&scheduler, 1), vec!["a"]);
}

#[test]
fn test_schedule_where_skips_idle_tenants() {
    let scheduler = TenantScheduler::new();
    scheduler.add_tenant(tenant("vip", 10));
    scheduler.add_tenant(tenant("a", 1));
    scheduler.add_tenant(tenant("b", 1));

    let picked = scheduler.schedule_where(|t| t.id() != "vip").unwrap();
    assert_eq!(picked.id(), "a");
    let picked = scheduler.schedule_where(|t| t.id() != "vip").unwrap();
    assert_eq!(picked.id(), "b");
    assert!(scheduler.schedule_where(|_| false).is_none());
}

#[test]
fn test_concurrent_schedule_is_fair() {
    let scheduler = Arc::new(TenantScheduler::new());
    for id in ["a", "b", "c", "d"] {
        scheduler.add_tenant(tenant(id, 3));
    }
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let scheduler = Arc::clone(&scheduler);
            std::thread::spawn(move || {
                (0..250)
                    .filter_map(|_| scheduler.schedule())
                    .map(|t| t.id().to_string())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            *counts.entry(id).or_default() += 1;
        }
    }
    assert_eq!(counts.len(), 4);
    assert!(counts.values().all(|&n| n == 250));
}
