//! Tests for configuration validation

use std::io::Write;

use tenant_admission::config::{
    BreakerSettings, ControlPlaneConfig, MonitorSettings, RetrySettings,
};
use tenant_admission::core::{TenantConfig, UnknownTenantPolicy};

fn temp_file(contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("ta-config-{}.json", uuid::Uuid::new_v4()));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

#[test]
fn test_breaker_settings_validation() {
    assert!(BreakerSettings::default().validate().is_ok());
    let invalid = BreakerSettings {
        failure_threshold: 0,
        ..BreakerSettings::default()
    };
    assert!(invalid.validate().is_err());
    let invalid = BreakerSettings {
        half_open_max_calls: 0,
        ..BreakerSettings::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_retry_settings_validation() {
    let invalid = RetrySettings {
        multiplier: 0.5,
        ..RetrySettings::default()
    };
    assert!(invalid.validate().is_err());

    let invalid = RetrySettings {
        initial_delay_ms: 500,
        max_delay_ms: 100,
        ..RetrySettings::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_monitor_settings_validation() {
    let invalid = MonitorSettings {
        interval_ms: 0,
        ..MonitorSettings::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_duplicate_and_empty_tenants_rejected() {
    let dup = ControlPlaneConfig {
        tenants: vec![TenantConfig::new("a"), TenantConfig::new("a")],
        ..ControlPlaneConfig::default()
    };
    assert!(dup.validate().unwrap_err().contains("defined twice"));

    let empty = ControlPlaneConfig {
        tenants: vec![TenantConfig::new(" ")],
        ..ControlPlaneConfig::default()
    };
    assert!(empty.validate().is_err());
}

#[test]
fn test_from_json_str_with_defaults() {
    let cfg = ControlPlaneConfig::from_json_str(
        r#"{
            "tenants": [
                { "tenant_id": "gold", "max_queue_size": 4, "priority": 10 },
                { "tenant_id": "bronze" }
            ],
            "unknown_tenants": "reject",
            "breaker": { "failure_threshold": 3 },
            "retry": { "max_retries": 1, "jitter": false }
        }"#,
    )
    .unwrap();

    assert_eq!(cfg.tenants.len(), 2);
    assert_eq!(cfg.tenants[0].max_queue_size, 4);
    assert_eq!(cfg.tenants[1].max_queue_size, 100);
    assert_eq!(cfg.unknown_tenants, UnknownTenantPolicy::Reject);
    assert_eq!(cfg.breaker.failure_threshold, 3);
    assert_eq!(cfg.breaker.success_threshold, 2);
    assert_eq!(cfg.retry.max_retries, 1);
    assert!(!cfg.monitor.enabled);
}

#[test]
fn test_from_json_str_errors() {
    assert!(ControlPlaneConfig::from_json_str("{ not json")
        .unwrap_err()
        .starts_with("parse error"));
    assert!(ControlPlaneConfig::from_json_str(r#"{ "breaker": { "success_threshold": 0 } }"#)
        .unwrap_err()
        .starts_with("breaker invalid"));
}

#[test]
fn test_load_from_file() {
    let path = temp_file(r#"{ "tenants": [ { "tenant_id": "acme" } ] }"#);
    let cfg = ControlPlaneConfig::load(&path).unwrap();
    assert_eq!(cfg.tenants[0].tenant_id, "acme");
    let _ = std::fs::remove_file(path);
}

#[test]
fn test_load_reports_path_on_error() {
    let path = temp_file(r#"{ "retry": { "multiplier": 0.1 } }"#);
    let err = ControlPlaneConfig::load(&path).unwrap_err();
    assert!(format!("{err:#}").contains("multiplier"));
    assert!(err.to_string().contains("validating config"));
    let _ = std::fs::remove_file(path);

    assert!(ControlPlaneConfig::load("/definitely/not/here.json").is_err());
}
