//! Control-plane configuration: tenants, breaker, retry and monitor settings.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{
    AppResult, BreakerConfig, MonitorConfig, RetryPolicy, TenantConfig, UnknownTenantPolicy,
    DEFAULT_AUDIT_CAPACITY, DEFAULT_NOTIFICATION_CAPACITY,
};

/// Environment variable overriding `monitor.max_cpu_percent`.
pub const ENV_MAX_CPU_PERCENT: &str = "ADMISSION_MAX_CPU_PERCENT";
/// Environment variable overriding `monitor.max_memory_mb`.
pub const ENV_MAX_MEMORY_MB: &str = "ADMISSION_MAX_MEMORY_MB";
/// Environment variable overriding `unknown_tenants` (`adopt` or `reject`).
pub const ENV_UNKNOWN_TENANTS: &str = "ADMISSION_UNKNOWN_TENANTS";

/// Circuit breaker template applied to every task type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures that open a circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it.
    pub success_threshold: u32,
    /// Open-state timeout in milliseconds.
    pub timeout_ms: u64,
    /// Concurrent half-open probes.
    pub half_open_max_calls: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 30_000,
            half_open_max_calls: 1,
        }
    }
}

impl BreakerSettings {
    /// Validate thresholds.
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".into());
        }
        if self.success_threshold == 0 {
            return Err("success_threshold must be greater than 0".into());
        }
        if self.half_open_max_calls == 0 {
            return Err("half_open_max_calls must be greater than 0".into());
        }
        Ok(())
    }

    /// Breaker template named `default`.
    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig::default()
            .with_failure_threshold(self.failure_threshold)
            .with_success_threshold(self.success_threshold)
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_half_open_max_calls(self.half_open_max_calls)
    }
}

/// Retry policy in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// First backoff delay.
    pub initial_delay_ms: u64,
    /// Backoff ceiling.
    pub max_delay_ms: u64,
    /// Growth factor.
    pub multiplier: f64,
    /// Apply ±25% jitter.
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetrySettings {
    /// Validate delays and multiplier.
    pub fn validate(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err("multiplier must be at least 1.0".into());
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err("max_delay_ms must not be less than initial_delay_ms".into());
        }
        Ok(())
    }

    /// Equivalent [`RetryPolicy`].
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(self.max_retries)
            .with_delays(
                Duration::from_millis(self.initial_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            )
            .with_multiplier(self.multiplier)
            .with_jitter(self.jitter)
    }
}

/// Resource monitor thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Attach and start a process monitor.
    pub enabled: bool,
    /// CPU ceiling in percent.
    pub max_cpu_percent: f64,
    /// Memory ceiling in MB.
    pub max_memory_mb: u64,
    /// Throttle on CPU.
    pub throttle_cpu: bool,
    /// Throttle on memory.
    pub throttle_memory: bool,
    /// Sampling interval.
    pub interval_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_cpu_percent: 80.0,
            max_memory_mb: 4096,
            throttle_cpu: true,
            throttle_memory: true,
            interval_ms: 1_000,
        }
    }
}

impl MonitorSettings {
    /// Validate thresholds and interval.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("interval_ms must be greater than 0".into());
        }
        if !self.max_cpu_percent.is_finite() || self.max_cpu_percent <= 0.0 {
            return Err("max_cpu_percent must be greater than 0".into());
        }
        Ok(())
    }

    /// Equivalent [`MonitorConfig`].
    pub const fn to_monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            max_cpu_percent: self.max_cpu_percent,
            max_memory_mb: self.max_memory_mb,
            throttle_cpu: self.throttle_cpu,
            throttle_memory: self.throttle_memory,
            interval: Duration::from_millis(self.interval_ms),
        }
    }
}

/// Root configuration for an admission controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Template for tenants that were never registered.
    pub default_tenant: TenantConfig,
    /// Tenants registered at startup.
    pub tenants: Vec<TenantConfig>,
    /// Handling of unregistered tenant ids.
    pub unknown_tenants: UnknownTenantPolicy,
    /// Breaker template.
    pub breaker: BreakerSettings,
    /// Retry policy.
    pub retry: RetrySettings,
    /// Resource monitor.
    pub monitor: MonitorSettings,
    /// Channel capacity for each notification dispatcher.
    pub notification_capacity: usize,
    /// Reject new work while the monitor is throttled.
    pub reject_when_throttled: bool,
    /// Events kept by the in-memory audit sink.
    pub audit_capacity: usize,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            default_tenant: TenantConfig::default(),
            tenants: Vec::new(),
            unknown_tenants: UnknownTenantPolicy::default(),
            breaker: BreakerSettings::default(),
            retry: RetrySettings::default(),
            monitor: MonitorSettings::default(),
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            reject_when_throttled: true,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

impl ControlPlaneConfig {
    /// Validate every section and the tenant list.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for tenant in &self.tenants {
            if tenant.tenant_id.trim().is_empty() {
                return Err("tenant_id must not be empty".into());
            }
            if !seen.insert(tenant.tenant_id.as_str()) {
                return Err(format!("tenant `{}` defined twice", tenant.tenant_id));
            }
        }
        self.breaker
            .validate()
            .map_err(|e| format!("breaker invalid: {e}"))?;
        self.retry
            .validate()
            .map_err(|e| format!("retry invalid: {e}"))?;
        self.monitor
            .validate()
            .map_err(|e| format!("monitor invalid: {e}"))?;
        if self.notification_capacity == 0 {
            return Err("notification_capacity must be greater than 0".into());
        }
        if self.audit_capacity == 0 {
            return Err("audit_capacity must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read a JSON file, apply `ADMISSION_*` overrides from the environment
    /// (after loading `.env` when present) and validate.
    ///
    /// # Errors
    ///
    /// I/O, parse, override and validation failures, with the file path as context.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        if let Ok(env_file) = dotenvy::dotenv() {
            debug!(path = %env_file.display(), "loaded environment file");
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut cfg: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.apply_overrides(|key| std::env::var(key).ok())
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("environment overrides for {}", path.display()))?;
        cfg.validate()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("validating config {}", path.display()))?;
        Ok(cfg)
    }

    /// Apply overrides looked up by variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_CPU_PERCENT) {
            self.monitor.max_cpu_percent = raw
                .trim()
                .parse()
                .map_err(|e| format!("{ENV_MAX_CPU_PERCENT}: {e}"))?;
        }
        if let Some(raw) = lookup(ENV_MAX_MEMORY_MB) {
            self.monitor.max_memory_mb = raw
                .trim()
                .parse()
                .map_err(|e| format!("{ENV_MAX_MEMORY_MB}: {e}"))?;
        }
        if let Some(raw) = lookup(ENV_UNKNOWN_TENANTS) {
            self.unknown_tenants = match raw.trim().to_ascii_lowercase().as_str() {
                "adopt" => UnknownTenantPolicy::Adopt,
                "reject" => UnknownTenantPolicy::Reject,
                other => return Err(format!("{ENV_UNKNOWN_TENANTS}: unknown policy `{other}`")),
            };
        }
        Ok(())
    }
}
