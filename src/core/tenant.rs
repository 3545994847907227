//! Tenant configuration, statistics, and the tenant registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::quota::{QuotaUsage, ResourceQuota};
use crate::core::ControlError;

/// Static configuration for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    /// Tenant identifier.
    pub tenant_id: String,
    /// Maximum workers the tenant may occupy.
    pub max_workers: u32,
    /// Maximum admitted (queued or running) tasks; 0 = unlimited.
    pub max_queue_size: u32,
    /// CPU time budget in milliseconds; 0 = unlimited.
    pub cpu_quota_ms: u64,
    /// Memory budget in bytes; 0 = unlimited.
    pub memory_quota_bytes: u64,
    /// Scheduling priority; higher runs first.
    pub priority: i32,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            tenant_id: "default".into(),
            max_workers: 10,
            max_queue_size: 100,
            cpu_quota_ms: 0,
            memory_quota_bytes: 0,
            priority: 0,
        }
    }
}

impl TenantConfig {
    /// Create a config with defaults for everything but the id.
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Self::default()
        }
    }

    /// Set the admitted-task limit.
    #[must_use]
    pub const fn with_max_queue_size(mut self, size: u32) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the worker limit.
    #[must_use]
    pub const fn with_max_workers(mut self, workers: u32) -> Self {
        self.max_workers = workers;
        self
    }

    /// Set the scheduling priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the CPU and memory budgets.
    #[must_use]
    pub const fn with_resource_quota(mut self, cpu_quota_ms: u64, memory_quota_bytes: u64) -> Self {
        self.cpu_quota_ms = cpu_quota_ms;
        self.memory_quota_bytes = memory_quota_bytes;
        self
    }
}

/// What the registry does with ids that were never registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownTenantPolicy {
    /// Create a tenant from the default config on first quota or stats use.
    #[default]
    Adopt,
    /// Fail with `TenantNotFound`.
    Reject,
}

/// Snapshot of a tenant's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantStatsSnapshot {
    /// Tasks admitted.
    pub submitted: u64,
    /// Tasks completed successfully.
    pub completed: u64,
    /// Tasks that failed after admission.
    pub failed: u64,
    /// Tasks rejected at admission.
    pub rejected: u64,
    /// Cumulative CPU time in milliseconds.
    pub cpu_time_ms: u64,
    /// Last memory sample in bytes.
    pub memory_bytes: u64,
}

/// Atomically updated usage counters for one tenant.
#[derive(Debug, Default)]
pub struct TenantStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    cpu_time_ms: AtomicU64,
    memory_bytes: AtomicU64,
}

impl TenantStats {
    /// Read all counters.
    pub fn snapshot(&self) -> TenantStatsSnapshot {
        TenantStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            cpu_time_ms: self.cpu_time_ms.load(Ordering::Relaxed),
            memory_bytes: self.memory_bytes.load(Ordering::Relaxed),
        }
    }
}

/// A tenant's configuration together with its quota and statistics.
#[derive(Debug)]
pub struct TenantInfo {
    config: TenantConfig,
    quota: ResourceQuota,
    stats: TenantStats,
}

impl TenantInfo {
    /// Build tenant state from its configuration.
    pub fn new(config: TenantConfig) -> Self {
        let quota = ResourceQuota::new(
            Duration::from_millis(config.cpu_quota_ms),
            config.memory_quota_bytes,
            config.max_queue_size,
        );
        Self {
            config,
            quota,
            stats: TenantStats::default(),
        }
    }

    /// Tenant identifier.
    pub fn id(&self) -> &str {
        &self.config.tenant_id
    }

    /// Scheduling priority.
    pub const fn priority(&self) -> i32 {
        self.config.priority
    }

    /// Configuration this tenant was registered with.
    pub const fn config(&self) -> &TenantConfig {
        &self.config
    }

    /// The tenant's quota.
    pub const fn quota(&self) -> &ResourceQuota {
        &self.quota
    }

    /// The tenant's counters.
    pub const fn stats(&self) -> &TenantStats {
        &self.stats
    }

    /// Quota usage report.
    pub fn usage(&self) -> QuotaUsage {
        self.quota.usage()
    }

    pub(crate) fn record_submitted(&self) {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self, cpu: Duration) {
        self.stats.completed.fetch_add(1, Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation)]
        let ms = cpu.as_millis() as u64;
        self.stats.cpu_time_ms.fetch_add(ms, Ordering::Relaxed);
        self.quota.record_cpu(cpu);
    }

    pub(crate) fn record_failed(&self) {
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_memory(&self, bytes: u64) {
        self.stats.memory_bytes.store(bytes, Ordering::Relaxed);
        self.quota.record_memory(bytes);
    }
}

/// Owns every registered tenant.
///
/// Unknown ids follow [`UnknownTenantPolicy`]. `get_tenant` never stores the
/// record it synthesizes for an unknown id; quota and stats operations adopt
/// the id under `Adopt` and store it, so the reservation survives until release.
#[derive(Debug)]
pub struct TenantRegistry {
    tenants: RwLock<HashMap<String, Arc<TenantInfo>>>,
    default_config: TenantConfig,
    policy: UnknownTenantPolicy,
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::new(TenantConfig::default(), UnknownTenantPolicy::default())
    }
}

impl TenantRegistry {
    /// Create a registry with a default config for unknown tenants.
    pub fn new(default_config: TenantConfig, policy: UnknownTenantPolicy) -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            default_config,
            policy,
        }
    }

    /// Policy applied to unregistered ids.
    pub const fn policy(&self) -> UnknownTenantPolicy {
        self.policy
    }

    /// Create or replace a tenant.
    ///
    /// Replacing starts the tenant with fresh counters; permits held against
    /// the old record release into the old record.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the tenant id is empty.
    pub fn register_tenant(&self, config: TenantConfig) -> Result<Arc<TenantInfo>, ControlError> {
        if config.tenant_id.trim().is_empty() {
            return Err(ControlError::InvalidConfig("tenant_id must not be empty".into()));
        }
        let info = Arc::new(TenantInfo::new(config));
        let replaced = self
            .tenants
            .write()
            .insert(info.id().to_string(), Arc::clone(&info))
            .is_some();
        info!(
            tenant = %info.id(),
            priority = info.priority(),
            max_queue_size = info.config().max_queue_size,
            replaced,
            "tenant registered"
        );
        Ok(info)
    }

    /// Remove a tenant, returning its last state.
    pub fn remove_tenant(&self, id: &str) -> Option<Arc<TenantInfo>> {
        self.tenants.write().remove(id)
    }

    /// True if the id has a stored record.
    pub fn is_registered(&self, id: &str) -> bool {
        self.tenants.read().contains_key(id)
    }

    /// Registered tenant, or a read-only record synthesized from the default
    /// config. The synthesized record is not stored.
    pub fn get_tenant(&self, id: &str) -> Arc<TenantInfo> {
        if let Some(info) = self.tenants.read().get(id) {
            return Arc::clone(info);
        }
        Arc::new(TenantInfo::new(self.default_for(id)))
    }

    /// Registered tenant, adopting the id from the default config when the
    /// policy allows it.
    ///
    /// # Errors
    ///
    /// `TenantNotFound` if the id is unknown and the policy is `Reject`.
    pub fn get_or_adopt(&self, id: &str) -> Result<Arc<TenantInfo>, ControlError> {
        if let Some(info) = self.tenants.read().get(id) {
            return Ok(Arc::clone(info));
        }
        if self.policy == UnknownTenantPolicy::Reject || id.is_empty() {
            return Err(ControlError::TenantNotFound(id.to_string()));
        }
        let mut tenants = self.tenants.write();
        let info = tenants
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(tenant = %id, "adopting unknown tenant with default config");
                Arc::new(TenantInfo::new(self.default_for(id)))
            });
        Ok(Arc::clone(info))
    }

    /// Reserve one task slot for the tenant.
    ///
    /// # Errors
    ///
    /// `TenantNotFound` if the tenant is unknown and cannot be adopted.
    pub fn check_quota(&self, id: &str) -> Result<bool, ControlError> {
        Ok(self.get_or_adopt(id)?.quota().check_and_reserve())
    }

    /// Release one task slot.
    ///
    /// # Errors
    ///
    /// `TenantNotFound` if the tenant has no stored record; a tenant that
    /// never reserved anything has nothing to release.
    pub fn release_quota(&self, id: &str) -> Result<(), ControlError> {
        let info = self
            .tenants
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ControlError::TenantNotFound(id.to_string()))?;
        info.quota().release();
        Ok(())
    }

    /// Count an admitted task.
    ///
    /// # Errors
    ///
    /// `TenantNotFound` if the tenant is unknown and cannot be adopted.
    pub fn record_task_submitted(&self, id: &str) -> Result<(), ControlError> {
        self.get_or_adopt(id)?.record_submitted();
        Ok(())
    }

    /// Count a completed task and its CPU time.
    ///
    /// # Errors
    ///
    /// `TenantNotFound` if the tenant is unknown and cannot be adopted.
    pub fn record_task_completed(&self, id: &str, cpu: Duration) -> Result<(), ControlError> {
        self.get_or_adopt(id)?.record_completed(cpu);
        Ok(())
    }

    /// Count a task that failed after admission.
    ///
    /// # Errors
    ///
    /// `TenantNotFound` if the tenant is unknown and cannot be adopted.
    pub fn record_task_failed(&self, id: &str) -> Result<(), ControlError> {
        self.get_or_adopt(id)?.record_failed();
        Ok(())
    }

    /// Count a rejected task.
    ///
    /// # Errors
    ///
    /// `TenantNotFound` if the tenant is unknown and cannot be adopted.
    pub fn record_task_rejected(&self, id: &str) -> Result<(), ControlError> {
        self.get_or_adopt(id)?.record_rejected();
        Ok(())
    }

    /// Store the tenant's current memory usage (last write wins).
    ///
    /// # Errors
    ///
    /// `TenantNotFound` if the tenant is unknown and cannot be adopted.
    pub fn record_memory(&self, id: &str, bytes: u64) -> Result<(), ControlError> {
        self.get_or_adopt(id)?.record_memory(bytes);
        Ok(())
    }

    /// Every stored tenant, keyed by id.
    pub fn all_tenants(&self) -> HashMap<String, Arc<TenantInfo>> {
        self.tenants.read().clone()
    }

    /// Number of stored tenants.
    pub fn len(&self) -> usize {
        self.tenants.read().len()
    }

    /// True if no tenant is stored.
    pub fn is_empty(&self) -> bool {
        self.tenants.read().is_empty()
    }

    fn default_for(&self, id: &str) -> TenantConfig {
        TenantConfig {
            tenant_id: id.to_string(),
            ..self.default_config.clone()
        }
    }
}
