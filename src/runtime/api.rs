//! API-facing report models for tenants, breakers and process health.

use serde::{Deserialize, Serialize};

use crate::core::{
    AdmissionController, CircuitState, MonitorMetrics, PoolStats, QuotaUsage, TenantStatsSnapshot,
};

/// One tenant's configuration, quota and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantReport {
    /// Tenant identifier.
    pub tenant_id: String,
    /// Scheduling priority.
    pub priority: i32,
    /// Quota limits and usage.
    pub quota: QuotaUsage,
    /// Lifetime counters.
    pub stats: TenantStatsSnapshot,
    /// True when CPU or memory usage is above the tenant's budget.
    pub over_limits: bool,
}

/// One breaker's state and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerReport {
    /// Breaker key, usually a task type.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures.
    pub consecutive_failures: u32,
    /// Consecutive half-open successes.
    pub consecutive_successes: u32,
    /// Probes in flight.
    pub half_open_in_flight: u32,
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// False while throttled or while any circuit is open.
    pub ok: bool,
    /// Monitor throttle flag.
    pub throttled: bool,
    /// Keys of open circuits.
    pub open_circuits: Vec<String>,
    /// Monitor snapshot, if a monitor is attached.
    pub resources: Option<MonitorMetrics>,
    /// Pool counters.
    pub pool: PoolStats,
}

/// Reports for every stored tenant, sorted by id.
pub fn tenant_reports(controller: &AdmissionController) -> Vec<TenantReport> {
    let mut reports: Vec<_> = controller
        .registry()
        .all_tenants()
        .into_values()
        .map(|info| TenantReport {
            tenant_id: info.id().to_string(),
            priority: info.priority(),
            quota: info.usage(),
            stats: info.stats().snapshot(),
            over_limits: info.quota().over_resource_limits(),
        })
        .collect();
    reports.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
    reports
}

/// Reports for every breaker created so far, sorted by name.
pub fn breaker_reports(controller: &AdmissionController) -> Vec<BreakerReport> {
    let breakers = controller.breakers();
    let mut reports: Vec<_> = breakers
        .states()
        .into_keys()
        .filter_map(|name| breakers.get(&name))
        .map(|breaker| {
            let counts = breaker.counts();
            BreakerReport {
                name: breaker.name().to_string(),
                state: counts.state,
                consecutive_failures: counts.consecutive_failures,
                consecutive_successes: counts.consecutive_successes,
                half_open_in_flight: counts.half_open_in_flight,
            }
        })
        .collect();
    reports.sort_by(|a, b| a.name.cmp(&b.name));
    reports
}

/// Return a health payload.
pub fn health(controller: &AdmissionController) -> HealthReport {
    let mut open_circuits = controller.breakers().open_circuits();
    open_circuits.sort();
    let throttled = controller.is_throttled();
    HealthReport {
        ok: !throttled && open_circuits.is_empty(),
        throttled,
        open_circuits,
        resources: controller.monitor().map(|m| m.metrics()),
        pool: controller.stats(0),
    }
}
