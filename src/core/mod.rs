//! Core admission, scheduling and resilience components.

pub mod audit;
pub mod circuit_breaker;
pub mod context;
pub mod controller;
pub mod dead_letter;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod quota;
pub mod retry;
pub mod scheduler;
pub mod stats;
pub mod tenant;

pub use audit::{
    build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink,
};
pub use circuit_breaker::{
    BreakerConfig, BreakerCounts, BreakerEvent, BreakerRegistry, CircuitBreaker, CircuitState,
};
pub use context::{TaskContext, TaskContextBuilder};
pub use controller::{AdmissionController, ControllerMetrics, QuotaPermit, DEFAULT_AUDIT_CAPACITY};
pub use dead_letter::{DeadLetterEntry, DeadLetterQueue};
pub use error::{AppResult, ControlError, ErrorClass, ExecError, RetryError};
pub use monitor::{
    MonitorConfig, MonitorEvent, MonitorMetrics, ProcessSampler, ResourceMonitor, ResourceSample,
    ResourceSampler, ThrottledResource,
};
pub use notify::{EventDispatcher, DEFAULT_NOTIFICATION_CAPACITY};
pub use quota::{QuotaUsage, ResourceQuota};
pub use retry::{RetryExecutor, RetryPolicy, RetryableTask};
pub use scheduler::TenantScheduler;
pub use stats::{ActiveWorker, PoolStats, StatsCollector};
pub use tenant::{
    TenantConfig, TenantInfo, TenantRegistry, TenantStats, TenantStatsSnapshot,
    UnknownTenantPolicy,
};
