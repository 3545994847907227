//! Configuration models for tenants, breakers, retries, and the resource monitor.

pub mod control;

pub use control::{
    BreakerSettings, ControlPlaneConfig, MonitorSettings, RetrySettings, ENV_MAX_CPU_PERCENT,
    ENV_MAX_MEMORY_MB, ENV_UNKNOWN_TENANTS,
};
