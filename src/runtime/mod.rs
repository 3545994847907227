//! API surface for observability endpoints.

pub mod api;

pub use api::{breaker_reports, health, tenant_reports, BreakerReport, HealthReport, TenantReport};
