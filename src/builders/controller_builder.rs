//! Build an [`AdmissionController`] from [`ControlPlaneConfig`].

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::config::ControlPlaneConfig;
use crate::core::{
    AdmissionController, AuditSink, BreakerEvent, BreakerRegistry, ControlError, DeadLetterQueue,
    EventDispatcher, InMemoryAuditSink, MonitorEvent, ResourceMonitor, TenantRegistry,
};

/// Boxed subscriber for breaker state changes.
pub type BreakerHook = Box<dyn Fn(BreakerEvent) + Send + 'static>;
/// Boxed subscriber for throttle transitions.
pub type MonitorHook = Box<dyn Fn(MonitorEvent) + Send + 'static>;

/// Optional subscribers and sinks wired in at build time.
#[derive(Default)]
pub struct ControllerHooks {
    /// Receives every breaker state change.
    pub on_state_change: Option<BreakerHook>,
    /// Receives throttle and unthrottle transitions.
    pub on_monitor_event: Option<MonitorHook>,
    /// Audit sink; defaults to a bounded in-memory sink.
    pub audit: Option<Arc<dyn AuditSink>>,
}

impl fmt::Debug for ControllerHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerHooks")
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_monitor_event", &self.on_monitor_event.is_some())
            .field("audit", &self.audit.is_some())
            .finish()
    }
}

/// Build a controller with no subscribers.
///
/// # Errors
///
/// `InvalidConfig` if validation or tenant registration fails, `Backend` if
/// a monitor thread cannot be started.
pub fn build_controller(
    cfg: &ControlPlaneConfig,
    dead_letters: Option<Arc<dyn DeadLetterQueue>>,
) -> Result<AdmissionController, ControlError> {
    build_controller_with_hooks(cfg, dead_letters, ControllerHooks::default())
}

/// Build a controller, registering every configured tenant and starting the
/// monitor when enabled.
///
/// # Errors
///
/// Same as [`build_controller`].
pub fn build_controller_with_hooks(
    cfg: &ControlPlaneConfig,
    dead_letters: Option<Arc<dyn DeadLetterQueue>>,
    hooks: ControllerHooks,
) -> Result<AdmissionController, ControlError> {
    cfg.validate()
        .map_err(|e| ControlError::InvalidConfig(format!("config invalid: {e}")))?;

    let spawn_err = |e: std::io::Error| ControlError::Backend(format!("spawn dispatcher: {e}"));

    let mut breakers = BreakerRegistry::new(cfg.breaker.to_breaker_config());
    if let Some(hook) = hooks.on_state_change {
        breakers = breakers.with_dispatcher(
            EventDispatcher::spawn("breaker", cfg.notification_capacity, hook).map_err(spawn_err)?,
        );
    }

    let registry = TenantRegistry::new(cfg.default_tenant.clone(), cfg.unknown_tenants);

    let audit = hooks
        .audit
        .unwrap_or_else(|| Arc::new(InMemoryAuditSink::new(cfg.audit_capacity)));
    let mut controller = AdmissionController::new(registry, breakers)
        .with_retry_policy(cfg.retry.to_policy())
        .with_audit_sink(audit)
        .reject_when_throttled(cfg.reject_when_throttled);
    // config order is the round-robin order within each priority
    for tenant in &cfg.tenants {
        controller.register_tenant(tenant.clone())?;
    }

    if cfg.monitor.enabled {
        let mut monitor = ResourceMonitor::new(cfg.monitor.to_monitor_config());
        if let Some(hook) = hooks.on_monitor_event {
            monitor = monitor.with_dispatcher(
                EventDispatcher::spawn("monitor", cfg.notification_capacity, hook)
                    .map_err(spawn_err)?,
            );
        }
        monitor.start()?;
        controller = controller.with_monitor(Arc::new(monitor));
    }

    if let Some(queue) = dead_letters {
        controller = controller.with_dead_letter_queue(queue);
    }

    info!(
        tenants = cfg.tenants.len(),
        monitor = cfg.monitor.enabled,
        unknown_tenants = ?cfg.unknown_tenants,
        "admission controller built"
    );
    Ok(controller)
}
