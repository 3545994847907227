//! Admission controller: the entry point worker-pool glue talks to.
//!
//! The controller owns the tenant registry, the fair scheduler, one circuit
//! breaker per task type and the retry policy. An optional resource monitor
//! gates admission while the process is throttled, and an optional
//! dead-letter queue receives tasks that failed terminally.
//!
//! ```no_run
//! use tenant_admission::core::{AdmissionController, TaskContext, TenantConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = AdmissionController::default();
//! controller.register_tenant(TenantConfig::new("acme").with_max_queue_size(4))?;
//!
//! let ctx = TaskContext::new("acme");
//! let answer = controller
//!     .execute(&ctx, "inference", b"{}", |_attempt| async { Ok::<_, std::io::Error>(42) })
//!     .await?;
//! assert_eq!(answer, 42);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::core::audit::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink};
use crate::core::circuit_breaker::{BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitState};
use crate::core::dead_letter::{DeadLetterEntry, DeadLetterQueue};
use crate::core::monitor::{MonitorMetrics, ResourceMonitor};
use crate::core::retry::{RetryExecutor, RetryPolicy, RetryableTask};
use crate::core::scheduler::TenantScheduler;
use crate::core::stats::{PoolStats, StatsCollector};
use crate::core::tenant::{TenantConfig, TenantInfo, TenantRegistry};
use crate::core::{ControlError, ExecError, RetryError, TaskContext};

/// Events kept by the default audit sink.
pub const DEFAULT_AUDIT_CAPACITY: usize = 1024;

/// A reserved task slot. Dropping it releases the slot exactly once.
#[derive(Debug)]
#[must_use = "dropping the permit releases the quota slot immediately"]
pub struct QuotaPermit {
    tenant: Arc<TenantInfo>,
}

impl QuotaPermit {
    /// Tenant the slot belongs to.
    pub fn tenant_id(&self) -> &str {
        self.tenant.id()
    }

    /// Tenant state the slot was reserved against.
    pub const fn tenant(&self) -> &Arc<TenantInfo> {
        &self.tenant
    }
}

impl Drop for QuotaPermit {
    fn drop(&mut self) {
        self.tenant.quota().release();
    }
}

/// Combined counters for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerMetrics {
    /// Pool-wide counters.
    pub pool: PoolStats,
    /// Monitor snapshot, when a monitor is attached.
    pub resources: Option<MonitorMetrics>,
    /// State of every breaker created so far.
    pub breakers: HashMap<String, CircuitState>,
    /// Stored tenants.
    pub tenants: usize,
}

/// Admission, protection and accounting for multi-tenant task execution.
pub struct AdmissionController {
    registry: TenantRegistry,
    scheduler: TenantScheduler,
    breakers: BreakerRegistry,
    retry: RetryPolicy,
    executor: RetryExecutor,
    stats: StatsCollector,
    monitor: Option<Arc<ResourceMonitor>>,
    dead_letters: Option<Arc<dyn DeadLetterQueue>>,
    audit: Arc<dyn AuditSink>,
    reject_when_throttled: bool,
}

impl fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("tenants", &self.registry.len())
            .field("scheduled", &self.scheduler.len())
            .field("retry", &self.retry)
            .field("monitor", &self.monitor.is_some())
            .field("dead_letters", &self.dead_letters.is_some())
            .field("reject_when_throttled", &self.reject_when_throttled)
            .finish_non_exhaustive()
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(
            TenantRegistry::default(),
            BreakerRegistry::new(BreakerConfig::default()),
        )
    }
}

impl AdmissionController {
    /// Controller over `registry` and `breakers` with the default retry policy.
    ///
    /// Tenants already stored in `registry` are added to the scheduler in id
    /// order. Use [`register_tenant`](Self::register_tenant) on the new
    /// controller when the rotation must follow registration order.
    pub fn new(registry: TenantRegistry, breakers: BreakerRegistry) -> Self {
        let scheduler = TenantScheduler::new();
        let mut stored: Vec<_> = registry.all_tenants().into_iter().collect();
        stored.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        for (_, info) in stored {
            scheduler.add_tenant(info);
        }
        Self {
            registry,
            scheduler,
            breakers,
            retry: RetryPolicy::default(),
            executor: RetryExecutor::new(),
            stats: StatsCollector::new(),
            monitor: None,
            dead_letters: None,
            audit: Arc::new(InMemoryAuditSink::new(DEFAULT_AUDIT_CAPACITY)),
            reject_when_throttled: true,
        }
    }

    /// Retry policy for [`execute`](Self::execute).
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Gate admission on `monitor`'s throttle flag.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<ResourceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Route terminal failures to `queue`.
    #[must_use]
    pub fn with_dead_letter_queue(mut self, queue: Arc<dyn DeadLetterQueue>) -> Self {
        self.dead_letters = Some(queue);
        self
    }

    /// Replace the default in-memory audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Whether a throttled monitor rejects new work (default true).
    #[must_use]
    pub const fn reject_when_throttled(mut self, reject: bool) -> Self {
        self.reject_when_throttled = reject;
        self
    }

    /// Register or replace a tenant and make it schedulable.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the tenant id is empty.
    pub fn register_tenant(&self, config: TenantConfig) -> Result<Arc<TenantInfo>, ControlError> {
        let info = self.registry.register_tenant(config)?;
        self.scheduler.add_tenant(Arc::clone(&info));
        Ok(info)
    }

    /// Remove a tenant from the registry and the scheduler.
    pub fn remove_tenant(&self, id: &str) -> bool {
        let scheduled = self.scheduler.remove_tenant(id);
        self.registry.remove_tenant(id).is_some() || scheduled
    }

    /// Reserve a task slot for the context's tenant.
    ///
    /// # Errors
    ///
    /// `Cancelled` if the context already fired, `TenantNotFound` for an
    /// unknown tenant under the reject policy, `Throttled` while the monitor
    /// is throttled, `QuotaExceeded` when no slot is free.
    pub fn admit(&self, ctx: &TaskContext) -> Result<QuotaPermit, ControlError> {
        self.admit_task(ctx, "")
    }

    fn admit_task(&self, ctx: &TaskContext, task_type: &str) -> Result<QuotaPermit, ControlError> {
        let tenant_id = ctx.tenant_id();
        if ctx.is_cancelled() {
            return Err(ControlError::Cancelled);
        }

        let info = match self.schedulable_tenant(tenant_id) {
            Ok(info) => info,
            Err(err) => return Err(self.rejected(ctx, task_type, None, err)),
        };

        if self.reject_when_throttled {
            if let Some(resource) = self.monitor.as_ref().and_then(|m| m.throttled_resource()) {
                let err = ControlError::Throttled(resource.to_string());
                return Err(self.rejected(ctx, task_type, Some(&info), err));
            }
        }

        if !info.quota().check_and_reserve() {
            let err = ControlError::QuotaExceeded(tenant_id.to_string());
            return Err(self.rejected(ctx, task_type, Some(&info), err));
        }

        info.record_submitted();
        self.audit(ctx, task_type, AuditAction::Admit, None);
        Ok(QuotaPermit { tenant: info })
    }

    /// Stored or adopted record for `id`, scheduled if it is not yet.
    ///
    /// Covers tenants first stored through [`registry`](Self::registry)
    /// directly, which the scheduler never saw.
    fn schedulable_tenant(&self, id: &str) -> Result<Arc<TenantInfo>, ControlError> {
        let info = self.registry.get_or_adopt(id)?;
        self.scheduler.add_if_absent(Arc::clone(&info));
        Ok(info)
    }

    fn rejected(
        &self,
        ctx: &TaskContext,
        task_type: &str,
        info: Option<&Arc<TenantInfo>>,
        err: ControlError,
    ) -> ControlError {
        if let Some(info) = info {
            info.record_rejected();
        }
        self.stats.record_task_rejection();
        debug!(tenant = %ctx.tenant_id(), request_id = %ctx.request_id(), error = %err, "task rejected");
        self.audit(ctx, task_type, AuditAction::Reject, Some(err.to_string()));
        err
    }

    /// Admit, then run `f` with retries under the `task_type` breaker.
    ///
    /// `f` receives the 1-based attempt number and is only called once the
    /// breaker lets the attempt through. Retries continue for task
    /// errors and half-open refusals and stop as soon as the circuit is open.
    /// A task error that survives every retry is dead-lettered with `payload`.
    ///
    /// # Errors
    ///
    /// `Control` for admission and protection rejections or cancellation,
    /// `Task` with the function's last error otherwise.
    pub async fn execute<T, E, F, Fut>(
        &self,
        ctx: &TaskContext,
        task_type: &str,
        payload: &[u8],
        f: F,
    ) -> Result<T, ExecError<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let span = info_span!(
            "task.execute",
            tenant = %ctx.tenant_id(),
            request_id = %ctx.request_id(),
            task_type
        );
        self.execute_inner(ctx, task_type, payload, f)
            .instrument(span)
            .await
    }

    async fn execute_inner<T, E, F, Fut>(
        &self,
        ctx: &TaskContext,
        task_type: &str,
        payload: &[u8],
        mut f: F,
    ) -> Result<T, ExecError<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.admit_task(ctx, task_type)?;
        let breaker = self.breakers.get_or_create(task_type);
        let breaker: &CircuitBreaker = &breaker;
        let mut task = RetryableTask::new(ctx.request_id());

        let worker = self.stats.track_worker();
        let started = Instant::now();
        let outcome = self
            .executor
            .execute_tracked(
                ctx,
                &self.retry,
                &mut task,
                move |attempt| {
                    let admitted = breaker.acquire().map(|pass| (pass, f(attempt)));
                    async move {
                        match admitted {
                            Ok((pass, attempt_fut)) => breaker.run_admitted(pass, attempt_fut).await,
                            Err(err) => Err(ExecError::Control(err)),
                        }
                    }
                },
                |err: &ExecError<E>| match err {
                    ExecError::Task(_) | ExecError::Control(ControlError::TooManyRequests(_)) => {
                        true
                    }
                    ExecError::Control(_) => false,
                },
            )
            .await;
        let elapsed = started.elapsed();
        drop(worker);

        let result: Result<T, ExecError<E>> = match outcome {
            Ok(value) => {
                permit.tenant().record_completed(elapsed);
                self.stats.record_task_completion(elapsed);
                self.audit(ctx, task_type, AuditAction::Complete, None);
                Ok(value)
            }
            Err(RetryError::Cancelled { attempts }) => {
                permit.tenant().record_failed();
                self.stats.record_task_failure();
                self.audit(
                    ctx,
                    task_type,
                    AuditAction::Fail,
                    Some(format!("cancelled after {attempts} attempt(s)")),
                );
                Err(ExecError::Control(ControlError::Cancelled))
            }
            Err(RetryError::Exhausted { attempts, last } | RetryError::Aborted { attempts, last }) => {
                match last {
                    ExecError::Control(err) if err.is_rejection() => {
                        Err(self.rejected(ctx, task_type, Some(permit.tenant()), err).into())
                    }
                    last => {
                        permit.tenant().record_failed();
                        self.stats.record_task_failure();
                        self.audit(ctx, task_type, AuditAction::Fail, Some(last.to_string()));
                        self.dead_letter(ctx, task_type, payload, attempts, task.errors)
                            .await;
                        Err(last)
                    }
                }
            }
        };
        drop(permit);
        result
    }

    async fn dead_letter(
        &self,
        ctx: &TaskContext,
        task_type: &str,
        payload: &[u8],
        attempts: u32,
        errors: Vec<String>,
    ) {
        let Some(queue) = &self.dead_letters else {
            return;
        };
        let entry = DeadLetterEntry::new(
            ctx.request_id(),
            ctx.tenant_id(),
            payload.to_vec(),
            attempts,
            errors,
        );
        match queue.push(entry).await {
            Ok(()) => self.audit(ctx, task_type, AuditAction::DeadLetter, None),
            Err(err) => warn!(
                tenant = %ctx.tenant_id(),
                request_id = %ctx.request_id(),
                error = %err,
                "failed to dead-letter task"
            ),
        }
    }

    fn audit(&self, ctx: &TaskContext, task_type: &str, action: AuditAction, detail: Option<String>) {
        self.audit.record(build_audit_event(
            ctx.request_id(),
            task_type,
            ctx.tenant_id(),
            action,
            detail,
        ));
    }

    /// Next tenant by priority, round-robin within a priority.
    pub fn next_tenant(&self) -> Option<Arc<TenantInfo>> {
        self.scheduler.schedule()
    }

    /// Like [`next_tenant`](Self::next_tenant), skipping tenants `has_work`
    /// rejects.
    pub fn next_tenant_where<F>(&self, has_work: F) -> Option<Arc<TenantInfo>>
    where
        F: FnMut(&TenantInfo) -> bool,
    {
        self.scheduler.schedule_where(has_work)
    }

    /// Store a tenant's current memory usage. Last write wins.
    ///
    /// # Errors
    ///
    /// `TenantNotFound` if the tenant is unknown and cannot be adopted.
    pub fn record_memory(&self, tenant_id: &str, bytes: u64) -> Result<(), ControlError> {
        self.schedulable_tenant(tenant_id)?.record_memory(bytes);
        Ok(())
    }

    /// Pool-wide counters with the caller's queue length.
    pub fn stats(&self, queue_len: usize) -> PoolStats {
        self.stats.snapshot(queue_len)
    }

    /// Pool counters, resource usage and breaker states together.
    pub fn metrics(&self, queue_len: usize) -> ControllerMetrics {
        ControllerMetrics {
            pool: self.stats(queue_len),
            resources: self.monitor.as_ref().map(|m| m.metrics()),
            breakers: self.breakers.states(),
            tenants: self.registry.len(),
        }
    }

    /// One report per stored tenant.
    pub fn tenant_reports(&self) -> Vec<crate::runtime::api::TenantReport> {
        crate::runtime::api::tenant_reports(self)
    }

    /// True while an attached monitor reports throttling.
    pub fn is_throttled(&self) -> bool {
        self.monitor.as_ref().is_some_and(|m| m.is_throttled())
    }

    /// Breaker for `task_type`, created on first use.
    pub fn breaker(&self, task_type: &str) -> Arc<CircuitBreaker> {
        self.breakers.get_or_create(task_type)
    }

    /// Tenant registry.
    pub const fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    /// Tenant scheduler.
    pub const fn scheduler(&self) -> &TenantScheduler {
        &self.scheduler
    }

    /// Breaker registry.
    pub const fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Attached resource monitor.
    pub const fn monitor(&self) -> Option<&Arc<ResourceMonitor>> {
        self.monitor.as_ref()
    }

    /// Attached dead-letter queue.
    pub const fn dead_letter_queue(&self) -> Option<&Arc<dyn DeadLetterQueue>> {
        self.dead_letters.as_ref()
    }

    /// Retry policy in effect.
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Uptime of the controller's counters.
    pub fn uptime(&self) -> Duration {
        self.stats.snapshot(0).uptime
    }
}
