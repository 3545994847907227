//! Circuit breaker guarding one downstream operation, plus a per-key registry.
//!
//! The closed-state fast path reads the state from an `AtomicU8` and counts
//! failures with atomics. Transitions take a short `parking_lot::Mutex` that
//! is never held while the protected function runs. State changes are
//! published through an [`EventDispatcher`] and never wait on subscribers.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::notify::EventDispatcher;
use crate::core::{ControlError, ExecError};
use crate::util::clock::now_ms;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected until the timeout elapses.
    Open,
    /// A limited number of probe calls are let through.
    HalfOpen,
}

impl CircuitState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Breaker thresholds and timing.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Breaker name, usually the task type it protects.
    pub name: String,
    /// Consecutive failures in `closed` that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive successes in `half-open` that close it again.
    pub success_threshold: u32,
    /// Time after the last failure before a probe is allowed.
    pub timeout: Duration,
    /// Maximum concurrent probe calls in `half-open`.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

impl BreakerConfig {
    /// Default thresholds under a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the success threshold.
    #[must_use]
    pub const fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the open-state timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the half-open concurrency limit.
    #[must_use]
    pub const fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }
}

/// Published on every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerEvent {
    /// Breaker name.
    pub name: String,
    /// Previous state.
    pub from: CircuitState,
    /// New state.
    pub to: CircuitState,
    /// Transition time, ms since epoch.
    pub at_ms: u128,
}

/// Snapshot of a breaker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerCounts {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures.
    pub consecutive_failures: u32,
    /// Consecutive successes.
    pub consecutive_successes: u32,
    /// Probe calls in flight.
    pub half_open_in_flight: u32,
    /// Time since the circuit last opened on a failure.
    pub since_last_failure: Option<Duration>,
}

/// State guarded by the transition mutex.
#[derive(Debug)]
struct TransitionState {
    last_failure: Option<Instant>,
    /// Bumped on every transition; ties half-open permits to one episode.
    generation: u64,
}

/// How a call was admitted. A half-open permit frees its probe slot on drop.
pub(crate) struct Pass<'a> {
    breaker: &'a CircuitBreaker,
    half_open_generation: Option<u64>,
}

impl Drop for Pass<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.half_open_generation {
            let core = self.breaker.core.lock();
            if core.generation == generation {
                let _ = self.breaker.half_open_calls.fetch_update(
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    |n| n.checked_sub(1),
                );
            }
        }
    }
}

/// Closed/open/half-open protection for one downstream dependency.
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: AtomicU8,
    failures: AtomicU32,
    successes: AtomicU32,
    half_open_calls: AtomicU32,
    core: Mutex<TransitionState>,
    dispatcher: Option<EventDispatcher<BreakerEvent>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(CircuitState::Closed.as_u8()),
            failures: AtomicU32::new(0),
            successes: AtomicU32::new(0),
            half_open_calls: AtomicU32::new(0),
            core: Mutex::new(TransitionState {
                last_failure: None,
                generation: 0,
            }),
            dispatcher: None,
        }
    }

    /// Publish state changes to `dispatcher`.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: EventDispatcher<BreakerEvent>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Breaker configuration.
    pub const fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state, without triggering the open → half-open check.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Counter snapshot.
    pub fn counts(&self) -> BreakerCounts {
        let since_last_failure = self.core.lock().last_failure.map(|t| t.elapsed());
        BreakerCounts {
            state: self.state(),
            consecutive_failures: self.failures.load(Ordering::Acquire),
            consecutive_successes: self.successes.load(Ordering::Acquire),
            half_open_in_flight: self.half_open_calls.load(Ordering::Acquire),
            since_last_failure,
        }
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        let event = {
            let mut core = self.core.lock();
            self.failures.store(0, Ordering::Release);
            self.transition_locked(&mut core, CircuitState::Closed)
        };
        self.publish(event);
    }

    /// Run `f` under breaker protection.
    ///
    /// # Errors
    ///
    /// `Control(CircuitOpen)` or `Control(TooManyRequests)` without invoking
    /// `f`, or `Task(e)` with the function's own error.
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, ExecError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let pass = self.acquire()?;
        self.run_admitted(pass, f()).await
    }

    /// Await an attempt that `pass` already admitted and settle its outcome.
    pub(crate) async fn run_admitted<T, E, Fut>(
        &self,
        pass: Pass<'_>,
        attempt: Fut,
    ) -> Result<T, ExecError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let outcome = attempt.await;
        self.settle(&pass, outcome.is_ok());
        outcome.map_err(ExecError::Task)
    }

    /// Blocking counterpart of [`call`](Self::call) for worker threads.
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call).
    pub fn call_blocking<T, E, F>(&self, f: F) -> Result<T, ExecError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let pass = self.acquire()?;
        let outcome = f();
        self.settle(&pass, outcome.is_ok());
        outcome.map_err(ExecError::Task)
    }

    pub(crate) fn acquire(&self) -> Result<Pass<'_>, ControlError> {
        loop {
            match self.state() {
                CircuitState::Closed => {
                    return Ok(Pass {
                        breaker: self,
                        half_open_generation: None,
                    });
                }
                CircuitState::Open => {
                    let mut core = self.core.lock();
                    if self.state() != CircuitState::Open {
                        continue;
                    }
                    let elapsed = core
                        .last_failure
                        .is_none_or(|t| t.elapsed() >= self.config.timeout);
                    if !elapsed {
                        debug!(breaker = %self.config.name, "call rejected: circuit open");
                        return Err(ControlError::CircuitOpen(self.config.name.clone()));
                    }
                    let event = self.transition_locked(&mut core, CircuitState::HalfOpen);
                    drop(core);
                    self.publish(event);
                }
                CircuitState::HalfOpen => {
                    let core = self.core.lock();
                    if self.state() != CircuitState::HalfOpen {
                        continue;
                    }
                    if self.half_open_calls.load(Ordering::Acquire)
                        >= self.config.half_open_max_calls
                    {
                        debug!(breaker = %self.config.name, "call rejected: probe limit reached");
                        return Err(ControlError::TooManyRequests(self.config.name.clone()));
                    }
                    self.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    return Ok(Pass {
                        breaker: self,
                        half_open_generation: Some(core.generation),
                    });
                }
            }
        }
    }

    fn settle(&self, pass: &Pass<'_>, success: bool) {
        let event = match (pass.half_open_generation, success) {
            (None, true) => {
                self.failures.store(0, Ordering::Release);
                None
            }
            (None, false) => {
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures < self.config.failure_threshold {
                    return;
                }
                let mut core = self.core.lock();
                if self.state() == CircuitState::Closed {
                    warn!(
                        breaker = %self.config.name,
                        failures,
                        "failure threshold reached, opening circuit"
                    );
                    self.transition_locked(&mut core, CircuitState::Open)
                } else {
                    None
                }
            }
            (Some(generation), true) => {
                let mut core = self.core.lock();
                if core.generation != generation {
                    return;
                }
                let successes = self.successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold {
                    self.transition_locked(&mut core, CircuitState::Closed)
                } else {
                    None
                }
            }
            (Some(generation), false) => {
                let mut core = self.core.lock();
                if core.generation != generation {
                    return;
                }
                self.transition_locked(&mut core, CircuitState::Open)
            }
        };
        self.publish(event);
    }

    fn transition_locked(
        &self,
        core: &mut TransitionState,
        to: CircuitState,
    ) -> Option<BreakerEvent> {
        let from = self.state();
        if from == to {
            return None;
        }
        core.generation += 1;
        match to {
            CircuitState::Closed => {
                self.failures.store(0, Ordering::Release);
                self.successes.store(0, Ordering::Release);
                self.half_open_calls.store(0, Ordering::Release);
            }
            CircuitState::Open => {
                self.successes.store(0, Ordering::Release);
                core.last_failure = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                self.failures.store(0, Ordering::Release);
                self.successes.store(0, Ordering::Release);
                self.half_open_calls.store(0, Ordering::Release);
            }
        }
        self.state.store(to.as_u8(), Ordering::Release);
        info!(breaker = %self.config.name, from = %from, to = %to, "circuit state transition");
        Some(BreakerEvent {
            name: self.config.name.clone(),
            from,
            to,
            at_ms: now_ms(),
        })
    }

    fn publish(&self, event: Option<BreakerEvent>) {
        if let (Some(event), Some(dispatcher)) = (event, self.dispatcher.as_ref()) {
            dispatcher.dispatch(event);
        }
    }
}

/// Lazily creates one breaker per key from a shared template.
#[derive(Debug)]
pub struct BreakerRegistry {
    template: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    dispatcher: Option<EventDispatcher<BreakerEvent>>,
}

impl BreakerRegistry {
    /// Create an empty registry.
    pub fn new(template: BreakerConfig) -> Self {
        Self {
            template,
            breakers: RwLock::new(HashMap::new()),
            dispatcher: None,
        }
    }

    /// Share `dispatcher` with every breaker created from now on.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: EventDispatcher<BreakerEvent>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Breaker for `key`, created on first use.
    pub fn get_or_create(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(key) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write();
        let breaker = breakers.entry(key.to_string()).or_insert_with(|| {
            let config = BreakerConfig {
                name: key.to_string(),
                ..self.template.clone()
            };
            let breaker = CircuitBreaker::new(config);
            Arc::new(match self.dispatcher.clone() {
                Some(dispatcher) => breaker.with_dispatcher(dispatcher),
                None => breaker,
            })
        });
        Arc::clone(breaker)
    }

    /// Breaker for `key` if one exists.
    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(key).cloned()
    }

    /// Current state of every breaker.
    pub fn states(&self) -> HashMap<String, CircuitState> {
        self.breakers
            .read()
            .iter()
            .map(|(key, breaker)| (key.clone(), breaker.state()))
            .collect()
    }

    /// Keys whose breaker is open.
    pub fn open_circuits(&self) -> Vec<String> {
        self.breakers
            .read()
            .iter()
            .filter(|(_, breaker)| breaker.state() == CircuitState::Open)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Force every breaker closed.
    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }
}
