//! Bounded retries with exponential backoff, jitter, and cancellation.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::context::TaskContext;
use crate::core::RetryError;
use crate::util::clock::now_ms;

/// Share of the delay that jitter may add or remove.
const JITTER_FRACTION: f64 = 0.25;

/// Retry configuration. Holds no mutable state.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for any delay before jitter.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Apply up to ±25% uniform jitter.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set the retry count.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial and maximum delays.
    #[must_use]
    pub const fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// `min(initial_delay * multiplier^attempt_index, max_delay)`, without jitter.
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(self.max_delay)
    }

    /// Apply jitter to `delay` when enabled.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor: f64 = rand::rng().random_range(-1.0..=1.0);
        delay.mul_f64(JITTER_FRACTION.mul_add(factor, 1.0))
    }
}

/// One in-progress retry sequence, owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryableTask {
    /// Task identifier.
    pub id: String,
    /// Attempts started.
    pub attempts: u32,
    /// Creation time, ms since epoch.
    pub created_at_ms: u128,
    /// Start of the latest attempt, ms since epoch.
    pub last_attempt_ms: Option<u128>,
    /// Errors in attempt order.
    pub errors: Vec<String>,
}

impl RetryableTask {
    /// Fresh record for `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attempts: 0,
            created_at_ms: now_ms(),
            last_attempt_ms: None,
            errors: Vec::new(),
        }
    }

    fn begin_attempt(&mut self) {
        self.attempts += 1;
        self.last_attempt_ms = Some(now_ms());
    }
}

/// Runs functions under a [`RetryPolicy`].
///
/// Cancellation is checked before every attempt and before every wait, and
/// the wait itself is raced against the context's cancellation token.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor;

impl RetryExecutor {
    /// Create an executor.
    pub const fn new() -> Self {
        Self
    }

    /// Retry every error until success or exhaustion.
    ///
    /// `f` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// `Cancelled` if the context fired, otherwise `Exhausted` with the last error.
    pub async fn execute<T, E, F, Fut>(
        &self,
        ctx: &TaskContext,
        policy: &RetryPolicy,
        f: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(ctx, policy, f, |_| true, None).await
    }

    /// Retry only errors accepted by `should_retry`.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute), plus `Aborted` with the first error the
    /// predicate refused.
    pub async fn execute_if<T, E, F, Fut, P>(
        &self,
        ctx: &TaskContext,
        policy: &RetryPolicy,
        f: F,
        should_retry: P,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
    {
        self.run(ctx, policy, f, should_retry, None).await
    }

    /// Like [`execute_if`](Self::execute_if), recording attempts and errors on `task`.
    ///
    /// # Errors
    ///
    /// As [`execute_if`](Self::execute_if).
    pub async fn execute_tracked<T, E, F, Fut, P>(
        &self,
        ctx: &TaskContext,
        policy: &RetryPolicy,
        task: &mut RetryableTask,
        f: F,
        should_retry: P,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
    {
        self.run(ctx, policy, f, should_retry, Some(task)).await
    }

    async fn run<T, E, F, Fut, P>(
        &self,
        ctx: &TaskContext,
        policy: &RetryPolicy,
        mut f: F,
        mut should_retry: P,
        mut task: Option<&mut RetryableTask>,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
    {
        let token = ctx.cancellation();
        let max_attempts = policy.max_retries.saturating_add(1);
        let mut attempts = 0;

        loop {
            if token.is_cancelled() {
                debug!(request_id = %ctx.request_id(), attempts, "retry cancelled before attempt");
                return Err(RetryError::Cancelled { attempts });
            }
            attempts += 1;
            if let Some(task) = task.as_deref_mut() {
                task.begin_attempt();
            }

            let err = match f(attempts).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if let Some(task) = task.as_deref_mut() {
                task.errors.push(err.to_string());
            }

            if token.is_cancelled() {
                return Err(RetryError::Cancelled { attempts });
            }
            if !should_retry(&err) {
                debug!(request_id = %ctx.request_id(), attempts, error = %err, "error not retryable");
                return Err(RetryError::Aborted { attempts, last: err });
            }
            if attempts >= max_attempts {
                warn!(request_id = %ctx.request_id(), attempts, error = %err, "retries exhausted");
                return Err(RetryError::Exhausted { attempts, last: err });
            }

            let delay = policy.jittered(policy.delay_for_attempt(attempts - 1));
            debug!(
                request_id = %ctx.request_id(),
                attempt = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "attempt failed, backing off"
            );
            tokio::select! {
                biased;
                () = token.cancelled() => return Err(RetryError::Cancelled { attempts }),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(retries: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(retries)
            .with_delays(Duration::from_millis(1), Duration::from_millis(5))
            .with_jitter(false)
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::default()
            .with_delays(Duration::from_millis(100), Duration::from_millis(1_000))
            .with_jitter(false);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = RetryPolicy::default();
        let base = Duration::from_millis(1_000);
        for _ in 0..200 {
            let d = policy.jittered(base);
            assert!(d >= Duration::from_millis(750));
            assert!(d <= Duration::from_millis(1_250));
        }
        assert_eq!(policy.with_jitter(false).jittered(base), base);
    }

    #[tokio::test]
    async fn test_always_failing_runs_max_retries_plus_one() {
        let calls = AtomicU32::new(0);
        let ctx = TaskContext::new("t1");
        let result: Result<(), _> = RetryExecutor::new()
            .execute(&ctx, &fast_policy(3), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("nope") }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 4, last: "nope" })
        ));
    }

    #[tokio::test]
    async fn test_succeeds_on_kth_attempt() {
        let calls = AtomicU32::new(0);
        let ctx = TaskContext::new("t1");
        let value = RetryExecutor::new()
            .execute(&ctx, &fast_policy(5), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err("transient")
                    } else {
                        Ok(attempt * 10)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 30);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_predicate_stops_early() {
        let calls = AtomicU32::new(0);
        let ctx = TaskContext::new("t1");
        let result: Result<(), _> = RetryExecutor::new()
            .execute_if(
                &ctx,
                &fast_policy(5),
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("fatal") }
                },
                |e: &&str| *e != "fatal",
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Aborted { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let calls = AtomicU32::new(0);
        let ctx = TaskContext::new("t1");
        ctx.cancel();
        let result: Result<(), RetryError<&str>> = RetryExecutor::new()
            .execute(&ctx, &fast_policy(3), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 0 })));
    }

    #[tokio::test]
    async fn test_tracked_records_errors() {
        let ctx = TaskContext::new("t1");
        let mut task = RetryableTask::new("task-1");
        let result: Result<(), _> = RetryExecutor::new()
            .execute_tracked(
                &ctx,
                &fast_policy(2),
                &mut task,
                |attempt| async move { Err::<(), _>(format!("fail {attempt}")) },
                |_| true,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(task.attempts, 3);
        assert_eq!(task.errors, vec!["fail 1", "fail 2", "fail 3"]);
        assert!(task.last_attempt_ms.is_some());
    }
}
