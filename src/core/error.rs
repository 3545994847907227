//! Error types for admission and resilience operations.

use thiserror::Error;

/// Broad classification of a [`ControlError`].
///
/// Rejections are expected, frequent outcomes. Callers usually back off on them,
/// but surface execution failures to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Tenant quota exhausted, tenant unknown, or process throttled.
    AdmissionRejection,
    /// Circuit open or half-open probe limit reached.
    ProtectionRejection,
    /// The operation's cancellation signal fired.
    Cancellation,
    /// Invalid configuration supplied by the caller.
    Configuration,
    /// Backend (dead-letter store, sampler) failure.
    Backend,
}

/// Errors produced by the control plane itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// Tenant was never registered and cannot be adopted lazily.
    #[error("tenant not found: {0}")]
    TenantNotFound(String),
    /// Tenant has no free task slots.
    #[error("quota exceeded for tenant {0}")]
    QuotaExceeded(String),
    /// Configuration was rejected.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Circuit breaker for the given key is open.
    #[error("circuit breaker open: {0}")]
    CircuitOpen(String),
    /// Half-open breaker already has its maximum number of probes in flight.
    #[error("too many requests: {0}")]
    TooManyRequests(String),
    /// Process is above a configured resource ceiling.
    #[error("throttled on {0}")]
    Throttled(String),
    /// Operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl ControlError {
    /// Classify this error for routing decisions.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::TenantNotFound(_) | Self::QuotaExceeded(_) | Self::Throttled(_) => {
                ErrorClass::AdmissionRejection
            }
            Self::CircuitOpen(_) | Self::TooManyRequests(_) => ErrorClass::ProtectionRejection,
            Self::Cancelled => ErrorClass::Cancellation,
            Self::InvalidConfig(_) => ErrorClass::Configuration,
            Self::Backend(_) => ErrorClass::Backend,
        }
    }

    /// True for admission and protection rejections.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::AdmissionRejection | ErrorClass::ProtectionRejection
        )
    }
}

/// Outcome of a protected execution: either the control plane refused or
/// cancelled the call, or the wrapped function failed with its own error.
#[derive(Debug, Error)]
pub enum ExecError<E> {
    /// Rejected, cancelled, or otherwise stopped by the control plane.
    #[error(transparent)]
    Control(ControlError),
    /// The wrapped function returned this error.
    #[error("task failed: {0}")]
    Task(E),
}

impl<E> ExecError<E> {
    /// The control-plane error, if this is not a task failure.
    pub const fn as_control(&self) -> Option<&ControlError> {
        match self {
            Self::Control(e) => Some(e),
            Self::Task(_) => None,
        }
    }

    /// The wrapped function's error, if any.
    pub const fn as_task(&self) -> Option<&E> {
        match self {
            Self::Task(e) => Some(e),
            Self::Control(_) => None,
        }
    }

    /// True when the control plane rejected the call before running it.
    pub const fn is_rejection(&self) -> bool {
        match self {
            Self::Control(e) => e.is_rejection(),
            Self::Task(_) => false,
        }
    }

    /// True when the call was cancelled.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Control(ControlError::Cancelled))
    }
}

impl<E> From<ControlError> for ExecError<E> {
    fn from(e: ControlError) -> Self {
        Self::Control(e)
    }
}

/// Terminal outcome of a failed retry sequence.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Cancellation fired before or between attempts.
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Attempts made before cancellation.
        attempts: u32,
    },
    /// Every permitted attempt failed.
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last: E,
    },
    /// The retry predicate declined to retry this error.
    #[error("not retryable after {attempts} attempt(s): {last}")]
    Aborted {
        /// Attempts made.
        attempts: u32,
        /// Error that was not retried.
        last: E,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts that were actually invoked.
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Cancelled { attempts }
            | Self::Exhausted { attempts, .. }
            | Self::Aborted { attempts, .. } => *attempts,
        }
    }

    /// The last error observed, unless the sequence was cancelled.
    pub fn into_last(self) -> Option<E> {
        match self {
            Self::Cancelled { .. } => None,
            Self::Exhausted { last, .. } | Self::Aborted { last, .. } => Some(last),
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
