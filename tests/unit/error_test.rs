//! Tests for error types

use tenant_admission::core::{ControlError, ErrorClass, ExecError, RetryError};

#[test]
fn test_quota_exceeded_error() {
    let err = ControlError::QuotaExceeded("acme".to_string());
    assert_eq!(format!("{err}"), "quota exceeded for tenant acme");
    assert_eq!(err.class(), ErrorClass::AdmissionRejection);
    assert!(err.is_rejection());
}

#[test]
fn test_circuit_open_error() {
    let err = ControlError::CircuitOpen("embed".to_string());
    assert_eq!(format!("{err}"), "circuit breaker open: embed");
    assert_eq!(err.class(), ErrorClass::ProtectionRejection);
}

#[test]
fn test_cancellation_is_not_rejection() {
    let err = ControlError::Cancelled;
    assert_eq!(err.class(), ErrorClass::Cancellation);
    assert!(!err.is_rejection());
    assert!(ExecError::<String>::from(err).is_cancelled());
}

#[test]
fn test_backend_error() {
    let err = ControlError::Backend("disk full".to_string());
    assert_eq!(format!("{err}"), "backend error: disk full");
    assert_eq!(err.class(), ErrorClass::Backend);
}

#[test]
fn test_task_error_passes_through() {
    let err: ExecError<&str> = ExecError::Task("boom");
    assert_eq!(err.as_task(), Some(&"boom"));
    assert!(err.as_control().is_none());
    assert!(!err.is_rejection());
}

#[test]
fn test_retry_error_last() {
    let err: RetryError<&str> = RetryError::Exhausted {
        attempts: 4,
        last: "nope",
    };
    assert_eq!(err.attempts(), 4);
    assert_eq!(err.into_last(), Some("nope"));
    assert_eq!(RetryError::<&str>::Cancelled { attempts: 1 }.into_last(), None);
}
