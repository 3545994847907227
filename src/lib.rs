//! # Tenant Admission
//!
//! Admission and resilience control plane for a worker pool shared by many
//! tenants.
//!
//! For every submitted unit of work the control plane decides:
//!
//! - **Admission**: whether the tenant may submit more work right now, from a
//!   lock-free per-tenant quota
//! - **Scheduling**: which tenant's work runs next, by strict priority with
//!   round-robin inside each priority tier
//! - **Protection**: whether a downstream dependency is healthy enough to call,
//!   through a closed/open/half-open circuit breaker per task type
//! - **Recovery**: how failed attempts are retried, with capped exponential
//!   backoff, ±25% jitter and cancellation
//! - **Back-pressure**: whether process CPU or memory is above its ceiling,
//!   from a sampling monitor that gates new admissions
//!
//! The worker threads, the pending-task queue and dead-letter persistence stay
//! outside this crate; they talk to it through [`core::AdmissionController`]
//! and the [`core::DeadLetterQueue`] trait.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tenant_admission::core::{AdmissionController, ExecError, TaskContext, TenantConfig};
//!
//! # async fn run() {
//! let controller = AdmissionController::default();
//! controller
//!     .register_tenant(TenantConfig::new("acme").with_priority(10).with_max_queue_size(8))
//!     .unwrap();
//!
//! let ctx = TaskContext::builder("acme").user_id("u-42").build();
//! match controller
//!     .execute(&ctx, "embedding", b"payload", |_attempt| async { Ok::<_, String>("done") })
//!     .await
//! {
//!     Ok(out) => println!("{out}"),
//!     Err(ExecError::Control(e)) if e.is_rejection() => println!("back off: {e}"),
//!     Err(e) => eprintln!("failed: {e}"),
//! }
//! # }
//! ```
//!
//! For complete examples, see:
//! - `tests/admission_test.rs` - End-to-end admission flow
//! - `tests/circuit_breaker_test.rs` - Breaker state machine under concurrency

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core admission, scheduling and resilience components.
pub mod core;
/// Configuration models for tenants, breakers, retries, and the monitor.
pub mod config;
/// Builders to construct the controller from configuration.
pub mod builders;
/// Infrastructure adapters for dead-letter storage.
pub mod infra;
/// API surface for observability endpoints.
pub mod runtime;
/// Shared utilities.
pub mod util;
