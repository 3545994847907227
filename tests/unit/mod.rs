//! Unit tests for individual components

mod audit_test;
mod builders_test;
mod config_test;
mod error_test;
mod quota_test;
mod runtime_test;
mod scheduler_test;
mod util_test;
