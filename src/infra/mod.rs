//! Infrastructure adapters for dead-letter storage.

pub mod dlq;

pub use dlq::{FileDeadLetterQueue, InMemoryDeadLetterQueue};
