//! Dead-letter queue backends.

pub mod file;
pub mod memory;

pub use crate::core::dead_letter::{DeadLetterEntry, DeadLetterQueue};
pub use file::FileDeadLetterQueue;
pub use memory::InMemoryDeadLetterQueue;
