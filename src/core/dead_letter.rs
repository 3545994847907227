//! Dead-letter contract for tasks that exhausted their retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::ControlError;
use crate::util::clock::now_ms;

/// A task that failed terminally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Task identifier; unique within a queue.
    pub task_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Opaque task payload.
    pub payload: Vec<u8>,
    /// When the task was dead-lettered.
    pub failed_at_ms: u128,
    /// Attempts made before giving up.
    pub failure_count: u32,
    /// Error text per attempt, oldest first.
    pub errors: Vec<String>,
}

impl DeadLetterEntry {
    /// Entry stamped with the current time.
    pub fn new(
        task_id: impl Into<String>,
        tenant_id: impl Into<String>,
        payload: Vec<u8>,
        failure_count: u32,
        errors: Vec<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            tenant_id: tenant_id.into(),
            payload,
            failed_at_ms: now_ms(),
            failure_count,
            errors,
        }
    }

    /// Encode as the opaque bytes backends store.
    ///
    /// # Errors
    ///
    /// `Backend` if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ControlError> {
        serde_json::to_vec(self).map_err(|e| ControlError::Backend(e.to_string()))
    }

    /// Decode stored bytes.
    ///
    /// # Errors
    ///
    /// `Backend` if the bytes are not a valid entry.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ControlError> {
        serde_json::from_slice(bytes).map_err(|e| ControlError::Backend(e.to_string()))
    }
}

/// Storage for dead-lettered tasks.
///
/// `pop` hands an entry out without deleting it; `acknowledge` deletes it.
/// Every operation fails with [`ControlError::Backend`] after `close`.
#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    /// Append an entry. Pushing an existing `task_id` replaces that entry.
    async fn push(&self, entry: DeadLetterEntry) -> Result<(), ControlError>;

    /// Take the oldest pending entry and hold it until acknowledged.
    async fn pop(&self) -> Result<Option<DeadLetterEntry>, ControlError>;

    /// Oldest pending entry, left in place.
    async fn peek(&self) -> Result<Option<DeadLetterEntry>, ControlError>;

    /// Delete an entry by task id. Returns false if it was unknown.
    async fn acknowledge(&self, task_id: &str) -> Result<bool, ControlError>;

    /// Pending entries, excluding popped-but-unacknowledged ones.
    async fn len(&self) -> Result<usize, ControlError>;

    /// Refuse further operations.
    async fn close(&self) -> Result<(), ControlError>;
}
