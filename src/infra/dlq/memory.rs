//! In-memory dead-letter queue.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::core::dead_letter::{DeadLetterEntry, DeadLetterQueue};
use crate::core::notify::EventDispatcher;
use crate::core::ControlError;

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<(String, Vec<u8>)>,
    in_flight: HashMap<String, Vec<u8>>,
    closed: bool,
}

impl State {
    fn ensure_open(&self) -> Result<(), ControlError> {
        if self.closed {
            Err(ControlError::Backend("dead-letter queue closed".into()))
        } else {
            Ok(())
        }
    }
}

/// FIFO dead-letter queue kept in process memory.
///
/// Entries are stored as encoded bytes. A popped entry moves to an in-flight
/// set and stays there until acknowledged.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterQueue {
    state: Mutex<State>,
    on_message: Option<EventDispatcher<DeadLetterEntry>>,
}

impl InMemoryDeadLetterQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notify `dispatcher` of every pushed entry.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: EventDispatcher<DeadLetterEntry>) -> Self {
        self.on_message = Some(dispatcher);
        self
    }

    /// Popped entries not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }
}

#[async_trait]
impl DeadLetterQueue for InMemoryDeadLetterQueue {
    async fn push(&self, entry: DeadLetterEntry) -> Result<(), ControlError> {
        let bytes = entry.to_bytes()?;
        {
            let mut state = self.state.lock();
            state.ensure_open()?;
            state.pending.retain(|(id, _)| id != &entry.task_id);
            state.in_flight.remove(&entry.task_id);
            state.pending.push_back((entry.task_id.clone(), bytes));
        }
        debug!(task_id = %entry.task_id, tenant = %entry.tenant_id, "dead-lettered");
        if let Some(dispatcher) = &self.on_message {
            dispatcher.dispatch(entry);
        }
        Ok(())
    }

    async fn pop(&self) -> Result<Option<DeadLetterEntry>, ControlError> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        let Some((id, bytes)) = state.pending.pop_front() else {
            return Ok(None);
        };
        let entry = DeadLetterEntry::from_bytes(&bytes)?;
        state.in_flight.insert(id, bytes);
        Ok(Some(entry))
    }

    async fn peek(&self) -> Result<Option<DeadLetterEntry>, ControlError> {
        let state = self.state.lock();
        state.ensure_open()?;
        state
            .pending
            .front()
            .map(|(_, bytes)| DeadLetterEntry::from_bytes(bytes))
            .transpose()
    }

    async fn acknowledge(&self, task_id: &str) -> Result<bool, ControlError> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        if state.in_flight.remove(task_id).is_some() {
            return Ok(true);
        }
        let before = state.pending.len();
        state.pending.retain(|(id, _)| id != task_id);
        Ok(state.pending.len() != before)
    }

    async fn len(&self) -> Result<usize, ControlError> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state.pending.len())
    }

    async fn close(&self) -> Result<(), ControlError> {
        self.state.lock().closed = true;
        Ok(())
    }
}
