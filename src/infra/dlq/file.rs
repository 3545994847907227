//! File-backed dead-letter queue using JSON lines.
//!
//! Pending entries live in `<dir>/<stream>.jsonl`, one encoded entry per line.
//! The file is rewritten whenever an entry leaves the pending set and is
//! reloaded when the queue is opened. Every operation writes the file before
//! touching memory, so a failed write leaves the queue as it was. Popped entries that were never
//! acknowledged are written back on `close`, so they survive a restart.

use std::collections::{HashMap, VecDeque};
use std::fs::{create_dir_all, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::dead_letter::{DeadLetterEntry, DeadLetterQueue};
use crate::core::notify::EventDispatcher;
use crate::core::ControlError;

fn backend(e: impl std::fmt::Display) -> ControlError {
    ControlError::Backend(e.to_string())
}

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<DeadLetterEntry>,
    in_flight: HashMap<String, DeadLetterEntry>,
    closed: bool,
}

/// Dead-letter queue persisted to a JSON-lines file.
#[derive(Debug)]
pub struct FileDeadLetterQueue {
    file_path: PathBuf,
    state: Mutex<State>,
    on_message: Option<EventDispatcher<DeadLetterEntry>>,
}

impl FileDeadLetterQueue {
    /// Open or create the queue for `stream` under `dir`.
    ///
    /// # Errors
    ///
    /// `Backend` if the directory or file cannot be read, or a line does not
    /// decode.
    pub fn open(dir: impl AsRef<Path>, stream: &str) -> Result<Self, ControlError> {
        let dir = dir.as_ref();
        create_dir_all(dir).map_err(backend)?;
        let file_path = dir.join(format!("{stream}.jsonl"));
        let pending = Self::load(&file_path)?;
        debug!(path = %file_path.display(), entries = pending.len(), "dead-letter file loaded");
        Ok(Self {
            file_path,
            state: Mutex::new(State {
                pending,
                ..State::default()
            }),
            on_message: None,
        })
    }

    /// Notify `dispatcher` of every pushed entry.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: EventDispatcher<DeadLetterEntry>) -> Self {
        self.on_message = Some(dispatcher);
        self
    }

    /// Backing file location.
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn load(file_path: &Path) -> Result<VecDeque<DeadLetterEntry>, ControlError> {
        let mut entries = VecDeque::new();
        if !file_path.exists() {
            return Ok(entries);
        }
        let file = OpenOptions::new()
            .read(true)
            .open(file_path)
            .map_err(backend)?;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(backend)?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push_back(DeadLetterEntry::from_bytes(line.as_bytes())?);
        }
        Ok(entries)
    }

    fn append(&self, entry: &DeadLetterEntry) -> Result<(), ControlError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .map_err(backend)?;
        let line = serde_json::to_string(entry).map_err(backend)?;
        writeln!(file, "{line}").map_err(backend)
    }

    fn rewrite<'a>(
        &self,
        entries: impl Iterator<Item = &'a DeadLetterEntry>,
    ) -> Result<(), ControlError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.file_path)
            .map_err(backend)?;
        for entry in entries {
            let line = serde_json::to_string(entry).map_err(backend)?;
            writeln!(file, "{line}").map_err(backend)?;
        }
        file.flush().map_err(backend)
    }

    fn ensure_open(state: &State) -> Result<(), ControlError> {
        if state.closed {
            Err(ControlError::Backend("dead-letter queue closed".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DeadLetterQueue for FileDeadLetterQueue {
    async fn push(&self, entry: DeadLetterEntry) -> Result<(), ControlError> {
        {
            let mut state = self.state.lock();
            Self::ensure_open(&state)?;
            let was_in_flight = state.in_flight.contains_key(&entry.task_id);
            let was_pending = state.pending.iter().any(|e| e.task_id == entry.task_id);
            if was_pending || was_in_flight {
                let kept = state.pending.iter().filter(|e| e.task_id != entry.task_id);
                self.rewrite(kept.chain(std::iter::once(&entry)))?;
            } else {
                self.append(&entry)?;
            }
            state.in_flight.remove(&entry.task_id);
            state.pending.retain(|e| e.task_id != entry.task_id);
            state.pending.push_back(entry.clone());
        }
        if let Some(dispatcher) = &self.on_message {
            dispatcher.dispatch(entry);
        }
        Ok(())
    }

    async fn pop(&self) -> Result<Option<DeadLetterEntry>, ControlError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        if state.pending.is_empty() {
            return Ok(None);
        }
        self.rewrite(state.pending.iter().skip(1))?;
        let Some(entry) = state.pending.pop_front() else {
            return Ok(None);
        };
        state.in_flight.insert(entry.task_id.clone(), entry.clone());
        Ok(Some(entry))
    }

    async fn peek(&self) -> Result<Option<DeadLetterEntry>, ControlError> {
        let state = self.state.lock();
        Self::ensure_open(&state)?;
        Ok(state.pending.front().cloned())
    }

    async fn acknowledge(&self, task_id: &str) -> Result<bool, ControlError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        if state.in_flight.remove(task_id).is_some() {
            return Ok(true);
        }
        if !state.pending.iter().any(|e| e.task_id == task_id) {
            return Ok(false);
        }
        self.rewrite(state.pending.iter().filter(|e| e.task_id != task_id))?;
        state.pending.retain(|e| e.task_id != task_id);
        Ok(true)
    }

    async fn len(&self) -> Result<usize, ControlError> {
        let state = self.state.lock();
        Self::ensure_open(&state)?;
        Ok(state.pending.len())
    }

    async fn close(&self) -> Result<(), ControlError> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        if !state.in_flight.is_empty() {
            warn!(
                unacknowledged = state.in_flight.len(),
                "returning unacknowledged dead letters to the file"
            );
            let mut returned: Vec<_> = state.in_flight.values().cloned().collect();
            returned.sort_by_key(|e| e.failed_at_ms);
            self.rewrite(returned.iter().chain(state.pending.iter()))?;

            state.in_flight.clear();
            for entry in returned.into_iter().rev() {
                state.pending.push_front(entry);
            }
        }
        state.closed = true;
        Ok(())
    }
}
