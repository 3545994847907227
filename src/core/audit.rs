//! Audit trail of admission decisions.
//!
//! Sinks receive one event per admit, reject, complete, fail and dead-letter
//! outcome. [`InMemoryAuditSink`] keeps a bounded ring for tests and dev;
//! [`TracingAuditSink`] forwards events to the `tracing` pipeline.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::util::clock::now_ms;

/// What happened to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Quota reserved, task admitted.
    Admit,
    /// Refused before running.
    Reject,
    /// Task succeeded.
    Complete,
    /// Task failed after admission.
    Fail,
    /// Task moved to the dead-letter queue.
    DeadLetter,
}

impl AuditAction {
    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admit => "admit",
            Self::Reject => "reject",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::DeadLetter => "dead_letter",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related task identifier.
    pub task_id: String,
    /// Caller-supplied task type.
    pub task_type: String,
    /// Tenant identifier.
    pub tenant: String,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Rejection reason or error text.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// In-memory audit sink with a bounded buffer; oldest events fall off.
#[derive(Debug)]
pub struct InMemoryAuditSink {
    events: Mutex<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a sink that keeps at most `max_events`.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events: max_events.max(1),
        }
    }

    /// Snapshot of stored events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored events with `action`.
    pub fn events_with(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Emits each event as an `info` record on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            target: "audit",
            event_id = %event.event_id,
            task_id = %event.task_id,
            task_type = %event.task_type,
            tenant = %event.tenant,
            action = %event.action,
            detail = event.detail.as_deref().unwrap_or(""),
            "audit"
        );
    }
}

/// Build an event with a fresh id and the current time.
pub fn build_audit_event(
    task_id: impl Into<String>,
    task_type: impl Into<String>,
    tenant: impl Into<String>,
    action: AuditAction,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4().to_string(),
        task_id: task_id.into(),
        task_type: task_type.into(),
        tenant: tenant.into(),
        action,
        created_at_ms: now_ms(),
        detail,
    }
}
