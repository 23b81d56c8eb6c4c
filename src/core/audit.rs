//! Audit trail of task lifecycle events.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{TaskId, TaskWorkerGroup};
use crate::util::clock::now_ms;

/// Lifecycle action recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Task accepted into the queue.
    Submit,
    /// Task bound to a slot.
    Start,
    /// Job returned a value.
    Finish,
    /// Job failed or panicked.
    Error,
    /// Task stopped by a caller.
    Stop,
    /// Slot released after the stop grace period expired.
    ForceRelease,
    /// Terminal result popped by a caller.
    Pop,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Submit => "submit",
            Self::Start => "start",
            Self::Finish => "finish",
            Self::Error => "error",
            Self::Stop => "stop",
            Self::ForceRelease => "force_release",
            Self::Pop => "pop",
        };
        f.write_str(name)
    }
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related task identifier.
    pub task_id: TaskId,
    /// Group of the slot involved, if any.
    pub group: Option<TaskWorkerGroup>,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);

    /// Snapshot of retained events, if the sink keeps any.
    fn events(&self) -> Vec<AuditEvent> {
        Vec::new()
    }
}

/// In-memory audit sink with a bounded buffer; the oldest events are dropped.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

/// Helper to build an audit event stamped with the current time.
pub fn build_audit_event(
    task_id: &TaskId,
    group: Option<TaskWorkerGroup>,
    action: AuditAction,
    detail: Option<String>,
) -> AuditEvent {
    let created_at_ms = now_ms();
    AuditEvent {
        event_id: format!("{task_id}-{action}-{created_at_ms}"),
        task_id: task_id.clone(),
        group,
        action,
        created_at_ms,
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_audit_sink() {
        let mut sink = InMemoryAuditSink::new(10);
        sink.record(build_audit_event(
            &TaskId::from("task1"),
            Some(TaskWorkerGroup::LongTasksGpu),
            AuditAction::Start,
            Some("slot 0".to_string()),
        ));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].task_id, TaskId::from("task1"));
        assert_eq!(events[0].action, AuditAction::Start);
        assert!(events[0].event_id.starts_with("task1-start-"));
    }

    #[test]
    fn test_audit_sink_overflow() {
        let mut sink = InMemoryAuditSink::new(2);
        for id in ["t1", "t2", "t3"] {
            sink.record(build_audit_event(&TaskId::from(id), None, AuditAction::Submit, None));
        }

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].task_id, TaskId::from("t2"));
        assert_eq!(events[1].task_id, TaskId::from("t3"));
    }

    #[test]
    fn test_zero_capacity_sink_keeps_nothing() {
        let mut sink = InMemoryAuditSink::new(0);
        sink.record(build_audit_event(&TaskId::from("t"), None, AuditAction::Pop, None));
        assert!(sink.events().is_empty());
    }
}
