//! Core scheduling abstractions: groups, slots, tasks, the queue and the
//! operation worker façade.

pub mod audit;
pub mod error;
mod executor;
pub mod group;
pub mod operation_worker;
pub mod resources;
pub mod runner;
pub mod task;
pub mod task_queue;

pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use error::{AppResult, SchedulerError};
pub use group::TaskWorkerGroup;
pub use operation_worker::{OperationWorker, WorkerStats};
pub use resources::{ResourceUsage, Resources, TaskResource};
pub use runner::{CancellationToken, ProgressReporter, RunnerIdentity, TaskContext, TaskRunner};
pub use task::{
    Task, TaskFailure, TaskHandle, TaskId, TaskProgress, TaskResult, TaskStatus, TaskStatusCode,
};
pub use task_queue::{Admission, Completion, QueueCounts, StopTicket, TaskQueue};
