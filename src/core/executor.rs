//! Executor threads pulling admitted tasks off the queue.
//!
//! Each executor is a dedicated OS thread. It parks inside
//! [`TaskQueue::next_unprocessed`] until a task can be bound to a free slot,
//! runs the job on its own stack, reports the outcome and loops. Job
//! execution never holds a scheduler lock.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::core::audit::AuditAction;
use crate::core::operation_worker::WorkerShared;
use crate::core::task_queue::{Admission, Completion};
use crate::core::{SchedulerError, TaskFailure};

/// Spawn an executor thread serving every configured group.
pub(crate) fn spawn_executor(
    executor_id: usize,
    shared: Arc<WorkerShared>,
    stack_size: usize,
) -> Result<JoinHandle<()>, SchedulerError> {
    thread::Builder::new()
        .name(format!("op-executor-{executor_id}"))
        .stack_size(stack_size)
        .spawn(move || executor_loop(executor_id, &shared))
        .map_err(|e| SchedulerError::Internal(format!("failed to spawn executor thread: {e}")))
}

fn executor_loop(executor_id: usize, shared: &WorkerShared) {
    let groups = shared.queue.resources().groups().to_vec();
    debug!(executor_id = executor_id, ?groups, "Executor started");

    while let Some(admission) = shared.queue.next_unprocessed(&groups) {
        if !run_admission(executor_id, shared, admission) {
            // The task was force-released by `stop`; a replacement executor
            // already serves the freed slot.
            debug!(executor_id = executor_id, "Executor detached, exiting");
            return;
        }
    }

    debug!(executor_id = executor_id, "Executor exiting");
}

/// Run one admitted job. Returns `false` if the task was force-released
/// while the job was still running.
fn run_admission(executor_id: usize, shared: &WorkerShared, admission: Admission) -> bool {
    let task_id = admission.handle.id.clone();
    info!(
        executor_id = executor_id,
        task_id = %task_id,
        group = %admission.group,
        slot = admission.slot,
        "Executing task"
    );
    shared.record(&task_id, Some(admission.group), AuditAction::Start, None);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        admission.runner.run(&admission.context)
    }));

    let (report, action, detail) = match outcome {
        Ok(Ok(value)) => {
            info!(task_id = %task_id, "Task finished");
            (
                shared.queue.task_finished(&admission.handle, value),
                AuditAction::Finish,
                None,
            )
        }
        Ok(Err(err)) => {
            let failure = TaskFailure::from_error(&err);
            warn!(task_id = %task_id, error = %failure, "Task failed");
            let detail = Some(failure.message.clone());
            (
                shared.queue.task_error(&admission.handle, failure),
                AuditAction::Error,
                detail,
            )
        }
        Err(payload) => {
            let failure = TaskFailure::from_panic(payload.as_ref());
            error!(task_id = %task_id, error = %failure, "Task panicked");
            let detail = Some(failure.to_string());
            (
                shared.queue.task_error(&admission.handle, failure),
                AuditAction::Error,
                detail,
            )
        }
    };

    let attached = match report {
        Ok(Completion::Recorded) => {
            shared.counters.record_outcome(action == AuditAction::Finish);
            shared.record(&task_id, Some(admission.group), action, detail);
            true
        }
        Ok(Completion::Discarded) => {
            debug!(task_id = %task_id, "Discarding result of stopped task");
            true
        }
        Err(_) => {
            debug!(task_id = %task_id, "Discarding late result of force-released task");
            false
        }
    };

    // Disconnects the stop channel only after the outcome is recorded.
    drop(admission);
    attached
}
