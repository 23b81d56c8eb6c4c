//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::{TaskId, TaskStatusCode, TaskWorkerGroup};

/// Errors produced by scheduler components.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// A task with the same id, or an equivalent runner, is already tracked.
    /// Carries the id of the tracked task.
    #[error("task already queued: {0}")]
    AlreadyQueued(TaskId),
    /// The task is still queued or running.
    #[error("task not finished: {0}")]
    NotFinished(TaskId),
    /// No task with this id is tracked.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// The runner declared an empty set of eligible groups.
    #[error("runner declares no eligible worker group")]
    NoEligibleGroup,
    /// None of the runner's groups has configured capacity.
    #[error("no resources configured for groups {0:?}")]
    UnservedGroups(Vec<TaskWorkerGroup>),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The worker has been shut down.
    #[error("operation worker has been shut down")]
    Shutdown,
    /// A status change that would desynchronize slot bookkeeping.
    #[error("invalid status transition for task {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Task whose status was to change.
        id: TaskId,
        /// Current status.
        from: TaskStatusCode,
        /// Requested status.
        to: TaskStatusCode,
    },
    /// Waiting for a task timed out.
    #[error("timed out waiting for task {0}")]
    Timeout(TaskId),
    /// A slot was released that was not occupied.
    #[error("resource slot {0} is not occupied")]
    ResourceNotOccupied(usize),
    /// Internal failure (thread spawn, runtime setup).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = SchedulerError::AlreadyQueued(TaskId::from("t1"));
        assert_eq!(err.to_string(), "task already queued: t1");

        let err = SchedulerError::NotFinished(TaskId::from("t2"));
        assert_eq!(err.to_string(), "task not finished: t2");

        let err = SchedulerError::NotFound(TaskId::from("t3"));
        assert_eq!(err.to_string(), "task not found: t3");

        let err = SchedulerError::UnservedGroups(vec![TaskWorkerGroup::LongTasksGpu]);
        assert_eq!(err.to_string(), "no resources configured for groups [LongTasksGpu]");

        let err = SchedulerError::InvalidTransition {
            id: TaskId::from("t4"),
            from: TaskStatusCode::Running,
            to: TaskStatusCode::Queued,
        };
        assert_eq!(
            err.to_string(),
            "invalid status transition for task t4: Running -> Queued"
        );
    }

    #[test]
    fn test_into_anyhow() {
        let result: AppResult<()> = Err(SchedulerError::Shutdown.into());
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "operation worker has been shut down");
        assert!(err.downcast_ref::<SchedulerError>().is_some());
    }
}
