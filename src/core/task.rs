//! Task records, identifiers, status codes and results.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::runner::{CancellationToken, TaskRunner};
use crate::core::TaskWorkerGroup;

/// Unique identifier of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatusCode {
    /// Waiting for a free resource slot.
    Queued,
    /// Bound to a resource slot and executing.
    Running,
    /// Completed with a value.
    Finished,
    /// Completed with a failure.
    Error,
    /// Not tracked. Only produced by status queries, never stored.
    NotFound,
}

impl TaskStatusCode {
    /// Whether the task has completed (successfully or not).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }

    /// Whether the task still waits for or holds a resource.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

/// Progress published by a running job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Free-form stage label ("loading", "epoch", ...).
    pub stage: String,
    /// Units processed so far.
    pub current: u64,
    /// Total units, when known.
    pub total: Option<u64>,
}

impl TaskProgress {
    /// Fraction of completed work in `[0, 1]`, when the total is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.current.min(total) as f64) / total as f64),
            None => None,
        }
    }
}

/// Snapshot of a task's status as seen by pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Current lifecycle state.
    pub code: TaskStatusCode,
    /// Latest progress report, if the job published one.
    pub progress: Option<TaskProgress>,
}

impl TaskStatus {
    /// Status with the given code and no progress.
    #[must_use]
    pub const fn new(code: TaskStatusCode) -> Self {
        Self { code, progress: None }
    }

    /// The synthetic status of an untracked id.
    #[must_use]
    pub const fn not_found() -> Self {
        Self::new(TaskStatusCode::NotFound)
    }
}

/// Failure detail of a job that returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Rendered error including its context chain.
    pub message: String,
    /// The job panicked instead of returning an error.
    pub panicked: bool,
}

impl TaskFailure {
    /// Failure from an error returned by a job.
    #[must_use]
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            message: format!("{err:#}"),
            panicked: false,
        }
    }

    /// Failure from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "job panicked".to_owned());
        Self {
            message,
            panicked: true,
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.panicked {
            write!(f, "panicked: {}", self.message)
        } else {
            f.write_str(&self.message)
        }
    }
}

/// Terminal result of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TaskResult {
    /// The job returned a value.
    Finished(serde_json::Value),
    /// The job failed.
    Error(TaskFailure),
}

impl TaskResult {
    /// Convert into a standard `Result`.
    ///
    /// # Errors
    ///
    /// Returns the failure when the job ended with an error.
    pub fn into_result(self) -> Result<serde_json::Value, TaskFailure> {
        match self {
            Self::Finished(value) => Ok(value),
            Self::Error(failure) => Err(failure),
        }
    }
}

/// Identifies one admission of a task. The sequence number makes handles of
/// a removed task distinct from a later task that reuses its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    /// Task identifier.
    pub id: TaskId,
    pub(crate) seq: u64,
}

/// Bookkeeping attached to a running task.
pub(crate) struct RunningState {
    pub(crate) slot: usize,
    pub(crate) group: TaskWorkerGroup,
    /// Disconnects when the executor has reported the job's outcome.
    pub(crate) done: Receiver<()>,
}

/// The scheduler's record of one submitted job.
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) seq: u64,
    pub(crate) runner: Arc<dyn TaskRunner>,
    pub(crate) groups: Vec<TaskWorkerGroup>,
    pub(crate) code: TaskStatusCode,
    pub(crate) result: Option<TaskResult>,
    pub(crate) cancel: CancellationToken,
    pub(crate) progress: Arc<Mutex<Option<TaskProgress>>>,
    pub(crate) running: Option<RunningState>,
    /// Set by `stop`; the job's outcome will be discarded.
    pub(crate) stopping: bool,
    pub(crate) submitted_at_ms: u128,
}

impl Task {
    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> &TaskId {
        &self.id
    }

    /// The wrapped runner.
    #[must_use]
    pub fn runner(&self) -> &Arc<dyn TaskRunner> {
        &self.runner
    }

    /// Eligible groups in declaration order.
    #[must_use]
    pub fn groups(&self) -> &[TaskWorkerGroup] {
        &self.groups
    }

    /// Current status code.
    #[must_use]
    pub const fn code(&self) -> TaskStatusCode {
        self.code
    }

    /// Terminal result, present once the task is finished or errored.
    #[must_use]
    pub const fn result(&self) -> Option<&TaskResult> {
        self.result.as_ref()
    }

    /// Submission timestamp in milliseconds since epoch.
    #[must_use]
    pub const fn submitted_at_ms(&self) -> u128 {
        self.submitted_at_ms
    }

    /// The group whose slot the task occupies while running.
    #[must_use]
    pub fn running_group(&self) -> Option<TaskWorkerGroup> {
        self.running.as_ref().map(|r| r.group)
    }

    /// Whether a stop was requested while the task was running.
    #[must_use]
    pub const fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub(crate) fn status(&self) -> TaskStatus {
        let progress = if self.code == TaskStatusCode::Running {
            self.progress.lock().clone()
        } else {
            None
        };
        TaskStatus {
            code: self.code,
            progress,
        }
    }

    pub(crate) fn handle(&self) -> TaskHandle {
        TaskHandle {
            id: self.id.clone(),
            seq: self.seq,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("seq", &self.seq)
            .field("identity", &self.runner.identity())
            .field("groups", &self.groups)
            .field("code", &self.code)
            .field("result", &self.result)
            .field("running_group", &self.running_group())
            .field("stopping", &self.stopping)
            .finish_non_exhaustive()
    }
}
