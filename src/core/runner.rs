//! Job contract implemented by training/prediction code.
//!
//! A [`TaskRunner`] declares which worker groups may execute it, a
//! deduplication identity, and a blocking `run` entry point. The scheduler
//! never looks inside a runner beyond these three methods.
//!
//! ```rust,ignore
//! use prometheus_operation_worker::core::{RunnerIdentity, TaskContext, TaskRunner, TaskWorkerGroup};
//!
//! struct TrainSymbols { book: String }
//!
//! impl TaskRunner for TrainSymbols {
//!     fn groups(&self) -> &[TaskWorkerGroup] {
//!         &[TaskWorkerGroup::LongTasksGpu, TaskWorkerGroup::LongTasksCpu]
//!     }
//!
//!     fn identity(&self) -> RunnerIdentity {
//!         RunnerIdentity::of::<Self>(self.book.clone())
//!     }
//!
//!     fn run(&self, ctx: &TaskContext) -> anyhow::Result<serde_json::Value> {
//!         for epoch in 0..100 {
//!             if ctx.is_cancelled() {
//!                 anyhow::bail!("cancelled");
//!             }
//!             ctx.progress().report("epoch", epoch, Some(100));
//!         }
//!         Ok(serde_json::json!({"model": "symbols"}))
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::{TaskId, TaskProgress, TaskWorkerGroup};

/// Deduplication key of a runner: its concrete type plus a caller-chosen key.
///
/// Two runners with equal identities describe the same logical job
/// ("train model X for book Y") and may not be queued or running at the
/// same time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunnerIdentity {
    kind: &'static str,
    key: String,
}

impl RunnerIdentity {
    /// Identity of runner type `R` with the given key.
    pub fn of<R: ?Sized>(key: impl Into<String>) -> Self {
        Self {
            kind: std::any::type_name::<R>(),
            key: key.into(),
        }
    }

    /// Name of the runner type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    /// Caller-chosen key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// A unit of work scheduled onto resource slots.
pub trait TaskRunner: Send + Sync + 'static {
    /// Groups this job may run on. Must not be empty.
    fn groups(&self) -> &[TaskWorkerGroup];

    /// Deduplication identity, stable across equivalent jobs.
    fn identity(&self) -> RunnerIdentity;

    /// Perform the job, blocking the executor thread.
    ///
    /// Implementations should check [`TaskContext::is_cancelled`] at
    /// reasonable intervals and return early once it is set.
    ///
    /// # Errors
    ///
    /// Any error is recorded as the task's failure result.
    fn run(&self, ctx: &TaskContext) -> anyhow::Result<serde_json::Value>;
}

/// Cancellation flag shared between the scheduler and a running job.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the non-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; observed by all clones.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Publishes progress of a running job to status pollers.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    latest: Arc<Mutex<Option<TaskProgress>>>,
}

impl ProgressReporter {
    pub(crate) const fn new(latest: Arc<Mutex<Option<TaskProgress>>>) -> Self {
        Self { latest }
    }

    /// Replace the published progress.
    pub fn report(&self, stage: impl Into<String>, current: u64, total: Option<u64>) {
        *self.latest.lock() = Some(TaskProgress {
            stage: stage.into(),
            current,
            total,
        });
    }

    /// Last published progress.
    #[must_use]
    pub fn latest(&self) -> Option<TaskProgress> {
        self.latest.lock().clone()
    }
}

/// Everything a running job receives from the scheduler.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    cancel: CancellationToken,
    progress: ProgressReporter,
}

impl TaskContext {
    /// Build a context. Mostly useful for driving runners in tests.
    #[must_use]
    pub const fn new(task_id: TaskId, cancel: CancellationToken, progress: ProgressReporter) -> Self {
        Self {
            task_id,
            cancel,
            progress,
        }
    }

    /// Id of the task being executed.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// The cancellation token of this task.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Shorthand for `cancel_token().is_cancelled()`.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Progress reporter of this task.
    #[must_use]
    pub const fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Sleep for `duration` in small steps, returning `false` early if the
    /// task gets cancelled.
    pub fn sleep_unless_cancelled(&self, duration: Duration) -> bool {
        const STEP: Duration = Duration::from_millis(10);
        let deadline = std::time::Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(STEP.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Train;
    struct Predict;

    #[test]
    fn test_identity_includes_type() {
        let a = RunnerIdentity::of::<Train>("book-1");
        let b = RunnerIdentity::of::<Train>("book-1");
        let c = RunnerIdentity::of::<Predict>("book-1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.key(), "book-1");
        assert!(a.kind().ends_with("Train"));
    }

    #[test]
    fn test_cancellation_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_progress_reporter() {
        let reporter = ProgressReporter::default();
        assert!(reporter.latest().is_none());
        reporter.report("epoch", 3, Some(10));
        let latest = reporter.latest().unwrap();
        assert_eq!(latest.stage, "epoch");
        assert_eq!(latest.current, 3);
    }

    #[test]
    fn test_sleep_unless_cancelled() {
        let ctx = TaskContext::new(
            TaskId::from("t"),
            CancellationToken::new(),
            ProgressReporter::default(),
        );
        assert!(ctx.sleep_unless_cancelled(Duration::from_millis(20)));
        ctx.cancel_token().cancel();
        let start = std::time::Instant::now();
        assert!(!ctx.sleep_unless_cancelled(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
