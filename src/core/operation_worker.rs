//! The operation worker façade: submission, status polling, cancellation
//! and result retrieval on top of a fixed pool of executor threads.
//!
//! ```rust,ignore
//! use prometheus_operation_worker::config::WorkerConfig;
//! use prometheus_operation_worker::core::{OperationWorker, TaskStatusCode};
//!
//! let worker = OperationWorker::new(WorkerConfig::default())?;
//! let id = worker.put(TrainSymbols { book: "demo".into() })?;
//!
//! while worker.status(&id)?.code.is_active() {
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//! }
//! let result = worker.pop_result(&id)?;
//! worker.shutdown();
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::core::audit::{build_audit_event, AuditAction, AuditEvent, AuditSink};
use crate::core::executor::spawn_executor;
use crate::core::group::normalize_groups;
use crate::core::task_queue::{QueueCounts, StopTicket};
use crate::core::{
    ResourceUsage, Resources, SchedulerError, TaskId, TaskQueue, TaskResult, TaskRunner,
    TaskStatus, TaskStatusCode, TaskWorkerGroup,
};

/// Statistics about the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Live executor threads, including replacements for detached ones.
    pub executors: usize,
    /// Tasks accepted by `put`.
    pub submitted: u64,
    /// Jobs that returned a value.
    pub finished: u64,
    /// Jobs that failed or panicked.
    pub errored: u64,
    /// Successful `stop` calls.
    pub stopped: u64,
    /// Stops that force-released a slot after the grace period.
    pub forced_stops: u64,
    /// Tracked tasks per status.
    pub queue: QueueCounts,
    /// Capacity and occupancy per group.
    pub resources: Vec<ResourceUsage>,
}

/// Internal counters (lock-free atomics).
#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    submitted: AtomicU64,
    finished: AtomicU64,
    errored: AtomicU64,
    stopped: AtomicU64,
    forced_stops: AtomicU64,
}

impl WorkerCounters {
    pub(crate) fn record_outcome(&self, finished: bool) {
        if finished {
            self.finished.fetch_add(1, Ordering::Relaxed);
        } else {
            self.errored.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// State shared between the façade and its executor threads.
pub(crate) struct WorkerShared {
    pub(crate) queue: Arc<TaskQueue>,
    pub(crate) counters: WorkerCounters,
    audit: Option<Mutex<Box<dyn AuditSink>>>,
}

impl WorkerShared {
    /// Record an audit event if a sink is attached.
    pub(crate) fn record(
        &self,
        task_id: &TaskId,
        group: Option<TaskWorkerGroup>,
        action: AuditAction,
        detail: Option<String>,
    ) {
        if let Some(sink) = &self.audit {
            sink.lock()
                .record(build_audit_event(task_id, group, action, detail));
        }
    }
}

/// Process-wide scheduler of long-running jobs onto typed resource slots.
///
/// Construction spawns one executor thread per slot. Call
/// [`shutdown`](Self::shutdown) for a graceful stop; dropping the worker only
/// signals the executors without joining them.
pub struct OperationWorker {
    config: WorkerConfig,
    shared: Arc<WorkerShared>,
    /// Every id ever accepted, so `status` can tell "gone" from "never
    /// submitted". Grows by one entry per submission.
    known: Mutex<HashSet<TaskId>>,
    executors: Mutex<Vec<JoinHandle<()>>>,
    next_executor_id: AtomicUsize,
    shutdown: AtomicBool,
}

impl OperationWorker {
    /// Create a worker with the slots described by `config` and start its
    /// executors.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the configuration does not validate
    /// - `Internal` if an executor thread cannot be spawned
    pub fn new(config: WorkerConfig) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let resources = config.build_resources();
        Self::start(config, resources, None)
    }

    pub(crate) fn start(
        config: WorkerConfig,
        resources: Resources,
        audit: Option<Box<dyn AuditSink>>,
    ) -> Result<Self, SchedulerError> {
        if resources.is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "at least one resource slot must be configured".into(),
            ));
        }
        let slot_count = resources.len();
        let queue = Arc::new(TaskQueue::new(Arc::new(resources), config.poll_interval()));
        let shared = Arc::new(WorkerShared {
            queue,
            counters: WorkerCounters::default(),
            audit: audit.map(Mutex::new),
        });

        let worker = Self {
            config,
            shared,
            known: Mutex::new(HashSet::new()),
            executors: Mutex::new(Vec::with_capacity(slot_count)),
            next_executor_id: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        };
        for _ in 0..slot_count {
            if let Err(e) = worker.spawn_executor() {
                worker.shutdown();
                return Err(e);
            }
        }

        info!(
            executors = slot_count,
            groups = ?worker.resources().usage(),
            poll_interval_ms = worker.config.poll_interval_ms,
            stop_grace_ms = ?worker.config.stop_grace_ms,
            "OperationWorker started"
        );
        Ok(worker)
    }

    fn spawn_executor(&self) -> Result<(), SchedulerError> {
        let executor_id = self.next_executor_id.fetch_add(1, Ordering::Relaxed);
        let handle = spawn_executor(
            executor_id,
            Arc::clone(&self.shared),
            self.config.thread_stack_size,
        )?;
        let mut executors = self.executors.lock();
        executors.retain(|h| !h.is_finished());
        executors.push(handle);
        Ok(())
    }

    fn queue(&self) -> &TaskQueue {
        &self.shared.queue
    }

    /// The configuration the worker was started with.
    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// The slot inventory.
    #[must_use]
    pub fn resources(&self) -> &Arc<Resources> {
        self.shared.queue.resources()
    }

    /// Submit a job under a generated id.
    ///
    /// # Errors
    ///
    /// See [`put_with_id`](Self::put_with_id).
    pub fn put<R: TaskRunner>(&self, runner: R) -> Result<TaskId, SchedulerError> {
        self.put_arc(Arc::new(runner))
    }

    /// Submit a shared job under a generated id.
    ///
    /// # Errors
    ///
    /// See [`put_with_id`](Self::put_with_id).
    pub fn put_arc(&self, runner: Arc<dyn TaskRunner>) -> Result<TaskId, SchedulerError> {
        let id = TaskId::generate();
        self.put_with_id(id.clone(), runner)?;
        Ok(id)
    }

    /// Submit a job under a caller-chosen id.
    ///
    /// # Errors
    ///
    /// - `AlreadyQueued` if the id is tracked, or an equivalent runner is
    ///   tracked (the error then carries that task's id)
    /// - `NoEligibleGroup` / `UnservedGroups` if the job could never run
    /// - `Shutdown` after [`shutdown`](Self::shutdown)
    pub fn put_with_id(&self, id: TaskId, runner: Arc<dyn TaskRunner>) -> Result<(), SchedulerError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SchedulerError::Shutdown);
        }
        let groups = normalize_groups(runner.groups());
        if groups.is_empty() {
            return Err(SchedulerError::NoEligibleGroup);
        }
        let configured = self.resources().groups();
        if !groups.iter().any(|g| configured.contains(g)) {
            return Err(SchedulerError::UnservedGroups(groups));
        }

        self.queue().put_unique(id.clone(), runner)?;
        self.known.lock().insert(id.clone());
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.record(&id, None, AuditAction::Submit, None);
        info!(task_id = %id, ?groups, "Task submitted");
        Ok(())
    }

    /// Id of a tracked task equivalent to `runner`.
    #[must_use]
    pub fn id_by_runner(&self, runner: &dyn TaskRunner) -> Option<TaskId> {
        self.queue().id_by_runner(runner)
    }

    /// Current status of a task. Ids that were submitted but are no longer
    /// tracked (popped or stopped) read as `NOT_FOUND`.
    ///
    /// The worker remembers every submitted id for its whole lifetime to
    /// make that distinction, so memory grows with the number of
    /// submissions (one id per task). Long-lived processes submitting
    /// unbounded numbers of tasks should recycle the worker or reuse ids
    /// through [`put_with_id`](Self::put_with_id).
    ///
    /// # Errors
    ///
    /// `NotFound` for ids never submitted to this worker.
    pub fn status(&self, id: &TaskId) -> Result<TaskStatus, SchedulerError> {
        let status = self.queue().status(id);
        if status.code == TaskStatusCode::NotFound && !self.known.lock().contains(id) {
            return Err(SchedulerError::NotFound(id.clone()));
        }
        Ok(status)
    }

    /// Stop a task. A queued task is removed directly. A running task is
    /// asked to cancel and keeps reading as RUNNING; once it returns, or
    /// the stop grace period elapses, the task is removed and its slot
    /// released. Its result is discarded either way. A job that ignores the
    /// cancellation keeps running detached.
    ///
    /// Only the stop that actually removes the task is counted and audited;
    /// concurrent stops that lose the race return quietly, or `NotFound`
    /// once the task is gone.
    ///
    /// # Errors
    ///
    /// `NotFound` if no such task is tracked.
    pub fn stop(&self, id: &TaskId) -> Result<(), SchedulerError> {
        match self.queue().begin_stop(id)? {
            StopTicket::Removed(task) => {
                info!(task_id = %id, status = ?task.code(), "Task removed");
                self.record_stop(id);
            }
            StopTicket::Running { handle, done, .. } => {
                debug!(task_id = %id, "Waiting for running task to acknowledge cancellation");
                if let Some(grace) = self.config.stop_grace() {
                    if let Err(RecvTimeoutError::Timeout) = done.recv_timeout(grace) {
                        warn!(task_id = %id, grace_ms = ?self.config.stop_grace_ms, "Task ignored cancellation");
                    }
                } else {
                    let _ = done.recv();
                }

                match self.queue().remove_handle(&handle) {
                    Some(task) if task.running_group().is_some() => {
                        warn!(task_id = %id, "Force-released slot of unresponsive task");
                        self.shared.counters.forced_stops.fetch_add(1, Ordering::Relaxed);
                        self.shared
                            .record(id, task.running_group(), AuditAction::ForceRelease, None);
                        if let Err(e) = self.spawn_executor() {
                            error!(error = %e, "Failed to spawn replacement executor");
                        }
                        self.record_stop(id);
                    }
                    Some(_) => {
                        info!(task_id = %id, "Running task stopped");
                        self.record_stop(id);
                    }
                    None => debug!(task_id = %id, "Task already removed by a concurrent stop"),
                }
            }
        }
        Ok(())
    }

    fn record_stop(&self, id: &TaskId) {
        self.shared.counters.stopped.fetch_add(1, Ordering::Relaxed);
        self.shared.record(id, None, AuditAction::Stop, None);
    }

    /// Remove a finished or errored task and return its result.
    ///
    /// # Errors
    ///
    /// - `NotFinished` while the task is queued or running
    /// - `NotFound` if no such task is tracked
    pub fn pop_result(&self, id: &TaskId) -> Result<TaskResult, SchedulerError> {
        let result = self.queue().pop_result(id)?;
        self.shared.record(id, None, AuditAction::Pop, None);
        Ok(result)
    }

    /// Block until the task is finished, errored or no longer tracked.
    ///
    /// # Errors
    ///
    /// - `NotFound` for ids never submitted to this worker
    /// - `Timeout` if the task is still active after `timeout`
    pub fn wait(&self, id: &TaskId, timeout: Duration) -> Result<TaskStatus, SchedulerError> {
        self.status(id)?;
        self.queue()
            .wait_until_settled(id, timeout)
            .ok_or_else(|| SchedulerError::Timeout(id.clone()))
    }

    /// Async variant of [`wait`](Self::wait); the blocking wait runs on
    /// tokio's blocking thread pool.
    ///
    /// # Errors
    ///
    /// Same as [`wait`](Self::wait), plus `Internal` if the blocking task
    /// fails to complete.
    #[cfg(feature = "tokio-runtime")]
    pub async fn wait_async(
        &self,
        id: &TaskId,
        timeout: Duration,
    ) -> Result<TaskStatus, SchedulerError> {
        self.status(id)?;
        let queue = Arc::clone(&self.shared.queue);
        let task_id = id.clone();
        tokio::task::spawn_blocking(move || queue.wait_until_settled(&task_id, timeout))
            .await
            .map_err(|e| SchedulerError::Internal(format!("wait task failed: {e}")))?
            .ok_or_else(|| SchedulerError::Timeout(id.clone()))
    }

    /// Snapshot of worker statistics.
    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        let counters = &self.shared.counters;
        WorkerStats {
            executors: self
                .executors
                .lock()
                .iter()
                .filter(|h| !h.is_finished())
                .count(),
            submitted: counters.submitted.load(Ordering::Relaxed),
            finished: counters.finished.load(Ordering::Relaxed),
            errored: counters.errored.load(Ordering::Relaxed),
            stopped: counters.stopped.load(Ordering::Relaxed),
            forced_stops: counters.forced_stops.load(Ordering::Relaxed),
            queue: self.queue().counts(),
            resources: self.resources().usage(),
        }
    }

    /// Events retained by the attached audit sink.
    #[must_use]
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.shared
            .audit
            .as_ref()
            .map(|sink| sink.lock().events())
            .unwrap_or_default()
    }

    /// Stop admitting work, cancel running jobs and join the executors,
    /// waiting at most `shutdown_timeout` for each. Executors that do not
    /// exit in time are detached.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down operation worker");
        self.queue().shutdown();

        let timeout = self.config.shutdown_timeout();
        let mut executors = self.executors.lock();
        let executor_count = executors.len();

        for (idx, executor) in executors.drain(..).enumerate() {
            let (tx, rx) = crossbeam_channel::bounded(1);
            let join_thread = thread::spawn(move || {
                let _ = tx.send(executor.join().is_ok());
            });

            match rx.recv_timeout(timeout) {
                Ok(true) => debug!(executor = idx, "Executor joined"),
                Ok(false) => warn!(executor = idx, "Executor panicked"),
                Err(_) => {
                    warn!(executor = idx, "Executor did not exit within timeout - detaching");
                    continue;
                }
            }
            let _ = join_thread.join();
        }

        info!(executor_count = executor_count, "Operation worker shut down");
    }
}

impl Drop for OperationWorker {
    fn drop(&mut self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.queue().shutdown();
            debug!("OperationWorker dropped without explicit shutdown - executors detached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceSpec;
    use crate::core::{RunnerIdentity, TaskContext};

    struct Quick(&'static str);

    impl TaskRunner for Quick {
        fn groups(&self) -> &[TaskWorkerGroup] {
            &[TaskWorkerGroup::ShortTasksCpu]
        }

        fn identity(&self) -> RunnerIdentity {
            RunnerIdentity::of::<Self>(self.0)
        }

        fn run(&self, _ctx: &TaskContext) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!({ "job": self.0 }))
        }
    }

    struct GpuOnly;

    impl TaskRunner for GpuOnly {
        fn groups(&self) -> &[TaskWorkerGroup] {
            &[TaskWorkerGroup::LongTasksGpu]
        }

        fn identity(&self) -> RunnerIdentity {
            RunnerIdentity::of::<Self>("gpu")
        }

        fn run(&self, _ctx: &TaskContext) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn cpu_worker() -> OperationWorker {
        OperationWorker::new(
            WorkerConfig::new()
                .with_resources(vec![ResourceSpec::new(TaskWorkerGroup::ShortTasksCpu, 2)])
                .with_poll_interval_ms(20),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = OperationWorker::new(WorkerConfig::new().with_resources(Vec::new()));
        assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
    }

    #[test]
    fn test_put_and_pop() {
        let worker = cpu_worker();
        let id = worker.put(Quick("a")).unwrap();
        let status = worker.wait(&id, Duration::from_secs(5)).unwrap();
        assert_eq!(status.code, TaskStatusCode::Finished);
        let result = worker.pop_result(&id).unwrap();
        assert_eq!(result, TaskResult::Finished(serde_json::json!({ "job": "a" })));
        assert_eq!(worker.status(&id).unwrap().code, TaskStatusCode::NotFound);
        worker.shutdown();
    }

    #[test]
    fn test_unserved_groups_rejected() {
        let worker = cpu_worker();
        assert_eq!(
            worker.put(GpuOnly),
            Err(SchedulerError::UnservedGroups(vec![TaskWorkerGroup::LongTasksGpu]))
        );
        worker.shutdown();
    }

    #[test]
    fn test_unknown_id_status_is_error() {
        let worker = cpu_worker();
        assert_eq!(
            worker.status(&TaskId::from("nope")),
            Err(SchedulerError::NotFound(TaskId::from("nope")))
        );
        assert!(matches!(
            worker.stop(&TaskId::from("nope")),
            Err(SchedulerError::NotFound(_))
        ));
        worker.shutdown();
    }

    #[test]
    fn test_put_after_shutdown() {
        let worker = cpu_worker();
        worker.shutdown();
        assert_eq!(worker.put(Quick("late")), Err(SchedulerError::Shutdown));
        assert_eq!(worker.stats().executors, 0);
    }

    #[test]
    fn test_stats_count_executors_and_outcomes() {
        let worker = cpu_worker();
        assert_eq!(worker.stats().executors, 2);
        let id = worker.put(Quick("s")).unwrap();
        worker.wait(&id, Duration::from_secs(5)).unwrap();
        let stats = worker.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.queue.finished, 1);
        assert_eq!(stats.resources[0].capacity, 2);
        worker.shutdown();
    }
}
