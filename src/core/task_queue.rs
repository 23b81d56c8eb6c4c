//! Ordered, lock-protected collection of all known tasks.
//!
//! Every mutation goes through one `parking_lot::Mutex` guarding the whole
//! task list. Admission, completion and removal also acquire or release
//! resource slots while holding that lock, so a slot can never be assigned
//! twice and a task is RUNNING exactly while it occupies a slot.
//!
//! Idle executors park on a `Condvar` that is signalled by every mutation
//! (`put`, completion, removal, shutdown). They also wake up every
//! `poll_interval` and re-scan, which keeps the pull loop correct even if a
//! notification is missed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::group::normalize_groups;
use crate::core::runner::{CancellationToken, ProgressReporter, TaskContext, TaskRunner};
use crate::core::task::RunningState;
use crate::core::{
    Resources, SchedulerError, Task, TaskFailure, TaskHandle, TaskId, TaskResult, TaskStatus,
    TaskStatusCode, TaskWorkerGroup,
};
use crate::util::clock::now_ms;

/// A task bound to a resource slot, handed to an executor.
///
/// Dropping the admission signals anyone waiting in [`TaskQueue::begin_stop`]
/// that the executor is done with the job, so executors keep it alive until
/// they have reported the outcome.
pub struct Admission {
    /// Handle used to report the outcome.
    pub handle: TaskHandle,
    /// The job to run.
    pub runner: Arc<dyn TaskRunner>,
    /// Group of the occupied slot.
    pub group: TaskWorkerGroup,
    /// Index of the occupied slot.
    pub slot: usize,
    /// Context passed to the runner.
    pub context: TaskContext,
    _done: Sender<()>,
}

/// Outcome of the first phase of stopping a task.
pub enum StopTicket {
    /// The task was not running and has been removed.
    Removed(Task),
    /// The task is running; cancellation was requested.
    Running {
        /// Handle of the running admission.
        handle: TaskHandle,
        /// Token that was cancelled.
        cancel: CancellationToken,
        /// Disconnects once the executor has reported the outcome.
        done: Receiver<()>,
    },
}

/// What happened to a job's reported outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The outcome was stored and the task became terminal.
    Recorded,
    /// The task is being stopped; only its slot was released.
    Discarded,
}

/// Number of tracked tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Waiting for a slot.
    pub queued: usize,
    /// Occupying a slot.
    pub running: usize,
    /// Finished, result not yet popped.
    pub finished: usize,
    /// Errored, result not yet popped.
    pub errored: usize,
}

struct QueueState {
    tasks: Vec<Task>,
    next_seq: u64,
    shutdown: bool,
}

impl QueueState {
    fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| &t.id == id)
    }

    fn find(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    fn find_by_runner(&self, runner: &dyn TaskRunner) -> Option<&Task> {
        let identity = runner.identity();
        self.tasks.iter().find(|t| {
            std::ptr::addr_eq(Arc::as_ptr(&t.runner), std::ptr::from_ref(runner))
                || t.runner.identity() == identity
        })
    }
}

/// Thread-safe bookkeeping of all tasks plus the group-aware pull protocol.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
    resources: Arc<Resources>,
    poll_interval: Duration,
}

impl TaskQueue {
    /// Create an empty queue admitting onto `resources`.
    #[must_use]
    pub fn new(resources: Arc<Resources>, poll_interval: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: Vec::new(),
                next_seq: 0,
                shutdown: false,
            }),
            changed: Condvar::new(),
            resources,
            poll_interval,
        }
    }

    /// The slot inventory this queue admits onto.
    #[must_use]
    pub const fn resources(&self) -> &Arc<Resources> {
        &self.resources
    }

    /// Append a new QUEUED task.
    ///
    /// # Errors
    ///
    /// - `AlreadyQueued` if a task with this id is tracked
    /// - `NoEligibleGroup` if the runner declares no group
    /// - `Shutdown` after [`shutdown`](Self::shutdown)
    pub fn put(&self, id: TaskId, runner: Arc<dyn TaskRunner>) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        if state.find(&id).is_some() {
            return Err(SchedulerError::AlreadyQueued(id));
        }
        self.push_locked(&mut state, id, runner)
    }

    /// Like [`put`](Self::put), but also rejects the task if an equivalent
    /// runner is tracked. Both checks run under the same lock.
    ///
    /// # Errors
    ///
    /// `AlreadyQueued` with the id of the tracked equivalent task, plus the
    /// errors of [`put`](Self::put).
    pub fn put_unique(&self, id: TaskId, runner: Arc<dyn TaskRunner>) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        if let Some(existing) = state.find_by_runner(runner.as_ref()) {
            return Err(SchedulerError::AlreadyQueued(existing.id.clone()));
        }
        if state.find(&id).is_some() {
            return Err(SchedulerError::AlreadyQueued(id));
        }
        self.push_locked(&mut state, id, runner)
    }

    fn push_locked(
        &self,
        state: &mut MutexGuard<'_, QueueState>,
        id: TaskId,
        runner: Arc<dyn TaskRunner>,
    ) -> Result<(), SchedulerError> {
        if state.shutdown {
            return Err(SchedulerError::Shutdown);
        }
        let groups = normalize_groups(runner.groups());
        if groups.is_empty() {
            return Err(SchedulerError::NoEligibleGroup);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        debug!(task_id = %id, ?groups, "task queued");
        state.tasks.push(Task {
            id,
            seq,
            runner,
            groups,
            code: TaskStatusCode::Queued,
            result: None,
            cancel: CancellationToken::new(),
            progress: Arc::default(),
            running: None,
            stopping: false,
            submitted_at_ms: now_ms(),
        });
        self.changed.notify_all();
        Ok(())
    }

    /// Remove a task regardless of its status.
    ///
    /// A task still occupying a slot gets its cancellation token set and
    /// its slot released immediately. The returned record keeps its
    /// [`running_group`](Task::running_group) so the caller knows the
    /// executor was detached.
    pub fn remove(&self, id: &TaskId) -> Option<Task> {
        let mut state = self.state.lock();
        let index = state.position(id)?;
        let task = self.remove_locked(&mut state, index);
        Some(task)
    }

    /// Remove the task admitted under `handle`, leaving a later task that
    /// reuses the same id untouched. Slot handling as in [`remove`](Self::remove).
    pub fn remove_handle(&self, handle: &TaskHandle) -> Option<Task> {
        let mut state = self.state.lock();
        let index = state
            .tasks
            .iter()
            .position(|t| t.id == handle.id && t.seq == handle.seq)?;
        Some(self.remove_locked(&mut state, index))
    }

    fn remove_locked(&self, state: &mut MutexGuard<'_, QueueState>, index: usize) -> Task {
        let task = state.tasks.remove(index);
        if let Some(running) = &task.running {
            task.cancel.cancel();
            self.release_slot(&task.id, running);
        }
        self.changed.notify_all();
        task
    }

    fn release_slot(&self, id: &TaskId, running: &RunningState) {
        if let Err(e) = self.resources.release(running.slot) {
            warn!(task_id = %id, slot = running.slot, error = %e, "slot bookkeeping out of sync");
        }
    }

    /// Remove a terminal task and return its result. Destructive: succeeds
    /// at most once per task.
    ///
    /// # Errors
    ///
    /// - `NotFinished` while the task is queued or running
    /// - `NotFound` if no such task is tracked
    pub fn pop_result(&self, id: &TaskId) -> Result<TaskResult, SchedulerError> {
        let mut state = self.state.lock();
        let index = state
            .position(id)
            .ok_or_else(|| SchedulerError::NotFound(id.clone()))?;
        if !state.tasks[index].code.is_terminal() {
            return Err(SchedulerError::NotFinished(id.clone()));
        }
        let task = self.remove_locked(&mut state, index);
        task.result
            .ok_or_else(|| SchedulerError::Internal(format!("terminal task {id} has no result")))
    }

    /// Current status. Untracked ids yield a `NOT_FOUND` status, never an error.
    #[must_use]
    pub fn status(&self, id: &TaskId) -> TaskStatus {
        self.state
            .lock()
            .find(id)
            .map_or_else(TaskStatus::not_found, Task::status)
    }

    /// Overwrite the status code of a tracked task that does not occupy a
    /// slot. Only admission enters RUNNING and only completion or removal
    /// leaves it, so transitions into or out of RUNNING are rejected.
    ///
    /// Moving to QUEUED clears any stored result; moving to a terminal code
    /// without a stored result records an empty one.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no such task is tracked
    /// - `InvalidTransition` for transitions touching RUNNING or `NOT_FOUND`
    pub fn update_status(&self, id: &TaskId, code: TaskStatusCode) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        let index = state
            .position(id)
            .ok_or_else(|| SchedulerError::NotFound(id.clone()))?;
        let task = &mut state.tasks[index];
        if task.code == code {
            return Ok(());
        }
        let touches_slot = [task.code, code]
            .iter()
            .any(|c| matches!(c, TaskStatusCode::Running | TaskStatusCode::NotFound));
        if touches_slot {
            return Err(SchedulerError::InvalidTransition {
                id: id.clone(),
                from: task.code,
                to: code,
            });
        }
        task.result = match (code, task.result.take()) {
            (TaskStatusCode::Queued, _) => None,
            (TaskStatusCode::Finished, Some(TaskResult::Finished(v))) => Some(TaskResult::Finished(v)),
            (TaskStatusCode::Finished, _) => Some(TaskResult::Finished(serde_json::Value::Null)),
            (_, Some(TaskResult::Error(f))) => Some(TaskResult::Error(f)),
            (_, _) => Some(TaskResult::Error(TaskFailure {
                message: format!("status set to {code:?}"),
                panicked: false,
            })),
        };
        task.code = code;
        self.changed.notify_all();
        Ok(())
    }

    /// Block until a QUEUED task eligible for one of `groups` can be bound
    /// to a free slot, then mark it RUNNING and return it.
    ///
    /// Tasks are scanned in submission order; the first one with a free
    /// slot in an eligible group wins, the group chosen in declaration
    /// order. Returns `None` once the queue is shut down.
    pub fn next_unprocessed(&self, groups: &[TaskWorkerGroup]) -> Option<Admission> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(admission) = self.admit_locked(&mut state, groups) {
                return Some(admission);
            }
            let _ = self.changed.wait_for(&mut state, self.poll_interval);
        }
    }

    /// Non-blocking variant of [`next_unprocessed`](Self::next_unprocessed).
    pub fn try_next_unprocessed(&self, groups: &[TaskWorkerGroup]) -> Option<Admission> {
        let mut state = self.state.lock();
        if state.shutdown {
            return None;
        }
        self.admit_locked(&mut state, groups)
    }

    fn admit_locked(
        &self,
        state: &mut MutexGuard<'_, QueueState>,
        groups: &[TaskWorkerGroup],
    ) -> Option<Admission> {
        for task in &mut state.tasks {
            if task.code != TaskStatusCode::Queued {
                continue;
            }
            let Some((group, slot)) = task
                .groups
                .iter()
                .filter(|g| groups.contains(*g))
                .find_map(|&g| self.resources.acquire(g, &task.id).map(|slot| (g, slot)))
            else {
                continue;
            };
            let (done_tx, done_rx) = bounded::<()>(0);
            task.code = TaskStatusCode::Running;
            task.running = Some(RunningState {
                slot,
                group,
                done: done_rx,
            });
            debug!(task_id = %task.id, group = %group, slot = slot, "task admitted");
            let context = TaskContext::new(
                task.id.clone(),
                task.cancel.clone(),
                ProgressReporter::new(Arc::clone(&task.progress)),
            );
            let admission = Admission {
                handle: task.handle(),
                runner: Arc::clone(&task.runner),
                group,
                slot,
                context,
                _done: done_tx,
            };
            self.changed.notify_all();
            return Some(admission);
        }
        None
    }

    /// Id of a tracked task whose runner is the same object as `runner`, or
    /// has an equal identity.
    #[must_use]
    pub fn id_by_runner(&self, runner: &dyn TaskRunner) -> Option<TaskId> {
        self.state.lock().find_by_runner(runner).map(|t| t.id.clone())
    }

    /// Record a successful outcome and free the slot.
    ///
    /// # Errors
    ///
    /// `NotFound` if the task was removed in the meantime; the value is then
    /// discarded.
    pub fn task_finished(
        &self,
        handle: &TaskHandle,
        value: serde_json::Value,
    ) -> Result<Completion, SchedulerError> {
        self.complete(handle, TaskResult::Finished(value))
    }

    /// Record a failed outcome and free the slot.
    ///
    /// # Errors
    ///
    /// `NotFound` if the task was removed in the meantime; the failure is
    /// then discarded.
    pub fn task_error(
        &self,
        handle: &TaskHandle,
        failure: TaskFailure,
    ) -> Result<Completion, SchedulerError> {
        self.complete(handle, TaskResult::Error(failure))
    }

    fn complete(&self, handle: &TaskHandle, result: TaskResult) -> Result<Completion, SchedulerError> {
        let mut state = self.state.lock();
        let task = state
            .tasks
            .iter_mut()
            .find(|t| t.id == handle.id && t.seq == handle.seq)
            .ok_or_else(|| SchedulerError::NotFound(handle.id.clone()))?;
        if let Some(running) = task.running.take() {
            self.release_slot(&task.id, &running);
        }
        // A stopping task stays RUNNING until `stop` removes it.
        let completion = if task.stopping {
            Completion::Discarded
        } else {
            task.code = match result {
                TaskResult::Finished(_) => TaskStatusCode::Finished,
                TaskResult::Error(_) => TaskStatusCode::Error,
            };
            task.result = Some(result);
            Completion::Recorded
        };
        self.changed.notify_all();
        Ok(completion)
    }

    /// First phase of stopping a task. A running task gets its cancellation
    /// token set and is marked stopping: it stays tracked and keeps reading
    /// as RUNNING, and its outcome is discarded. Anything else is removed
    /// right away.
    ///
    /// # Errors
    ///
    /// `NotFound` if no such task is tracked.
    pub fn begin_stop(&self, id: &TaskId) -> Result<StopTicket, SchedulerError> {
        let mut state = self.state.lock();
        let index = state
            .position(id)
            .ok_or_else(|| SchedulerError::NotFound(id.clone()))?;
        let task = &mut state.tasks[index];
        if task.code == TaskStatusCode::Running {
            if let Some(running) = &task.running {
                task.stopping = true;
                task.cancel.cancel();
                return Ok(StopTicket::Running {
                    handle: task.handle(),
                    cancel: task.cancel.clone(),
                    done: running.done.clone(),
                });
            }
        }
        Ok(StopTicket::Removed(self.remove_locked(&mut state, index)))
    }

    /// Block until the task is terminal or untracked, or `timeout` elapses.
    /// Returns `None` on timeout.
    #[must_use]
    pub fn wait_until_settled(&self, id: &TaskId, timeout: Duration) -> Option<TaskStatus> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let status = state
                .find(id)
                .map_or_else(TaskStatus::not_found, Task::status);
            if !status.code.is_active() {
                return Some(status);
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                let status = state
                    .find(id)
                    .map_or_else(TaskStatus::not_found, Task::status);
                return (!status.code.is_active()).then_some(status);
            }
        }
    }

    /// Stop admitting work, cancel all running jobs and wake every waiter.
    /// Queued tasks stay tracked but are never admitted.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        for task in state
            .tasks
            .iter()
            .filter(|t| t.code == TaskStatusCode::Running)
        {
            task.cancel.cancel();
        }
        drop(state);
        self.changed.notify_all();
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Number of tracked tasks per status.
    #[must_use]
    pub fn counts(&self) -> QueueCounts {
        let state = self.state.lock();
        let mut counts = QueueCounts::default();
        for task in &state.tasks {
            match task.code {
                TaskStatusCode::Queued => counts.queued += 1,
                TaskStatusCode::Running => counts.running += 1,
                TaskStatusCode::Finished => counts.finished += 1,
                TaskStatusCode::Error => counts.errored += 1,
                TaskStatusCode::NotFound => {}
            }
        }
        counts
    }

    /// Ids of all tracked tasks in submission order.
    #[must_use]
    pub fn ids(&self) -> Vec<TaskId> {
        self.state.lock().tasks.iter().map(|t| t.id.clone()).collect()
    }

    /// Number of tracked tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Whether no task is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().tasks.is_empty()
    }
}
