//! Fixed inventory of resource slots, each bound to one worker group.
//!
//! Capacity per group never changes after construction. Slots are acquired
//! and released only by the task queue while it holds its own lock, so the
//! lock order is always queue first, then resources.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::core::group::normalize_groups;
use crate::core::{SchedulerError, TaskId, TaskWorkerGroup};

/// One schedulable slot permanently bound to a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResource {
    group: TaskWorkerGroup,
    occupant: Option<TaskId>,
}

impl TaskResource {
    /// A free slot of the given group.
    #[must_use]
    pub const fn new(group: TaskWorkerGroup) -> Self {
        Self {
            group,
            occupant: None,
        }
    }

    /// Group of this slot.
    #[must_use]
    pub const fn group(&self) -> TaskWorkerGroup {
        self.group
    }

    /// Task currently holding this slot.
    #[must_use]
    pub const fn occupant(&self) -> Option<&TaskId> {
        self.occupant.as_ref()
    }

    /// Whether the slot is free.
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.occupant.is_none()
    }
}

/// Capacity and occupancy of one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Group.
    pub group: TaskWorkerGroup,
    /// Configured slot count.
    pub capacity: usize,
    /// Slots currently occupied.
    pub occupied: usize,
}

/// The fixed set of slots configured at startup.
#[derive(Debug)]
pub struct Resources {
    slots: Mutex<Vec<TaskResource>>,
    groups: Vec<TaskWorkerGroup>,
}

impl Resources {
    /// Build from an explicit slot list.
    #[must_use]
    pub fn new(slots: Vec<TaskResource>) -> Self {
        let groups = normalize_groups(&slots.iter().map(TaskResource::group).collect::<Vec<_>>());
        Self {
            slots: Mutex::new(slots),
            groups,
        }
    }

    /// Build from `(group, count)` pairs, slots laid out in the given order.
    #[must_use]
    pub fn from_counts(counts: &[(TaskWorkerGroup, usize)]) -> Self {
        let slots = counts
            .iter()
            .flat_map(|&(group, count)| std::iter::repeat_n(TaskResource::new(group), count))
            .collect();
        Self::new(slots)
    }

    /// Total number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether no slot is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Groups with at least one slot, in declaration order.
    #[must_use]
    pub fn groups(&self) -> &[TaskWorkerGroup] {
        &self.groups
    }

    /// Configured slot count of a group.
    #[must_use]
    pub fn capacity(&self, group: TaskWorkerGroup) -> usize {
        self.slots.lock().iter().filter(|s| s.group == group).count()
    }

    /// Groups with at least one free slot, in declaration order.
    #[must_use]
    pub fn groups_with_free_slot(&self) -> Vec<TaskWorkerGroup> {
        let slots = self.slots.lock();
        self.groups
            .iter()
            .copied()
            .filter(|g| slots.iter().any(|s| s.group == *g && s.is_free()))
            .collect()
    }

    /// Occupy the first free slot of `group` with `task`. Returns the slot index.
    pub fn acquire(&self, group: TaskWorkerGroup, task: &TaskId) -> Option<usize> {
        let mut slots = self.slots.lock();
        let (index, slot) = slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.group == group && s.is_free())?;
        slot.occupant = Some(task.clone());
        Some(index)
    }

    /// Free a slot previously returned by [`acquire`](Self::acquire).
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotOccupied` if the slot is unknown or already free,
    /// which means the bookkeeping invariants were violated.
    pub fn release(&self, slot: usize) -> Result<TaskId, SchedulerError> {
        let mut slots = self.slots.lock();
        let Some(occupant) = slots.get_mut(slot).and_then(|s| s.occupant.take()) else {
            error!(slot = slot, "released a slot that was not occupied");
            return Err(SchedulerError::ResourceNotOccupied(slot));
        };
        Ok(occupant)
    }

    /// Snapshot of all slots.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TaskResource> {
        self.slots.lock().clone()
    }

    /// Capacity and occupancy per group, in declaration order.
    #[must_use]
    pub fn usage(&self) -> Vec<ResourceUsage> {
        let slots = self.slots.lock();
        self.groups
            .iter()
            .map(|&group| {
                let of_group = slots.iter().filter(|s| s.group == group);
                ResourceUsage {
                    group,
                    capacity: of_group.clone().count(),
                    occupied: of_group.filter(|s| !s.is_free()).count(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_resources() -> Resources {
        Resources::from_counts(&[
            (TaskWorkerGroup::LongTasksGpu, 3),
            (TaskWorkerGroup::LongTasksCpu, 2),
            (TaskWorkerGroup::NormalTasksCpu, 5),
            (TaskWorkerGroup::ShortTasksCpu, 3),
        ])
    }

    #[test]
    fn test_capacity_per_group() {
        let resources = default_resources();
        assert_eq!(resources.len(), 13);
        assert_eq!(resources.capacity(TaskWorkerGroup::LongTasksGpu), 3);
        assert_eq!(resources.capacity(TaskWorkerGroup::NormalTasksCpu), 5);
        assert_eq!(resources.groups(), &TaskWorkerGroup::ALL);
    }

    #[test]
    fn test_acquire_until_exhausted() {
        let resources = Resources::from_counts(&[(TaskWorkerGroup::LongTasksCpu, 2)]);
        let a = resources.acquire(TaskWorkerGroup::LongTasksCpu, &TaskId::from("a"));
        let b = resources.acquire(TaskWorkerGroup::LongTasksCpu, &TaskId::from("b"));
        assert!(a.is_some());
        assert!(b.is_some());
        assert_ne!(a, b);
        assert!(resources
            .acquire(TaskWorkerGroup::LongTasksCpu, &TaskId::from("c"))
            .is_none());
        assert!(resources.groups_with_free_slot().is_empty());
    }

    #[test]
    fn test_acquire_unknown_group() {
        let resources = Resources::from_counts(&[(TaskWorkerGroup::LongTasksCpu, 1)]);
        assert!(resources
            .acquire(TaskWorkerGroup::LongTasksGpu, &TaskId::from("a"))
            .is_none());
    }

    #[test]
    fn test_release_frees_slot() {
        let resources = Resources::from_counts(&[(TaskWorkerGroup::ShortTasksCpu, 1)]);
        let slot = resources
            .acquire(TaskWorkerGroup::ShortTasksCpu, &TaskId::from("a"))
            .unwrap();
        assert_eq!(resources.release(slot).unwrap(), TaskId::from("a"));
        assert_eq!(
            resources.groups_with_free_slot(),
            vec![TaskWorkerGroup::ShortTasksCpu]
        );
    }

    #[test]
    fn test_double_release_is_rejected() {
        let resources = Resources::from_counts(&[(TaskWorkerGroup::ShortTasksCpu, 1)]);
        let slot = resources
            .acquire(TaskWorkerGroup::ShortTasksCpu, &TaskId::from("a"))
            .unwrap();
        resources.release(slot).unwrap();
        assert_eq!(
            resources.release(slot),
            Err(SchedulerError::ResourceNotOccupied(slot))
        );
        assert_eq!(
            resources.release(99),
            Err(SchedulerError::ResourceNotOccupied(99))
        );
    }

    #[test]
    fn test_usage_and_snapshot() {
        let resources = default_resources();
        resources.acquire(TaskWorkerGroup::LongTasksGpu, &TaskId::from("a"));
        let usage = resources.usage();
        assert_eq!(usage[0].group, TaskWorkerGroup::LongTasksGpu);
        assert_eq!(usage[0].capacity, 3);
        assert_eq!(usage[0].occupied, 1);
        assert_eq!(usage[1].occupied, 0);

        let snapshot = resources.snapshot();
        assert_eq!(snapshot[0].occupant(), Some(&TaskId::from("a")));
        assert!(snapshot[1].is_free());
    }
}
