//! Worker groups partitioning resource slots into pools.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Label of a resource pool with its own fixed capacity.
///
/// Declaration order is the tie-break order when a task is eligible for
/// several groups with free slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskWorkerGroup {
    /// Long running jobs that need a GPU (model training).
    LongTasksGpu,
    /// Long running jobs on the CPU.
    LongTasksCpu,
    /// Regular CPU jobs (page prediction).
    NormalTasksCpu,
    /// Short CPU jobs.
    ShortTasksCpu,
}

impl TaskWorkerGroup {
    /// All groups in declaration order.
    pub const ALL: [Self; 4] = [
        Self::LongTasksGpu,
        Self::LongTasksCpu,
        Self::NormalTasksCpu,
        Self::ShortTasksCpu,
    ];

    /// Stable snake_case name, as used in configuration files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LongTasksGpu => "long_tasks_gpu",
            Self::LongTasksCpu => "long_tasks_cpu",
            Self::NormalTasksCpu => "normal_tasks_cpu",
            Self::ShortTasksCpu => "short_tasks_cpu",
        }
    }
}

impl fmt::Display for TaskWorkerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort and deduplicate a group list into declaration order.
pub(crate) fn normalize_groups(groups: &[TaskWorkerGroup]) -> Vec<TaskWorkerGroup> {
    let mut out = groups.to_vec();
    out.sort_unstable();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declaration_order() {
        let mut groups = vec![
            TaskWorkerGroup::ShortTasksCpu,
            TaskWorkerGroup::LongTasksGpu,
            TaskWorkerGroup::NormalTasksCpu,
            TaskWorkerGroup::LongTasksCpu,
        ];
        groups.sort();
        assert_eq!(groups, TaskWorkerGroup::ALL.to_vec());
    }

    #[test]
    fn test_normalize_dedups() {
        let groups = normalize_groups(&[
            TaskWorkerGroup::LongTasksCpu,
            TaskWorkerGroup::LongTasksGpu,
            TaskWorkerGroup::LongTasksCpu,
        ]);
        assert_eq!(
            groups,
            vec![TaskWorkerGroup::LongTasksGpu, TaskWorkerGroup::LongTasksCpu]
        );
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&TaskWorkerGroup::NormalTasksCpu).unwrap();
        assert_eq!(json, "\"normal_tasks_cpu\"");
        let group: TaskWorkerGroup = serde_json::from_str("\"long_tasks_gpu\"").unwrap();
        assert_eq!(group, TaskWorkerGroup::LongTasksGpu);
        assert_eq!(group.to_string(), "long_tasks_gpu");
    }
}
