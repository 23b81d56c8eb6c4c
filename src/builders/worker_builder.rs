//! Builder assembling an `OperationWorker` from configuration.

use crate::config::{ResourceSpec, WorkerConfig};
use crate::core::{AuditSink, OperationWorker, Resources, SchedulerError, TaskResource};

/// Builds an [`OperationWorker`] from a [`WorkerConfig`], optionally with an
/// explicit slot list and an audit sink.
pub struct OperationWorkerBuilder {
    config: WorkerConfig,
    slots: Option<Vec<TaskResource>>,
    audit: Option<Box<dyn AuditSink>>,
}

impl OperationWorkerBuilder {
    /// Start from a configuration.
    #[must_use]
    pub const fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            slots: None,
            audit: None,
        }
    }

    /// Start from configuration read from the environment on top of the defaults.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if an override is malformed.
    pub fn from_env() -> Result<Self, SchedulerError> {
        let config = WorkerConfig::default()
            .with_env_overrides()
            .map_err(SchedulerError::InvalidConfig)?;
        Ok(Self::new(config))
    }

    /// Start from a JSON configuration document.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the document does not parse or validate.
    pub fn from_json_str(input: &str) -> Result<Self, SchedulerError> {
        let config = WorkerConfig::from_json_str(input).map_err(SchedulerError::InvalidConfig)?;
        Ok(Self::new(config))
    }

    /// The configuration being built.
    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Use this slot list instead of `config.resources`.
    #[must_use]
    pub fn with_slots(mut self, slots: Vec<TaskResource>) -> Self {
        self.slots = Some(slots);
        self
    }

    /// Record lifecycle events into `sink`.
    #[must_use]
    pub fn with_audit(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Validate the configuration and start the worker.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the configuration (or slot list) is invalid
    /// - `Internal` if an executor thread cannot be spawned
    pub fn build(self) -> Result<OperationWorker, SchedulerError> {
        let mut config = self.config;
        let resources = if let Some(slots) = self.slots {
            config.validate_timing().map_err(SchedulerError::InvalidConfig)?;
            let resources = Resources::new(slots);
            config.resources = resources
                .usage()
                .into_iter()
                .map(|u| ResourceSpec::new(u.group, u.capacity))
                .collect();
            resources
        } else {
            config.validate().map_err(SchedulerError::InvalidConfig)?;
            config.build_resources()
        };
        OperationWorker::start(config, resources, self.audit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{InMemoryAuditSink, TaskWorkerGroup};

    #[test]
    fn test_builder_with_slots_overrides_inventory() {
        let worker = OperationWorkerBuilder::new(WorkerConfig::default())
            .with_slots(vec![
                TaskResource::new(TaskWorkerGroup::ShortTasksCpu),
                TaskResource::new(TaskWorkerGroup::LongTasksGpu),
            ])
            .build()
            .unwrap();
        assert_eq!(worker.resources().len(), 2);
        assert_eq!(worker.config().total_slots(), 2);
        assert_eq!(worker.stats().executors, 2);
        worker.shutdown();
    }

    #[test]
    fn test_builder_rejects_empty_slot_list() {
        let result = OperationWorkerBuilder::new(WorkerConfig::default())
            .with_slots(Vec::new())
            .build();
        assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_from_json() {
        let json = r#"{
            "resources": [{ "group": "normal_tasks_cpu", "count": 1 }],
            "poll_interval_ms": 25
        }"#;
        let builder = OperationWorkerBuilder::from_json_str(json).unwrap();
        assert_eq!(builder.config().poll_interval_ms, 25);
        assert_eq!(builder.config().stop_grace_ms, Some(30_000));

        let worker = builder
            .with_audit(Box::new(InMemoryAuditSink::new(16)))
            .build()
            .unwrap();
        assert_eq!(
            worker.resources().groups(),
            &[TaskWorkerGroup::NormalTasksCpu]
        );
        worker.shutdown();
    }

    #[test]
    fn test_builder_from_json_invalid() {
        let result = OperationWorkerBuilder::from_json_str(r#"{ "resources": [] }"#);
        assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
    }
}
