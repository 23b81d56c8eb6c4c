//! Tests for configuration loading and worker construction

use prometheus_operation_worker::builders::OperationWorkerBuilder;
use prometheus_operation_worker::config::{ResourceSpec, WorkerConfig};
use prometheus_operation_worker::core::{SchedulerError, TaskWorkerGroup};
use std::time::Duration;

#[test]
fn test_default_inventory() {
    let cfg = WorkerConfig::default();
    assert_eq!(cfg.capacity_of(TaskWorkerGroup::LongTasksGpu), 3);
    assert_eq!(cfg.capacity_of(TaskWorkerGroup::LongTasksCpu), 2);
    assert_eq!(cfg.capacity_of(TaskWorkerGroup::NormalTasksCpu), 5);
    assert_eq!(cfg.capacity_of(TaskWorkerGroup::ShortTasksCpu), 3);
    assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
}

#[test]
fn test_json_config_fills_defaults() {
    let cfg = WorkerConfig::from_json_str(
        r#"{
            "resources": [
                { "group": "long_tasks_gpu", "count": 1 },
                { "group": "short_tasks_cpu", "count": 4 }
            ],
            "stop_grace_ms": null
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.total_slots(), 5);
    assert_eq!(cfg.stop_grace(), None);
    assert_eq!(cfg.shutdown_timeout_ms, WorkerConfig::default().shutdown_timeout_ms);
}

#[test]
fn test_json_config_rejects_unknown_group() {
    let err = WorkerConfig::from_json_str(
        r#"{ "resources": [{ "group": "quantum_tasks", "count": 1 }] }"#,
    )
    .unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_validation_errors() {
    let duplicate = WorkerConfig::new().with_resources(vec![
        ResourceSpec::new(TaskWorkerGroup::ShortTasksCpu, 1),
        ResourceSpec::new(TaskWorkerGroup::ShortTasksCpu, 2),
    ]);
    assert!(duplicate.validate().unwrap_err().contains("more than once"));

    let empty = WorkerConfig::new().with_resources(vec![ResourceSpec::new(
        TaskWorkerGroup::ShortTasksCpu,
        0,
    )]);
    assert!(empty.validate().is_err());

    assert!(WorkerConfig::new().with_poll_interval_ms(0).validate().is_err());
    assert!(WorkerConfig::new().with_stop_grace_ms(Some(0)).validate().is_err());
    assert!(WorkerConfig::new().with_stop_grace_ms(None).validate().is_ok());
    assert!(WorkerConfig::new().with_shutdown_timeout_ms(0).validate().is_err());
    assert!(WorkerConfig::new().with_thread_stack_size(1024).validate().is_err());
}

#[test]
fn test_builder_rejects_invalid_config() {
    let result = OperationWorkerBuilder::new(WorkerConfig::new().with_poll_interval_ms(0)).build();
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}

#[test]
fn test_zero_count_group_is_not_served() {
    let worker = OperationWorkerBuilder::new(
        WorkerConfig::new().with_resources(vec![
            ResourceSpec::new(TaskWorkerGroup::LongTasksGpu, 0),
            ResourceSpec::new(TaskWorkerGroup::ShortTasksCpu, 1),
        ]),
    )
    .build()
    .unwrap();
    assert_eq!(worker.resources().groups(), &[TaskWorkerGroup::ShortTasksCpu]);
    assert_eq!(worker.stats().executors, 1);
    worker.shutdown();
}
