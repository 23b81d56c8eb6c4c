//! # Prometheus Operation Worker
//!
//! An in-process scheduler for long-running jobs (model training, indexing,
//! batch exports) onto a fixed inventory of typed resource slots.
//!
//! Every job declares the worker groups it may run on. The worker keeps a
//! FIFO queue of submitted tasks and a pool of executor threads, one per slot.
//! An idle executor admits the oldest queued task that has a free slot in one
//! of its eligible groups, binds the slot, runs the job and records the
//! outcome. Clients poll by task id and pop the result once it is terminal.
//!
//! ## Key Features
//!
//! - **Typed Slots**: GPU and CPU slot groups sized from configuration
//! - **FIFO Admission**: no task jumps ahead of an older, runnable one
//! - **Deduplication**: a job already tracked is never queued twice
//! - **Cooperative Cancellation**: `stop` signals the job, waits a grace
//!   period and force-releases the slot if the job ignores it
//! - **Progress Reporting**: jobs publish stage and counters while running
//! - **Audit Trail**: optional sink recording every lifecycle transition
//!
//! ```rust,ignore
//! use prometheus_operation_worker::builders::OperationWorkerBuilder;
//! use prometheus_operation_worker::config::WorkerConfig;
//! use prometheus_operation_worker::core::{TaskResult, TaskStatusCode};
//! use std::time::Duration;
//!
//! let worker = OperationWorkerBuilder::new(WorkerConfig::default()).build()?;
//! let id = worker.put(BuildIndex::new("corpus-7"))?;
//!
//! let status = worker.wait(&id, Duration::from_secs(600))?;
//! assert_eq!(status.code, TaskStatusCode::Finished);
//! if let TaskResult::Finished(value) = worker.pop_result(&id)? {
//!     println!("{value}");
//! }
//! worker.shutdown();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: groups, slots, tasks, queue and worker.
pub mod core;
/// Configuration models for the slot inventory and timeouts.
pub mod config;
/// Builders to construct a worker from configuration.
pub mod builders;
/// Shared utilities.
pub mod util;
