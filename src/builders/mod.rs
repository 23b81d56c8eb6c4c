//! Builders to construct the operation worker from configuration.

pub mod worker_builder;

pub use worker_builder::OperationWorkerBuilder;
