//! Configuration models for resource slots, polling and timeouts.

pub mod worker;

pub use worker::{ResourceSpec, WorkerConfig};
