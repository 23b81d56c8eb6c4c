//! Operation worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Resources, TaskWorkerGroup};

/// Environment variable overriding `poll_interval_ms`.
pub const ENV_POLL_INTERVAL_MS: &str = "OPERATION_WORKER_POLL_INTERVAL_MS";
/// Environment variable overriding `stop_grace_ms` (`none` waits forever).
pub const ENV_STOP_GRACE_MS: &str = "OPERATION_WORKER_STOP_GRACE_MS";
/// Environment variable overriding `shutdown_timeout_ms`.
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "OPERATION_WORKER_SHUTDOWN_TIMEOUT_MS";

/// Number of slots configured for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Group of the slots.
    pub group: TaskWorkerGroup,
    /// Number of slots.
    pub count: usize,
}

impl ResourceSpec {
    /// Shorthand constructor.
    #[must_use]
    pub const fn new(group: TaskWorkerGroup, count: usize) -> Self {
        Self { group, count }
    }
}

/// Configuration of an `OperationWorker`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Slot inventory, loaded once at startup.
    pub resources: Vec<ResourceSpec>,
    /// Fallback wake-up interval of idle executors.
    pub poll_interval_ms: u64,
    /// How long `stop` waits for a running job to acknowledge cancellation
    /// before force-releasing its slot. `None` waits indefinitely.
    pub stop_grace_ms: Option<u64>,
    /// How long `shutdown` waits for each executor thread to exit.
    pub shutdown_timeout_ms: u64,
    /// Stack size of executor threads.
    pub thread_stack_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            resources: vec![
                ResourceSpec::new(TaskWorkerGroup::LongTasksGpu, 3),
                ResourceSpec::new(TaskWorkerGroup::LongTasksCpu, 2),
                ResourceSpec::new(TaskWorkerGroup::NormalTasksCpu, 5),
                ResourceSpec::new(TaskWorkerGroup::ShortTasksCpu, 3),
            ],
            poll_interval_ms: 1000,
            stop_grace_ms: Some(30_000),
            shutdown_timeout_ms: 2000,
            thread_stack_size: 8 * 1024 * 1024,
        }
    }
}

impl WorkerConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slot inventory.
    #[must_use]
    pub fn with_resources(mut self, resources: Vec<ResourceSpec>) -> Self {
        self.resources = resources;
        self
    }

    /// Set the idle poll interval.
    #[must_use]
    pub const fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the stop grace period (`None` waits forever).
    #[must_use]
    pub const fn with_stop_grace_ms(mut self, ms: Option<u64>) -> Self {
        self.stop_grace_ms = ms;
        self
    }

    /// Set the per-executor shutdown timeout.
    #[must_use]
    pub const fn with_shutdown_timeout_ms(mut self, ms: u64) -> Self {
        self.shutdown_timeout_ms = ms;
        self
    }

    /// Set the executor thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Idle poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Stop grace period.
    #[must_use]
    pub fn stop_grace(&self) -> Option<Duration> {
        self.stop_grace_ms.map(Duration::from_millis)
    }

    /// Per-executor shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Total number of slots.
    #[must_use]
    pub fn total_slots(&self) -> usize {
        self.resources.iter().map(|r| r.count).sum()
    }

    /// Configured slot count of one group.
    #[must_use]
    pub fn capacity_of(&self, group: TaskWorkerGroup) -> usize {
        self.resources
            .iter()
            .filter(|r| r.group == group)
            .map(|r| r.count)
            .sum()
    }

    /// Build the slot inventory, in configuration order.
    #[must_use]
    pub fn build_resources(&self) -> Resources {
        let counts: Vec<_> = self.resources.iter().map(|r| (r.group, r.count)).collect();
        Resources::from_counts(&counts)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.total_slots() == 0 {
            return Err("at least one resource slot must be configured".into());
        }
        for (i, spec) in self.resources.iter().enumerate() {
            if self.resources[..i].iter().any(|r| r.group == spec.group) {
                return Err(format!("group `{}` configured more than once", spec.group));
            }
        }
        self.validate_timing()
    }

    /// Validate everything except the slot inventory.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate_timing(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        if self.stop_grace_ms == Some(0) {
            return Err("stop_grace_ms must be greater than 0".into());
        }
        if self.shutdown_timeout_ms == 0 {
            return Err("shutdown_timeout_ms must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply overrides from the environment (after loading a `.env` file if
    /// present) and validate.
    ///
    /// # Errors
    ///
    /// Returns a message naming the malformed variable, or a validation error.
    pub fn with_env_overrides(mut self) -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        self.apply_overrides(|key| std::env::var(key).ok())?;
        self.validate()?;
        Ok(self)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), String> {
        let parse = |key: &str, raw: &str| {
            raw.trim()
                .parse::<u64>()
                .map_err(|e| format!("{key}: invalid value `{raw}`: {e}"))
        };
        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            self.poll_interval_ms = parse(ENV_POLL_INTERVAL_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_STOP_GRACE_MS) {
            self.stop_grace_ms = if raw.trim().eq_ignore_ascii_case("none") {
                None
            } else {
                Some(parse(ENV_STOP_GRACE_MS, &raw)?)
            };
        }
        if let Some(raw) = lookup(ENV_SHUTDOWN_TIMEOUT_MS) {
            self.shutdown_timeout_ms = parse(ENV_SHUTDOWN_TIMEOUT_MS, &raw)?;
        }
        Ok(())
    }
}
