use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Next firing is `period` after the previous firing returned.
    FixedDelay,
    /// Firings at `initial + n * period`, whether or not earlier ones finished.
    FixedRate,
    /// A single firing after the initial delay.
    Once,
}

// =============================================================================
// Worker pool settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of tasks executing at once.
    pub capacity: usize,
    /// `None` queues without limit; `Some(n)` rejects once `n` tasks are waiting.
    pub queue_limit: Option<usize>,
    pub thread_name_prefix: String,
    /// Default grace used by `stop` when the caller does not pass one.
    pub await_termination_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            queue_limit: None,
            thread_name_prefix: "task-executor-".to_string(),
            await_termination_ms: 5,
        }
    }
}

impl PoolConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn await_termination(&self) -> Duration {
        Duration::from_millis(self.await_termination_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::invalid("pool.capacity", "must be at least 1"));
        }
        if self.queue_limit == Some(0) {
            return Err(ConfigError::invalid(
                "pool.queue_limit",
                "must be at least 1 when set; omit it for an unbounded queue",
            ));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ConfigError::invalid("pool.thread_name_prefix", "must not be empty"));
        }
        Ok(())
    }
}

// =============================================================================
// Dispatcher settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Tasks submitted per firing.
    pub batch_size: usize,
    pub cadence: Cadence,
    pub period_ms: u64,
    pub initial_delay_ms: u64,
    /// Block on every task handle before handing control back to the timer.
    pub wait_for_completion: bool,
    /// Simulated work per task.
    pub task_work_ms: u64,
    pub scheduler_thread_name: String,
    /// Finished cycles kept for `reports()`; older cycles and their worker
    /// log entries are discarded.
    pub history_cycles: usize,
    pub pool: PoolConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            cadence: Cadence::FixedDelay,
            period_ms: 30_000,
            initial_delay_ms: 0,
            wait_for_completion: true,
            task_work_ms: 30_000,
            scheduler_thread_name: "task-scheduler-1".to_string(),
            history_cycles: 100,
            pool: PoolConfig::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn task_work(&self) -> Duration {
        Duration::from_millis(self.task_work_ms)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period_ms == 0 && self.cadence != Cadence::Once {
            return Err(ConfigError::invalid(
                "period_ms",
                "must be greater than zero for recurring cadences",
            ));
        }
        if self.scheduler_thread_name.trim().is_empty() {
            return Err(ConfigError::invalid("scheduler_thread_name", "must not be empty"));
        }
        if self.history_cycles == 0 {
            return Err(ConfigError::invalid("history_cycles", "must be at least 1"));
        }
        self.pool.validate()
    }
}
