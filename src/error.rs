use std::io;
use thiserror::Error;

// =============================================================================
// Task and pool errors
// =============================================================================

/// Outcome of a single submitted task that did not finish cleanly.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task panicked: {0}")]
    Panicked(String),

    /// The wait on a completion handle ended without a result, because the
    /// task was dropped before it ran or its worker went away.
    #[error("wait for task completion was interrupted")]
    Interrupted,
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("worker pool queue is full (limit: {limit})")]
    Saturated { limit: usize },

    #[error("worker pool has been shut down")]
    ShutDown,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

// =============================================================================
// Configuration errors
// =============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse dispatcher config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Crate-level error for callers that drive several components at once.
#[derive(Error, Debug)]
pub enum LabError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payload_str() {
        let err = TaskError::from_panic(Box::new("boom"));
        assert_eq!(err, TaskError::Panicked("boom".into()));
    }

    #[test]
    fn test_panic_payload_string() {
        let err = TaskError::from_panic(Box::new(String::from("kaboom")));
        assert_eq!(err.to_string(), "task panicked: kaboom");
    }

    #[test]
    fn test_panic_payload_other() {
        let err = TaskError::from_panic(Box::new(42_u32));
        assert!(matches!(err, TaskError::Panicked(ref m) if m.contains("non-string")));
    }

    #[test]
    fn test_lab_error_from_pool_error() {
        let err: LabError = PoolError::Saturated { limit: 3 }.into();
        assert_eq!(err.to_string(), "worker pool queue is full (limit: 3)");
    }
}
