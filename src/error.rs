use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error taxonomy shared by the library and the demos
// =============================================================================

/// Failure of a unit of work running under a [`crate::scope::TaskScope`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),

    #[error("Task was cancelled")]
    Cancelled,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Cancellation is the normal way a sibling stops; it is never the
    /// "first failure" of a scope.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

impl From<tokio::task::JoinError> for TaskError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            return TaskError::Cancelled;
        }
        TaskError::Panicked(err.to_string())
    }
}

impl From<FlowError> for TaskError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::Cancelled => TaskError::Cancelled,
            FlowError::Timeout(after) => TaskError::Timeout(after),
            FlowError::Failed(message) => TaskError::Failed(message),
        }
    }
}

/// Terminal signal of a [`crate::flow::Flow`] that did not complete normally.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    #[error("Upstream failed: {0}")]
    Failed(String),

    #[error("No value within {0:?}")]
    Timeout(Duration),

    #[error("Flow was cancelled")]
    Cancelled,
}

impl FlowError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for field '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_error_converts_to_task_error() {
        assert_eq!(
            TaskError::from(FlowError::failed("boom")),
            TaskError::Failed("boom".to_string())
        );
        assert_eq!(
            TaskError::from(FlowError::Timeout(Duration::from_millis(5))),
            TaskError::Timeout(Duration::from_millis(5))
        );
        assert!(TaskError::from(FlowError::Cancelled).is_cancellation());
    }

    #[tokio::test]
    async fn test_join_error_from_panic() {
        let handle = tokio::spawn(async {
            panic!("kaboom");
        });
        let err = TaskError::from(handle.await.unwrap_err());
        assert!(matches!(err, TaskError::Panicked(_)));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(TaskError::failed("x").to_string(), "Task failed: x");
        assert_eq!(
            ConfigError::invalid("timing.time_scale", "must be positive").to_string(),
            "Invalid value for field 'timing.time_scale': must be positive"
        );
    }
}
