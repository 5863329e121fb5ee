//! Error types for workflow execution.

use conflux_abstraction::BackendError;
use conflux_dispatch::DispatchError;
use thiserror::Error;

/// Result type for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors produced while building or running a workflow.
///
/// A task's error is stored and propagated exactly as the task returned it,
/// so the workflow's terminal state carries the root cause.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WorkflowError {
    /// A task required an input that was absent (or null) after resolution.
    #[error("Task '{task}' is missing required input '{key}'")]
    MissingInput {
        /// Task name.
        task: String,
        /// Input key.
        key: String,
    },

    /// A task body failed.
    #[error("Task '{task}' failed: {message}")]
    Execution {
        /// Task name.
        task: String,
        /// Failure description.
        message: String,
    },

    /// Backend error, passed through unchanged.
    #[error(transparent)]
    Backend(BackendError),

    /// Dispatch-level failure (routing, exhausted fallbacks).
    #[error(transparent)]
    Dispatch(DispatchError),

    /// The task was interrupted by cancellation.
    #[error("Task '{0}' was cancelled")]
    Cancelled(String),

    /// Two components share a name.
    #[error("Duplicate component name '{0}'")]
    DuplicateName(String),

    /// A component name that references cannot address.
    #[error("Invalid component name '{0}': names may not be empty or contain whitespace, '{{', '}}' or '.'")]
    InvalidName(String),

    /// Operation not allowed in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A task body panicked.
    #[error("Task '{task}' panicked: {message}")]
    TaskPanicked {
        /// Task name.
        task: String,
        /// Panic payload, if it was a string.
        message: String,
    },
}

impl WorkflowError {
    /// Creates an execution error for `task`.
    pub fn execution(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution { task: task.into(), message: message.into() }
    }

    /// Returns `true` if this error came from cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

impl From<BackendError> for WorkflowError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err)
    }
}

impl From<DispatchError> for WorkflowError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Backend(err) => Self::Backend(err),
            other => Self::Dispatch(other),
        }
    }
}
