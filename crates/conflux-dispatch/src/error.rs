// Error types for dispatch

use conflux_abstraction::BackendError;
use thiserror::Error;

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Dispatch errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    /// Error reported by a backend adapter, passed through unchanged
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// No backend could be resolved and no fallback is configured
    #[error("Routing failed: {0}")]
    RoutingFailed(String),

    /// Backend name not present in the registry
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    /// Buffer fraction outside `[0, 1)`
    #[error("Invalid buffer fraction {fraction} for backend '{backend}': must be in [0, 1)")]
    InvalidBufferFraction {
        /// Backend name
        backend: String,
        /// Rejected fraction
        fraction: f64,
    },

    /// Effective budget would be zero
    #[error("Invalid budget for backend '{0}': effective content budget is zero")]
    InvalidBudget(String),

    /// Every backend of a fallback chain failed
    #[error("All backends failed: {}", format_failures(.0))]
    AllBackendsFailed(Vec<FailureRecord>),
}

/// Record of one failed attempt inside a fallback chain.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    /// Backend that was attempted.
    pub backend: String,
    /// Error the attempt produced.
    pub error: DispatchError,
}

impl FailureRecord {
    /// Creates a new failure record.
    pub fn new(backend: impl Into<String>, error: DispatchError) -> Self {
        Self { backend: backend.into(), error }
    }
}

fn format_failures(failures: &[FailureRecord]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.backend, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_is_transparent() {
        let err = DispatchError::from(BackendError::Unavailable("down".to_string()));
        assert_eq!(err.to_string(), "Backend unavailable: down");
    }

    #[test]
    fn test_all_backends_failed_lists_each_attempt() {
        let err = DispatchError::AllBackendsFailed(vec![
            FailureRecord::new("a", BackendError::Unavailable("down".to_string()).into()),
            FailureRecord::new("b", BackendError::Decoding("garbled".to_string()).into()),
        ]);
        assert_eq!(
            err.to_string(),
            "All backends failed: a: Backend unavailable: down; b: Decoding error: garbled"
        );
    }
}
