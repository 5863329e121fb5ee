//! Ordered fallback chains.

use serde::{Deserialize, Serialize};

/// Ordered list of backend names to try when a dispatch fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackChain {
    /// Backend names, in the order they are tried.
    backends: Vec<String>,
}

impl FallbackChain {
    /// Creates a chain trying `backends` in order.
    pub fn new<I, S>(backends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { backends: backends.into_iter().map(Into::into).collect() }
    }

    /// Appends a backend to the end of the chain.
    #[must_use]
    pub fn then(mut self, backend: impl Into<String>) -> Self {
        self.backends.push(backend.into());
        self
    }

    /// Number of backends in the chain.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Returns `true` if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Iterates over the chain in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.backends.iter().map(String::as_str)
    }

    /// Returns the first backend after the ones already `tried`.
    pub fn next_untried(&self, tried: &[String]) -> Option<&str> {
        self.iter().find(|name| !tried.iter().any(|t| t == name))
    }
}
