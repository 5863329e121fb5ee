//! Content-based routing strategies.

use conflux_abstraction::BackendRequest;
use tracing::debug;

use crate::registry::BackendProfile;
use crate::trim::Trimmer;

/// Selects a preferred backend for a request.
///
/// Returning `None`, or a name that is not registered, makes the manager
/// fall back to the active backend.
pub trait RoutingStrategy: Send + Sync {
    /// Picks a backend name for `request` among the registered `backends`.
    fn route(&self, request: &BackendRequest, backends: &[BackendProfile]) -> Option<String>;
}

impl<F> RoutingStrategy for F
where
    F: Fn(&BackendRequest, &[BackendProfile]) -> Option<String> + Send + Sync,
{
    fn route(&self, request: &BackendRequest, backends: &[BackendProfile]) -> Option<String> {
        self(request, backends)
    }
}

/// Routes to the smallest backend whose budget holds the whole request.
///
/// When nothing fits, the backend with the largest budget wins so that
/// trimming drops as little as possible. Requests are measured with the
/// router's [`Trimmer`], so build it from the same trimmer the manager uses
/// (see [`DispatchConfig::router`](crate::DispatchConfig::router)) or the
/// two will disagree on what fits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FitToBudgetRouter {
    trimmer: Trimmer,
}

impl FitToBudgetRouter {
    /// Creates a router measuring with the given characters-per-token ratio.
    #[must_use]
    pub fn new(chars_per_token: usize) -> Self {
        Self { trimmer: Trimmer::new(chars_per_token) }
    }

    /// Creates a router measuring exactly like `trimmer`.
    #[must_use]
    pub fn with_trimmer(trimmer: Trimmer) -> Self {
        Self { trimmer }
    }

    /// Returns the characters-per-token ratio used for measuring.
    pub fn chars_per_token(&self) -> usize {
        self.trimmer.chars_per_token()
    }
}

impl RoutingStrategy for FitToBudgetRouter {
    fn route(&self, request: &BackendRequest, backends: &[BackendProfile]) -> Option<String> {
        let size = self.trimmer.measure_messages(&request.messages);

        let choice = backends
            .iter()
            .filter(|b| b.effective_budget >= size)
            .min_by_key(|b| b.effective_budget)
            .or_else(|| backends.iter().max_by_key(|b| b.effective_budget))?;

        debug!(size, backend = %choice.name, budget = choice.effective_budget, "Fit-to-budget route");
        Some(choice.name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct KeywordRule {
    keywords: Vec<String>,
    backend: String,
}

/// Routes by keywords found in the last user message.
///
/// Rules are checked in insertion order; the first rule with any keyword
/// contained in the message (case-insensitive) decides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordRouter {
    rules: Vec<KeywordRule>,
}

impl KeywordRouter {
    /// Creates a router with no rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule sending messages containing any of `keywords` to `backend`.
    #[must_use]
    pub fn rule<I, S>(mut self, keywords: I, backend: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.rules.push(KeywordRule {
            keywords: keywords.into_iter().map(|k| k.as_ref().to_lowercase()).collect(),
            backend: backend.into(),
        });
        self
    }
}

impl RoutingStrategy for KeywordRouter {
    fn route(&self, request: &BackendRequest, _backends: &[BackendProfile]) -> Option<String> {
        let text = request.last_user_content()?.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| !k.is_empty() && text.contains(k.as_str())))
            .map(|rule| rule.backend.clone())
    }
}
