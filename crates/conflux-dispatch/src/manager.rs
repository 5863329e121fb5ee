//! Dispatch manager.
//!
//! Resolves a target backend, trims the request to the backend's effective
//! budget, invokes it, and falls back to another backend on failure. Each
//! dispatch is independent; no request-scoped state survives a call.

use std::borrow::Cow;
use std::sync::Arc;

use conflux_abstraction::{Backend, BackendRequest, BackendResponse, PartialTextCallback};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, FailureRecord, Result};
use crate::registry::{BackendProfile, BackendRegistry};
use crate::routing::{FallbackChain, FitToBudgetRouter, RoutingStrategy};
use crate::trim::{TrimStrategy, Trimmer};

/// Multi-backend dispatcher with budget trimming and fallback.
#[derive(Debug)]
pub struct DispatchManager {
    /// Registered backends.
    registry: Arc<BackendRegistry>,
    /// Name of the active backend.
    active: RwLock<Option<String>>,
    /// Fallback used by `dispatch`, `dispatch_streaming` and `dispatch_with_routing`.
    default_fallback: Option<String>,
    /// Content trimmer.
    trimmer: Trimmer,
    /// Strategy used when a request exceeds its budget.
    strategy: TrimStrategy,
}

impl Default for DispatchManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchManager {
    /// Creates a manager with an empty registry and default trimming.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(BackendRegistry::new()),
            active: RwLock::new(None),
            default_fallback: None,
            trimmer: Trimmer::default(),
            strategy: TrimStrategy::default(),
        }
    }

    /// Replaces the trimmer.
    #[must_use]
    pub fn with_trimmer(mut self, trimmer: Trimmer) -> Self {
        self.trimmer = trimmer;
        self
    }

    /// Sets the trim strategy.
    #[must_use]
    pub fn with_trim_strategy(mut self, strategy: TrimStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the fallback backend used when the target of a plain dispatch fails.
    #[must_use]
    pub fn with_default_fallback(mut self, name: impl Into<String>) -> Self {
        self.default_fallback = Some(name.into());
        self
    }

    /// Returns the backend registry.
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Returns the configured trim strategy.
    pub fn trim_strategy(&self) -> TrimStrategy {
        self.strategy
    }

    /// Returns the default fallback backend, if any.
    pub fn default_fallback(&self) -> Option<&str> {
        self.default_fallback.as_deref()
    }

    /// Registers a backend.
    ///
    /// # Arguments
    /// * `name` - Name to register under
    /// * `backend` - Adapter handle
    /// * `max_content_size` - Budget override; the adapter's own limit when `None`
    /// * `buffer_fraction` - Headroom in `[0, 1)`
    ///
    /// # Returns
    /// Returns `true` if the backend was newly registered.
    ///
    /// # Errors
    /// Returns an error if the buffer fraction or resulting budget is invalid.
    pub async fn register(
        &self,
        name: impl Into<String>,
        backend: Arc<dyn Backend>,
        max_content_size: Option<usize>,
        buffer_fraction: f64,
    ) -> Result<bool> {
        self.registry.register(name, backend, max_content_size, buffer_fraction).await
    }

    /// Unregisters a backend, clearing the active selection if it pointed there.
    ///
    /// # Returns
    /// Returns `true` if the backend was found and removed.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.registry.unregister(name).await;

        let mut active = self.active.write().await;
        if active.as_deref() == Some(name) {
            info!(backend = %name, "Active backend unregistered");
            *active = None;
        }

        removed
    }

    /// Selects the active backend.
    ///
    /// # Errors
    /// Returns `UnknownBackend` if `name` is not registered.
    pub async fn set_active(&self, name: &str) -> Result<()> {
        if !self.registry.is_registered(name).await {
            return Err(DispatchError::UnknownBackend(name.to_string()));
        }

        info!(backend = %name, "Active backend set");
        *self.active.write().await = Some(name.to_string());
        Ok(())
    }

    /// Returns the active backend name.
    pub async fn active(&self) -> Option<String> {
        self.active.read().await.clone()
    }

    /// Builds a fit-to-budget router that measures with this manager's trimmer.
    pub fn fit_to_budget_router(&self) -> FitToBudgetRouter {
        FitToBudgetRouter::with_trimmer(self.trimmer.clone())
    }

    /// Measures a request the way trimming does.
    pub fn measure_request(&self, request: &BackendRequest) -> usize {
        self.trimmer.measure_messages(&request.messages)
    }

    /// Dispatches to the active backend, falling back to the default fallback.
    ///
    /// # Errors
    /// Returns the backend error of the last attempt, or `RoutingFailed` when
    /// no backend could be resolved at all.
    pub async fn dispatch(&self, request: &BackendRequest) -> Result<BackendResponse> {
        let target = self.active().await;
        self.run_with_fallback(target, self.default_fallback.as_deref(), request, None).await
    }

    /// Like [`dispatch`](Self::dispatch), reporting incremental text to `on_partial`.
    ///
    /// A fallback attempt streams through the same callback.
    ///
    /// # Errors
    /// Same as [`dispatch`](Self::dispatch).
    pub async fn dispatch_streaming(
        &self,
        request: &BackendRequest,
        on_partial: &PartialTextCallback<'_>,
    ) -> Result<BackendResponse> {
        let target = self.active().await;
        self.run_with_fallback(target, self.default_fallback.as_deref(), request, Some(on_partial))
            .await
    }

    /// Dispatches to the active backend, retrying once against `fallback`.
    ///
    /// # Errors
    /// Returns the fallback's error when both attempts fail, or the primary's
    /// error when `fallback` is not registered.
    pub async fn dispatch_with_fallback(
        &self,
        request: &BackendRequest,
        fallback: &str,
    ) -> Result<BackendResponse> {
        let target = self.active().await;
        self.run_with_fallback(target, Some(fallback), request, None).await
    }

    /// Dispatches to the backend chosen by `strategy`.
    ///
    /// An empty or unknown routing result falls back to the active backend.
    ///
    /// # Errors
    /// Same as [`dispatch`](Self::dispatch).
    pub async fn dispatch_with_routing(
        &self,
        request: &BackendRequest,
        strategy: &dyn RoutingStrategy,
    ) -> Result<BackendResponse> {
        let profiles: Vec<BackendProfile> = self.registry.profiles().await;
        let routed = strategy.route(request, &profiles);

        let target = match routed {
            Some(name) if profiles.iter().any(|p| p.name == name) => {
                debug!(backend = %name, "Request routed");
                Some(name)
            }
            Some(name) => {
                debug!(backend = %name, "Routed to unknown backend, using active");
                self.active().await
            }
            None => self.active().await,
        };

        self.run_with_fallback(target, self.default_fallback.as_deref(), request, None).await
    }

    /// Dispatches to the active backend, then to each chain member in order.
    ///
    /// Unregistered chain members and backends already attempted are skipped.
    ///
    /// # Errors
    /// Returns `AllBackendsFailed` when two or more attempts failed, the
    /// single attempt's error when only one backend was tried, and
    /// `RoutingFailed` when nothing could be tried.
    pub async fn dispatch_with_fallback_chain(
        &self,
        request: &BackendRequest,
        chain: &FallbackChain,
    ) -> Result<BackendResponse> {
        let mut tried: Vec<String> = Vec::new();
        let mut failures: Vec<FailureRecord> = Vec::new();

        if let Some(active) = self.active().await {
            match self.attempt(&active, request, None).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    warn!(backend = %active, error = %err, "Backend failed, walking fallback chain");
                    failures.push(FailureRecord::new(active.clone(), err));
                    tried.push(active);
                }
            }
        }

        while let Some(name) = chain.next_untried(&tried) {
            let name = name.to_string();
            tried.push(name.clone());

            if !self.registry.is_registered(&name).await {
                debug!(backend = %name, "Skipping unregistered chain member");
                continue;
            }

            match self.attempt(&name, request, None).await {
                Ok(response) => {
                    info!(backend = %name, failed_attempts = failures.len(), "Fallback chain succeeded");
                    return Ok(response);
                }
                Err(err) => {
                    warn!(backend = %name, error = %err, "Fallback chain member failed");
                    failures.push(FailureRecord::new(name, err));
                }
            }
        }

        match failures.len() {
            0 => Err(DispatchError::RoutingFailed(
                "no active backend and no registered fallback chain member".to_string(),
            )),
            1 => Err(failures.remove(0).error),
            _ => Err(DispatchError::AllBackendsFailed(failures)),
        }
    }

    /// Attempts `target`, then `fallback` if the first attempt fails or
    /// there is no target.
    async fn run_with_fallback(
        &self,
        target: Option<String>,
        fallback: Option<&str>,
        request: &BackendRequest,
        on_partial: Option<&PartialTextCallback<'_>>,
    ) -> Result<BackendResponse> {
        let primary_error = match target.as_deref() {
            Some(name) => match self.attempt(name, request, on_partial).await {
                Ok(response) => return Ok(response),
                Err(err) => Some(err),
            },
            None => None,
        };

        let usable_fallback = match fallback {
            Some(name) if target.as_deref() != Some(name) => {
                self.registry.is_registered(name).await.then_some(name)
            }
            _ => None,
        };

        match (usable_fallback, primary_error) {
            (Some(name), err) => {
                match &err {
                    Some(err) => warn!(backend = %name, error = %err, "Primary backend failed, using fallback"),
                    None => warn!(backend = %name, "No target backend, using fallback"),
                }
                self.attempt(name, request, on_partial).await
            }
            (None, Some(err)) => Err(err),
            (None, None) => Err(DispatchError::RoutingFailed(
                "no active backend and no fallback configured".to_string(),
            )),
        }
    }

    /// Trims `request` to the budget of `name` and sends it.
    async fn attempt(
        &self,
        name: &str,
        request: &BackendRequest,
        on_partial: Option<&PartialTextCallback<'_>>,
    ) -> Result<BackendResponse> {
        let entry = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| DispatchError::UnknownBackend(name.to_string()))?;

        let budget = entry.effective_budget();
        let size = self.trimmer.measure_messages(&request.messages);
        let outgoing = if size > budget {
            debug!(backend = %name, size, budget, strategy = %self.strategy, "Trimming request");
            Cow::Owned(BackendRequest {
                messages: self.trimmer.trim_messages(&request.messages, budget, self.strategy),
                ..request.clone()
            })
        } else {
            Cow::Borrowed(request)
        };

        debug!(backend = %name, streaming = on_partial.is_some(), "Dispatching request");

        let response = match on_partial {
            Some(on_partial) => entry.backend.send_streaming(&outgoing, on_partial).await?,
            None => entry.backend.send(&outgoing).await?,
        };
        Ok(response)
    }
}
