//! Backend registry for the dispatch manager.
//!
//! Maps backend names to adapters, each carrying the content budget the
//! backend accepts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use conflux_abstraction::Backend;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{DispatchError, Result};

/// Default headroom kept free on every backend.
pub const DEFAULT_BUFFER_FRACTION: f64 = 0.05;

/// A registered backend with its budget.
#[derive(Clone)]
pub struct RegistryEntry {
    /// Name the backend is registered under.
    pub name: String,
    /// Adapter handle.
    pub backend: Arc<dyn Backend>,
    /// Largest content size the backend accepts.
    pub max_content_size: usize,
    /// Share of `max_content_size` kept free for backend-side overhead.
    pub buffer_fraction: f64,
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.name)
            .field("backend_id", &self.backend.backend_id())
            .field("max_content_size", &self.max_content_size)
            .field("buffer_fraction", &self.buffer_fraction)
            .finish()
    }
}

impl RegistryEntry {
    /// Effective budget: `max_content_size × (1 − buffer_fraction)`, rounded down.
    pub fn effective_budget(&self) -> usize {
        effective_budget(self.max_content_size, self.buffer_fraction)
    }

    /// Snapshot of the entry for routing decisions.
    pub fn profile(&self) -> BackendProfile {
        BackendProfile {
            name: self.name.clone(),
            max_content_size: self.max_content_size,
            effective_budget: self.effective_budget(),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn effective_budget(max_content_size: usize, buffer_fraction: f64) -> usize {
    (max_content_size as f64 * (1.0 - buffer_fraction)).floor() as usize
}

/// Read-only view of a registered backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendProfile {
    /// Registered name.
    pub name: String,
    /// Declared maximum content size.
    pub max_content_size: usize,
    /// Budget after the buffer fraction is applied.
    pub effective_budget: usize,
}

/// Registry of dispatch backends.
pub struct BackendRegistry {
    /// Map of backend name to entry.
    entries: Arc<RwLock<HashMap<String, RegistryEntry>>>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backend_count", &self.entries.try_read().map(|e| e.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl BackendRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Registers a backend under `name`.
    ///
    /// # Arguments
    /// * `name` - Name to register under
    /// * `backend` - Adapter handle
    /// * `max_content_size` - Budget override; the adapter's own limit when `None`
    /// * `buffer_fraction` - Headroom in `[0, 1)`
    ///
    /// # Returns
    /// Returns `true` if the backend was newly registered, `false` if it replaced an existing entry.
    ///
    /// # Errors
    /// Returns `InvalidBufferFraction` for a fraction outside `[0, 1)` and
    /// `InvalidBudget` when the effective budget would be zero.
    pub async fn register(
        &self,
        name: impl Into<String>,
        backend: Arc<dyn Backend>,
        max_content_size: Option<usize>,
        buffer_fraction: f64,
    ) -> Result<bool> {
        let name = name.into();
        if !buffer_fraction.is_finite() || !(0.0..1.0).contains(&buffer_fraction) {
            return Err(DispatchError::InvalidBufferFraction {
                backend: name,
                fraction: buffer_fraction,
            });
        }

        let max_content_size = max_content_size.unwrap_or_else(|| backend.max_content_size());
        if effective_budget(max_content_size, buffer_fraction) == 0 {
            return Err(DispatchError::InvalidBudget(name));
        }

        debug!(backend = %name, max_content_size, buffer_fraction, "Registering backend");

        let entry = RegistryEntry { name: name.clone(), backend, max_content_size, buffer_fraction };
        let mut entries = self.entries.write().await;
        let was_new = entries.insert(name.clone(), entry).is_none();

        if !was_new {
            warn!(backend = %name, "Backend replaced in registry");
        }

        Ok(was_new)
    }

    /// Unregisters a backend.
    ///
    /// # Returns
    /// Returns `true` if the backend was found and removed, `false` otherwise.
    pub async fn unregister(&self, name: &str) -> bool {
        debug!(backend = %name, "Unregistering backend");

        let mut entries = self.entries.write().await;
        let removed = entries.remove(name).is_some();

        if !removed {
            warn!(backend = %name, "Attempted to unregister non-existent backend");
        }

        removed
    }

    /// Retrieves a copy of the entry registered under `name`.
    pub async fn get(&self, name: &str) -> Option<RegistryEntry> {
        let entries = self.entries.read().await;
        entries.get(name).cloned()
    }

    /// Checks if a backend is registered.
    pub async fn is_registered(&self, name: &str) -> bool {
        let entries = self.entries.read().await;
        entries.contains_key(name)
    }

    /// Returns the registered names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns a profile of every registered backend, sorted by name.
    pub async fn profiles(&self) -> Vec<BackendProfile> {
        let entries = self.entries.read().await;
        let mut profiles: Vec<BackendProfile> = entries.values().map(RegistryEntry::profile).collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        profiles
    }

    /// Returns the number of registered backends.
    pub async fn count(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
