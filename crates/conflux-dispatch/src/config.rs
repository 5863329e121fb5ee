//! Dispatch configuration.
//!
//! A TOML document declaring the backends a manager should register, their
//! budgets, the active and fallback backends, and how oversized content is
//! trimmed:
//!
//! ```toml
//! active = "primary"
//! fallback = "secondary"
//! trim_strategy = "middle"
//!
//! [[backends]]
//! name = "primary"
//! max_content_size = 8192
//!
//! [[backends]]
//! name = "secondary"
//! buffer_fraction = 0.1
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use conflux_abstraction::{Backend, DEFAULT_CHARS_PER_TOKEN};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DispatchError;
use crate::manager::DispatchManager;
use crate::registry::DEFAULT_BUFFER_FRACTION;
use crate::routing::FitToBudgetRouter;
use crate::trim::{DEFAULT_OMISSION_MARKER, TrimStrategy, Trimmer};

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid TOML for this schema.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A declared backend has no adapter to bind to.
    #[error("No adapter supplied for backend '{0}'")]
    MissingAdapter(String),

    /// Registration or activation failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Dispatch configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Backend selected for plain dispatches.
    #[serde(default)]
    pub active: Option<String>,

    /// Backend tried when the target of a dispatch fails.
    #[serde(default)]
    pub fallback: Option<String>,

    /// Trim strategy for oversized content.
    #[serde(default)]
    pub trim_strategy: TrimStrategy,

    /// Characters per approximate token.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    /// Marker inserted by the middle strategy; empty disables it.
    #[serde(default = "default_omission_marker")]
    pub omission_marker: String,

    /// Buffer fraction for backends that do not set their own.
    #[serde(default = "default_buffer_fraction")]
    pub default_buffer_fraction: f64,

    /// Declared backends.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// One declared backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Registered name; also the key used to look up its adapter.
    pub name: String,

    /// Budget override; the adapter's own limit when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_content_size: Option<usize>,

    /// Headroom override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_fraction: Option<f64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            active: None,
            fallback: None,
            trim_strategy: TrimStrategy::default(),
            chars_per_token: default_chars_per_token(),
            omission_marker: default_omission_marker(),
            default_buffer_fraction: default_buffer_fraction(),
            backends: Vec::new(),
        }
    }
}

fn default_chars_per_token() -> usize {
    DEFAULT_CHARS_PER_TOKEN
}

fn default_omission_marker() -> String {
    DEFAULT_OMISSION_MARKER.to_string()
}

fn default_buffer_fraction() -> f64 {
    DEFAULT_BUFFER_FRACTION
}

fn check_fraction(what: &str, fraction: f64) -> Result<(), ConfigError> {
    if fraction.is_finite() && (0.0..1.0).contains(&fraction) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{} must be in [0, 1), got {}", what, fraction)))
    }
}

impl DispatchConfig {
    /// Loads dispatch configuration.
    ///
    /// Searches in order:
    /// 1. `./conflux.toml` (workspace config)
    /// 2. `~/.conflux/config.toml` (home directory config)
    ///
    /// Falls back to defaults if no file is found.
    ///
    /// # Errors
    /// Returns `ConfigError` if a file exists but parsing or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let workspace_config = Path::new("./conflux.toml");
        if workspace_config.exists() {
            return Self::load_from_file(workspace_config);
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_config = PathBuf::from(home).join(".conflux/config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        debug!("No dispatch config found, using defaults");
        Ok(Self::default())
    }

    /// Loads configuration from a specific file.
    ///
    /// # Arguments
    /// * `path` - Path to TOML configuration file
    ///
    /// # Errors
    /// Returns `ConfigError` if file cannot be read, parsed, or validated.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading dispatch config");

        let contents = fs::read_to_string(path)?;
        let config: DispatchConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - `chars_per_token` is positive
    /// - Buffer fractions are in `[0, 1)`
    /// - Backend names are non-empty and unique
    /// - `active` and `fallback` name declared backends
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if any check fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chars_per_token == 0 {
            return Err(ConfigError::Validation("chars_per_token must be positive".to_string()));
        }

        check_fraction("default_buffer_fraction", self.default_buffer_fraction)?;

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.name.trim().is_empty() {
                return Err(ConfigError::Validation("backend name cannot be empty".to_string()));
            }
            if !seen.insert(backend.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "backend '{}' is declared more than once",
                    backend.name
                )));
            }
            if let Some(fraction) = backend.buffer_fraction {
                check_fraction(&format!("buffer_fraction of backend '{}'", backend.name), fraction)?;
            }
            if backend.max_content_size == Some(0) {
                return Err(ConfigError::Validation(format!(
                    "max_content_size of backend '{}' must be positive",
                    backend.name
                )));
            }
        }

        for (field, name) in [("active", &self.active), ("fallback", &self.fallback)] {
            if let Some(name) = name {
                if !seen.contains(name.as_str()) {
                    return Err(ConfigError::Validation(format!(
                        "{} backend '{}' is not declared",
                        field, name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Buffer fraction that applies to `backend`.
    pub fn buffer_fraction_for(&self, backend: &BackendConfig) -> f64 {
        backend.buffer_fraction.unwrap_or(self.default_buffer_fraction)
    }

    /// Builds the trimmer described by this configuration.
    pub fn trimmer(&self) -> Trimmer {
        let marker = Some(self.omission_marker.clone()).filter(|m| !m.is_empty());
        Trimmer::new(self.chars_per_token).with_omission_marker(marker)
    }

    /// Builds a fit-to-budget router that measures like [`Self::trimmer`].
    pub fn router(&self) -> FitToBudgetRouter {
        FitToBudgetRouter::with_trimmer(self.trimmer())
    }
}

impl DispatchManager {
    /// Builds a manager from configuration, binding adapters by backend name.
    ///
    /// # Arguments
    /// * `config` - Validated dispatch configuration
    /// * `adapters` - Adapter handles keyed by backend name
    ///
    /// # Errors
    /// Returns `MissingAdapter` when a declared backend has no adapter, and
    /// validation or registration errors otherwise.
    pub async fn from_config(
        config: &DispatchConfig,
        mut adapters: HashMap<String, Arc<dyn Backend>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut manager =
            DispatchManager::new().with_trimmer(config.trimmer()).with_trim_strategy(config.trim_strategy);
        if let Some(fallback) = &config.fallback {
            manager = manager.with_default_fallback(fallback.clone());
        }

        for backend in &config.backends {
            let adapter = adapters
                .remove(&backend.name)
                .ok_or_else(|| ConfigError::MissingAdapter(backend.name.clone()))?;
            manager
                .register(
                    backend.name.clone(),
                    adapter,
                    backend.max_content_size,
                    config.buffer_fraction_for(backend),
                )
                .await?;
        }

        if let Some(active) = &config.active {
            manager.set_active(active).await?;
        }

        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.trim_strategy, TrimStrategy::End);
        assert_eq!(config.chars_per_token, 4);
        assert_eq!(config.omission_marker, "\n[...]\n");
        assert!((config.default_buffer_fraction - 0.05).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_document() {
        let config: DispatchConfig = toml::from_str(
            r#"
active = "primary"
fallback = "secondary"
trim_strategy = "middle"
chars_per_token = 3

[[backends]]
name = "primary"
max_content_size = 8192

[[backends]]
name = "secondary"
buffer_fraction = 0.1
"#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.trim_strategy, TrimStrategy::Middle);
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].max_content_size, Some(8192));
        assert!((config.buffer_fraction_for(&config.backends[0]) - 0.05).abs() < f64::EPSILON);
        assert!((config.buffer_fraction_for(&config.backends[1]) - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_router_measures_like_trimmer() {
        use crate::registry::BackendProfile;
        use crate::routing::RoutingStrategy;
        use conflux_abstraction::{BackendRequest, ChatMessage};

        let config = DispatchConfig { chars_per_token: 3, ..DispatchConfig::default() };
        let request = BackendRequest::new(vec![ChatMessage::user("x".repeat(10))]);
        let backends = vec![
            BackendProfile { name: "small".to_string(), max_content_size: 3, effective_budget: 3 },
            BackendProfile { name: "large".to_string(), max_content_size: 100, effective_budget: 100 },
        ];

        let router = config.router();

        assert_eq!(router.chars_per_token(), 3);
        assert_eq!(config.trimmer().measure_messages(&request.messages), 4);
        assert_eq!(router.route(&request, &backends), Some("large".to_string()));
        assert_eq!(FitToBudgetRouter::default().route(&request, &backends), Some("small".to_string()));
    }

    #[test]
    fn test_rejects_undeclared_active() {
        let config = DispatchConfig { active: Some("ghost".to_string()), ..DispatchConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_rejects_duplicate_backends() {
        let backend = BackendConfig { name: "a".to_string(), max_content_size: None, buffer_fraction: None };
        let config = DispatchConfig { backends: vec![backend.clone(), backend], ..DispatchConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_rejects_bad_fraction() {
        let config = DispatchConfig {
            backends: vec![BackendConfig {
                name: "a".to_string(),
                max_content_size: None,
                buffer_fraction: Some(1.0),
            }],
            ..DispatchConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_rejects_zero_chars_per_token() {
        let config = DispatchConfig { chars_per_token: 0, ..DispatchConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_marker_disables_omission() {
        let config = DispatchConfig { omission_marker: String::new(), ..DispatchConfig::default() };
        assert_eq!(config.trimmer(), Trimmer::new(4).with_omission_marker(None));
    }
}
