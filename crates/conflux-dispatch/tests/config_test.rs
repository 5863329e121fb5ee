//! Integration tests for loading dispatch configuration and building a manager from it.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use conflux_abstraction::{Backend, BackendError, BackendRequest, BackendResponse, ChatMessage};
use conflux_dispatch::{ConfigError, DispatchConfig, DispatchManager, TrimStrategy};
use tempfile::TempDir;

struct NamedBackend {
    name: String,
    fail: bool,
}

#[async_trait]
impl Backend for NamedBackend {
    fn backend_id(&self) -> &str {
        &self.name
    }

    fn max_content_size(&self) -> usize {
        4096
    }

    async fn send(&self, _request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        if self.fail {
            return Err(BackendError::Unavailable(self.name.clone()));
        }
        Ok(BackendResponse::text(format!("from {}", self.name)))
    }
}

fn adapter(name: &str, fail: bool) -> (String, Arc<dyn Backend>) {
    (name.to_string(), Arc::new(NamedBackend { name: name.to_string(), fail }))
}

const CONFIG: &str = r#"
active = "primary"
fallback = "secondary"
trim_strategy = "start"

[[backends]]
name = "primary"
max_content_size = 1000

[[backends]]
name = "secondary"
buffer_fraction = 0.2
"#;

fn write_config(contents: &str) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("conflux.toml");
    fs::write(&path, contents).unwrap();
    (dir, path)
}

#[tokio::test]
async fn test_load_from_file_and_build_manager() {
    let (_dir, path) = write_config(CONFIG);
    let config = DispatchConfig::load_from_file(&path).unwrap();
    let adapters: HashMap<_, _> = [adapter("primary", true), adapter("secondary", false)].into_iter().collect();

    let manager = DispatchManager::from_config(&config, adapters).await.unwrap();

    assert_eq!(manager.active().await.as_deref(), Some("primary"));
    assert_eq!(manager.trim_strategy(), TrimStrategy::Start);
    assert_eq!(manager.default_fallback(), Some("secondary"));

    let profiles = manager.registry().profiles().await;
    assert_eq!(profiles[0].name, "primary");
    assert_eq!(profiles[0].effective_budget, 950);
    assert_eq!(profiles[1].max_content_size, 4096);
    assert_eq!(profiles[1].effective_budget, 3276);

    // Primary fails, configured fallback answers.
    let response = manager.dispatch(&BackendRequest::new(vec![ChatMessage::user("hi")])).await.unwrap();
    assert_eq!(response.content, "from secondary");
}

#[tokio::test]
async fn test_missing_adapter_is_reported() {
    let (_dir, path) = write_config(CONFIG);
    let config = DispatchConfig::load_from_file(&path).unwrap();
    let adapters: HashMap<_, _> = [adapter("primary", false)].into_iter().collect();

    let err = DispatchManager::from_config(&config, adapters).await.unwrap_err();

    assert!(matches!(err, ConfigError::MissingAdapter(name) if name == "secondary"));
}

#[test]
fn test_invalid_toml_is_a_parse_error() {
    let (_dir, path) = write_config("active = [");
    assert!(matches!(DispatchConfig::load_from_file(&path), Err(ConfigError::Toml(_))));
}

#[test]
fn test_unknown_strategy_is_a_parse_error() {
    let (_dir, path) = write_config("trim_strategy = \"sideways\"");
    assert!(matches!(DispatchConfig::load_from_file(&path), Err(ConfigError::Toml(_))));
}

#[test]
fn test_validation_runs_on_load() {
    let (_dir, path) = write_config("fallback = \"ghost\"");
    assert!(matches!(DispatchConfig::load_from_file(&path), Err(ConfigError::Validation(_))));
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let result = DispatchConfig::load_from_file(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}
