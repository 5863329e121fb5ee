//! Multi-backend dispatch for Conflux.
//!
//! This crate provides:
//! - A registry of interchangeable backends, each with a content budget
//! - Content trimming to fit a budget (`start`, `middle`, `end`)
//! - Routing strategies and ordered fallback chains
//! - The dispatch manager that composes them for each outgoing request
//! - TOML configuration for the whole setup

pub mod config;
pub mod error;
pub mod manager;
pub mod registry;
pub mod routing;
pub mod trim;

pub use config::{BackendConfig, ConfigError, DispatchConfig};
pub use error::{DispatchError, FailureRecord, Result};
pub use manager::DispatchManager;
pub use registry::{BackendProfile, BackendRegistry, DEFAULT_BUFFER_FRACTION, RegistryEntry};
pub use routing::{FallbackChain, FitToBudgetRouter, KeywordRouter, RoutingStrategy};
pub use trim::{DEFAULT_OMISSION_MARKER, TrimStrategy, Trimmer};
