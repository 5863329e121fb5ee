//! Command implementations for the Conflux CLI.

pub mod check_config;
pub mod demo;
pub mod trim;
