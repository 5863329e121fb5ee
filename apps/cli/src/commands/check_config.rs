//! Check-config command implementation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use conflux_abstraction::Backend;
use conflux_dispatch::{DispatchConfig, DispatchManager};

use crate::echo::EchoBackend;

/// Execute the check-config command.
///
/// Loads and validates the configuration, registers every declared backend
/// against an echo adapter and prints the resulting effective budgets.
pub async fn execute(path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match &path {
        Some(path) => DispatchConfig::load_from_file(path)?,
        None => DispatchConfig::load()?,
    };

    let adapters: HashMap<String, Arc<dyn Backend>> = config
        .backends
        .iter()
        .map(|b| (b.name.clone(), Arc::new(EchoBackend::new(b.name.clone())) as Arc<dyn Backend>))
        .collect();
    let manager = DispatchManager::from_config(&config, adapters).await?;

    println!("{}", "Dispatch configuration".bold().cyan());
    println!();
    println!("  Active:        {}", config.active.as_deref().unwrap_or("(none)"));
    println!("  Fallback:      {}", config.fallback.as_deref().unwrap_or("(none)"));
    println!("  Trim strategy: {}", config.trim_strategy);
    println!("  Chars/token:   {}", config.chars_per_token);
    println!();

    let profiles = manager.registry().profiles().await;
    if profiles.is_empty() {
        println!("{}", "No backends declared".yellow());
        return Ok(());
    }

    println!("  {:<20} {:>12} {:>8} {:>12}", "BACKEND", "MAX SIZE", "BUFFER", "BUDGET");
    for profile in &profiles {
        let fraction = config
            .backends
            .iter()
            .find(|b| b.name == profile.name)
            .map_or(config.default_buffer_fraction, |b| config.buffer_fraction_for(b));
        println!(
            "  {:<20} {:>12} {:>7.1}% {:>12}",
            profile.name,
            profile.max_content_size,
            fraction * 100.0,
            profile.effective_budget
        );
    }

    println!();
    println!("{}", format!("✓ {} backend(s) valid", profiles.len()).green().bold());
    Ok(())
}
