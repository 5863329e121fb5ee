//! Trim command implementation.

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use conflux_dispatch::{TrimStrategy, Trimmer};
use tracing::info;

/// Execute the trim command.
///
/// Reads `file` (stdin when `None`), trims it to `budget` and prints it.
pub fn execute(
    budget: usize,
    strategy: TrimStrategy,
    chars_per_token: usize,
    file: Option<PathBuf>,
) -> anyhow::Result<()> {
    if chars_per_token == 0 {
        anyhow::bail!("--chars-per-token must be positive");
    }

    let text = match &file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer).context("failed to read stdin")?;
            buffer
        }
    };

    let trimmer = Trimmer::new(chars_per_token);
    let trimmed = trimmer.trim_text(&text, budget, strategy);
    info!(
        strategy = %strategy,
        budget,
        before = trimmer.measure(&text),
        after = trimmer.measure(&trimmed),
        "Trimmed content"
    );

    println!("{}", trimmed);
    Ok(())
}
