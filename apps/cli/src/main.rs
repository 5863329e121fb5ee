//! Conflux CLI - command-line front end for the Conflux engine
//!
//! This CLI provides a `conflux` command for trimming content to a budget,
//! checking dispatch configuration and running a demonstration workflow.

mod commands;
mod echo;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use conflux_dispatch::TrimStrategy;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{check_config, demo, trim};

/// Conflux CLI - workflow execution and budgeted dispatch
#[derive(Parser, Debug)]
#[command(
    name = "conflux",
    author,
    version,
    about = "Conflux - workflow execution and budgeted backend dispatch"
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trim content to fit a token budget
    ///
    /// Reads FILE (or stdin when omitted) and prints the trimmed text.
    Trim {
        /// Budget in approximate tokens
        #[arg(short, long)]
        budget: usize,

        /// Which part to keep (start keeps the tail, end keeps the head)
        #[arg(short, long, default_value = "end")]
        strategy: TrimStrategy,

        /// Characters per approximate token
        #[arg(long, default_value_t = conflux_abstraction::DEFAULT_CHARS_PER_TOKEN)]
        chars_per_token: usize,

        /// Input file
        file: Option<PathBuf>,
    },

    /// Validate a dispatch configuration and show effective budgets
    ///
    /// Without PATH, searches ./conflux.toml then ~/.conflux/config.toml.
    CheckConfig {
        /// Configuration file
        path: Option<PathBuf>,
    },

    /// Run the built-in demonstration workflow
    ///
    /// Prints the workflow report as JSON.
    Demo {
        /// Make the primary backend fail so the fallback answers
        #[arg(long)]
        fail_primary: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    match command {
        Command::Trim { budget, strategy, chars_per_token, file } => {
            trim::execute(budget, strategy, chars_per_token, file)?;
        }
        Command::CheckConfig { path } => {
            check_config::execute(path).await?;
        }
        Command::Demo { fail_primary } => {
            demo::execute(fail_primary).await?;
        }
    }

    Ok(())
}
