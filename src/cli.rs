//! CLI argument parsing and command dispatch

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use recipe_sources::output::OutputConfig;
use recipe_sources::workdir::WorkingDirectoryKeeper;

use crate::commands;

/// Recipe sources - fetch, pin and snapshot the code of a deployment recipe
#[derive(Parser, Debug)]
#[command(name = "recipe-sources")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Run as if started in DIR
    #[arg(short = 'C', long = "directory", global = true, value_name = "DIR")]
    directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch or update the main software, the addons and the merges
    Retrieve(commands::retrieve::RetrieveArgs),

    /// Revert every version-controlled source to its declared revision
    Revert(commands::revert::RevertArgs),

    /// Pin the current revisions and package versions into a new configuration
    Freeze(commands::freeze::FreezeArgs),

    /// Copy all fetched sources into a self-contained directory
    Extract(commands::extract::ExtractArgs),

    /// Show the declared sources of a part
    Sources(commands::sources::SourcesArgs),

    /// Generate shell completion scripts
    Completions(commands::completions::CompletionsArgs),
}

/// `RUST_LOG` wins over `--log-level`.
fn init_logging(level: &str) {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    let _ = env_logger::Builder::new()
        .parse_filters(&filters)
        .format_timestamp(None)
        .format_target(false)
        .try_init();
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level);
        let output = OutputConfig::from_env_and_flag(&self.color);

        let _keeper = match &self.directory {
            Some(dir) => Some(WorkingDirectoryKeeper::enter(dir)?),
            None => None,
        };

        match self.command {
            Commands::Retrieve(args) => commands::retrieve::execute(args, &output),
            Commands::Revert(args) => commands::revert::execute(args, &output),
            Commands::Freeze(args) => commands::freeze::execute(args, &output),
            Commands::Extract(args) => commands::extract::execute(args, &output),
            Commands::Sources(args) => commands::sources::execute(args),
            Commands::Completions(args) => commands::completions::execute(args),
        }
    }
}
