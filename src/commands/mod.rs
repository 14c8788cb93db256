//! # CLI Command Implementations
//!
//! This module contains the implementation for each subcommand of the
//! `recipe-sources` command-line tool. Each subcommand is defined in its own
//! file.
//!
//! ## Structure
//!
//! Each command module contains:
//! - An `Args` struct that defines the command-specific arguments and options,
//!   derived using `clap`. Commands working on a recipe flatten
//!   [`RecipeArgs`] into it.
//! - An `execute` function that takes the parsed `Args` and performs the
//!   command's logic by calling into the `recipe_sources` library.

pub mod completions;
pub mod extract;
pub mod freeze;
pub mod retrieve;
pub mod revert;
pub mod sources;

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use recipe_sources::config::RecipeConfig;
use recipe_sources::retrieve::{select_part, Recipe};
use recipe_sources::vcs::Registry;

/// Default recipe file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILENAME: &str = "recipe.cfg";

/// Options shared by every command reading a recipe.
#[derive(Args, Debug, Clone)]
pub struct RecipeArgs {
    /// Path to the recipe configuration file.
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = DEFAULT_CONFIG_FILENAME,
        env = "RECIPE_SOURCES_CONFIG"
    )]
    pub config: PathBuf,

    /// Part to work on; required when several parts declare a version.
    #[arg(short, long, value_name = "NAME")]
    pub part: Option<String>,

    /// Never access the network.
    #[arg(long)]
    pub offline: bool,
}

impl RecipeArgs {
    /// Reads the configuration and builds the recipe of the selected part.
    pub fn load(&self) -> Result<(RecipeConfig, Recipe)> {
        if !self.config.exists() {
            return Err(recipe_sources::error::Error::config_with_hint(
                format!("Configuration file not found: {}", self.config.display()),
                "pass --config FILE or run from the recipe directory",
            )
            .into());
        }
        let config = RecipeConfig::from_file(&self.config)?;
        let part = select_part(&config, self.part.as_deref())?;
        let mut recipe = Recipe::load(&config, &part, Registry::with_defaults())?;
        recipe.set_offline(self.offline);
        Ok((config, recipe))
    }
}
