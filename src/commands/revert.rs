//! Revert command implementation
//!
//! Discards local changes and pending merges in every version-controlled
//! source. Backends that cannot revert are reported and skipped.

use anyhow::Result;
use clap::Args;

use recipe_sources::output::{emoji, OutputConfig};

use super::RecipeArgs;

/// Revert version-controlled sources to their declared revisions
#[derive(Args, Debug)]
pub struct RevertArgs {
    #[command(flatten)]
    pub recipe: RecipeArgs,
}

/// Execute the `revert` command.
pub fn execute(args: RevertArgs, output: &OutputConfig) -> Result<()> {
    let (_config, recipe) = args.recipe.load()?;
    recipe.revert_sources()?;
    println!("{} Sources reverted", emoji(output, "✅", "[OK]"));
    Ok(())
}
