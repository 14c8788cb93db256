//! Extract command implementation
//!
//! Copies every fetched source into one directory and writes a
//! `release.cfg` there declaring them all as local, for offline
//! deployments. Local sources stay where they are.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use recipe_sources::freeze::extract_downloads_to;
use recipe_sources::output::{emoji, OutputConfig};

use super::RecipeArgs;

/// Snapshot all sources into a self-contained directory
#[derive(Args, Debug)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub recipe: RecipeArgs,

    /// Directory to extract into.
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,
}

/// Execute the `extract` command.
pub fn execute(args: ExtractArgs, output: &OutputConfig) -> Result<()> {
    let (config, recipe) = args.recipe.load()?;
    let release = extract_downloads_to(&recipe, &config, &args.output)?;
    println!(
        "{} Extracted to {} (configuration: {})",
        emoji(output, "📦", "[EXTRACTED]"),
        args.output.display(),
        release.display()
    );
    Ok(())
}
