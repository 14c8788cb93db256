//! # Freeze Command Implementation
//!
//! Writes a configuration extending the recipe that pins the current
//! revision of every version-controlled source and, unless `--no-versions`
//! is given, the installed version of every package not developed from a
//! local checkout.
//!
//! Local modifications or pending merges in any source abort the command
//! with exit status 17 and nothing is written.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use recipe_sources::freeze::freeze_to;
use recipe_sources::installer::{PackageInstaller, PipInstaller};
use recipe_sources::output::{emoji, OutputConfig};

use super::RecipeArgs;

/// Pin current revisions and versions
#[derive(Args, Debug)]
pub struct FreezeArgs {
    #[command(flatten)]
    pub recipe: RecipeArgs,

    /// File to write the frozen configuration to.
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Do not query the installed packages.
    #[arg(long)]
    pub no_versions: bool,
}

/// Execute the `freeze` command.
pub fn execute(args: FreezeArgs, output: &OutputConfig) -> Result<()> {
    let (config, recipe) = args.recipe.load()?;

    let working_set = if args.no_versions {
        None
    } else {
        let installer = PipInstaller::new(&recipe.settings().python, &recipe.settings().base_dir);
        Some(installer.working_set()?)
    };

    freeze_to(&recipe, &config, &args.output, working_set.as_ref())?;
    println!(
        "{} Frozen configuration written to {}",
        emoji(output, "📌", "[FROZEN]"),
        args.output.display()
    );
    Ok(())
}
