//! # Retrieve Command Implementation
//!
//! Fetches or updates the main software, then every addon in declaration
//! order, then applies the declared merges. The resulting addons path is
//! printed one entry per line, in the order the application searches it.
//!
//! With `--install`, the part's requirements are installed afterwards with
//! `pip`, honouring the `[versions]` pins.

use anyhow::Result;
use clap::Args;

use recipe_sources::installer::PipInstaller;
use recipe_sources::output::{emoji, OutputConfig};

use super::RecipeArgs;

/// Fetch or update every source of a part
#[derive(Args, Debug)]
pub struct RetrieveArgs {
    #[command(flatten)]
    pub recipe: RecipeArgs,

    /// Install the part's Python requirements after retrieval.
    #[arg(long)]
    pub install: bool,

    /// Only print the addons path.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Execute the `retrieve` command.
pub fn execute(args: RetrieveArgs, output: &OutputConfig) -> Result<()> {
    let (_config, recipe) = args.recipe.load()?;

    let main_dir = recipe.retrieve_main_software()?;
    let addons_path = recipe.retrieve_addons()?;
    recipe.retrieve_merges()?;

    if !args.quiet {
        println!(
            "{} Main software: {}",
            emoji(output, "📦", "[MAIN]"),
            main_dir.display()
        );
        println!("{} Addons path:", emoji(output, "🧩", "[ADDONS]"));
    }
    for entry in &addons_path {
        println!("{}", entry.display());
    }

    if args.install {
        let installer = PipInstaller::new(&recipe.settings().python, &recipe.settings().base_dir);
        let working_set = recipe.install_requirements(&installer)?;
        if !args.quiet {
            println!(
                "{} {} distributions installed",
                emoji(output, "✅", "[OK]"),
                working_set.len()
            );
        }
    }
    Ok(())
}
