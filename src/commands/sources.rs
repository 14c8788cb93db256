//! # Sources Command Implementation
//!
//! Shows how a part's declarations were understood: every source in
//! declaration order, after revision overrides, and the merges to apply.
//! Nothing is fetched.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use recipe_sources::retrieve::Recipe;
use recipe_sources::sources::{Location, Source, SourceKind};

use super::RecipeArgs;

/// List the declared sources of a part
#[derive(Args, Debug)]
pub struct SourcesArgs {
    #[command(flatten)]
    pub recipe: RecipeArgs,

    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

fn location_label(location: &Location) -> String {
    match location {
        Location::MainSoftware => "main".to_string(),
        Location::Addon(path) => path.clone(),
    }
}

fn describe(source: &Source) -> String {
    let mut text = match &source.kind {
        SourceKind::Local => format!("local {}", source.target.as_deref().unwrap_or_default()),
        SourceKind::Downloadable { url } => format!("url {}", url),
        SourceKind::Vcs {
            backend,
            url,
            revision,
        } => format!(
            "{} {} {} {}",
            backend,
            url,
            source.target.as_deref().unwrap_or_default(),
            revision
        ),
    };
    for (key, value) in &source.options {
        text.push_str(&format!(" {}={}", key, value));
    }
    text
}

fn to_json(recipe: &Recipe) -> Result<serde_json::Value> {
    let sources = recipe
        .sources()
        .iter()
        .map(|(location, source)| -> Result<serde_json::Value> {
            let mut value = serde_json::to_value(source)?;
            if let Some(object) = value.as_object_mut() {
                object.insert("location".to_string(), json!(location_label(location)));
            }
            Ok(value)
        })
        .collect::<Result<Vec<_>>>()?;
    let merges = recipe
        .sources()
        .merges()
        .map(|(location, merge)| -> Result<serde_json::Value> {
            let mut value = serde_json::to_value(merge)?;
            if let Some(object) = value.as_object_mut() {
                object.insert("target".to_string(), json!(location_label(location)));
            }
            Ok(value)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(json!({
        "part": recipe.part(),
        "sources": sources,
        "merges": merges,
    }))
}

/// Execute the `sources` command.
pub fn execute(args: SourcesArgs) -> Result<()> {
    let (_config, recipe) = args.recipe.load()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&to_json(&recipe)?)?);
        return Ok(());
    }

    println!("[{}]", recipe.part());
    for (location, source) in recipe.sources().iter() {
        println!("{:<20} {}", location_label(location), describe(source));
    }
    for (location, merge) in recipe.sources().merges() {
        println!(
            "{:<20} merge {} {} {}",
            location_label(location),
            merge.backend,
            merge.url,
            merge.revision
        );
    }
    Ok(())
}
