//! # Recipe Sources Library
//!
//! This library fetches and reconciles the code a deployment recipe is made
//! of: one main software tree (local, a release archive, or a
//! version-controlled checkout) and an ordered list of addon directories,
//! each coming from local disk or from one of several version-control
//! systems. It is used by the `recipe-sources` command-line tool.
//!
//! ## Quick Example
//!
//! ```
//! use recipe_sources::config::RecipeConfig;
//! use recipe_sources::retrieve::Recipe;
//! use recipe_sources::sources::Location;
//! use recipe_sources::vcs::Registry;
//!
//! let config = RecipeConfig::parse(
//!     "[odoo]\n\
//!      version = git https://github.com/odoo/odoo.git odoo 16.0\n\
//!      addons =\n    git https://github.com/OCA/web.git oca-web 16.0 group=oca\n\
//!      revisions = oca-web 0123abc\n",
//! )
//! .unwrap();
//! let recipe = Recipe::load(&config, "odoo", Registry::with_defaults()).unwrap();
//!
//! let web = recipe.sources().get(&Location::Addon("oca-web".into())).unwrap();
//! assert_eq!(web.kind.revision(), Some("0123abc"));
//! assert_eq!(recipe.sources().addons().count(), 1);
//! ```
//!
//! ## Core Concepts
//!
//! - **Configuration (`config`)**: INI-style recipe files with multi-line
//!   values and `extends` layering.
//! - **Sources (`sources`)**: the ordered map from [`sources::Location`]
//!   to declared source, revision overrides and merges.
//! - **Backends (`vcs`)**: one implementation of the
//!   [`vcs::Repository`] contract per version-control system, looked up by
//!   name in a [`vcs::Registry`].
//! - **Retrieval (`retrieve`)**: the driver fetching main software, addons
//!   and merges, and computing the addons path.
//! - **Freeze and extract (`freeze`)**: pinning what is on disk, and
//!   snapshotting it for offline deployments.
//!
//! Python dependencies are handled by an external installer behind the
//! [`installer::PackageInstaller`] trait.

pub mod config;
pub mod download;
pub mod error;
pub mod exit_codes;
pub mod freeze;
pub mod installer;
pub mod output;
pub mod retrieve;
pub mod sources;
pub mod vcs;
pub mod workdir;
