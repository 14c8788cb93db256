//! # Retrieval Driver
//!
//! [`Recipe`] ties one part of a [`RecipeConfig`] to the backend
//! [`Registry`]: it parses the declarations into a [`Sources`] model, then
//! fetches the main software, the addons and the merges, in that order.
//!
//! ## Layout
//!
//! - Relative addon targets and local paths resolve against the base
//!   directory; a version-controlled main software against the parts
//!   directory.
//! - `group=X` fetches `<target>` into `X/<target>` and contributes `X` to
//!   the addons path instead of each target.
//! - `subdir=S` keeps the fetch target but contributes `<target>/S`.
//!
//! The addons path keeps declaration order and drops duplicates.

use std::collections::BTreeMap;
use std::env;
use std::path::{Component, Path, PathBuf};

use log::{debug, info, warn};

use crate::config::{parse_bool, RecipeConfig, RECIPE_SECTION, VERSIONS_SECTION};
use crate::download::{archive_file_name, archive_top_dir, extract_archive, Downloader, HttpCaching};
use crate::error::{Error, Result};
use crate::installer::{PackageInstaller, WorkingSet};
use crate::sources::parse::{
    normalize_target, parse_addon_line, parse_main_line, parse_merge_line, parse_revision_line,
    GROUP_OPTION, SUBDIR_OPTION,
};
use crate::sources::{Location, Source, SourceKind, Sources};
use crate::vcs::clean::clean_object_files;
use crate::vcs::{Registry, VcsOptions};

/// Files marking a directory as a single addon rather than a directory of
/// addons.
pub const MANIFEST_MARKERS: &[&str] = &["__manifest__.py", "__openerp__.py"];

/// Requirements file of the main software, installed unless disabled.
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Recipe-wide and part-level settings that drive retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeSettings {
    pub base_dir: PathBuf,
    pub parts_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub offline: bool,
    pub clear_locks: bool,
    pub clear_retry: bool,
    pub clean: bool,
    /// Revert every VCS source before applying merges.
    pub revert_on_merge: bool,
    pub http_caching: HttpCaching,
    /// `<backend>-<option>` settings, by backend, prefix stripped.
    pub backend_options: BTreeMap<String, BTreeMap<String, String>>,
    pub apply_requirements_file: bool,
    pub requirements: Vec<String>,
    pub pins: BTreeMap<String, String>,
    pub python: String,
}

fn parse_revert_policy(value: &str) -> Result<bool> {
    match value.trim() {
        "" => Ok(false),
        "on-merge" => Ok(true),
        other => Err(Error::config_with_hint(
            format!("Invalid vcs-revert policy '{}'", other),
            "the only supported policy is on-merge",
        )),
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

/// Removes `.` components and resolves `..` lexically.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl RecipeSettings {
    /// Reads the settings of `part`; `backends` are the names whose
    /// prefixed options are collected.
    pub fn from_config(config: &RecipeConfig, part: &str, backends: &[&str]) -> Result<Self> {
        let base_dir = lexical_clean(&absolute(config.base_directory())?);
        let dir_option = |key: &str, default: &str| {
            let value = config
                .get(RECIPE_SECTION, key)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(default);
            lexical_clean(&base_dir.join(crate::config::expand_home(value)))
        };
        let parts_dir = dir_option("parts-directory", "parts");
        let downloads_dir = dir_option("downloads-directory", "downloads");

        let revert_policy = config
            .get(part, "vcs-revert")
            .or_else(|| config.get(RECIPE_SECTION, "vcs-revert"))
            .unwrap_or_default();

        let mut backend_options: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        if let Some(section) = config.section(RECIPE_SECTION) {
            for (key, value) in section {
                let Some((prefix, option)) = key.split_once('-') else {
                    continue;
                };
                if backends.contains(&prefix) && !option.is_empty() {
                    backend_options
                        .entry(prefix.to_string())
                        .or_default()
                        .insert(option.to_string(), value.trim().to_string());
                }
            }
        }

        let pins = config
            .section(VERSIONS_SECTION)
            .map(|s| {
                s.iter()
                    .map(|(k, v)| (k.clone(), v.trim().to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let apply_requirements_file = match config.get(part, "apply-requirements-file") {
            Some(value) if !value.trim().is_empty() => parse_bool(value).ok_or_else(|| {
                Error::config(format!(
                    "Invalid boolean for {}:apply-requirements-file: '{}'",
                    part,
                    value.trim()
                ))
            })?,
            _ => true,
        };

        Ok(Self {
            parts_dir,
            downloads_dir,
            offline: config.get_bool(RECIPE_SECTION, "offline", false)?,
            clear_locks: config.get_bool(RECIPE_SECTION, "vcs-clear-locks", false)?,
            clear_retry: config.get_bool(RECIPE_SECTION, "vcs-clear-retry", false)?,
            clean: config.get_bool(RECIPE_SECTION, "clean", false)?,
            revert_on_merge: parse_revert_policy(revert_policy)?,
            http_caching: config
                .get(RECIPE_SECTION, "main-http-caching")
                .unwrap_or_default()
                .parse()?,
            backend_options,
            apply_requirements_file,
            requirements: config
                .lines(part, "eggs")
                .into_iter()
                .map(str::to_string)
                .collect(),
            pins,
            python: config
                .get(part, "python")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .unwrap_or("python3")
                .to_string(),
            base_dir,
        })
    }

    /// `path` relative to the base directory when below it.
    pub fn relative_to_base(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.base_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Where an addon is fetched and what it adds to the addons path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonLayout {
    pub fetch_dir: PathBuf,
    pub path_entry: PathBuf,
}

/// Picks the part to work on: the named one, or the only one declared.
pub fn select_part(config: &RecipeConfig, requested: Option<&str>) -> Result<String> {
    let parts = config.parts();
    match requested {
        Some(name) if parts.contains(&name) => Ok(name.to_string()),
        Some(name) => Err(Error::config_with_hint(
            format!("No part named '{}' declares a version", name),
            format!("declared parts: {}", parts.join(", ")),
        )),
        None => match parts.as_slice() {
            [single] => Ok(single.to_string()),
            [] => Err(Error::config(
                "No part declares a version; nothing to retrieve",
            )),
            several => Err(Error::config_with_hint(
                "Several parts declare a version",
                format!("choose one of: {}", several.join(", ")),
            )),
        },
    }
}

/// One part of a recipe, ready to be retrieved.
#[derive(Debug, Clone)]
pub struct Recipe {
    part: String,
    settings: RecipeSettings,
    sources: Sources,
    registry: Registry,
}

impl Recipe {
    /// Parses the declarations of `part`.
    pub fn load(config: &RecipeConfig, part: &str, registry: Registry) -> Result<Self> {
        let settings = RecipeSettings::from_config(config, part, &registry.names())?;
        let mut sources = Sources::new();

        let version = config.get(part, "version").map(str::trim).unwrap_or_default();
        let main = parse_main_line(version)?;
        if let SourceKind::Vcs { backend, .. } = &main.kind {
            Self::check_backend(&registry, backend)?;
        }
        sources.insert(Location::MainSoftware, main);

        for line in config.lines(part, "addons") {
            if let Some((location, source)) = parse_addon_line(line)? {
                if let SourceKind::Vcs { backend, .. } = &source.kind {
                    Self::check_backend(&registry, backend)?;
                }
                sources.insert(location, source);
            }
        }

        for line in config.lines(part, "revisions") {
            if let Some((location, revision)) = parse_revision_line(line)? {
                sources.set_revision(&location, &revision)?;
            }
        }

        let mut recipe = Self {
            part: part.to_string(),
            settings,
            sources,
            registry,
        };
        for line in config.lines(part, "merges") {
            if let Some((target, merge)) = parse_merge_line(line)? {
                recipe.add_merge(&target, merge)?;
            }
        }
        Ok(recipe)
    }

    fn check_backend(registry: &Registry, backend: &str) -> Result<()> {
        if registry.is_supported(backend) {
            return Ok(());
        }
        Err(Error::config_with_hint(
            format!("Unsupported version control system: '{}'", backend),
            format!("supported systems are: {}", registry.names().join(", ")),
        ))
    }

    fn add_merge(&mut self, target: &str, merge: crate::sources::MergeSpec) -> Result<()> {
        if !self.registry.supports_merge(&merge.backend) {
            return Err(Error::config(format!(
                "Merges are not supported for '{}': {} {} into {}",
                merge.backend, merge.url, merge.revision, target
            )));
        }
        let main_target = match self.sources.main_software() {
            Some(Source {
                kind: SourceKind::Vcs { .. },
                target: Some(main),
                ..
            }) => {
                let dir = self.settings.parts_dir.join(main);
                Some(normalize_target(
                    &self.settings.relative_to_base(&dir).to_string_lossy(),
                ))
            }
            _ => None,
        };
        let location = if main_target.as_deref() == Some(target) {
            Location::MainSoftware
        } else {
            Location::Addon(target.to_string())
        };
        if let Some(Source {
            kind: SourceKind::Vcs { backend, .. },
            ..
        }) = self.sources.get(&location)
        {
            if backend != &merge.backend {
                return Err(Error::config(format!(
                    "Cannot merge a {} branch into {}, which is a {} source",
                    merge.backend, target, backend
                )));
            }
        }
        self.sources.add_merge(location, merge)
    }

    pub fn part(&self) -> &str {
        &self.part
    }

    pub fn settings(&self) -> &RecipeSettings {
        &self.settings
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Forces offline mode on (the command line wins over the file).
    pub fn set_offline(&mut self, offline: bool) {
        self.settings.offline = self.settings.offline || offline;
    }

    /// Generic options plus `<backend>-` settings, overridden by the
    /// declaration's own options.
    pub fn vcs_options(&self, backend: &str, source: &Source) -> VcsOptions {
        let mut extra = self
            .settings
            .backend_options
            .get(backend)
            .cloned()
            .unwrap_or_default();
        extra.extend(source.backend_options());
        VcsOptions {
            offline: self.settings.offline,
            clear_locks: self.settings.clear_locks,
            clear_retry: self.settings.clear_retry,
            clean: self.settings.clean,
            merge: false,
            extra,
        }
    }

    pub fn addon_layout(&self, target: &str, source: &Source) -> AddonLayout {
        let base = &self.settings.base_dir;
        if let Some(group) = source.option(GROUP_OPTION) {
            let group_dir = base.join(normalize_target(group));
            return AddonLayout {
                fetch_dir: group_dir.join(target),
                path_entry: group_dir,
            };
        }
        let fetch_dir = base.join(target);
        let path_entry = match source.option(SUBDIR_OPTION) {
            Some(subdir) => fetch_dir.join(normalize_target(subdir)),
            None => fetch_dir.clone(),
        };
        AddonLayout {
            fetch_dir,
            path_entry,
        }
    }

    /// Directory of the main software, known once the archive of a
    /// downloadable one is in the downloads directory.
    pub fn main_software_dir(&self) -> Result<PathBuf> {
        let main = self
            .sources
            .main_software()
            .ok_or_else(|| Error::config(format!("Part '{}' has no main software", self.part)))?;
        match (&main.kind, main.target.as_deref()) {
            (SourceKind::Local, Some(target)) => Ok(self.settings.base_dir.join(target)),
            (SourceKind::Vcs { .. }, Some(target)) => Ok(self.settings.parts_dir.join(target)),
            (SourceKind::Downloadable { url }, _) => {
                let archive = self.settings.downloads_dir.join(archive_file_name(url)?);
                Ok(self.settings.parts_dir.join(archive_top_dir(&archive)?))
            }
            (_, None) => Err(Error::config("Main software declaration without target")),
        }
    }

    /// Working tree of the source at `location`.
    pub fn source_dir(&self, location: &Location) -> Result<PathBuf> {
        match location {
            Location::MainSoftware => self.main_software_dir(),
            Location::Addon(target) => {
                let source = self.sources.get(location).ok_or_else(|| {
                    Error::config(format!("No source declared for {}", location))
                })?;
                Ok(self.addon_layout(target, source).fetch_dir)
            }
        }
    }

    /// Fetches or updates the main software and returns its directory.
    pub fn retrieve_main_software(&self) -> Result<PathBuf> {
        let main = self
            .sources
            .main_software()
            .ok_or_else(|| Error::config(format!("Part '{}' has no main software", self.part)))?;
        match &main.kind {
            SourceKind::Local => {
                let dir = self.main_software_dir()?;
                if !dir.exists() {
                    warn!("Local main software {} does not exist", dir.display());
                } else if self.settings.clean {
                    clean_object_files(&dir)?;
                }
                Ok(dir)
            }
            SourceKind::Downloadable { url } => {
                let downloader = Downloader::new(self.settings.http_caching, self.settings.offline)?;
                let archive = downloader.fetch(url, &self.settings.downloads_dir)?;
                info!(
                    "Extracting {} into {}",
                    archive.display(),
                    self.settings.parts_dir.display()
                );
                let dir = extract_archive(&archive, &self.settings.parts_dir)?;
                if self.settings.clean {
                    clean_object_files(&dir)?;
                }
                Ok(dir)
            }
            SourceKind::Vcs {
                backend,
                url,
                revision,
            } => {
                let dir = self.main_software_dir()?;
                self.registry
                    .get_update(backend, &dir, url, revision, self.vcs_options(backend, main))?;
                Ok(dir)
            }
        }
    }

    /// Fetches or updates every addon and returns the addons path.
    pub fn retrieve_addons(&self) -> Result<Vec<PathBuf>> {
        let mut addons_path: Vec<PathBuf> = Vec::new();
        for (target, source) in self.sources.addons() {
            let layout = self.addon_layout(target, source);
            match &source.kind {
                SourceKind::Vcs {
                    backend,
                    url,
                    revision,
                } => {
                    self.registry.get_update(
                        backend,
                        &layout.fetch_dir,
                        url,
                        revision,
                        self.vcs_options(backend, source),
                    )?;
                }
                SourceKind::Local => {
                    if !layout.path_entry.exists() {
                        warn!(
                            "Local addons directory {} does not exist",
                            layout.path_entry.display()
                        );
                    } else if self.settings.clean {
                        clean_object_files(&layout.path_entry)?;
                    }
                }
                SourceKind::Downloadable { url } => {
                    return Err(Error::config(format!(
                        "Downloadable archives are only supported for the main software: {}",
                        url
                    )))
                }
            }

            check_not_standalone(&layout.path_entry)?;
            if !addons_path.contains(&layout.path_entry) {
                addons_path.push(layout.path_entry);
            }
        }
        debug!("Addons path: {:?}", addons_path);
        Ok(addons_path)
    }

    /// Applies every declared merge, reverting first under the `on-merge`
    /// policy.
    pub fn retrieve_merges(&self) -> Result<()> {
        if !self.sources.has_merges() {
            return Ok(());
        }
        if self.settings.revert_on_merge {
            self.revert_sources()?;
        }
        for (location, merge) in self.sources.merges() {
            let dir = self.source_dir(location)?;
            let source = Source {
                kind: SourceKind::Vcs {
                    backend: merge.backend.clone(),
                    url: merge.url.clone(),
                    revision: merge.revision.clone(),
                },
                target: None,
                options: merge.options.clone(),
            };
            let mut options = self.vcs_options(&merge.backend, &source);
            options.merge = true;
            self.registry
                .get_update(&merge.backend, &dir, &merge.url, &merge.revision, options)?;
        }
        Ok(())
    }

    /// Reverts every version-controlled source to its declared revision.
    pub fn revert_sources(&self) -> Result<()> {
        for (location, source) in self.sources.iter() {
            let SourceKind::Vcs {
                backend,
                url,
                revision,
            } = &source.kind
            else {
                continue;
            };
            let dir = self.source_dir(location)?;
            if !dir.exists() {
                warn!("Not reverting {}: {} does not exist yet", location, dir.display());
                continue;
            }
            let repo = self
                .registry
                .instantiate(backend, &dir, url, self.vcs_options(backend, source))?;
            if !repo.supports_revert() {
                warn!("{} does not support revert, leaving {} as is", backend, dir.display());
                continue;
            }
            info!("Reverting {} to {}", dir.display(), revision);
            match repo.revert(revision) {
                Err(e) if e.is_unsupported() => warn!("{}", e),
                other => other?,
            }
        }
        Ok(())
    }

    /// Main software, addons and merges, in that order. Returns the addons
    /// path.
    pub fn retrieve(&self) -> Result<Vec<PathBuf>> {
        self.retrieve_main_software()?;
        let addons_path = self.retrieve_addons()?;
        self.retrieve_merges()?;
        Ok(addons_path)
    }

    /// Requirements handed to the installer: the `eggs` lines plus the main
    /// software's requirements file unless disabled.
    pub fn requirements(&self) -> Result<Vec<String>> {
        let mut requirements = self.settings.requirements.clone();
        if self.settings.apply_requirements_file {
            let file = self.main_software_dir()?.join(REQUIREMENTS_FILE);
            if file.is_file() {
                requirements.push("-r".to_string());
                requirements.push(file.to_string_lossy().into_owned());
            }
        }
        Ok(requirements)
    }

    pub fn install_requirements(&self, installer: &dyn PackageInstaller) -> Result<WorkingSet> {
        let requirements = self.requirements()?;
        Ok(installer.install(&requirements, &self.settings.pins)?)
    }
}

/// A resolved addons-path entry must be a directory of addons.
fn check_not_standalone(dir: &Path) -> Result<()> {
    match MANIFEST_MARKERS.iter().find(|m| dir.join(m).is_file()) {
        Some(marker) => Err(Error::config_with_hint(
            format!(
                "{} is a standalone addon ({} found), not a directory of addons",
                dir.display(),
                marker
            ),
            "declare it with group=NAME to place it inside a directory of its own",
        )),
        None => Ok(()),
    }
}
