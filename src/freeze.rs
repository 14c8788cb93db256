//! # Freeze and Extract
//!
//! Freezing pins what is on disk: it writes a configuration that extends
//! the original recipe with one revision per version-controlled source and
//! the versions of the installed packages. Any source with local
//! modifications or a pending merge aborts the whole freeze before anything
//! is written.
//!
//! Extraction copies everything the recipe fetched into a self-contained
//! directory and writes a `release.cfg` there that declares every source as
//! `local`, so the copy can be deployed without network access.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use log::{debug, info};
use walkdir::WalkDir;

use crate::config::{ConfigWriter, RecipeConfig, RECIPE_SECTION, VERSIONS_SECTION};
use crate::error::{Error, Result};
use crate::installer::WorkingSet;
use crate::retrieve::Recipe;
use crate::sources::parse::{GROUP_OPTION, SUBDIR_OPTION};
use crate::sources::{Location, SourceKind};

/// Name of the descriptor written by extraction.
pub const RELEASE_CONFIG: &str = "release.cfg";

/// A revision to pin, as a `revisions` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrozenRevision {
    pub location: Location,
    pub revision: String,
}

impl FrozenRevision {
    pub fn line(&self) -> String {
        match &self.location {
            Location::MainSoftware => self.revision.clone(),
            Location::Addon(path) => format!("{} {}", path, self.revision),
        }
    }
}

/// Determines the revision of every version-controlled source from its
/// working tree. Fails with [`Error::DirtyState`] listing every tree with
/// local modifications or a pending merge.
pub fn frozen_revisions(recipe: &Recipe) -> Result<Vec<FrozenRevision>> {
    let mut revisions = Vec::new();
    let mut dirty = Vec::new();

    for (location, source) in recipe.sources().iter() {
        let SourceKind::Vcs {
            backend,
            url,
            revision,
        } = &source.kind
        else {
            continue;
        };
        let dir = recipe.source_dir(location)?;
        let mut options = recipe.vcs_options(backend, source);
        options.offline = true;
        let repo = recipe.registry().instantiate(backend, &dir, url, options)?;

        if repo.uncommitted_changes()? {
            dirty.push(dir);
            continue;
        }
        if repo.is_local_fixed_revision(revision)? {
            debug!("{} is already at fixed revision {}", dir.display(), revision);
            revisions.push(FrozenRevision {
                location: location.clone(),
                revision: revision.clone(),
            });
            continue;
        }
        let parents = repo.parents(false)?;
        match parents.as_slice() {
            [single] => revisions.push(FrozenRevision {
                location: location.clone(),
                revision: single.clone(),
            }),
            [] => {
                return Err(Error::Command {
                    command: format!("{} parents", backend),
                    target: dir,
                    stderr: "no current revision".to_string(),
                })
            }
            _ => dirty.push(dir),
        }
    }

    if !dirty.is_empty() {
        return Err(Error::DirtyState { paths: dirty });
    }
    Ok(revisions)
}

/// Writes a frozen extension of the recipe to `output`.
///
/// With a working set, its non-developed distributions are pinned in
/// `[versions]`.
pub fn freeze_to(
    recipe: &Recipe,
    config: &RecipeConfig,
    output: &Path,
    working_set: Option<&WorkingSet>,
) -> Result<()> {
    let original = config.path().ok_or_else(|| {
        Error::config("Only a configuration read from a file can be frozen")
    })?;
    let original = original.canonicalize()?;
    let revisions = frozen_revisions(recipe)?;

    let mut writer = ConfigWriter::new();
    writer
        .section(RECIPE_SECTION)
        .option("extends", &original.to_string_lossy());
    writer
        .section(recipe.part())
        .lines("revisions", revisions.iter().map(FrozenRevision::line))
        .option("apply-requirements-file", "false");
    if let Some(set) = working_set {
        let mut versions = writer.section(VERSIONS_SECTION);
        for dist in set.pinnable() {
            versions.option(&dist.name, &dist.version);
        }
    }

    info!("Writing frozen configuration to {}", output.display());
    writer.write_to(output)
}

/// Copies `src` into `dest`, skipping VCS metadata.
fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    let walker = WalkDir::new(src).into_iter().filter_entry(|e| {
        !matches!(
            e.file_name().to_str(),
            Some(".git" | ".hg" | ".bzr" | ".svn")
        )
    });
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Relative form of a path for use inside the extraction directory.
fn strip_root(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

fn as_config_path(path: &Path) -> String {
    let rendered = path.to_string_lossy().into_owned();
    if rendered.is_empty() {
        ".".to_string()
    } else {
        rendered
    }
}

/// Exports sources into a target directory, once per physical tree.
#[derive(Debug)]
pub struct Extractor {
    target_dir: PathBuf,
    extracted: HashSet<PathBuf>,
}

impl Extractor {
    pub fn new(target_dir: &Path) -> Self {
        Self {
            target_dir: target_dir.to_path_buf(),
            extracted: HashSet::new(),
        }
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Where `dir` of `recipe` lands inside the target directory.
    pub fn destination(&self, recipe: &Recipe, dir: &Path) -> PathBuf {
        self.target_dir
            .join(strip_root(&recipe.settings().relative_to_base(dir)))
    }

    /// Snapshots every non-local source of `recipe`, then writes the
    /// release configuration. Returns the path of that configuration.
    pub fn extract(&mut self, recipe: &Recipe, config: &RecipeConfig) -> Result<PathBuf> {
        fs::create_dir_all(&self.target_dir)?;

        for (location, source) in recipe.sources().iter() {
            let dir = recipe.source_dir(location)?;
            let dest = self.destination(recipe, &dir);
            match &source.kind {
                SourceKind::Local => continue,
                _ if self.extracted.contains(&dest) => {
                    debug!("{} already extracted", dest.display());
                    continue;
                }
                SourceKind::Downloadable { .. } => {
                    info!("Copying {} to {}", dir.display(), dest.display());
                    copy_tree(&dir, &dest)?;
                }
                SourceKind::Vcs { backend, url, .. } => {
                    if dest.exists() {
                        fs::remove_dir_all(&dest)?;
                    }
                    fs::create_dir_all(&dest)?;
                    let repo = recipe.registry().instantiate(
                        backend,
                        &dir,
                        url,
                        recipe.vcs_options(backend, source),
                    )?;
                    info!("Exporting {} to {}", dir.display(), dest.display());
                    repo.archive(&dest)?;
                }
            }
            self.extracted.insert(dest);
        }

        let release = self.release_config(recipe, config)?;
        let path = self.target_dir.join(RELEASE_CONFIG);
        release.write_to(&path)?;
        info!("Wrote {}", path.display());
        Ok(path)
    }

    /// The flattened configuration with every source turned `local`.
    pub fn release_config(&self, recipe: &Recipe, config: &RecipeConfig) -> Result<ConfigWriter> {
        let part = recipe.part();
        let settings = recipe.settings();
        let mut flat = config.clone();
        flat.remove(RECIPE_SECTION, "extends");
        flat.remove(RECIPE_SECTION, "base-directory");
        flat.set(RECIPE_SECTION, "offline", "true");
        flat.set(
            RECIPE_SECTION,
            "parts-directory",
            as_config_path(&strip_root(&settings.relative_to_base(&settings.parts_dir))),
        );

        let local_line = |dir: &Path, kind: &SourceKind| -> String {
            match kind {
                SourceKind::Local => format!("local {}", dir.display()),
                _ => format!(
                    "local {}",
                    as_config_path(&strip_root(&settings.relative_to_base(dir)))
                ),
            }
        };

        let main = recipe
            .sources()
            .main_software()
            .ok_or_else(|| Error::config(format!("Part '{}' has no main software", part)))?;
        flat.set(part, "version", local_line(&recipe.main_software_dir()?, &main.kind));

        let mut addons: Vec<String> = Vec::new();
        for (target, source) in recipe.sources().addons() {
            let layout = recipe.addon_layout(target, source);
            let dir = if source.option(GROUP_OPTION).is_some()
                || source.option(SUBDIR_OPTION).is_some()
            {
                layout.path_entry
            } else {
                layout.fetch_dir
            };
            let line = local_line(&dir, &source.kind);
            if !addons.contains(&line) {
                addons.push(line);
            }
        }
        flat.set(
            part,
            "addons",
            if addons.is_empty() {
                String::new()
            } else {
                format!("\n{}", addons.join("\n"))
            },
        );

        let voided_revisions = config.lines(part, "revisions");
        let voided_merges = config.lines(part, "merges");
        flat.remove(part, "revisions");
        flat.remove(part, "merges");

        let mut writer = flat.to_writer();
        let mut section = writer.section(part);
        section.option("revisions", "");
        if !voided_revisions.is_empty() {
            section.comment("revisions voided by extraction:");
            for line in &voided_revisions {
                section.comment(&format!("  {}", line));
            }
        }
        if !voided_merges.is_empty() {
            section.comment("merges already applied in the extracted sources:");
            for line in &voided_merges {
                section.comment(&format!("  {}", line));
            }
        }
        Ok(writer)
    }
}

/// Extracts into `target_dir` and returns the path of the release
/// configuration.
///
/// Each call uses a fresh [`Extractor`]: every version-controlled source is
/// exported again (its destination is emptied first) and `release.cfg` is
/// rewritten from scratch. Callers extracting several recipes into one
/// directory keep a single `Extractor` instead, so a tree shared between
/// them is exported once.
pub fn extract_downloads_to(
    recipe: &Recipe,
    config: &RecipeConfig,
    target_dir: &Path,
) -> Result<PathBuf> {
    Extractor::new(target_dir).extract(recipe, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::Distribution;
    use crate::vcs::fake::{self, FakeState, Shared};
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    const RECIPE: &str = "[odoo]\nversion = fakevcs http://main odoo 16.0\naddons =\n    fakevcs http://a a v1\n    fakevcs http://b b main group=G\n    local custom\nrevisions = a v1 ; pinned\nmerges = fakevcs http://fork a feature\n";

    struct Fixture {
        temp: TempDir,
        state: Shared,
        config: RecipeConfig,
    }

    impl Fixture {
        fn retrieved() -> Self {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("recipe.cfg");
            fs::write(&path, RECIPE).unwrap();
            fs::create_dir_all(temp.path().join("custom")).unwrap();
            let fixture = Self {
                state: Rc::new(RefCell::new(FakeState::default())),
                config: RecipeConfig::from_file(&path).unwrap(),
                temp,
            };
            let recipe = fixture.recipe();
            recipe.retrieve_main_software().unwrap();
            recipe.retrieve_addons().unwrap();
            fixture
        }

        fn recipe(&self) -> Recipe {
            Recipe::load(&self.config, "odoo", fake::registry(self.state.clone())).unwrap()
        }
    }

    #[test]
    fn test_freeze_writes_revisions_and_versions() {
        let fixture = Fixture::retrieved();
        fixture.state.borrow_mut().fixed.insert("v1".to_string());
        let output = fixture.temp.path().join("frozen.cfg");
        let mut set = WorkingSet::new();
        set.insert(Distribution {
            name: "lxml".to_string(),
            version: "4.9.3".to_string(),
            location: PathBuf::from("/venv"),
            developed: false,
        });
        set.insert(Distribution {
            name: "my-addon".to_string(),
            version: "1.0".to_string(),
            location: PathBuf::from("/src"),
            developed: true,
        });

        freeze_to(&fixture.recipe(), &fixture.config, &output, Some(&set)).unwrap();

        let frozen = RecipeConfig::from_file(&output).unwrap();
        assert_eq!(frozen.lines("odoo", "revisions"), vec!["16.0", "a v1", "b main"]);
        assert_eq!(frozen.get("odoo", "apply-requirements-file"), Some("false"));
        assert_eq!(frozen.get(VERSIONS_SECTION, "lxml"), Some("4.9.3"));
        assert_eq!(frozen.get(VERSIONS_SECTION, "my-addon"), None);
        assert_eq!(frozen.loaded_files().len(), 2);

        // applying the frozen revisions gives back the same pins
        let refrozen = Recipe::load(&frozen, "odoo", fake::registry(fixture.state.clone())).unwrap();
        assert_eq!(
            refrozen.sources().get(&Location::Addon("a".to_string())).unwrap().kind.revision(),
            Some("v1")
        );
    }

    #[test]
    fn test_freeze_aborts_on_dirty_state_without_writing() {
        let fixture = Fixture::retrieved();
        let base = fixture.temp.path().to_path_buf();
        fixture.state.borrow_mut().dirty.insert(base.join("a"));
        fixture
            .state
            .borrow_mut()
            .parents
            .insert(base.join("G/b"), vec!["1".to_string(), "2".to_string()]);
        let output = fixture.temp.path().join("frozen.cfg");

        let err = freeze_to(&fixture.recipe(), &fixture.config, &output, None).unwrap_err();

        match &err {
            Error::DirtyState { paths } => {
                assert_eq!(paths, &vec![base.join("a"), base.join("G/b")]);
            }
            other => panic!("expected dirty state, got {:?}", other),
        }
        assert_eq!(err.exit_code(), crate::exit_codes::DIRTY_STATE);
        assert!(!output.exists());
    }

    #[test]
    fn test_freeze_does_not_touch_the_network() {
        let fixture = Fixture::retrieved();
        let before = fixture.state.borrow().calls.len();

        frozen_revisions(&fixture.recipe()).unwrap();

        assert_eq!(fixture.state.borrow().calls.len(), before);
    }

    #[test]
    fn test_extract_exports_and_rewrites_sources() {
        let fixture = Fixture::retrieved();
        let target = fixture.temp.path().join("release");
        let recipe = fixture.recipe();

        let mut extractor = Extractor::new(&target);
        let release = extractor.extract(&recipe, &fixture.config).unwrap();

        assert!(target.join("parts/odoo/README").exists());
        assert!(target.join("a/README").exists());
        assert!(target.join("G/b/README").exists());
        assert!(!target.join("a").join(fake::META).exists());
        assert!(!target.join("custom").exists());

        let config = RecipeConfig::from_file(&release).unwrap();
        assert_eq!(config.get(RECIPE_SECTION, "offline"), Some("true"));
        assert_eq!(config.get("odoo", "version"), Some("local parts/odoo"));
        let custom = format!("local {}", fixture.temp.path().join("custom").display());
        assert_eq!(
            config.lines("odoo", "addons"),
            vec!["local a", "local G", custom.as_str()]
        );
        assert_eq!(config.get("odoo", "revisions"), Some(""));
        assert_eq!(config.get("odoo", "merges"), None);
        let text = fs::read_to_string(&release).unwrap();
        assert!(text.contains("#   a v1 ; pinned"));

        // second run within the same extractor archives nothing again
        let archives = fixture.state.borrow().calls_for("archive").len();
        extractor.extract(&recipe, &fixture.config).unwrap();
        assert_eq!(fixture.state.borrow().calls_for("archive").len(), archives);
    }

    #[test]
    fn test_extract_downloads_to_starts_over_each_call() {
        let fixture = Fixture::retrieved();
        let target = fixture.temp.path().join("release");
        let recipe = fixture.recipe();

        let release = extract_downloads_to(&recipe, &fixture.config, &target).unwrap();
        let archives = fixture.state.borrow().calls_for("archive").len();
        assert_eq!(archives, 3);
        fs::write(target.join("a/stale.txt"), "x").unwrap();
        fs::write(&release, "garbage").unwrap();

        let again = extract_downloads_to(&recipe, &fixture.config, &target).unwrap();

        assert_eq!(again, release);
        assert_eq!(fixture.state.borrow().calls_for("archive").len(), 2 * archives);
        assert!(!target.join("a/stale.txt").exists());
        assert!(RecipeConfig::from_file(&release).is_ok());
    }

    #[test]
    fn test_frozen_revision_lines() {
        let main = FrozenRevision {
            location: Location::MainSoftware,
            revision: "abc".to_string(),
        };
        let addon = FrozenRevision {
            location: Location::Addon("addons/x".to_string()),
            revision: "def".to_string(),
        };
        assert_eq!(main.line(), "abc");
        assert_eq!(addon.line(), "addons/x def");
    }

    #[test]
    fn test_copy_tree_skips_metadata() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join(".git")).unwrap();
        fs::create_dir_all(src.join("pkg")).unwrap();
        fs::write(src.join(".git/HEAD"), "ref").unwrap();
        fs::write(src.join("pkg/mod.py"), "x = 1").unwrap();

        copy_tree(&src, &temp.path().join("dest")).unwrap();

        assert!(temp.path().join("dest/pkg/mod.py").exists());
        assert!(!temp.path().join("dest/.git").exists());
    }
}
