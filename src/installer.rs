//! # Package Installer
//!
//! The Python dependency installer is an opaque collaborator: it takes
//! requirements plus version pins and yields a [`WorkingSet`] of resolved
//! distributions. Failures come in a few distinguishable kinds so callers
//! can decide whether retrying without optional dependencies makes sense.
//!
//! [`PipInstaller`] drives `python -m pip` through the same
//! [`CommandRunner`] seam as the version-control backends.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::info;
use serde::Deserialize;
use thiserror::Error;

use crate::vcs::command::{CommandRunner, SystemRunner, VcsCommand};

/// Failure kinds of the package installer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallError {
    #[error("No distribution found for {requirement}")]
    MissingDistribution { requirement: String },

    #[error("Version conflict: {message}")]
    VersionConflict { message: String },

    #[error("Incompatible constraint {requirement}: {message}")]
    IncompatibleConstraint { requirement: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// One resolved distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub name: String,
    pub version: String,
    pub location: PathBuf,
    /// Installed in development mode from a local checkout.
    pub developed: bool,
}

/// Resolved distributions, queryable by (case-insensitive) name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingSet {
    distributions: BTreeMap<String, Distribution>,
}

/// `Foo_Bar` and `foo-bar` name the same distribution.
pub fn canonical_name(name: &str) -> String {
    name.trim().to_lowercase().replace(['_', '.'], "-")
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, distribution: Distribution) {
        self.distributions
            .insert(canonical_name(&distribution.name), distribution);
    }

    pub fn get(&self, name: &str) -> Option<&Distribution> {
        self.distributions.get(&canonical_name(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Distribution> {
        self.distributions.values()
    }

    /// Distributions not installed from a local checkout, sorted by name.
    pub fn pinnable(&self) -> impl Iterator<Item = &Distribution> {
        self.distributions.values().filter(|d| !d.developed)
    }

    pub fn len(&self) -> usize {
        self.distributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distributions.is_empty()
    }
}

/// Resolves and installs Python requirements.
pub trait PackageInstaller {
    /// Installs `requirements`, honouring `pins` (name to exact version).
    fn install(
        &self,
        requirements: &[String],
        pins: &BTreeMap<String, String>,
    ) -> Result<WorkingSet, InstallError>;

    /// What is currently installed.
    fn working_set(&self) -> Result<WorkingSet, InstallError>;
}

/// Applies a version pin to a bare requirement name.
pub fn pin_requirement(requirement: &str, pins: &BTreeMap<String, String>) -> String {
    let requirement = requirement.trim();
    let is_bare = requirement
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !is_bare {
        return requirement.to_string();
    }
    let canonical = canonical_name(requirement);
    pins.iter()
        .find(|(name, _)| canonical_name(name) == canonical)
        .map(|(_, version)| format!("{}=={}", requirement, version.trim()))
        .unwrap_or_else(|| requirement.to_string())
}

/// Maps pip's diagnostics to an installer failure kind.
pub fn classify_pip_failure(stderr: &str) -> InstallError {
    let first_line = |needle: &str| {
        stderr
            .lines()
            .find(|l| l.contains(needle))
            .map(|l| l.trim().to_string())
    };
    if let Some(line) = first_line("No matching distribution found for") {
        let requirement = line
            .rsplit("found for")
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        return InstallError::MissingDistribution { requirement };
    }
    if stderr.contains("ResolutionImpossible") || stderr.contains("conflicting dependencies") {
        return InstallError::VersionConflict {
            message: first_line("conflict").unwrap_or_else(|| stderr.trim().to_string()),
        };
    }
    if let Some(line) = first_line("Invalid requirement") {
        let requirement = line
            .split('\'')
            .nth(1)
            .unwrap_or_default()
            .to_string();
        return InstallError::IncompatibleConstraint {
            requirement,
            message: line,
        };
    }
    InstallError::Other(stderr.trim().to_string())
}

#[derive(Debug, Deserialize)]
struct PipListEntry {
    name: String,
    version: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    editable_project_location: Option<String>,
}

/// Parses `pip list -v --format=json` output.
pub fn parse_pip_list(json: &str) -> Result<WorkingSet, InstallError> {
    let entries: Vec<PipListEntry> = serde_json::from_str(json)
        .map_err(|e| InstallError::Other(format!("unexpected pip list output: {}", e)))?;
    let mut set = WorkingSet::new();
    for entry in entries {
        let developed = entry.editable_project_location.is_some();
        let location = entry
            .editable_project_location
            .or(entry.location)
            .map(PathBuf::from)
            .unwrap_or_default();
        set.insert(Distribution {
            name: entry.name,
            version: entry.version,
            location,
            developed,
        });
    }
    Ok(set)
}

/// Installs with `python -m pip`.
pub struct PipInstaller {
    python: String,
    cwd: PathBuf,
    runner: Rc<dyn CommandRunner>,
}

impl PipInstaller {
    pub fn new(python: &str, cwd: &Path) -> Self {
        Self {
            python: python.to_string(),
            cwd: cwd.to_path_buf(),
            runner: Rc::new(SystemRunner),
        }
    }

    pub fn with_runner(mut self, runner: Rc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    fn pip(&self) -> VcsCommand {
        VcsCommand::new(&self.python)
            .args(["-m", "pip"])
            .current_dir(&self.cwd)
    }

    fn run(&self, command: &VcsCommand) -> Result<String, InstallError> {
        let output = self
            .runner
            .run(command)
            .map_err(|e| InstallError::Other(format!("could not run `{}`: {}", command, e)))?;
        if !output.success {
            return Err(classify_pip_failure(&output.diagnostic()));
        }
        Ok(output.stdout_str())
    }
}

impl PackageInstaller for PipInstaller {
    fn install(
        &self,
        requirements: &[String],
        pins: &BTreeMap<String, String>,
    ) -> Result<WorkingSet, InstallError> {
        if !requirements.is_empty() {
            let pinned: Vec<String> = requirements
                .iter()
                .map(|r| pin_requirement(r, pins))
                .collect();
            info!("Installing {}", pinned.join(", "));
            self.run(&self.pip().arg("install").args(&pinned))?;
        }
        self.working_set()
    }

    fn working_set(&self) -> Result<WorkingSet, InstallError> {
        let json = self.run(&self.pip().args(["list", "-v", "--format=json"]))?;
        parse_pip_list(&json)
    }
}
