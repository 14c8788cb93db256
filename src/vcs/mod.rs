//! # Version-Control Backends
//!
//! This module defines the uniform contract every version-control backend
//! implements ([`Repository`]), the per-operation construction context
//! ([`RepoContext`]), and the name-to-constructor [`Registry`] used by the
//! retrieval driver.
//!
//! ## Design
//!
//! A backend instance is bound to one `(target_dir, url)` pair and is built
//! fresh for every retrieval, freeze or archive operation. The working tree on
//! disk is the only persistent state. All subprocesses go through the
//! [`command::CommandRunner`] carried by the context, which makes the
//! backends testable without the real tools installed.
//!
//! The retry policy lives in [`Repository::update_to`], not in the backends:
//! an [`Error::Update`] against an existing tree is retried once from scratch
//! when `clear_retry` is set and offline mode is off.
//!
//! Optional operations are capability-queried (`supports_revert`,
//! `supports_merge`) and otherwise report [`Error::Unsupported`].

pub mod bzr;
pub mod clean;
pub mod command;
#[cfg(test)]
pub(crate) mod fake;
pub mod git;
pub mod hg;
pub mod svn;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{info, warn};

use crate::error::{Error, Result};
use command::{CommandOutput, CommandRunner, SystemRunner, VcsCommand};

/// Generic options understood by every backend, plus backend-specific extras.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VcsOptions {
    /// Never touch the network.
    pub offline: bool,
    /// Remove stale lock files before updating.
    pub clear_locks: bool,
    /// Wipe and re-clone once when updating an existing tree fails.
    pub clear_retry: bool,
    /// Run [`Repository::clean`] after a successful update.
    pub clean: bool,
    /// Merge the revision into the current checkout instead of switching to it.
    pub merge: bool,
    /// Backend-specific `key=value` options, already stripped of any
    /// `<backend>-` prefix.
    pub extra: BTreeMap<String, String>,
}

impl VcsOptions {
    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }
}

/// Whether a command belongs to the first creation of a tree or to the
/// reconciliation of an existing one. Drives error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Clone,
    Update,
}

/// Everything a backend is constructed from.
#[derive(Clone)]
pub struct RepoContext {
    pub backend: String,
    pub target_dir: PathBuf,
    pub url: String,
    pub options: VcsOptions,
    pub runner: Rc<dyn CommandRunner>,
}

impl fmt::Debug for RepoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoContext")
            .field("backend", &self.backend)
            .field("target_dir", &self.target_dir)
            .field("url", &self.url)
            .field("options", &self.options)
            .finish()
    }
}

impl RepoContext {
    pub fn new(backend: &str, target_dir: &Path, url: &str, options: VcsOptions) -> Self {
        Self {
            backend: backend.to_string(),
            target_dir: target_dir.to_path_buf(),
            url: url.to_string(),
            options,
            runner: Rc::new(SystemRunner),
        }
    }

    pub fn with_runner(mut self, runner: Rc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// A command for `program` running inside the target directory.
    pub fn cmd(&self, program: &str) -> VcsCommand {
        VcsCommand::new(program).current_dir(&self.target_dir)
    }

    /// A command for `program` running in the parent of the target directory,
    /// which is created if needed.
    pub fn cmd_in_parent(&self, program: &str) -> Result<VcsCommand> {
        let parent = self.parent_dir();
        fs::create_dir_all(&parent)?;
        Ok(VcsCommand::new(program).current_dir(&parent))
    }

    pub fn parent_dir(&self) -> PathBuf {
        self.target_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Runs a command and returns its output whatever the exit status.
    pub fn output(&self, command: &VcsCommand) -> Result<CommandOutput> {
        self.runner.run(command).map_err(|e| Error::Command {
            command: command.to_string(),
            target: self.target_dir.clone(),
            stderr: format!("could not run {}: {}", command.program, e),
        })
    }

    /// Runs a command that must succeed; failures are plain command errors.
    pub fn check(&self, command: &VcsCommand) -> Result<CommandOutput> {
        let output = self.output(command)?;
        if !output.success {
            return Err(Error::Command {
                command: command.to_string(),
                target: self.target_dir.clone(),
                stderr: output.diagnostic(),
            });
        }
        Ok(output)
    }

    /// Runs a command that must succeed, classifying failures by phase.
    pub fn call(&self, phase: Phase, command: &VcsCommand) -> Result<CommandOutput> {
        let output = self.runner.run(command).map_err(|e| {
            self.phase_error(phase, format!("could not run `{}`: {}", command, e))
        })?;
        if !output.success {
            return Err(self.phase_error(
                phase,
                format!("`{}` failed: {}", command, output.diagnostic()),
            ));
        }
        Ok(output)
    }

    pub fn phase_error(&self, phase: Phase, message: String) -> Error {
        match phase {
            Phase::Clone => Error::Clone {
                backend: self.backend.clone(),
                url: self.url.clone(),
                target: self.target_dir.clone(),
                message,
            },
            Phase::Update => Error::Update {
                backend: self.backend.clone(),
                target: self.target_dir.clone(),
                message,
            },
        }
    }

    /// Fails with [`Error::Offline`] when offline mode is active.
    pub fn ensure_online(&self, action: &str) -> Result<()> {
        if self.options.offline {
            return Err(Error::Offline {
                target: self.target_dir.clone(),
                action: action.to_string(),
            });
        }
        Ok(())
    }

    pub fn unsupported(&self, operation: &str) -> Error {
        Error::Unsupported {
            backend: self.backend.clone(),
            operation: operation.to_string(),
        }
    }

    /// Removes a half-created working tree after a failed first clone.
    pub fn discard_partial_clone(&self) {
        if self.target_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.target_dir) {
                warn!(
                    "Could not remove partial clone {}: {}",
                    self.target_dir.display(),
                    e
                );
            }
        }
    }
}

/// The uniform contract of a version-control backend.
pub trait Repository {
    fn context(&self) -> &RepoContext;

    fn backend(&self) -> &str {
        &self.context().backend
    }

    fn target_dir(&self) -> &Path {
        &self.context().target_dir
    }

    fn url(&self) -> &str {
        &self.context().url
    }

    fn options(&self) -> &VcsOptions {
        &self.context().options
    }

    /// Converges the target directory to `revision` of the remote.
    ///
    /// With the `merge` option set, merges `revision` into the current
    /// checkout instead, which is not idempotent.
    fn get_update(&self, revision: &str) -> Result<()>;

    /// True iff the working tree differs from its last committed state,
    /// untracked files included.
    fn uncommitted_changes(&self) -> Result<bool>;

    /// True iff `revspec` is a fixed revision already present locally.
    fn is_local_fixed_revision(&self, revspec: &str) -> Result<bool>;

    /// Current revision identifiers; more than one means a pending merge.
    fn parents(&self, pip_compatible: bool) -> Result<Vec<String>>;

    /// Removes derived artifacts. Backends without a native purge fall back
    /// to removing Python bytecode.
    fn clean(&self) -> Result<()> {
        clean::clean_object_files(self.target_dir())
    }

    fn supports_revert(&self) -> bool {
        false
    }

    /// Discards local changes and pending merges, resetting to `revision`.
    fn revert(&self, _revision: &str) -> Result<()> {
        Err(self.context().unsupported("revert"))
    }

    fn supports_merge(&self) -> bool {
        false
    }

    /// Exports the current revision, without VCS metadata, to `target`.
    fn archive(&self, target: &Path) -> Result<()>;

    /// Deletes the whole working tree.
    fn clear_target(&self) -> Result<()> {
        let target = self.target_dir();
        if target.exists() {
            fs::remove_dir_all(target)?;
        }
        Ok(())
    }

    /// [`get_update`](Self::get_update) plus the retry and cleanup policy.
    fn update_to(&self, revision: &str) -> Result<()> {
        match self.get_update(revision) {
            Err(e) if e.is_update_error() && self.options().clear_retry && !self.options().offline => {
                warn!(
                    "{}; removing {} and retrying from scratch",
                    e,
                    self.target_dir().display()
                );
                self.clear_target()?;
                self.get_update(revision)?;
            }
            other => other?,
        }
        if self.options().clean {
            info!("Cleaning {}", self.target_dir().display());
            self.clean()?;
        }
        Ok(())
    }
}

/// Picks `<prefix><n>` with `n` one above the highest existing suffix, so
/// successive remote changes keep a history of previous locations.
pub fn next_saved_key<'a>(prefix: &str, existing: impl IntoIterator<Item = &'a str>) -> String {
    let highest = existing
        .into_iter()
        .filter_map(|k| k.strip_prefix(prefix))
        .filter_map(|n| n.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("{}{}", prefix, highest + 1)
}

/// Backend constructor stored in the [`Registry`].
pub type BackendFactory = Rc<dyn Fn(RepoContext) -> Result<Box<dyn Repository>>>;

/// What a registered backend can do, known without instantiating it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub merge: bool,
}

#[derive(Clone)]
struct RegisteredBackend {
    capabilities: Capabilities,
    factory: BackendFactory,
}

/// Name-to-constructor mapping of the available backends.
#[derive(Clone)]
pub struct Registry {
    backends: BTreeMap<String, RegisteredBackend>,
    runner: Rc<dyn CommandRunner>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Registry {
    /// An empty registry running commands on the system.
    pub fn empty() -> Self {
        Self {
            backends: BTreeMap::new(),
            runner: Rc::new(SystemRunner),
        }
    }

    /// A registry with the `git`, `hg`, `bzr` and `svn` backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        let merge = Capabilities { merge: true };
        registry.register("git", merge, |ctx| Ok(Box::new(git::GitRepo::new(ctx)?)));
        registry.register("hg", merge, |ctx| Ok(Box::new(hg::HgRepo::new(ctx))));
        registry.register("bzr", merge, |ctx| Ok(Box::new(bzr::BzrBranch::new(ctx)?)));
        registry.register("svn", Capabilities::default(), |ctx| {
            Ok(Box::new(svn::SvnCheckout::new(ctx)))
        });
        registry
    }

    /// Replaces the command runner handed to every instantiated backend.
    pub fn with_runner(mut self, runner: Rc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Registers (or replaces) a backend under `name`.
    pub fn register<F>(&mut self, name: &str, capabilities: Capabilities, factory: F)
    where
        F: Fn(RepoContext) -> Result<Box<dyn Repository>> + 'static,
    {
        self.backends.insert(
            name.to_string(),
            RegisteredBackend {
                capabilities,
                factory: Rc::new(factory),
            },
        );
    }

    pub fn is_supported(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    pub fn supports_merge(&self, name: &str) -> bool {
        self.backends
            .get(name)
            .map(|b| b.capabilities.merge)
            .unwrap_or(false)
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    /// Builds a backend instance without touching the working tree.
    pub fn instantiate(
        &self,
        backend: &str,
        target_dir: &Path,
        url: &str,
        options: VcsOptions,
    ) -> Result<Box<dyn Repository>> {
        let registered = self.backends.get(backend).ok_or_else(|| {
            Error::config_with_hint(
                format!("Unsupported version control system: '{}'", backend),
                format!("supported systems are: {}", self.names().join(", ")),
            )
        })?;
        let ctx = RepoContext::new(backend, target_dir, url, options).with_runner(self.runner.clone());
        (registered.factory)(ctx)
    }

    /// Instantiates `backend` and converges `target_dir` to `revision`.
    pub fn get_update(
        &self,
        backend: &str,
        target_dir: &Path,
        url: &str,
        revision: &str,
        options: VcsOptions,
    ) -> Result<Box<dyn Repository>> {
        let repo = self.instantiate(backend, target_dir, url, options)?;
        info!(
            "{} {} {} into {}",
            if repo.options().merge { "Merging" } else { "Updating" },
            url,
            revision,
            target_dir.display()
        );
        repo.update_to(revision)?;
        Ok(repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Creates the target on first call, always fails once it exists.
    struct StubbornRepo {
        ctx: RepoContext,
        attempts: Rc<RefCell<u32>>,
    }

    impl Repository for StubbornRepo {
        fn context(&self) -> &RepoContext {
            &self.ctx
        }

        fn get_update(&self, _revision: &str) -> Result<()> {
            *self.attempts.borrow_mut() += 1;
            if self.target_dir().exists() {
                return Err(self.ctx.phase_error(Phase::Update, "diverged".to_string()));
            }
            self.ctx.ensure_online("cloning")?;
            fs::create_dir_all(self.target_dir())?;
            fs::write(self.target_dir().join("marker"), "x")?;
            Ok(())
        }

        fn uncommitted_changes(&self) -> Result<bool> {
            Ok(false)
        }

        fn is_local_fixed_revision(&self, _revspec: &str) -> Result<bool> {
            Ok(false)
        }

        fn parents(&self, _pip_compatible: bool) -> Result<Vec<String>> {
            Ok(vec!["1".to_string()])
        }

        fn archive(&self, _target: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn stubborn_registry(attempts: Rc<RefCell<u32>>) -> Registry {
        let mut registry = Registry::empty();
        registry.register("stubborn", Capabilities::default(), move |ctx| {
            Ok(Box::new(StubbornRepo {
                ctx,
                attempts: attempts.clone(),
            }))
        });
        registry
    }

    #[test]
    fn test_retry_semantics() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("repo");
        let attempts = Rc::new(RefCell::new(0));
        let registry = stubborn_registry(attempts.clone());

        // target absent: succeeds
        let first = registry.get_update("stubborn", &target, "http://x", "1", VcsOptions::default());
        assert!(first.is_ok());

        // target present, no clear_retry: fails
        let second = registry.get_update("stubborn", &target, "http://x", "1", VcsOptions::default());
        assert!(matches!(second, Err(Error::Update { .. })));

        // clear_retry: wiped and recreated
        let retry = VcsOptions {
            clear_retry: true,
            ..Default::default()
        };
        let third = registry.get_update("stubborn", &target, "http://x", "1", retry);
        assert!(third.is_ok());
        assert!(target.join("marker").exists());

        // offline forbids the retry
        let offline = VcsOptions {
            clear_retry: true,
            offline: true,
            ..Default::default()
        };
        let fourth = registry.get_update("stubborn", &target, "http://x", "1", offline);
        assert!(matches!(fourth, Err(Error::Update { .. })));
        assert!(target.exists());
    }

    #[test]
    fn test_unsupported_backend_is_config_error() {
        let registry = Registry::with_defaults();
        let result = registry.instantiate("cvs", Path::new("/tmp/x"), "u", VcsOptions::default());
        match result {
            Err(Error::Config { message, hint }) => {
                assert!(message.contains("'cvs'"));
                assert!(hint.unwrap().contains("git"));
            }
            other => panic!("expected config error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_default_capabilities() {
        let registry = Registry::with_defaults();
        assert_eq!(registry.names(), vec!["bzr", "git", "hg", "svn"]);
        assert!(registry.supports_merge("git"));
        assert!(registry.supports_merge("hg"));
        assert!(registry.supports_merge("bzr"));
        assert!(!registry.supports_merge("svn"));
        assert!(!registry.supports_merge("unknown"));
    }

    #[test]
    fn test_default_revert_is_unsupported() {
        let temp = TempDir::new().unwrap();
        let repo = StubbornRepo {
            ctx: RepoContext::new("stubborn", temp.path(), "u", VcsOptions::default()),
            attempts: Rc::new(RefCell::new(0)),
        };
        assert!(!repo.supports_revert());
        assert!(repo.revert("1").unwrap_err().is_unsupported());
    }

    #[test]
    fn test_next_saved_key() {
        assert_eq!(next_saved_key("saved_default_", Vec::<&str>::new()), "saved_default_1");
        assert_eq!(
            next_saved_key("saved_default_", ["default", "saved_default_1", "saved_default_7"]),
            "saved_default_8"
        );
        assert_eq!(
            next_saved_key("saved_default_", ["saved_default_x"]),
            "saved_default_1"
        );
    }
}
