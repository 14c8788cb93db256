//! In-memory `fakevcs` backend for driver and freeze tests.
//!
//! Working trees are plain directories holding a `.fakevcs` file with the
//! current revision. Every operation is recorded in the shared
//! [`FakeState`], and tests can mark trees dirty or give them several
//! parents.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use walkdir::WalkDir;

use super::{Capabilities, RepoContext, Registry, Repository, VcsOptions};
use crate::error::{Error, Result};

pub const NAME: &str = "fakevcs";
pub const META: &str = ".fakevcs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCall {
    pub op: &'static str,
    pub target: PathBuf,
    pub url: String,
    pub revision: String,
    pub options: VcsOptions,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub calls: Vec<FakeCall>,
    pub dirty: HashSet<PathBuf>,
    pub parents: HashMap<PathBuf, Vec<String>>,
    pub fixed: HashSet<String>,
    pub no_revert: bool,
}

pub type Shared = Rc<RefCell<FakeState>>;

impl FakeState {
    pub fn calls_for(&self, op: &str) -> Vec<FakeCall> {
        self.calls.iter().filter(|c| c.op == op).cloned().collect()
    }
}

pub struct FakeRepo {
    ctx: RepoContext,
    state: Shared,
}

impl FakeRepo {
    fn record(&self, op: &'static str, revision: &str) {
        self.state.borrow_mut().calls.push(FakeCall {
            op,
            target: self.ctx.target_dir.clone(),
            url: self.ctx.url.clone(),
            revision: revision.to_string(),
            options: self.ctx.options.clone(),
        });
    }

    fn current(&self) -> Result<String> {
        Ok(fs::read_to_string(self.target_dir().join(META))?
            .trim()
            .to_string())
    }
}

impl Repository for FakeRepo {
    fn context(&self) -> &RepoContext {
        &self.ctx
    }

    fn get_update(&self, revision: &str) -> Result<()> {
        let target = self.target_dir();
        if self.options().offline && !target.exists() {
            return Err(Error::Offline {
                target: target.to_path_buf(),
                action: "cloning".to_string(),
            });
        }
        if self.options().merge {
            self.record("merge", revision);
            let mut parents = vec![self.current()?];
            parents.push(revision.to_string());
            self.state
                .borrow_mut()
                .parents
                .insert(target.to_path_buf(), parents);
            return Ok(());
        }
        self.record("update", revision);
        fs::create_dir_all(target)?;
        fs::write(target.join(META), revision)?;
        fs::write(target.join("README"), format!("{} at {}", self.url(), revision))?;
        Ok(())
    }

    fn uncommitted_changes(&self) -> Result<bool> {
        Ok(self.state.borrow().dirty.contains(self.target_dir()))
    }

    fn is_local_fixed_revision(&self, revspec: &str) -> Result<bool> {
        Ok(self.state.borrow().fixed.contains(revspec))
    }

    fn parents(&self, _pip_compatible: bool) -> Result<Vec<String>> {
        if let Some(parents) = self.state.borrow().parents.get(self.target_dir()) {
            return Ok(parents.clone());
        }
        Ok(vec![self.current()?])
    }

    fn supports_revert(&self) -> bool {
        !self.state.borrow().no_revert
    }

    fn revert(&self, revision: &str) -> Result<()> {
        self.record("revert", revision);
        self.state.borrow_mut().parents.remove(self.target_dir());
        Ok(())
    }

    fn supports_merge(&self) -> bool {
        true
    }

    fn archive(&self, target: &Path) -> Result<()> {
        self.record("archive", "");
        let source = self.target_dir();
        for entry in WalkDir::new(source).min_depth(1) {
            let entry = entry.map_err(std::io::Error::from)?;
            let rel = entry.path().strip_prefix(source).unwrap_or(entry.path());
            if rel.starts_with(META) {
                continue;
            }
            let dest = target.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest)?;
            } else {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &dest)?;
            }
        }
        Ok(())
    }
}

/// A registry holding only `fakevcs`.
pub fn registry(state: Shared) -> Registry {
    let mut registry = Registry::empty();
    registry.register(NAME, Capabilities { merge: true }, move |ctx| {
        Ok(Box::new(FakeRepo {
            ctx,
            state: state.clone(),
        }))
    });
    registry
}
