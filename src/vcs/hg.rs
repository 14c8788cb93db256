//! Mercurial backend.

use std::fs;
use std::path::{Path, PathBuf};

use ini::Ini;
use log::{info, warn};
use regex::Regex;

use super::command::VcsCommand;
use super::{next_saved_key, Phase, RepoContext, Repository};
use crate::error::Result;

const SAVED_PATH_PREFIX: &str = "saved_default_";

pub struct HgRepo {
    ctx: RepoContext,
}

impl HgRepo {
    pub fn new(ctx: RepoContext) -> Self {
        Self { ctx }
    }

    fn hg(&self) -> VcsCommand {
        self.ctx.cmd("hg")
    }

    fn hgrc_path(&self) -> PathBuf {
        self.ctx.target_dir.join(".hg").join("hgrc")
    }

    /// Full node of `rev` if it resolves locally.
    fn local_node(&self, rev: &str) -> Result<Option<String>> {
        let output = self.ctx.output(
            &self
                .hg()
                .args(["log", "-r", rev, "--template", "{node}"]),
        )?;
        let node = output.stdout_str().trim().to_string();
        if !output.success || node.is_empty() {
            return Ok(None);
        }
        Ok(Some(node))
    }

    fn clone_at(&self, rev: &str) -> Result<()> {
        self.ctx.ensure_online(&format!("cloning {}", self.ctx.url))?;
        info!("Cloning {} into {}", self.ctx.url, self.ctx.target_dir.display());
        let targeted = self
            .ctx
            .cmd_in_parent("hg")?
            .args(["clone", "-r", rev])
            .arg(&self.ctx.url)
            .path_arg(&self.ctx.target_dir);
        let result = match self.ctx.call(Phase::Clone, &targeted) {
            Ok(_) => self.update_working_copy(Phase::Clone, rev),
            Err(e) => {
                // `-r` only accepts what the server can resolve before the
                // clone; local-only specs need a full clone first.
                warn!("{}; retrying with a full clone", e);
                self.ctx.discard_partial_clone();
                self.full_clone(rev)
            }
        };
        if result.is_err() {
            self.ctx.discard_partial_clone();
        }
        result
    }

    fn full_clone(&self, rev: &str) -> Result<()> {
        let clone = self
            .ctx
            .cmd_in_parent("hg")?
            .arg("clone")
            .arg(&self.ctx.url)
            .path_arg(&self.ctx.target_dir);
        self.ctx.call(Phase::Clone, &clone)?;
        self.update_working_copy(Phase::Clone, rev)
    }

    fn update_working_copy(&self, phase: Phase, rev: &str) -> Result<()> {
        self.ctx.call(phase, &self.hg().args(["update", rev]))?;
        Ok(())
    }

    /// Makes `[paths] default` the configured URL, keeping the previous
    /// value under `saved_default_<n>`.
    fn sync_default_path(&self) -> Result<()> {
        let hgrc = self.hgrc_path();
        let mut conf = if hgrc.exists() {
            Ini::load_from_file(&hgrc)?
        } else {
            Ini::new()
        };
        let (current, existing_keys) = match conf.section(Some("paths")) {
            Some(paths) => (
                paths.get("default").map(str::to_string),
                paths.iter().map(|(k, _)| k.to_string()).collect::<Vec<_>>(),
            ),
            None => (None, Vec::new()),
        };
        if current.as_deref() == Some(self.ctx.url.as_str()) {
            return Ok(());
        }
        if let Some(previous) = current {
            let saved = next_saved_key(SAVED_PATH_PREFIX, existing_keys.iter().map(String::as_str));
            info!(
                "Default path of {} changed from {} to {}, previous one kept as '{}'",
                self.ctx.target_dir.display(),
                previous,
                self.ctx.url,
                saved
            );
            conf.with_section(Some("paths")).set(saved, previous);
        }
        conf.with_section(Some("paths"))
            .set("default", self.ctx.url.as_str());
        conf.write_to_file(&hgrc)?;
        Ok(())
    }

    fn clear_locks(&self) -> Result<()> {
        let hg_dir = self.ctx.target_dir.join(".hg");
        for lock in [hg_dir.join("wlock"), hg_dir.join("store").join("lock")] {
            if lock.exists() || lock.symlink_metadata().is_ok() {
                warn!("Removing stale lock {}", lock.display());
                fs::remove_file(&lock)?;
            }
        }
        Ok(())
    }

    fn merge(&self, rev: &str) -> Result<()> {
        if !self.ctx.target_dir.exists() {
            return Err(self.ctx.phase_error(
                Phase::Update,
                "cannot merge into a missing working tree".to_string(),
            ));
        }
        self.ctx.ensure_online(&format!("merging from {}", self.ctx.url))?;
        self.ctx.call(
            Phase::Update,
            &self.hg().args(["pull", "-r", rev]).arg(&self.ctx.url),
        )?;
        self.ctx
            .call(Phase::Update, &self.hg().args(["merge", rev]))?;
        Ok(())
    }
}

impl Repository for HgRepo {
    fn context(&self) -> &RepoContext {
        &self.ctx
    }

    fn get_update(&self, revision: &str) -> Result<()> {
        if self.ctx.options.merge {
            return self.merge(revision);
        }
        if !self.ctx.target_dir.exists() {
            return self.clone_at(revision);
        }
        if self.ctx.options.clear_locks {
            self.clear_locks()?;
        }
        if self.ctx.options.offline {
            if self.local_node(revision)?.is_none() {
                return Err(self.ctx.phase_error(
                    Phase::Update,
                    format!(
                        "revision '{}' is not available locally and offline mode forbids pulling it",
                        revision
                    ),
                ));
            }
            return self.update_working_copy(Phase::Update, revision);
        }
        self.sync_default_path()?;
        if self.is_local_fixed_revision(revision)? {
            info!(
                "{} already has fixed revision {}, no pull needed",
                self.ctx.target_dir.display(),
                revision
            );
        } else {
            self.ctx.call(Phase::Update, &self.hg().arg("pull"))?;
        }
        self.update_working_copy(Phase::Update, revision)
    }

    fn uncommitted_changes(&self) -> Result<bool> {
        let output = self.ctx.check(&self.hg().arg("status"))?;
        Ok(!output.stdout_str().trim().is_empty())
    }

    /// Tags other than `tip`, and node prefixes of at least 12 hex digits
    /// that resolve locally, are fixed.
    fn is_local_fixed_revision(&self, revspec: &str) -> Result<bool> {
        if revspec == "tip" || !self.ctx.target_dir.join(".hg").exists() {
            return Ok(false);
        }
        let tags = self.ctx.check(&self.hg().args(["tags", "-q"]))?;
        if tags.stdout_str().lines().any(|t| t.trim() == revspec) {
            return Ok(true);
        }
        let node_prefix = Regex::new(r"^[0-9a-f]{12,40}$")?;
        if !node_prefix.is_match(revspec) {
            return Ok(false);
        }
        Ok(self
            .local_node(revspec)?
            .map(|node| node.starts_with(revspec))
            .unwrap_or(false))
    }

    fn parents(&self, _pip_compatible: bool) -> Result<Vec<String>> {
        let output = self
            .ctx
            .check(&self.hg().args(["parents", "--template", "{node}\n"]))?;
        Ok(output
            .stdout_str()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn clean(&self) -> Result<()> {
        self.ctx.check(
            &self
                .hg()
                .args(["--config", "extensions.purge=", "purge", "--all"]),
        )?;
        Ok(())
    }

    fn supports_revert(&self) -> bool {
        true
    }

    fn revert(&self, revision: &str) -> Result<()> {
        self.ctx
            .check(&self.hg().args(["update", "--clean", "-r", revision]))?;
        Ok(())
    }

    fn supports_merge(&self) -> bool {
        true
    }

    fn archive(&self, target: &Path) -> Result<()> {
        self.ctx
            .check(&self.hg().args(["archive", "-r", "."]).path_arg(target))?;
        // hg stores a provenance file in every archive
        let archival = target.join(".hg_archival.txt");
        if archival.exists() {
            fs::remove_file(archival)?;
        }
        Ok(())
    }
}
