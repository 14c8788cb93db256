//! Subversion backend. Merges are not supported.

use std::path::Path;

use log::{info, warn};

use super::clean::clean_object_files;
use super::command::VcsCommand;
use super::{Phase, RepoContext, Repository};
use crate::error::{Error, Result};

/// Fields of `svn info` the backend relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvnInfo {
    pub url: String,
    pub revision: String,
}

impl SvnInfo {
    pub fn parse(output: &str) -> Option<Self> {
        let mut url = None;
        let mut revision = None;
        for line in output.lines() {
            if let Some(value) = line.strip_prefix("URL:") {
                url = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("Revision:") {
                revision = Some(value.trim().to_string());
            }
        }
        Some(Self {
            url: url?,
            revision: revision?,
        })
    }
}

pub struct SvnCheckout {
    ctx: RepoContext,
}

impl SvnCheckout {
    pub fn new(ctx: RepoContext) -> Self {
        Self { ctx }
    }

    fn svn(&self) -> VcsCommand {
        self.ctx.cmd("svn").arg("--non-interactive")
    }

    fn info(&self, phase: Phase) -> Result<SvnInfo> {
        let output = self.ctx.call(phase, &self.svn().arg("info"))?;
        SvnInfo::parse(&output.stdout_str()).ok_or_else(|| {
            self.ctx
                .phase_error(phase, "unexpected `svn info` output".to_string())
        })
    }

    fn checkout(&self, rev: &str) -> Result<()> {
        self.ctx
            .ensure_online(&format!("checking out {}", self.ctx.url))?;
        info!(
            "Checking out {} into {}",
            self.ctx.url,
            self.ctx.target_dir.display()
        );
        let cmd = self
            .ctx
            .cmd_in_parent("svn")?
            .args(["--non-interactive", "checkout", "-r", rev])
            .arg(&self.ctx.url)
            .path_arg(&self.ctx.target_dir);
        let result = self.ctx.call(Phase::Clone, &cmd).map(|_| ());
        if result.is_err() {
            self.ctx.discard_partial_clone();
        }
        result
    }
}

impl Repository for SvnCheckout {
    fn context(&self) -> &RepoContext {
        &self.ctx
    }

    fn get_update(&self, revision: &str) -> Result<()> {
        if self.ctx.options.merge {
            return Err(self.ctx.unsupported("merge"));
        }
        if !self.ctx.target_dir.exists() {
            return self.checkout(revision);
        }
        if self.ctx.options.clear_locks {
            self.ctx
                .call(Phase::Update, &self.svn().arg("cleanup"))?;
        }
        if self.ctx.options.offline {
            // svn cannot switch revision without the server
            let info = self.info(Phase::Update)?;
            if info.revision == revision {
                return Ok(());
            }
            return Err(self.ctx.phase_error(
                Phase::Update,
                format!(
                    "at revision {}, and offline mode forbids updating to {}",
                    info.revision, revision
                ),
            ));
        }
        let info = self.info(Phase::Update)?;
        if info.url.trim_end_matches('/') != self.ctx.url.trim_end_matches('/') {
            info!(
                "Relocating {} from {} to {}",
                self.ctx.target_dir.display(),
                info.url,
                self.ctx.url
            );
            self.ctx.call(
                Phase::Update,
                &self.svn().arg("relocate").arg(&self.ctx.url),
            )?;
        }
        if info.revision == revision && is_revision_number(revision) {
            info!(
                "{} already at revision {}",
                self.ctx.target_dir.display(),
                revision
            );
            return Ok(());
        }
        self.ctx.call(
            Phase::Update,
            &self.svn().args(["update", "-r", revision]),
        )?;
        Ok(())
    }

    fn uncommitted_changes(&self) -> Result<bool> {
        let output = self.ctx.check(&self.svn().arg("status"))?;
        Ok(output
            .stdout_str()
            .lines()
            .any(|l| !l.trim().is_empty() && !l.starts_with("Performing status on external")))
    }

    /// Numeric revisions are immutable; one is local when the working copy
    /// is already at it.
    fn is_local_fixed_revision(&self, revspec: &str) -> Result<bool> {
        if !is_revision_number(revspec) || !self.ctx.target_dir.join(".svn").exists() {
            return Ok(false);
        }
        Ok(self.info(Phase::Update)?.revision == revspec)
    }

    fn parents(&self, _pip_compatible: bool) -> Result<Vec<String>> {
        let info = SvnInfo::parse(&self.ctx.check(&self.svn().arg("info"))?.stdout_str());
        match info {
            Some(info) => Ok(vec![info.revision]),
            None => Err(Error::Command {
                command: "svn info".to_string(),
                target: self.ctx.target_dir.clone(),
                stderr: "no revision in `svn info` output".to_string(),
            }),
        }
    }

    fn clean(&self) -> Result<()> {
        let purge = self
            .svn()
            .args(["cleanup", "--remove-unversioned", "--remove-ignored"]);
        let output = self.ctx.output(&purge)?;
        if !output.success {
            warn!(
                "`{}` failed ({}), removing Python bytecode only",
                purge,
                output.diagnostic()
            );
            return clean_object_files(&self.ctx.target_dir);
        }
        Ok(())
    }

    fn supports_revert(&self) -> bool {
        true
    }

    fn revert(&self, revision: &str) -> Result<()> {
        self.ctx
            .check(&self.svn().args(["revert", "-R", "."]))?;
        self.ctx
            .check(&self.svn().args(["update", "-r", revision]))?;
        Ok(())
    }

    fn archive(&self, target: &Path) -> Result<()> {
        self.ctx.check(
            &self
                .svn()
                .args(["export", "--force", "-r", "BASE", "."])
                .path_arg(target),
        )?;
        Ok(())
    }
}

pub fn is_revision_number(rev: &str) -> bool {
    !rev.is_empty() && rev.chars().all(|c| c.is_ascii_digit())
}
