//! Bazaar backend.
//!
//! The `init` option picks how a tree is created: a full `branch`, a
//! `stacked-branch` sharing history with its parent, or a
//! `lightweight-checkout` bound to the remote branch. `lp:` shortcuts are
//! resolved to the real location with `bzr info` before comparing parent
//! locations, which needs the network.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::Ini;
use log::{info, warn};
use regex::Regex;

use super::command::VcsCommand;
use super::{next_saved_key, Phase, RepoContext, Repository};
use crate::error::{Error, Result};

const SAVED_PARENT_PREFIX: &str = "saved_parent_location_";

/// How a Bazaar working tree is first created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BzrInit {
    #[default]
    Branch,
    StackedBranch,
    LightweightCheckout,
}

impl FromStr for BzrInit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "branch" => Ok(BzrInit::Branch),
            "stacked-branch" => Ok(BzrInit::StackedBranch),
            "lightweight-checkout" => Ok(BzrInit::LightweightCheckout),
            other => Err(Error::config_with_hint(
                format!("Invalid bzr init mode '{}'", other),
                "use one of branch, stacked-branch, lightweight-checkout",
            )),
        }
    }
}

pub struct BzrBranch {
    ctx: RepoContext,
    init: BzrInit,
}

impl BzrBranch {
    pub fn new(ctx: RepoContext) -> Result<Self> {
        let init = match ctx.options.extra("init") {
            None | Some("") => BzrInit::default(),
            Some(value) => value.parse()?,
        };
        Ok(Self { ctx, init })
    }

    fn bzr(&self) -> VcsCommand {
        self.ctx.cmd("bzr")
    }

    fn branch_conf_path(&self) -> PathBuf {
        self.ctx
            .target_dir
            .join(".bzr")
            .join("branch")
            .join("branch.conf")
    }

    fn revision_exists(&self, rev: &str) -> Result<bool> {
        let output = self
            .ctx
            .output(&self.bzr().args(["revision-info", "-r", rev]))?;
        Ok(output.success)
    }

    /// Turns an `lp:` shortcut into the branch location it designates.
    fn resolve_location(&self, phase: Phase) -> Result<String> {
        if !self.ctx.url.starts_with("lp:") {
            return Ok(self.ctx.url.clone());
        }
        self.ctx
            .ensure_online(&format!("resolving {}", self.ctx.url))?;
        let output = self.ctx.call(
            phase,
            &VcsCommand::new("bzr").arg("info").arg(&self.ctx.url),
        )?;
        parse_info_location(&output.stdout_str())?.ok_or_else(|| {
            self.ctx.phase_error(
                phase,
                format!("could not find the branch location of {} in `bzr info`", self.ctx.url),
            )
        })
    }

    fn clone_at(&self, rev: &str) -> Result<()> {
        self.ctx.ensure_online(&format!("branching {}", self.ctx.url))?;
        info!(
            "Creating {:?} of {} in {}",
            self.init,
            self.ctx.url,
            self.ctx.target_dir.display()
        );
        let cmd = self.ctx.cmd_in_parent("bzr")?;
        let cmd = match self.init {
            BzrInit::Branch => cmd.arg("branch"),
            BzrInit::StackedBranch => cmd.args(["branch", "--stacked"]),
            BzrInit::LightweightCheckout => cmd.args(["checkout", "--lightweight"]),
        };
        let cmd = cmd
            .args(["-r", rev])
            .arg(&self.ctx.url)
            .path_arg(&self.ctx.target_dir);
        let result = self.ctx.call(Phase::Clone, &cmd).map(|_| ());
        if result.is_err() {
            self.ctx.discard_partial_clone();
        }
        result
    }

    /// Makes `parent_location` the configured URL, keeping the previous one
    /// as `saved_parent_location_<n>`.
    fn sync_parent_location(&self) -> Result<()> {
        let conf_path = self.branch_conf_path();
        if !conf_path.exists() {
            // lightweight checkouts carry no branch configuration
            return Ok(());
        }
        let mut conf = Ini::load_from_file(&conf_path)?;
        let general = conf.general_section();
        let current = general.get("parent_location").map(str::to_string);
        let existing_keys: Vec<String> = general.iter().map(|(k, _)| k.to_string()).collect();
        let wanted = self.resolve_location(Phase::Update)?;
        let matches = current
            .as_deref()
            .map(|c| c.trim_end_matches('/') == wanted.trim_end_matches('/'))
            .unwrap_or(false);
        if matches {
            return Ok(());
        }
        if let Some(previous) = current {
            let saved = next_saved_key(SAVED_PARENT_PREFIX, existing_keys.iter().map(String::as_str));
            info!(
                "Parent of {} changed from {} to {}, previous one kept as '{}'",
                self.ctx.target_dir.display(),
                previous,
                wanted,
                saved
            );
            conf.with_general_section().set(saved, previous);
        }
        conf.with_general_section().set("parent_location", wanted);
        conf.write_to_file(&conf_path)?;
        Ok(())
    }

    fn update_tree(&self, phase: Phase, rev: &str) -> Result<()> {
        self.ctx
            .call(phase, &self.bzr().args(["update", "-r", rev]))?;
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
            &self.bzr().args(["merge", "-r", rev]).arg(&self.ctx.url),
        )?;
        Ok(())
    }

    /// Summary lines of merges not yet committed.
    fn pending_merges(&self) -> Result<Vec<String>> {
        let status = self.ctx.check(&self.bzr().arg("status"))?;
        Ok(parse_pending_merges(&status.stdout_str()))
    }

    fn current_revision(&self) -> Result<(String, String)> {
        let output = self
            .ctx
            .check(&self.bzr().args(["revision-info", "--tree"]))?;
        let text = output.stdout_str();
        let mut parts = text.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(revno), Some(revid)) => Ok((revno.to_string(), revid.to_string())),
            _ => Err(Error::Command {
                command: "bzr revision-info --tree".to_string(),
                target: self.ctx.target_dir.clone(),
                stderr: format!("unexpected output: {}", text.trim()),
            }),
        }
    }
}

impl Repository for BzrBranch {
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
            warn!("Breaking locks of {}", self.ctx.target_dir.display());
            self.ctx
                .call(Phase::Update, &self.bzr().args(["break-lock", "--force"]))?;
        }
        if self.ctx.options.offline {
            if !self.revision_exists(revision)? {
                return Err(self.ctx.phase_error(
                    Phase::Update,
                    format!(
                        "revision '{}' is not available locally and offline mode forbids pulling it",
                        revision
                    ),
                ));
            }
            return self.update_tree(Phase::Update, revision);
        }
        self.sync_parent_location()?;
        if self.is_local_fixed_revision(revision)? {
            info!(
                "{} already has fixed revision {}, no pull needed",
                self.ctx.target_dir.display(),
                revision
            );
            return self.update_tree(Phase::Update, revision);
        }
        match self.init {
            BzrInit::LightweightCheckout => self.update_tree(Phase::Update, revision),
            BzrInit::Branch | BzrInit::StackedBranch => {
                self.ctx.call(
                    Phase::Update,
                    &self.bzr().args(["pull", "--overwrite", "-r", revision]),
                )?;
                Ok(())
            }
        }
    }

    fn uncommitted_changes(&self) -> Result<bool> {
        let output = self.ctx.check(&self.bzr().arg("status"))?;
        Ok(!output.stdout_str().trim().is_empty())
    }

    /// Only `revid:` and `tag:` specs are fixed; revision numbers move with
    /// the branch.
    fn is_local_fixed_revision(&self, revspec: &str) -> Result<bool> {
        if !revspec.starts_with("revid:") && !revspec.starts_with("tag:") {
            return Ok(false);
        }
        if !self.ctx.target_dir.join(".bzr").exists() {
            return Ok(false);
        }
        self.revision_exists(revspec)
    }

    fn parents(&self, pip_compatible: bool) -> Result<Vec<String>> {
        let (revno, revid) = self.current_revision()?;
        let mut parents = vec![if pip_compatible {
            revno
        } else {
            format!("revid:{}", revid)
        }];
        parents.extend(self.pending_merges()?);
        Ok(parents)
    }

    fn clean(&self) -> Result<()> {
        self.ctx.check(&self.bzr().args([
            "clean-tree",
            "--ignored",
            "--unknown",
            "--detritus",
            "--force",
        ]))?;
        Ok(())
    }

    fn supports_revert(&self) -> bool {
        true
    }

    fn revert(&self, revision: &str) -> Result<()> {
        self.ctx
            .check(&self.bzr().args(["revert", "--no-backup"]))?;
        self.ctx
            .check(&self.bzr().args(["update", "-r", revision]))?;
        Ok(())
    }

    fn supports_merge(&self) -> bool {
        true
    }

    fn archive(&self, target: &Path) -> Result<()> {
        let (_, revid) = self.current_revision()?;
        self.ctx.check(
            &self
                .bzr()
                .arg("export")
                .arg("-r")
                .arg(format!("revid:{}", revid))
                .path_arg(target),
        )?;
        Ok(())
    }
}

/// Extracts the branch location from `bzr info` output.
pub fn parse_info_location(info: &str) -> Result<Option<String>> {
    for label in ["checkout of branch", "repository branch", "branch root"] {
        let pattern = Regex::new(&format!(r"(?m)^\s*{}:\s*(\S+)\s*$", label))?;
        if let Some(caps) = pattern.captures(info) {
            return Ok(Some(caps[1].to_string()));
        }
    }
    Ok(None)
}

/// Entries listed under `pending merge tips:` in `bzr status` output.
pub fn parse_pending_merges(status: &str) -> Vec<String> {
    let mut pending = Vec::new();
    let mut in_section = false;
    for line in status.lines() {
        if line.starts_with("pending merge") {
            in_section = true;
            continue;
        }
        if in_section {
            if !line.starts_with(' ') {
                in_section = false;
                continue;
            }
            let entry = line.trim();
            if !entry.is_empty() {
                pending.push(entry.to_string());
            }
        }
    }
    pending
}
