//! Git backend.
//!
//! First-time retrieval is `git init` + `git remote add origin` + a targeted
//! fetch, so a revision can be fetched directly whatever its nature. The
//! remote is asked with `git ls-remote` whether the revision is a branch or a
//! tag; anything else is assumed to be a raw commit id. A full 40 digit id
//! is fetched by id, an abbreviated one needs every ref fetched first. An
//! existing branch is reset to the fetched tip, which also copes with
//! shallow fetches and rewritten history.
//!
//! Raw commit ids are the one fragile case: a commit that is no longer
//! reachable from any ref upstream cannot be fetched any more, and servers
//! need `uploadpack.allowReachableSHA1InWant` for a shallow fetch by id.
//! Tags should be preferred.

use std::cell::OnceCell;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use log::{info, warn};
use regex::Regex;
use semver::Version;

use super::command::VcsCommand;
use super::{next_saved_key, Phase, RepoContext, Repository};
use crate::error::{Error, Result};

/// Prefix of the remotes keeping previous `origin` URLs.
const SAVED_REMOTE_PREFIX: &str = "saved_origin_";

/// Options specific to the git backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOptions {
    /// Shallow history depth for fetches.
    pub depth: Option<u32>,
}

impl GitOptions {
    pub fn from_context(ctx: &RepoContext) -> Result<Self> {
        let depth = match ctx.options.extra("depth") {
            None | Some("") => None,
            Some(value) => Some(value.parse::<u32>().map_err(|_| {
                Error::config(format!(
                    "Invalid git depth '{}' for {}: expected a positive integer",
                    value,
                    ctx.target_dir.display()
                ))
            })?),
        };
        Ok(Self { depth })
    }
}

/// What a revision designates on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Branch,
    Tag,
    Commit,
}

pub struct GitRepo {
    ctx: RepoContext,
    git_options: GitOptions,
    version: OnceCell<Version>,
}

impl GitRepo {
    pub fn new(ctx: RepoContext) -> Result<Self> {
        let git_options = GitOptions::from_context(&ctx)?;
        Ok(Self {
            ctx,
            git_options,
            version: OnceCell::new(),
        })
    }

    fn git(&self) -> VcsCommand {
        self.ctx.cmd("git")
    }

    /// Version of the installed git, parsed once per instance.
    pub fn git_version(&self) -> Result<Version> {
        if let Some(version) = self.version.get() {
            return Ok(version.clone());
        }
        let output = self.ctx.check(&VcsCommand::new("git").arg("--version"))?;
        let version = parse_git_version(&output.stdout_str())?;
        Ok(self.version.get_or_init(|| version).clone())
    }

    fn rev_parse_commit(&self, rev: &str) -> Result<Option<String>> {
        let output = self.ctx.output(
            &self
                .git()
                .args(["rev-parse", "--verify", "--quiet"])
                .arg(format!("{}^{{commit}}", rev)),
        )?;
        if !output.success {
            return Ok(None);
        }
        Ok(Some(output.stdout_str().trim().to_string()))
    }

    fn has_ref(&self, full_ref: &str) -> Result<bool> {
        let output = self
            .ctx
            .output(&self.git().args(["show-ref", "--verify", "--quiet", full_ref]))?;
        Ok(output.success)
    }

    /// Asks the remote whether `rev` is a branch or a tag.
    fn remote_ref_kind(&self, phase: Phase, rev: &str) -> Result<RefKind> {
        let output = self
            .ctx
            .call(phase, &self.git().args(["ls-remote", "origin"]).arg(rev))?;
        let listing = output.stdout_str();
        let refs: Vec<&str> = listing
            .lines()
            .filter_map(|line| line.split('\t').nth(1))
            .collect();
        if refs.contains(&format!("refs/heads/{}", rev).as_str()) {
            return Ok(RefKind::Branch);
        }
        if refs.contains(&format!("refs/tags/{}", rev).as_str()) {
            return Ok(RefKind::Tag);
        }
        if is_commit_id(rev)? {
            return Ok(RefKind::Commit);
        }
        Err(self.ctx.phase_error(
            phase,
            format!("revision '{}' is neither a branch, a tag nor a commit id of {}", rev, self.ctx.url),
        ))
    }

    fn fetch(&self, phase: Phase, rev: &str, kind: RefKind) -> Result<()> {
        let mut fetch = self.git().arg("fetch");
        if let Some(depth) = self.git_options.depth {
            fetch = fetch.arg(format!("--depth={}", depth));
        }
        fetch = fetch.arg("origin");
        let fetch = match kind {
            RefKind::Branch => fetch.arg(format!("+refs/heads/{0}:refs/remotes/origin/{0}", rev)),
            RefKind::Tag => fetch.arg(format!("+refs/tags/{0}:refs/tags/{0}", rev)),
            RefKind::Commit => {
                warn!(
                    "Fetching raw commit {} from {}: such commits can become unreachable \
                     upstream, prefer pinning a tag",
                    rev, self.ctx.url
                );
                if !is_full_commit_id(rev)? {
                    return self.fetch_all(phase, rev);
                }
                if self.git_options.depth.is_some() && self.git_version()? < Version::new(2, 5, 0) {
                    return Err(self.ctx.phase_error(
                        phase,
                        format!("shallow fetch of commit {} needs git >= 2.5", rev),
                    ));
                }
                fetch.arg(rev)
            }
        };
        self.ctx.call(phase, &fetch)?;
        Ok(())
    }

    /// Fetches every branch and tag of `origin`. Servers only hand out
    /// commits by full id, so an abbreviated one is looked up locally
    /// afterwards.
    fn fetch_all(&self, phase: Phase, rev: &str) -> Result<()> {
        let mut fetch = self.git().args(["fetch", "--tags"]);
        if self.git_options.depth.is_some() {
            warn!(
                "Ignoring depth for abbreviated commit {}: fetching the full history of {}",
                rev, self.ctx.url
            );
        }
        if self.ctx.target_dir.join(".git").join("shallow").exists() {
            fetch = fetch.arg("--unshallow");
        }
        self.ctx.call(phase, &fetch.arg("origin"))?;
        Ok(())
    }

    fn checkout(&self, phase: Phase, rev: &str, kind: RefKind) -> Result<()> {
        match kind {
            RefKind::Branch => {
                if self.has_ref(&format!("refs/heads/{}", rev))? {
                    self.ctx.call(phase, &self.git().args(["checkout", "-q", rev]))?;
                    // shallow or rewritten history may share no ancestor with the local tip
                    self.ctx.call(
                        phase,
                        &self
                            .git()
                            .args(["reset", "-q", "--hard"])
                            .arg(format!("origin/{}", rev)),
                    )?;
                } else {
                    self.ctx.call(
                        phase,
                        &self
                            .git()
                            .args(["checkout", "-q", "-b", rev])
                            .arg(format!("origin/{}", rev)),
                    )?;
                }
            }
            RefKind::Tag | RefKind::Commit => {
                self.ctx
                    .call(phase, &self.git().args(["checkout", "-q", "--detach", rev]))?;
            }
        }
        Ok(())
    }

    fn clone_at(&self, rev: &str) -> Result<()> {
        self.ctx.ensure_online(&format!("cloning {}", self.ctx.url))?;
        info!("Cloning {} into {}", self.ctx.url, self.ctx.target_dir.display());
        fs::create_dir_all(&self.ctx.target_dir)?;
        let result = (|| {
            self.ctx.call(Phase::Clone, &self.git().args(["init", "-q"]))?;
            self.ctx.call(
                Phase::Clone,
                &self.git().args(["remote", "add", "origin"]).arg(&self.ctx.url),
            )?;
            let kind = self.remote_ref_kind(Phase::Clone, rev)?;
            self.fetch(Phase::Clone, rev, kind)?;
            self.checkout(Phase::Clone, rev, kind)
        })();
        if result.is_err() {
            self.ctx.discard_partial_clone();
        }
        result
    }

    /// Points `origin` at the configured URL, keeping the old one as a
    /// `saved_origin_<n>` remote.
    fn sync_remote_url(&self) -> Result<()> {
        let output = self
            .ctx
            .output(&self.git().args(["config", "--get", "remote.origin.url"]))?;
        let current = output.stdout_str().trim().to_string();
        if output.success && current == self.ctx.url {
            return Ok(());
        }
        if !output.success || current.is_empty() {
            self.ctx.call(
                Phase::Update,
                &self.git().args(["remote", "add", "origin"]).arg(&self.ctx.url),
            )?;
            return Ok(());
        }
        let remotes = self.ctx.call(Phase::Update, &self.git().arg("remote"))?.stdout_str();
        let saved = next_saved_key(SAVED_REMOTE_PREFIX, remotes.lines().map(str::trim));
        info!(
            "Remote of {} changed from {} to {}, previous one kept as remote '{}'",
            self.ctx.target_dir.display(),
            current,
            self.ctx.url,
            saved
        );
        self.ctx.call(
            Phase::Update,
            &self.git().args(["remote", "add"]).arg(&saved).arg(&current),
        )?;
        self.ctx.call(
            Phase::Update,
            &self
                .git()
                .args(["remote", "set-url", "origin"])
                .arg(&self.ctx.url),
        )?;
        Ok(())
    }

    fn clear_locks(&self) -> Result<()> {
        let lock = self.ctx.target_dir.join(".git").join("index.lock");
        if lock.exists() {
            warn!("Removing stale lock {}", lock.display());
            fs::remove_file(lock)?;
        }
        Ok(())
    }

    /// Switches to `rev` using local objects only.
    fn update_offline(&self, rev: &str) -> Result<()> {
        let kind = if self.has_ref(&format!("refs/heads/{}", rev))? {
            self.ctx
                .call(Phase::Update, &self.git().args(["checkout", "-q", rev]))?;
            return Ok(());
        } else if self.has_ref(&format!("refs/tags/{}", rev))? {
            RefKind::Tag
        } else if self.rev_parse_commit(rev)?.is_some() {
            RefKind::Commit
        } else {
            return Err(self.ctx.phase_error(
                Phase::Update,
                format!("revision '{}' is not available locally and offline mode forbids fetching it", rev),
            ));
        };
        self.checkout(Phase::Update, rev, kind)
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
            &self
                .git()
                .args(["pull", "--no-edit"])
                .arg(&self.ctx.url)
                .arg(rev),
        )?;
        Ok(())
    }
}

impl Repository for GitRepo {
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
            return self.update_offline(revision);
        }
        self.sync_remote_url()?;
        if self.is_local_fixed_revision(revision)? {
            info!(
                "{} already has fixed revision {}, no fetch needed",
                self.ctx.target_dir.display(),
                revision
            );
            let kind = if self.has_ref(&format!("refs/tags/{}", revision))? {
                RefKind::Tag
            } else {
                RefKind::Commit
            };
            return self.checkout(Phase::Update, revision, kind);
        }
        let kind = self.remote_ref_kind(Phase::Update, revision)?;
        self.fetch(Phase::Update, revision, kind)?;
        self.checkout(Phase::Update, revision, kind)
    }

    fn uncommitted_changes(&self) -> Result<bool> {
        let output = self.ctx.check(&self.git().args(["status", "--porcelain"]))?;
        Ok(!output.stdout_str().trim().is_empty())
    }

    fn is_local_fixed_revision(&self, revspec: &str) -> Result<bool> {
        if !self.ctx.target_dir.join(".git").exists() {
            return Ok(false);
        }
        if self.has_ref(&format!("refs/tags/{}", revspec))? {
            return Ok(true);
        }
        if !is_commit_id(revspec)? {
            return Ok(false);
        }
        // a branch named like a hex string is not fixed
        if self.has_ref(&format!("refs/heads/{}", revspec))? {
            return Ok(false);
        }
        Ok(self
            .rev_parse_commit(revspec)?
            .map(|sha| sha.starts_with(revspec))
            .unwrap_or(false))
    }

    fn parents(&self, _pip_compatible: bool) -> Result<Vec<String>> {
        let head = self
            .ctx
            .check(&self.git().args(["rev-parse", "--verify", "HEAD"]))?;
        let mut parents = vec![head.stdout_str().trim().to_string()];
        let merge_head = self.ctx.target_dir.join(".git").join("MERGE_HEAD");
        if merge_head.exists() {
            let content = fs::read_to_string(merge_head)?;
            parents.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string),
            );
        }
        Ok(parents)
    }

    fn clean(&self) -> Result<()> {
        self.ctx.check(&self.git().args(["clean", "-fdqx"]))?;
        Ok(())
    }

    fn supports_revert(&self) -> bool {
        true
    }

    fn revert(&self, revision: &str) -> Result<()> {
        let remote_branch = format!("refs/remotes/origin/{}", revision);
        let target = if self.has_ref(&remote_branch)? {
            format!("origin/{}", revision)
        } else {
            revision.to_string()
        };
        self.ctx
            .check(&self.git().args(["reset", "-q", "--hard"]).arg(target))?;
        Ok(())
    }

    fn supports_merge(&self) -> bool {
        true
    }

    fn archive(&self, target: &Path) -> Result<()> {
        let output = self
            .ctx
            .check(&self.git().args(["archive", "--format=tar", "HEAD"]))?;
        fs::create_dir_all(target)?;
        tar::Archive::new(Cursor::new(output.stdout))
            .unpack(target)
            .map_err(|e| Error::Archive {
                path: target.to_path_buf(),
                message: e.to_string(),
            })
    }
}

/// True for 7 to 40 lowercase hex digits.
pub fn is_commit_id(rev: &str) -> Result<bool> {
    let pattern = Regex::new(r"^[0-9a-f]{7,40}$")?;
    Ok(pattern.is_match(rev))
}

/// True for a complete 40 hex digit object id.
pub fn is_full_commit_id(rev: &str) -> Result<bool> {
    let pattern = Regex::new(r"^[0-9a-f]{40}$")?;
    Ok(pattern.is_match(rev))
}

/// Parses `git version 2.39.2` (and vendor suffixes) into a semver.
pub fn parse_git_version(output: &str) -> Result<Version> {
    let pattern = Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?")?;
    let caps = pattern.captures(output).ok_or_else(|| Error::Command {
        command: "git --version".to_string(),
        target: ".".into(),
        stderr: format!("unexpected output: {}", output.trim()),
    })?;
    let patch = caps.get(3).map(|m| m.as_str()).unwrap_or("0");
    Ok(Version::parse(&format!("{}.{}.{}", &caps[1], &caps[2], patch))?)
}
