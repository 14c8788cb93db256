//! Shared test utilities for the CLI end-to-end tests.
//!
//! Add `mod common;` to a test file, then `use common::prelude::*;`.

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::configs;
    #[allow(unused_imports)]
    pub use super::{git, tool_available};
    pub use super::TestFixture;
}

/// Recipe snippets.
#[allow(dead_code)]
pub mod configs {
    /// Local main software and local addons only: retrieval needs no tool.
    pub const LOCAL_ONLY: &str = "[odoo]
version = local server
addons =
    local addons-a
    local addons-b ; second
";

    /// A version-controlled main software and grouped addons.
    pub const WITH_VCS: &str = "[recipe]
git-depth = 1

[odoo]
version = git https://example.com/odoo.git odoo 16.0
addons =
    git https://example.com/web.git web 16.0 group=oca
    hg https://example.com/tools tools default subdir=addons
    local custom
revisions =
    web 0123abc
merges =
    git https://example.com/fork.git web fix-branch
";

    /// An addon line missing its revision.
    pub const MALFORMED_ADDON: &str = "[odoo]
version = local server
addons = git https://example.com/web.git web
";

    /// Two parts, so `--part` is required.
    pub const TWO_PARTS: &str = "[odoo]
version = local server

[odoo-test]
version = local server-test
";
}

/// True when `program` can be run from `PATH`.
#[allow(dead_code)]
pub fn tool_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Runs git in `dir`, panicking on failure.
#[allow(dead_code)]
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A temporary directory holding a `recipe.cfg`.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

impl TestFixture {
    /// Create a new test fixture with an empty temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Write `recipe.cfg` with the given content.
    pub fn with_config(self, content: &str) -> Self {
        self.temp_dir
            .child("recipe.cfg")
            .write_str(content)
            .expect("Failed to write config file");
        self
    }

    /// Add a file with the given path and content.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.temp_dir
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
        self
    }

    #[allow(dead_code)]
    pub fn with_dir(self, path: &str) -> Self {
        self.temp_dir
            .child(path)
            .create_dir_all()
            .expect("Failed to create directory");
        self
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    #[allow(dead_code)]
    pub fn config_path(&self) -> PathBuf {
        self.temp_dir.path().join("recipe.cfg")
    }

    #[allow(dead_code)]
    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }

    /// A command running in the fixture directory, without inherited
    /// `RECIPE_SOURCES_CONFIG` or `RUST_LOG`.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("recipe-sources");
        cmd.current_dir(self.path())
            .env_remove("RECIPE_SOURCES_CONFIG")
            .env_remove("RUST_LOG")
            .arg("--color=never");
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
