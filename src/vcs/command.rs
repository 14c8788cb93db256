//! Subprocess invocation for version-control backends.
//!
//! Every backend goes through a [`CommandRunner`] instead of calling
//! `std::process::Command` directly. The default [`SystemRunner`] executes
//! the real tool with an explicit working directory and a `C` locale so that
//! output parsing does not depend on the operator's language settings. Tests
//! swap in a scripted runner to check which commands a backend issues
//! without needing the VCS tools installed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

/// A fully described subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; `None` inherits the process one.
    pub cwd: Option<PathBuf>,
}

impl VcsCommand {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_string()));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        let arg = path.to_string_lossy().into_owned();
        self.arg(arg)
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// True when the first argument (the VCS subcommand) equals `sub`.
    pub fn is_subcommand(&self, sub: &str) -> bool {
        self.args.first().map(String::as_str) == Some(sub)
    }
}

impl fmt::Display for VcsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            success: true,
            stdout: stdout.as_bytes().to_vec(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: &str) -> Self {
        Self {
            success: false,
            stdout: Vec::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Diagnostic text for error messages: stderr, else stdout.
    pub fn diagnostic(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout_str().trim().to_string()
        } else {
            self.stderr.trim().to_string()
        }
    }
}

/// Executes [`VcsCommand`]s. Allows mocking in tests.
pub trait CommandRunner {
    fn run(&self, command: &VcsCommand) -> std::io::Result<CommandOutput>;
}

/// Runs commands with the system binaries found on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &VcsCommand) -> std::io::Result<CommandOutput> {
        debug!(
            "Running `{}` in {}",
            command,
            command
                .cwd
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ".".to_string())
        );
        let mut process = Command::new(&command.program);
        process.args(&command.args).env("LANG", "C").env("LC_ALL", "C");
        if let Some(cwd) = &command.cwd {
            process.current_dir(cwd);
        }
        let output = process.output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
