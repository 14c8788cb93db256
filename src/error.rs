//! # Error Handling
//!
//! This module defines the centralized error type for `recipe-sources`. It
//! uses `thiserror` to build a single `Error` enum whose variants mirror the
//! failure kinds the retrieval pipeline has to tell apart:
//!
//! - **`Config`**: malformed declarative input, unsupported backend names,
//!   disallowed option combinations. Reported immediately, never retried.
//! - **`Clone`**: a failure while creating a working tree for the first time.
//! - **`Update`**: a failure while reconciling an existing working tree. The
//!   retry wrapper in [`crate::vcs`] may wipe the target and clone again.
//! - **`Offline`**: something needed the network while offline mode is on.
//! - **`DirtyState`**: freeze found local modifications or pending merges.
//! - **`Unsupported`**: a backend cannot perform an optional operation such as
//!   `revert`. Callers log it as a warning and move on.
//!
//! Wrapped library errors (I/O, INI, HTTP, JSON, URL, semver, regex) are
//! converted with `#[from]` so `?` works across the crate.

use std::path::PathBuf;

use thiserror::Error;

use crate::exit_codes;
use crate::installer::InstallError;

/// Main error type for recipe-sources operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or inconsistent configuration.
    ///
    /// The message echoes the offending line or option so the operator can
    /// fix the input without reading logs.
    #[error("Configuration error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    Config {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// Creating a working tree from scratch failed.
    #[error("{backend} clone of {url} into {} failed: {message}", target.display())]
    Clone {
        backend: String,
        url: String,
        target: PathBuf,
        message: String,
    },

    /// Reconciling an existing working tree failed.
    #[error("{backend} update of {} failed: {message}", target.display())]
    Update {
        backend: String,
        target: PathBuf,
        message: String,
    },

    /// A network operation was required while offline mode is active.
    #[error("Offline mode forbids {action} for {}", target.display())]
    Offline { target: PathBuf, action: String },

    /// Freeze refused because some sources carry local modifications.
    #[error("Local modifications or pending merges found, refusing to freeze:{}", paths.iter().map(|p| format!("\n  - {}", p.display())).collect::<String>())]
    DirtyState { paths: Vec<PathBuf> },

    /// A backend does not implement an optional operation.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported { backend: String, operation: String },

    /// A working-directory keeper was entered while another one is active.
    #[error("Working directory keeper already active in {}", active.display())]
    NestedWorkdir { active: PathBuf },

    /// A subprocess failed outside of clone/update classification.
    #[error("Command failed in {}: {command} - {stderr}", target.display())]
    Command {
        command: String,
        target: PathBuf,
        stderr: String,
    },

    /// Downloading an archive failed.
    #[error("Download of {url} failed: {message}")]
    Download { url: String, message: String },

    /// Reading or unpacking an archive failed.
    #[error("Archive error for {}: {message}", path.display())]
    Archive { path: PathBuf, message: String },

    /// The package installer collaborator reported a failure.
    #[error("Package installation failed: {0}")]
    Install(#[from] InstallError),

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A VCS-side INI file (hgrc, branch.conf) could not be read.
    #[error("INI parsing error: {0}")]
    Ini(#[from] ini::Error),

    /// An HTTP client error, wrapped from `reqwest::Error`.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// A version string of a VCS tool could not be parsed.
    #[error("Version parsing error: {0}")]
    Semver(#[from] semver::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A glob pattern error, wrapped from `glob::PatternError`.
    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),
}

impl Error {
    /// Shorthand for a configuration error without hint.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            hint: None,
        }
    }

    /// Shorthand for a configuration error carrying a hint.
    pub fn config_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn is_update_error(&self) -> bool {
        matches!(self, Error::Update { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported { .. })
    }

    /// Process exit status the binary should use for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config { .. } => exit_codes::CONFIG,
            Error::DirtyState { .. } => exit_codes::DIRTY_STATE,
            _ => exit_codes::ERROR,
        }
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
