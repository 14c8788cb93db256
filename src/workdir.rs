//! Scoped process working-directory changes.
//!
//! The process has exactly one current directory, so [`WorkingDirectoryKeeper`]
//! refuses to nest: entering a second keeper while one is alive is a
//! programming error reported as [`Error::NestedWorkdir`]. The previous
//! directory is restored when the keeper is dropped, on every exit path.
//!
//! Backends never need this (they pass an explicit directory to each
//! subprocess); it exists for the CLI's `-C DIR` switch and for tools that
//! only work relative to the current directory.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::warn;

use crate::error::{Error, Result};

static ACTIVE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Guard restoring the previous working directory on drop.
#[derive(Debug)]
pub struct WorkingDirectoryKeeper {
    previous: PathBuf,
}

impl WorkingDirectoryKeeper {
    /// Changes the process working directory to `dir` until the guard drops.
    pub fn enter(dir: &Path) -> Result<Self> {
        let mut active = ACTIVE.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = active.as_ref() {
            return Err(Error::NestedWorkdir {
                active: current.clone(),
            });
        }
        let previous = env::current_dir()?;
        env::set_current_dir(dir)?;
        *active = Some(dir.to_path_buf());
        Ok(Self { previous })
    }

    /// The directory that will be restored.
    pub fn previous(&self) -> &Path {
        &self.previous
    }
}

impl Drop for WorkingDirectoryKeeper {
    fn drop(&mut self) {
        if let Err(e) = env::set_current_dir(&self.previous) {
            warn!(
                "Could not restore working directory {}: {}",
                self.previous.display(),
                e
            );
        }
        let mut active = ACTIVE.lock().unwrap_or_else(|e| e.into_inner());
        *active = None;
    }
}

/// Runs `f` with the process working directory set to `dir`.
pub fn with_working_directory<T>(dir: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let _keeper = WorkingDirectoryKeeper::enter(dir)?;
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_keeper_restores_directory() {
        let original = env::current_dir().unwrap();
        let temp = TempDir::new().unwrap();
        let target = temp.path().canonicalize().unwrap();

        {
            let keeper = WorkingDirectoryKeeper::enter(&target).unwrap();
            assert_eq!(env::current_dir().unwrap().canonicalize().unwrap(), target);
            assert_eq!(keeper.previous(), original.as_path());
        }

        assert_eq!(env::current_dir().unwrap(), original);
    }

    #[test]
    #[serial]
    fn test_keeper_refuses_nesting() {
        let original = env::current_dir().unwrap();
        let temp = TempDir::new().unwrap();

        let _keeper = WorkingDirectoryKeeper::enter(temp.path()).unwrap();
        let nested = WorkingDirectoryKeeper::enter(&original);
        assert!(matches!(nested, Err(Error::NestedWorkdir { .. })));
        drop(_keeper);

        assert_eq!(env::current_dir().unwrap(), original);
        // released again once the first keeper is gone
        let again = WorkingDirectoryKeeper::enter(temp.path());
        assert!(again.is_ok());
    }

    #[test]
    #[serial]
    fn test_restores_on_error_path() {
        let original = env::current_dir().unwrap();
        let temp = TempDir::new().unwrap();

        let result: Result<()> = with_working_directory(temp.path(), || {
            Err(Error::config("boom"))
        });

        assert!(result.is_err());
        assert_eq!(env::current_dir().unwrap(), original);
    }

    #[test]
    #[serial]
    fn test_missing_directory_is_io_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");
        let result = WorkingDirectoryKeeper::enter(&missing);
        assert!(matches!(result, Err(Error::Io(_))));
        // a failed enter must not leave the keeper marked active
        assert!(WorkingDirectoryKeeper::enter(temp.path()).is_ok());
    }
}
