//! Backend-agnostic removal of Python bytecode artifacts.

use std::fs;
use std::path::Path;

use glob::Pattern;
use log::debug;
use walkdir::WalkDir;

use crate::error::Result;

/// File name patterns of compiled Python objects.
const OBJECT_PATTERNS: &[&str] = &["*.pyc", "*.pyo"];

/// Directories never descended into.
const METADATA_DIRS: &[&str] = &[".git", ".hg", ".bzr", ".svn"];

/// Removes compiled bytecode under `dir` and the `__pycache__` directories
/// left empty afterwards. Returns silently when `dir` does not exist.
pub fn clean_object_files(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    let patterns = OBJECT_PATTERNS
        .iter()
        .map(|p| Pattern::new(p))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut caches = Vec::new();
    let walker = WalkDir::new(dir).into_iter().filter_entry(|e| {
        !(e.file_type().is_dir()
            && METADATA_DIRS
                .iter()
                .any(|m| e.file_name().to_str() == Some(m)))
    });
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            if name == "__pycache__" {
                caches.push(entry.path().to_path_buf());
            }
            continue;
        }
        if patterns.iter().any(|p| p.matches(&name)) {
            debug!("Removing {}", entry.path().display());
            fs::remove_file(entry.path())?;
        }
    }

    for cache in caches {
        // only empty caches go; anything else there is not ours
        if fs::read_dir(&cache)?.next().is_none() {
            fs::remove_dir(&cache)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_removes_bytecode_only() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("pkg/__pycache__")).unwrap();
        fs::write(root.join("pkg/mod.py"), "x = 1").unwrap();
        fs::write(root.join("pkg/mod.pyc"), "bytecode").unwrap();
        fs::write(root.join("pkg/old.pyo"), "bytecode").unwrap();
        fs::write(root.join("pkg/__pycache__/mod.cpython-311.pyc"), "b").unwrap();

        clean_object_files(root).unwrap();

        assert!(root.join("pkg/mod.py").exists());
        assert!(!root.join("pkg/mod.pyc").exists());
        assert!(!root.join("pkg/old.pyo").exists());
        assert!(!root.join("pkg/__pycache__").exists());
    }

    #[test]
    fn test_skips_vcs_metadata() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join(".hg/store")).unwrap();
        fs::write(root.join(".hg/store/data.pyc"), "tracked by hg").unwrap();

        clean_object_files(root).unwrap();

        assert!(root.join(".hg/store/data.pyc").exists());
    }

    #[test]
    fn test_keeps_non_empty_pycache() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("__pycache__")).unwrap();
        fs::write(root.join("__pycache__/notes.txt"), "keep").unwrap();

        clean_object_files(root).unwrap();

        assert!(root.join("__pycache__/notes.txt").exists());
    }

    #[test]
    fn test_missing_directory_is_noop() {
        let temp = TempDir::new().unwrap();
        assert!(clean_object_files(&temp.path().join("missing")).is_ok());
    }
}
