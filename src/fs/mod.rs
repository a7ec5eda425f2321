// src/fs/mod.rs

//! Storage backend for the shared directory tree.
//!
//! Everything that touches disk goes through [`FileSystem`], so the lock
//! manager and the stores can run against [`mock::MockFileSystem`] in tests.

use std::fmt::Debug;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result, anyhow};

pub mod mock;

/// Abstract filesystem interface.
pub trait FileSystem: Send + Sync + Debug {
    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Plain (non-atomic) write, creating parent directories.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Write to a sibling temp file, then rename over `path`.
    ///
    /// Readers observe either the old or the new contents, never a prefix.
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Create a single directory. Returns `Ok(false)` if it already exists.
    ///
    /// This is the mutual-exclusion primitive: of N concurrent callers
    /// exactly one observes `Ok(true)`.
    fn create_dir_exclusive(&self, path: &Path) -> Result<bool>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Remove a directory tree. Missing paths are not an error.
    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    fn exists(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;

    /// Return a list of entries in a directory.
    /// Returns full paths.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    fn modified(&self, path: &Path) -> Result<SystemTime>;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("reading file {:?}", path))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
        let mut file = fs::File::create(path).with_context(|| format!("creating file {:?}", path))?;
        file.write_all(contents).with_context(|| format!("writing to file {:?}", path))?;
        Ok(())
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let tmp = temp_sibling(path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }

        let result = (|| -> Result<()> {
            let mut file =
                fs::File::create(&tmp).with_context(|| format!("creating file {:?}", tmp))?;
            file.write_all(contents).with_context(|| format!("writing to file {:?}", tmp))?;
            file.sync_all().with_context(|| format!("syncing file {:?}", tmp))?;
            fs::rename(&tmp, path).with_context(|| format!("renaming {:?} to {:?}", tmp, path))?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn create_dir_exclusive(&self, path: &Path) -> Result<bool> {
        match fs::create_dir(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e).with_context(|| format!("creating dir {:?}", path)),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("creating dir {:?}", path))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).with_context(|| format!("removing file {:?}", path))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing dir {:?}", path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("reading dir {:?}", path))? {
            let entry = entry?;
            entries.push(entry.path());
        }
        Ok(entries)
    }

    fn modified(&self, path: &Path) -> Result<SystemTime> {
        let meta = fs::metadata(path).with_context(|| format!("stat {:?}", path))?;
        Ok(meta.modified()?)
    }
}

/// `<dir>/.<name>.tmp.<pid>.<uuid>`: unique per writer, never matches `*.json`.
fn temp_sibling(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("path has no file name: {:?}", path))?;
    let tmp_name = format!(
        ".{}.tmp.{}.{}",
        name,
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    );
    Ok(path.with_file_name(tmp_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_create_reports_existing() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFileSystem;
        let target = dir.path().join("res.lock");

        assert!(fs.create_dir_exclusive(&target).unwrap());
        assert!(!fs.create_dir_exclusive(&target).unwrap());

        fs.remove_dir_all(&target).unwrap();
        // Removing twice is fine.
        fs.remove_dir_all(&target).unwrap();
        assert!(!fs.exists(&target));
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFileSystem;
        let target = dir.path().join("tasks").join("T1.json");

        fs.write_atomic(&target, b"{\"a\":1}").unwrap();
        fs.write_atomic(&target, b"{\"a\":2}").unwrap();

        assert_eq!(fs.read_to_string(&target).unwrap(), "{\"a\":2}");
        let entries = fs.read_dir(&dir.path().join("tasks")).unwrap();
        assert_eq!(entries, vec![target]);
    }
}
