//! Under file system access
//!
//! The masters only need a handful of metadata operations on under storage:
//! existence checks when mounting, directory creation for persisted
//! directories, lengths of persisted files, and deletes and renames that
//! mirror namespace changes.

use std::io::ErrorKind;
use std::path::Path;
use tessera_common::{Error, Result};
use tracing::debug;

/// Metadata operations on an under storage system
pub trait UnderFileSystem: Send + Sync {
    /// Whether anything exists at `path`
    fn exists(&self, path: &str) -> Result<bool>;

    /// Whether `path` is an existing directory
    fn is_directory(&self, path: &str) -> Result<bool>;

    /// Create a directory and any missing parents
    fn mkdirs(&self, path: &str) -> Result<()>;

    /// Delete a file or directory; a missing path is not an error
    fn delete(&self, path: &str, recursive: bool) -> Result<()>;

    /// Move `src` to `dst`
    fn rename(&self, src: &str, dst: &str) -> Result<()>;

    /// Length of the file at `path`
    fn file_length(&self, path: &str) -> Result<u64>;
}

/// Under storage on the local file system
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalUnderFileSystem;

impl LocalUnderFileSystem {
    pub const fn new() -> Self {
        Self
    }
}

fn ufs_error(op: &str, path: &str, e: &std::io::Error) -> Error {
    Error::Ufs(format!("{op} {path} failed: {e}"))
}

impl UnderFileSystem for LocalUnderFileSystem {
    fn exists(&self, path: &str) -> Result<bool> {
        Path::new(path)
            .try_exists()
            .map_err(|e| ufs_error("stat", path, &e))
    }

    fn is_directory(&self, path: &str) -> Result<bool> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ufs_error("stat", path, &e)),
        }
    }

    fn mkdirs(&self, path: &str) -> Result<()> {
        std::fs::create_dir_all(path).map_err(|e| ufs_error("mkdir", path, &e))
    }

    fn delete(&self, path: &str, recursive: bool) -> Result<()> {
        let meta = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ufs_error("stat", path, &e)),
        };

        let result = if !meta.is_dir() {
            std::fs::remove_file(path)
        } else if recursive {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_dir(path)
        };

        match result {
            Ok(()) => {
                debug!("Deleted under storage path {}", path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ufs_error("delete", path, &e)),
        }
    }

    fn rename(&self, src: &str, dst: &str) -> Result<()> {
        std::fs::rename(src, dst).map_err(|e| ufs_error("rename", src, &e))
    }

    fn file_length(&self, path: &str) -> Result<u64> {
        std::fs::metadata(path)
            .map(|meta| meta.len())
            .map_err(|e| ufs_error("stat", path, &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_local_ufs_basics() {
        let dir = tempdir().unwrap();
        let ufs = LocalUnderFileSystem::new();
        let base = dir.path().to_string_lossy().into_owned();

        let nested = format!("{base}/a/b");
        ufs.mkdirs(&nested).unwrap();
        assert!(ufs.is_directory(&nested).unwrap());

        let file = format!("{nested}/data");
        std::fs::write(&file, b"12345").unwrap();
        assert!(ufs.exists(&file).unwrap());
        assert!(!ufs.is_directory(&file).unwrap());
        assert_eq!(ufs.file_length(&file).unwrap(), 5);

        let moved = format!("{base}/a/data");
        ufs.rename(&file, &moved).unwrap();
        assert!(!ufs.exists(&file).unwrap());

        ufs.delete(&format!("{base}/a"), true).unwrap();
        assert!(!ufs.exists(&moved).unwrap());
        // Deleting again is fine
        ufs.delete(&format!("{base}/a"), true).unwrap();
    }

    #[test]
    fn test_non_recursive_delete_of_non_empty_dir_fails() {
        let dir = tempdir().unwrap();
        let ufs = LocalUnderFileSystem::new();
        let base = dir.path().to_string_lossy().into_owned();
        std::fs::write(format!("{base}/f"), b"x").unwrap();

        assert!(matches!(ufs.delete(&base, false), Err(Error::Ufs(_))));
    }
}
