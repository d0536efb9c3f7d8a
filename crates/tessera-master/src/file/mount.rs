//! Mount table
//!
//! Maps namespace paths to under storage locations. The root is always
//! mounted; other mount points never nest inside one another, and no two
//! mounts share or nest under storage locations.

use super::options::MountOptions;
use std::collections::BTreeMap;
use tessera_common::{Error, FsPath, Result};

/// One mount table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub path: FsPath,
    pub ufs_path: String,
    pub options: MountOptions,
}

/// Strip trailing separators, keeping a lone `/`
pub fn normalize_ufs_path(ufs_path: &str) -> String {
    let trimmed = ufs_path.trim_end_matches('/');
    if trimmed.is_empty() && ufs_path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Whether under storage path `a` is `b` or contains it
fn ufs_contains(a: &str, b: &str) -> bool {
    a == b || a == "/" || b.strip_prefix(a).is_some_and(|rest| rest.starts_with('/'))
}

/// Join an under storage base path with a relative namespace path
fn ufs_join(base: &str, relative: &str) -> String {
    if relative.is_empty() {
        base.to_string()
    } else if base.ends_with('/') {
        format!("{base}{relative}")
    } else {
        format!("{base}/{relative}")
    }
}

#[derive(Debug, Clone)]
pub struct MountTable {
    mounts: BTreeMap<FsPath, MountInfo>,
}

impl MountTable {
    /// Table holding only the root mount
    pub fn new(root_ufs: &str) -> Self {
        let mut mounts = BTreeMap::new();
        mounts.insert(
            FsPath::root(),
            MountInfo {
                path: FsPath::root(),
                ufs_path: normalize_ufs_path(root_ufs),
                options: MountOptions::default(),
            },
        );
        Self { mounts }
    }

    /// Check that `path` may be mounted on `ufs_path`
    pub fn validate_mount(&self, path: &FsPath, ufs_path: &str) -> Result<()> {
        if path.is_root() || self.mounts.contains_key(path) {
            return Err(Error::invalid_path(path.as_str(), "is already a mount point"));
        }
        for (mounted, info) in &self.mounts {
            if !mounted.is_root() && (mounted.is_ancestor_of(path) || path.is_ancestor_of(mounted)) {
                return Err(Error::invalid_path(
                    path.as_str(),
                    format!("mount point would nest with {mounted}"),
                ));
            }
            if ufs_contains(&info.ufs_path, ufs_path) || ufs_contains(ufs_path, &info.ufs_path) {
                return Err(Error::invalid_path(
                    path.as_str(),
                    format!(
                        "under storage path {ufs_path} overlaps {} mounted at {mounted}",
                        info.ufs_path
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Insert an entry without validation
    pub fn add(&mut self, path: FsPath, ufs_path: &str, options: MountOptions) {
        self.mounts.insert(
            path.clone(),
            MountInfo {
                path,
                ufs_path: normalize_ufs_path(ufs_path),
                options,
            },
        );
    }

    pub fn remove(&mut self, path: &FsPath) -> Option<MountInfo> {
        if path.is_root() {
            return None;
        }
        self.mounts.remove(path)
    }

    pub fn get(&self, path: &FsPath) -> Option<&MountInfo> {
        self.mounts.get(path)
    }

    pub fn is_mount_point(&self, path: &FsPath) -> bool {
        self.mounts.contains_key(path)
    }

    /// Whether some mount point lies strictly below `path`
    pub fn has_mount_below(&self, path: &FsPath) -> bool {
        self.mounts.keys().any(|mounted| path.is_ancestor_of(mounted))
    }

    /// The mount covering `path`: the deepest mount point at or above it
    pub fn mount_of(&self, path: &FsPath) -> &MountInfo {
        self.mounts
            .values()
            .filter(|info| info.path == *path || info.path.is_ancestor_of(path))
            .max_by_key(|info| info.path.depth())
            .unwrap_or_else(|| &self.mounts[&FsPath::root()])
    }

    /// Under storage location of `path`
    pub fn resolve(&self, path: &FsPath) -> String {
        let mount = self.mount_of(path);
        ufs_join(&mount.ufs_path, path.relative_to(&mount.path).unwrap_or(""))
    }

    /// Entries in path order
    pub fn list(&self) -> Vec<MountInfo> {
        self.mounts.values().cloned().collect()
    }

    /// Entries other than the root, in path order
    pub fn non_root(&self) -> impl Iterator<Item = &MountInfo> {
        self.mounts.values().filter(|info| !info.path.is_root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> FsPath {
        FsPath::new(p).unwrap()
    }

    fn table() -> MountTable {
        let mut table = MountTable::new("/data/underfs/");
        table.add(path("/mnt/a"), "/external/a", MountOptions::default());
        table
    }

    #[test]
    fn test_resolve() {
        let table = table();
        assert_eq!(table.resolve(&FsPath::root()), "/data/underfs");
        assert_eq!(table.resolve(&path("/x/y")), "/data/underfs/x/y");
        assert_eq!(table.resolve(&path("/mnt/a")), "/external/a");
        assert_eq!(table.resolve(&path("/mnt/a/f")), "/external/a/f");
        assert_eq!(table.resolve(&path("/mnt/ab")), "/data/underfs/mnt/ab");
        assert_eq!(table.mount_of(&path("/mnt/a/f")).path, path("/mnt/a"));
    }

    #[test]
    fn test_nested_mounts_are_rejected() {
        let table = table();
        assert!(table.validate_mount(&path("/mnt/a"), "/other").is_err());
        assert!(table.validate_mount(&path("/mnt/a/b"), "/other").is_err());
        assert!(table.validate_mount(&path("/mnt"), "/other").is_err());
        assert!(table.validate_mount(&FsPath::root(), "/other").is_err());
        assert!(table.validate_mount(&path("/mnt/b"), "/other").is_ok());
    }

    #[test]
    fn test_overlapping_ufs_paths_are_rejected() {
        let table = table();
        assert!(table.validate_mount(&path("/b"), "/external/a").is_err());
        assert!(table.validate_mount(&path("/b"), "/external/a/sub").is_err());
        assert!(table.validate_mount(&path("/b"), "/external").is_err());
        assert!(table.validate_mount(&path("/b"), "/data/underfs/b").is_err());
        assert!(table.validate_mount(&path("/b"), "/external/ab").is_ok());
    }

    #[test]
    fn test_mount_below() {
        let table = table();
        assert!(table.has_mount_below(&path("/mnt")));
        assert!(table.has_mount_below(&FsPath::root()));
        assert!(!table.has_mount_below(&path("/mnt/a")));
        assert!(table.is_mount_point(&path("/mnt/a")));
    }

    #[test]
    fn test_remove_keeps_root() {
        let mut table = table();
        assert!(table.remove(&FsPath::root()).is_none());
        assert!(table.remove(&path("/mnt/a")).is_some());
        assert_eq!(table.list().len(), 1);
    }

    #[test]
    fn test_normalize_ufs_path() {
        assert_eq!(normalize_ufs_path("/a/b/"), "/a/b");
        assert_eq!(normalize_ufs_path("/"), "/");
        assert_eq!(normalize_ufs_path("///"), "/");
    }
}
