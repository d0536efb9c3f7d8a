//! Journaled namespace state
//!
//! The inode tree and the mount table, and the single function that applies
//! a journal entry to them. Runtime mutations and replay both go through
//! [`Namespace::apply`], so replay rebuilds exactly the state the master
//! had.

use super::inode::{DirState, Inode, InodeKind};
use super::mount::MountTable;
use super::options::MountOptions;
use super::tree::InodeTree;
use std::collections::BTreeMap;
use tessera_common::{
    Error, FileInfo, FsPath, InodeId, MasterConfig, Result, TtlAction,
};
use tessera_journal::JournalEntry;

/// An inode whose TTL has elapsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlCandidate {
    pub id: InodeId,
    pub path: FsPath,
    pub expires_at: u64,
    pub action: TtlAction,
}

#[derive(Debug)]
pub struct Namespace {
    pub tree: InodeTree,
    pub mounts: MountTable,
}

impl Namespace {
    /// An empty namespace: a persisted root directory mounted on the
    /// configured root under storage
    pub fn new(config: &MasterConfig) -> Self {
        let root = Inode {
            id: InodeId::for_directory(0),
            parent_id: None,
            name: String::new(),
            creation_time_ms: 0,
            last_modification_time_ms: 0,
            owner: config.default_owner.clone(),
            group: config.default_group.clone(),
            mode: config.directory_mode(),
            ttl: None,
            persisted: true,
            pinned: false,
            kind: InodeKind::Directory(DirState {
                children: BTreeMap::new(),
                mount_point: false,
            }),
        };
        Self {
            tree: InodeTree::new(root),
            mounts: MountTable::new(&config.root_ufs),
        }
    }

    /// Apply one (non batch) journal entry
    pub fn apply(&mut self, entry: JournalEntry) -> Result<()> {
        match entry {
            JournalEntry::InodeDirectory(entry) if entry.parent_id.is_none() => {
                // Root attributes from a checkpoint; children stay
                let root_id = self.tree.root_id();
                let root = self.tree.get_or_corrupt(root_id)?;
                root.creation_time_ms = entry.creation_time_ms;
                root.last_modification_time_ms = entry.last_modification_time_ms;
                root.owner = entry.owner;
                root.group = entry.group;
                root.mode = entry.mode;
                root.ttl = entry.ttl;
                root.persisted = entry.persisted;
                root.pinned = entry.pinned;
            }
            JournalEntry::InodeDirectory(entry) => {
                self.tree.insert(Inode::from_directory_entry(entry))?;
            }
            JournalEntry::InodeFile(entry) => {
                self.tree.insert(Inode::from_file_entry(entry))?;
            }
            JournalEntry::InodeDirectoryIdGenerator { next_sequence } => {
                self.tree.advance_directory_sequence(next_sequence);
            }
            JournalEntry::AllocateBlock { file_id, block_id } => {
                let file = self
                    .tree
                    .get_or_corrupt(file_id)?
                    .as_file_mut()
                    .ok_or_else(|| Error::internal(format!("{file_id} is not a file")))?;
                if file.completed {
                    return Err(Error::internal(format!(
                        "block allocated for completed file {file_id}"
                    )));
                }
                file.block_ids.push(block_id);
            }
            JournalEntry::CompleteFile {
                file_id,
                length,
                op_time_ms,
            } => {
                let inode = self.tree.get_or_corrupt(file_id)?;
                inode.last_modification_time_ms = op_time_ms;
                let file = inode
                    .as_file_mut()
                    .ok_or_else(|| Error::internal(format!("{file_id} is not a file")))?;
                file.completed = true;
                file.length = length;
            }
            JournalEntry::DeleteFile {
                file_id,
                op_time_ms,
            } => {
                self.tree.remove_subtree(file_id, op_time_ms)?;
            }
            JournalEntry::Rename {
                file_id,
                dst_parent_id,
                dst_name,
                op_time_ms,
            } => {
                self.tree
                    .relink(file_id, dst_parent_id, &dst_name, op_time_ms)?;
            }
            JournalEntry::SetAttribute(entry) => {
                let inode = self.tree.get_or_corrupt(entry.id)?;
                if let Some(pinned) = entry.pinned {
                    inode.pinned = pinned;
                }
                if let Some(ttl) = entry.ttl {
                    inode.ttl = ttl;
                }
                if let Some(persisted) = entry.persisted {
                    inode.persisted = persisted;
                }
                if let Some(owner) = entry.owner {
                    inode.owner = owner;
                }
                if let Some(group) = entry.group {
                    inode.group = group;
                }
                if let Some(mode) = entry.mode {
                    inode.mode = mode;
                }
                inode.last_modification_time_ms = entry.op_time_ms;
            }
            JournalEntry::PersistDirectory { dir_id } => {
                self.tree.get_or_corrupt(dir_id)?.persisted = true;
            }
            JournalEntry::AddMountPoint {
                path,
                ufs_path,
                read_only,
            } => {
                let path = FsPath::new(&path)?;
                self.mounts.add(path, &ufs_path, MountOptions { read_only });
            }
            JournalEntry::DeleteMountPoint { path } => {
                self.mounts.remove(&FsPath::new(&path)?);
            }
            other => {
                return Err(Error::JournalCorrupted(format!(
                    "unexpected {} entry in file system journal",
                    other.kind()
                )));
            }
        }
        Ok(())
    }

    /// Entries that rebuild this namespace from an empty one
    pub fn checkpoint_entries(&self) -> Vec<JournalEntry> {
        let mut entries = vec![JournalEntry::InodeDirectoryIdGenerator {
            next_sequence: self.tree.next_directory_sequence(),
        }];
        entries.extend(self.tree.iter_preorder().map(Inode::to_journal_entry));
        entries.extend(self.mounts.non_root().map(|info| JournalEntry::AddMountPoint {
            path: info.path.to_string(),
            ufs_path: info.ufs_path.clone(),
            read_only: info.options.read_only,
        }));
        entries
    }

    /// Client view of an inode at a known path
    pub fn file_info(&self, inode: &Inode, path: &FsPath) -> FileInfo {
        let (length, block_size_bytes, completed, cacheable) = match &inode.kind {
            InodeKind::File(file) => (
                file.length,
                file.block_size_bytes,
                file.completed,
                file.cacheable,
            ),
            InodeKind::Directory(_) => (0, 0, true, false),
        };
        FileInfo {
            file_id: inode.id,
            name: inode.name.clone(),
            path: path.to_string(),
            ufs_path: self.mounts.resolve(path),
            length,
            block_size_bytes,
            creation_time_ms: inode.creation_time_ms,
            last_modification_time_ms: inode.last_modification_time_ms,
            completed,
            folder: inode.is_directory(),
            pinned: inode.pinned,
            cacheable,
            persisted: inode.persisted,
            mount_point: self.mounts.is_mount_point(path) && !path.is_root(),
            block_ids: inode.block_ids().to_vec(),
            ttl: inode.ttl,
            owner: inode.owner.clone(),
            group: inode.group.clone(),
            mode: inode.mode,
        }
    }

    /// Inodes whose TTL elapsed by `now_ms`, shallowest first
    pub fn ttl_candidates(&self, now_ms: u64) -> Vec<TtlCandidate> {
        let mut candidates: Vec<TtlCandidate> = self
            .tree
            .iter_preorder()
            .filter_map(|inode| {
                let (expires_at, action) = inode.expiry()?;
                if expires_at > now_ms {
                    return None;
                }
                Some(TtlCandidate {
                    id: inode.id,
                    path: self.tree.path_of(inode.id)?,
                    expires_at,
                    action,
                })
            })
            .collect();
        candidates.sort_by_key(|c| c.path.depth());
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::{BlockId, Ttl};
    use tessera_journal::{InodeDirectoryEntry, InodeFileEntry, SetAttributeEntry};

    fn config() -> MasterConfig {
        MasterConfig::with_data_dir("/tmp/tessera-test")
    }

    fn dir_entry(seq: u64, parent: InodeId, name: &str) -> JournalEntry {
        JournalEntry::InodeDirectory(InodeDirectoryEntry {
            id: InodeId::for_directory(seq),
            parent_id: Some(parent),
            name: name.into(),
            creation_time_ms: 5,
            last_modification_time_ms: 5,
            owner: "o".into(),
            group: "g".into(),
            mode: 0o755,
            ttl: None,
            persisted: false,
            pinned: false,
            mount_point: false,
        })
    }

    fn file_entry(container: u64, parent: InodeId, name: &str, ttl: Option<Ttl>) -> JournalEntry {
        JournalEntry::InodeFile(InodeFileEntry {
            id: InodeId::for_container(container),
            parent_id: parent,
            name: name.into(),
            creation_time_ms: 10,
            last_modification_time_ms: 10,
            owner: "o".into(),
            group: "g".into(),
            mode: 0o644,
            ttl,
            persisted: false,
            pinned: false,
            cacheable: true,
            block_size_bytes: 1024,
            length: 0,
            completed: false,
            block_ids: Vec::new(),
        })
    }

    fn populated() -> Namespace {
        let mut ns = Namespace::new(&config());
        let root = ns.tree.root_id();
        let dir = InodeId::for_directory(1);
        let file = InodeId::for_container(0);
        for entry in [
            dir_entry(1, root, "dir"),
            JournalEntry::InodeDirectoryIdGenerator { next_sequence: 2 },
            file_entry(0, dir, "file", Some(Ttl::delete_after(5))),
            JournalEntry::AllocateBlock {
                file_id: file,
                block_id: BlockId::from_parts(0, 0),
            },
            JournalEntry::CompleteFile {
                file_id: file,
                length: 100,
                op_time_ms: 20,
            },
            JournalEntry::SetAttribute(SetAttributeEntry {
                id: dir,
                op_time_ms: 30,
                pinned: Some(true),
                ..Default::default()
            }),
            JournalEntry::AddMountPoint {
                path: "/mnt".into(),
                ufs_path: "/elsewhere".into(),
                read_only: true,
            },
        ] {
            ns.apply(entry).unwrap();
        }
        ns
    }

    #[test]
    fn test_apply_builds_tree() {
        let ns = populated();
        let file_path = FsPath::new("/dir/file").unwrap();
        let file_id = ns.tree.resolve(&file_path).unwrap();
        let info = ns.file_info(ns.tree.get(file_id).unwrap(), &file_path);
        assert!(info.completed);
        assert_eq!(info.length, 100);
        assert_eq!(info.block_ids, vec![BlockId::from_parts(0, 0)]);
        assert_eq!(info.ufs_path, "/tmp/tessera-test/underfs/dir/file");
        assert!(ns.tree.get(InodeId::for_directory(1)).unwrap().pinned);
        assert!(ns.mounts.get(&FsPath::new("/mnt").unwrap()).unwrap().options.read_only);
    }

    #[test]
    fn test_block_after_completion_is_rejected() {
        let mut ns = populated();
        let result = ns.apply(JournalEntry::AllocateBlock {
            file_id: InodeId::for_container(0),
            block_id: BlockId::from_parts(0, 1),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_block_entries_do_not_belong_here() {
        let mut ns = Namespace::new(&config());
        let result = ns.apply(JournalEntry::BlockInfo {
            block_id: BlockId::new(1),
            length: 1,
        });
        assert!(matches!(result, Err(Error::JournalCorrupted(_))));
    }

    #[test]
    fn test_checkpoint_entries_rebuild_namespace() {
        let ns = populated();
        let mut rebuilt = Namespace::new(&config());
        for entry in ns.checkpoint_entries() {
            rebuilt.apply(entry).unwrap();
        }

        let original: Vec<_> = ns.tree.iter_preorder().cloned().collect();
        let copy: Vec<_> = rebuilt.tree.iter_preorder().cloned().collect();
        assert_eq!(original, copy);
        assert_eq!(ns.mounts.list(), rebuilt.mounts.list());
        assert_eq!(
            ns.tree.next_directory_sequence(),
            rebuilt.tree.next_directory_sequence()
        );
    }

    #[test]
    fn test_ttl_candidates() {
        let ns = populated();
        assert!(ns.ttl_candidates(14).is_empty());
        let candidates = ns.ttl_candidates(15);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].path.as_str(), "/dir/file");
        assert_eq!(candidates[0].action, TtlAction::Delete);
    }
}
