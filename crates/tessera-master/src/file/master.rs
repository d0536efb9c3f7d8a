//! File system master
//!
//! Every mutation follows the same sequence: take path locks, validate
//! against a short read of the namespace, build journal entries, append
//! them, then apply them under the namespace write lock with the function
//! replay uses. The namespace lock is never held across a journal append or
//! an under storage call.
//!
//! Public operations never call one another while holding path locks; the
//! locks are not reentrant.

use super::inode::Inode;
use super::lock::{LockMode, PathLockManager};
use super::mount::{MountInfo, normalize_ufs_path};
use super::namespace::{Namespace, TtlCandidate};
use super::options::{
    CompleteFileOptions, CreateDirectoryOptions, CreateFileOptions, DeleteOptions, MountOptions,
    SetAttributeOptions, operation_time,
};
use crate::block::BlockMaster;
use crate::metrics::{Counter, MasterMetrics, Outcomes};
use crate::ufs::UnderFileSystem;
use parking_lot::RwLock;
use std::sync::Arc;
use tessera_common::{
    BlockId, Error, FileBlockInfo, FileInfo, FsPath, InodeId, MAX_BLOCK_SEQUENCE, MasterConfig,
    Result, Ttl,
};
use tessera_journal::{
    InodeDirectoryEntry, InodeFileEntry, Journal, JournalEntry, SetAttributeEntry,
};
use tracing::{debug, info, warn};

/// What a create call makes at its target path
#[derive(Clone, Copy)]
enum Target<'a> {
    File(&'a CreateFileOptions),
    Directory(&'a CreateDirectoryOptions),
}

/// Attributes shared by both kinds of create
struct NewInodeAttributes {
    recursive: bool,
    persisted: bool,
    ttl: Option<Ttl>,
    owner: String,
    group: String,
    mode: Option<u16>,
    op_time_ms: u64,
}

/// Namespace authority
pub struct FileSystemMaster {
    journal: Journal,
    namespace: RwLock<Namespace>,
    locks: PathLockManager,
    block_master: Arc<BlockMaster>,
    ufs: Arc<dyn UnderFileSystem>,
    metrics: Arc<MasterMetrics>,
    default_block_size_bytes: u64,
    default_owner: String,
    default_group: String,
    file_mode: u16,
    directory_mode: u16,
}

impl FileSystemMaster {
    /// Open the namespace journal and rebuild the namespace from it
    pub fn open(
        config: &MasterConfig,
        block_master: Arc<BlockMaster>,
        ufs: Arc<dyn UnderFileSystem>,
        metrics: Arc<MasterMetrics>,
    ) -> Result<Self> {
        let journal = Journal::open(config.journal.master_dir("file_system"), &config.journal)?;

        let mut namespace = Namespace::new(config);
        let stats = journal.replay(|entry| {
            namespace.apply(entry).map_err(|e| match e {
                Error::JournalCorrupted(_) => e,
                other => Error::JournalCorrupted(format!("cannot apply entry: {other}")),
            })
        })?;

        info!(
            "File system master ready: {} inodes, {} mounts, recovered through lsn {}",
            namespace.tree.len(),
            namespace.mounts.list().len(),
            stats.last_lsn
        );

        Ok(Self {
            journal,
            namespace: RwLock::new(namespace),
            locks: PathLockManager::new(),
            block_master,
            ufs,
            metrics,
            default_block_size_bytes: config.default_block_size_bytes,
            default_owner: config.default_owner.clone(),
            default_group: config.default_group.clone(),
            file_mode: config.file_mode(),
            directory_mode: config.directory_mode(),
        })
    }

    pub fn metrics(&self) -> &Arc<MasterMetrics> {
        &self.metrics
    }

    /// Number of inodes, the root included
    pub fn inode_count(&self) -> usize {
        self.namespace.read().tree.len()
    }

    /// Append `entries` as one record and apply them
    fn journal_and_apply(&self, entries: Vec<JournalEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.journal.append_batch(&entries)?;
        let mut namespace = self.namespace.write();
        for entry in entries {
            namespace.apply(entry)?;
        }
        Ok(())
    }

    /// Create a file
    pub fn create(&self, path: &str, options: CreateFileOptions) -> Result<InodeId> {
        self.metrics.instrument(Counter::CreateFileOps, |outcomes| {
            let path = FsPath::new(path)?;
            if options.block_size_bytes == Some(0) {
                return Err(Error::invalid_argument("block size must be positive"));
            }
            let id = self.create_path(&path, Target::File(&options), outcomes)?;
            outcomes.bump(Counter::FilesCreated);
            debug!("Created file {} with id {}", path, id);
            Ok(id)
        })
    }

    /// Create a directory
    pub fn mkdir(&self, path: &str, options: CreateDirectoryOptions) -> Result<InodeId> {
        self.metrics.instrument(Counter::CreateDirectoryOps, |outcomes| {
            let path = FsPath::new(path)?;
            self.create_path(&path, Target::Directory(&options), outcomes)
        })
    }

    fn attributes(&self, target: Target<'_>) -> NewInodeAttributes {
        let (recursive, persisted, ttl, owner, group, mode, op_time_ms) = match target {
            Target::File(o) => (
                o.recursive,
                o.persisted,
                o.ttl,
                &o.owner,
                &o.group,
                o.mode,
                o.operation_time_ms,
            ),
            Target::Directory(o) => (
                o.recursive,
                o.persisted,
                o.ttl,
                &o.owner,
                &o.group,
                o.mode,
                o.operation_time_ms,
            ),
        };
        NewInodeAttributes {
            recursive,
            persisted,
            ttl,
            owner: owner.clone().unwrap_or_else(|| self.default_owner.clone()),
            group: group.clone().unwrap_or_else(|| self.default_group.clone()),
            mode,
            op_time_ms: operation_time(op_time_ms),
        }
    }

    /// Create the target inode and, when recursive, its missing ancestors.
    ///
    /// The first missing component is locked exclusively; everything below
    /// it is new. If the namespace changed between the unlocked look and the
    /// lock, start over.
    fn create_path(&self, path: &FsPath, target: Target<'_>, outcomes: &mut Outcomes) -> Result<InodeId> {
        let attrs = self.attributes(target);
        let lineage = path.lineage();

        loop {
            let depth = self.namespace.read().tree.existing_depth(path);
            let _locks = self.locks.write(&lineage[(depth + 1).min(path.depth())]);

            let mut namespace = self.namespace.write();
            if namespace.tree.existing_depth(path) != depth {
                continue;
            }

            if depth == path.depth() {
                let id = namespace
                    .tree
                    .resolve(path)
                    .ok_or_else(|| Error::internal(format!("{path} vanished while locked")))?;
                if let Target::Directory(options) = target {
                    let is_directory = namespace.tree.get(id).is_some_and(Inode::is_directory);
                    if options.allow_exists && is_directory {
                        return Ok(id);
                    }
                }
                return Err(Error::PathAlreadyExists(path.to_string()));
            }

            let parent_path = &lineage[depth];
            let parent_id = namespace
                .tree
                .resolve(parent_path)
                .ok_or_else(|| Error::internal(format!("{parent_path} vanished while locked")))?;
            if !namespace.tree.get(parent_id).is_some_and(Inode::is_directory) {
                return Err(Error::invalid_path(
                    path.as_str(),
                    format!("{parent_path} is not a directory"),
                ));
            }
            if depth + 1 < path.depth() && !attrs.recursive {
                let parent = path.parent().unwrap_or_else(FsPath::root);
                return Err(Error::PathNotFound(parent.to_string()));
            }
            check_writable(&namespace, path)?;

            let new_dirs = match target {
                Target::File(_) => path.depth() - depth - 1,
                Target::Directory(_) => path.depth() - depth,
            } as u64;
            let first_sequence = if new_dirs > 0 {
                namespace.tree.reserve_directory_ids(new_dirs)
            } else {
                namespace.tree.next_directory_sequence()
            };
            let deepest_dir = match target {
                Target::File(_) => path.parent().unwrap_or_else(FsPath::root),
                Target::Directory(_) => path.clone(),
            };
            let ufs_dir = namespace.mounts.resolve(&deepest_dir);
            drop(namespace);

            if attrs.persisted && new_dirs > 0 {
                self.ufs.mkdirs(&ufs_dir)?;
            }
            let file_id = match target {
                Target::File(_) => Some(InodeId::for_container(
                    self.block_master.new_container_id()?,
                )),
                Target::Directory(_) => None,
            };

            let mut entries = Vec::with_capacity(new_dirs as usize + 2);
            if new_dirs > 0 {
                entries.push(JournalEntry::InodeDirectoryIdGenerator {
                    next_sequence: first_sequence + new_dirs,
                });
            }
            let mut parent = parent_id;
            let mut sequence = first_sequence;
            for (offset, name) in path.components().skip(depth).enumerate() {
                let is_target = depth + offset + 1 == path.depth();
                if let (true, Some(file_id), Target::File(options)) = (is_target, file_id, target) {
                    entries.push(JournalEntry::InodeFile(InodeFileEntry {
                        id: file_id,
                        parent_id: parent,
                        name: name.to_string(),
                        creation_time_ms: attrs.op_time_ms,
                        last_modification_time_ms: attrs.op_time_ms,
                        owner: attrs.owner.clone(),
                        group: attrs.group.clone(),
                        mode: attrs.mode.unwrap_or(self.file_mode),
                        ttl: attrs.ttl,
                        persisted: attrs.persisted,
                        pinned: false,
                        cacheable: true,
                        block_size_bytes: options
                            .block_size_bytes
                            .unwrap_or(self.default_block_size_bytes),
                        length: 0,
                        completed: false,
                        block_ids: Vec::new(),
                    }));
                    parent = file_id;
                    continue;
                }

                let id = InodeId::for_directory(sequence);
                sequence += 1;
                entries.push(JournalEntry::InodeDirectory(InodeDirectoryEntry {
                    id,
                    parent_id: Some(parent),
                    name: name.to_string(),
                    creation_time_ms: attrs.op_time_ms,
                    last_modification_time_ms: attrs.op_time_ms,
                    owner: attrs.owner.clone(),
                    group: attrs.group.clone(),
                    mode: if is_target {
                        attrs.mode.unwrap_or(self.directory_mode)
                    } else {
                        self.directory_mode
                    },
                    ttl: if is_target { attrs.ttl } else { None },
                    persisted: attrs.persisted,
                    pinned: false,
                    mount_point: false,
                }));
                parent = id;
            }

            self.journal_and_apply(entries)?;
            outcomes.add(Counter::DirectoriesCreated, new_dirs);
            return Ok(parent);
        }
    }

    /// Metadata of the inode with the given id
    pub fn get_file_info(&self, id: InodeId) -> Result<FileInfo> {
        self.metrics.instrument(Counter::GetFileInfoOps, |outcomes| {
            // The path may change between the lookup and the lock
            loop {
                let path = self
                    .namespace
                    .read()
                    .tree
                    .path_of(id)
                    .ok_or_else(|| Error::FileNotFound(format!("with id {id}")))?;
                let _locks = self.locks.read(&path);
                let namespace = self.namespace.read();
                if namespace.tree.resolve(&path) != Some(id) {
                    continue;
                }
                let inode = namespace
                    .tree
                    .get(id)
                    .ok_or_else(|| Error::FileNotFound(format!("with id {id}")))?;
                let info = namespace.file_info(inode, &path);
                outcomes.bump(Counter::FileInfosGot);
                return Ok(info);
            }
        })
    }

    /// Metadata of the inode at `path`
    pub fn get_file_info_by_path(&self, path: &str) -> Result<FileInfo> {
        self.metrics.instrument(Counter::GetFileInfoOps, |outcomes| {
            let path = FsPath::new(path)?;
            let _locks = self.locks.read(&path);
            let namespace = self.namespace.read();
            let inode = namespace
                .tree
                .resolve(&path)
                .and_then(|id| namespace.tree.get(id))
                .ok_or_else(|| Error::FileNotFound(path.to_string()))?;
            let info = namespace.file_info(inode, &path);
            outcomes.bump(Counter::FileInfosGot);
            Ok(info)
        })
    }

    /// Children of a directory in name order, or the file itself
    pub fn list_status(&self, path: &str) -> Result<Vec<FileInfo>> {
        self.metrics.instrument(Counter::GetFileInfoOps, |outcomes| {
            let path = FsPath::new(path)?;
            let _locks = self.locks.read(&path);
            let namespace = self.namespace.read();
            let id = namespace
                .tree
                .resolve(&path)
                .ok_or_else(|| Error::FileNotFound(path.to_string()))?;
            let inode = namespace
                .tree
                .get(id)
                .ok_or_else(|| Error::FileNotFound(path.to_string()))?;

            let infos = if inode.is_directory() {
                let mut infos = Vec::new();
                for child in namespace.tree.children(id) {
                    let child_path = path.join(&child.name)?;
                    infos.push(namespace.file_info(child, &child_path));
                }
                infos
            } else {
                vec![namespace.file_info(inode, &path)]
            };
            outcomes.add(Counter::FileInfosGot, infos.len() as u64);
            Ok(infos)
        })
    }

    /// Blocks of a file in file order, with their locations
    pub fn get_file_block_info_list(&self, path: &str) -> Result<Vec<FileBlockInfo>> {
        self.metrics.instrument(Counter::GetFileBlockInfoOps, |outcomes| {
            let path = FsPath::new(path)?;
            let _locks = self.locks.read(&path);
            let (block_ids, block_size, ufs_path) = {
                let namespace = self.namespace.read();
                let inode = namespace
                    .tree
                    .resolve(&path)
                    .and_then(|id| namespace.tree.get(id))
                    .ok_or_else(|| Error::path_does_not_exist(path.as_str()))?;
                let file = inode
                    .as_file()
                    .ok_or_else(|| Error::invalid_path(path.as_str(), "is a directory"))?;
                let ufs_path = inode.persisted.then(|| namespace.mounts.resolve(&path));
                (file.block_ids.clone(), file.block_size_bytes, ufs_path)
            };

            let infos: Vec<FileBlockInfo> = self
                .block_master
                .get_block_info_list(&block_ids)
                .into_iter()
                .map(|block_info| {
                    let ufs_locations = match &ufs_path {
                        Some(ufs_path) if block_info.locations.is_empty() => vec![ufs_path.clone()],
                        _ => Vec::new(),
                    };
                    FileBlockInfo {
                        offset: block_info.block_id.sequence_number() * block_size,
                        block_info,
                        ufs_locations,
                    }
                })
                .collect();
            outcomes.add(Counter::FileBlockInfosGot, infos.len() as u64);
            Ok(infos)
        })
    }

    /// Allocate the next block id of an incomplete file
    pub fn get_new_block_id_for_file(&self, path: &str) -> Result<BlockId> {
        self.metrics.instrument(Counter::GetNewBlockOps, |_| {
            let path = FsPath::new(path)?;
            let _locks = self.locks.write(&path);
            let (file_id, block_id) = {
                let namespace = self.namespace.read();
                let (id, inode) = resolve_inode(&namespace, &path)?;
                let file = inode
                    .as_file()
                    .ok_or_else(|| Error::invalid_path(path.as_str(), "is a directory"))?;
                if file.completed {
                    return Err(Error::FileAlreadyCompleted(path.to_string()));
                }
                let sequence = file.block_ids.len() as u64;
                if sequence >= MAX_BLOCK_SEQUENCE {
                    return Err(Error::invalid_argument(format!(
                        "{path} already holds the maximum number of blocks"
                    )));
                }
                (id, BlockId::from_parts(id.container_id(), sequence))
            };

            self.journal_and_apply(vec![JournalEntry::AllocateBlock { file_id, block_id }])?;
            debug!("Allocated block {} for {}", block_id, path);
            Ok(block_id)
        })
    }

    /// Mark a file complete and fix its length.
    ///
    /// A file living in the cache must have every block committed, and every
    /// block but the last must be full. A persisted file takes its length
    /// from under storage.
    pub fn complete_file(&self, path: &str, options: CompleteFileOptions) -> Result<()> {
        self.metrics.instrument(Counter::CompleteFileOps, |outcomes| {
            let path = FsPath::new(path)?;
            let _locks = self.locks.write(&path);
            let (file_id, block_ids, block_size, persisted) = {
                let namespace = self.namespace.read();
                let (id, inode) = resolve_inode(&namespace, &path)?;
                let file = inode
                    .as_file()
                    .ok_or_else(|| Error::invalid_path(path.as_str(), "is a directory"))?;
                if file.completed {
                    return Err(Error::FileAlreadyCompleted(path.to_string()));
                }
                (id, file.block_ids.clone(), file.block_size_bytes, inode.persisted)
            };

            let infos = self.block_master.get_block_info_list(&block_ids);
            if !persisted && infos.len() != block_ids.len() {
                return Err(Error::BlockInfoError(format!(
                    "Cannot complete {path}: {} of {} blocks are not committed",
                    block_ids.len() - infos.len(),
                    block_ids.len()
                )));
            }
            if let Some((_, full)) = infos.split_last() {
                if let Some(short) = full.iter().find(|info| info.length != block_size) {
                    return Err(Error::BlockInfoError(format!(
                        "Block {} of {path} has length {}, expected {block_size}",
                        short.block_id, short.length
                    )));
                }
            }

            let length = if persisted {
                options.ufs_length
            } else {
                infos.iter().map(|info| info.length).sum()
            };
            self.journal_and_apply(vec![JournalEntry::CompleteFile {
                file_id,
                length,
                op_time_ms: operation_time(options.operation_time_ms),
            }])?;
            outcomes.bump(Counter::FilesCompleted);
            debug!("Completed {} with length {}", path, length);
            Ok(())
        })
    }

    /// Delete a path. Returns `false` for the root.
    pub fn delete_file(&self, path: &str, recursive: bool) -> Result<bool> {
        self.delete_with_options(path, DeleteOptions::recursive(recursive))
    }

    /// Delete a path, subject to the preconditions in `options`. A failed
    /// precondition returns `false` without changing anything.
    pub fn delete_with_options(&self, path: &str, options: DeleteOptions) -> Result<bool> {
        self.metrics.instrument(Counter::DeletePathOps, |outcomes| {
            let path = FsPath::new(path)?;
            if path.is_root() {
                return Ok(false);
            }
            let _locks = self.locks.write(&path);

            let (id, block_ids, ufs_deletes) = {
                let namespace = self.namespace.read();
                let (id, inode) = resolve_inode(&namespace, &path)?;
                if options.expected_id.is_some_and(|expected| expected != id) {
                    return Ok(false);
                }
                if let Some(now) = options.only_if_expired_at {
                    if !inode.expiry().is_some_and(|(expires_at, _)| expires_at <= now) {
                        return Ok(false);
                    }
                }
                if inode.has_children() && !options.recursive {
                    return Err(Error::DirectoryNotEmpty(path.to_string()));
                }
                if namespace.mounts.is_mount_point(&path) {
                    return Err(Error::invalid_path(
                        path.as_str(),
                        "is a mount point, unmount it first",
                    ));
                }
                if namespace.mounts.has_mount_below(&path) {
                    return Err(Error::invalid_path(
                        path.as_str(),
                        "contains a mount point, unmount it first",
                    ));
                }
                check_writable(&namespace, &path)?;

                let subtree = namespace.tree.descendants(id);
                let block_ids: Vec<BlockId> = subtree
                    .iter()
                    .filter_map(|id| namespace.tree.get(*id))
                    .flat_map(|inode| inode.block_ids().iter().copied())
                    .collect();
                (id, block_ids, topmost_persisted(&namespace, &subtree))
            };

            for (ufs_path, is_directory) in &ufs_deletes {
                self.ufs.delete(ufs_path, *is_directory)?;
            }
            self.journal_and_apply(vec![JournalEntry::DeleteFile {
                file_id: id,
                op_time_ms: operation_time(None),
            }])?;
            if let Err(e) = self.block_master.remove_blocks(&block_ids) {
                warn!("Failed to remove blocks of deleted {}: {}", path, e);
            }

            outcomes.bump(Counter::PathsDeleted);
            debug!("Deleted {} ({} blocks)", path, block_ids.len());
            Ok(true)
        })
    }

    /// Move `src` to `dst`, keeping its id and blocks
    pub fn rename(&self, src: &str, dst: &str) -> Result<()> {
        self.metrics.instrument(Counter::RenamePathOps, |outcomes| {
            let src = FsPath::new(src)?;
            let dst = FsPath::new(dst)?;
            if src.is_root() {
                return Err(Error::invalid_path(src.as_str(), "the root cannot be renamed"));
            }
            if dst.is_root() {
                return Err(Error::PathAlreadyExists(dst.to_string()));
            }
            if src.is_ancestor_of(&dst) {
                return Err(Error::invalid_path(
                    dst.as_str(),
                    format!("cannot move {src} into its own subtree"),
                ));
            }
            let dst_parent = dst.parent().unwrap_or_else(FsPath::root);

            let _locks = self
                .locks
                .lock(&[(src.clone(), LockMode::Write), (dst.clone(), LockMode::Write)]);

            let (src_id, dst_parent_id, ufs_move, persist_dirs) = {
                let namespace = self.namespace.read();
                let (src_id, src_inode) = resolve_inode(&namespace, &src)?;
                if namespace.tree.resolve(&dst).is_some() {
                    return Err(Error::PathAlreadyExists(dst.to_string()));
                }
                let dst_parent_id = namespace
                    .tree
                    .resolve(&dst_parent)
                    .ok_or_else(|| Error::PathNotFound(dst_parent.to_string()))?;
                if !namespace.tree.get(dst_parent_id).is_some_and(Inode::is_directory) {
                    return Err(Error::invalid_path(
                        dst.as_str(),
                        format!("{dst_parent} is not a directory"),
                    ));
                }
                if namespace.mounts.is_mount_point(&src) || namespace.mounts.has_mount_below(&src) {
                    return Err(Error::invalid_path(
                        src.as_str(),
                        "is or contains a mount point",
                    ));
                }
                if namespace.mounts.mount_of(&src).path != namespace.mounts.mount_of(&dst).path {
                    return Err(Error::invalid_path(
                        dst.as_str(),
                        format!("cannot rename {src} across mount points"),
                    ));
                }
                check_writable(&namespace, &src)?;
                check_writable(&namespace, &dst)?;

                let (ufs_move, persist_dirs) = if src_inode.persisted {
                    let persist_dirs: Vec<InodeId> = dst_parent
                        .lineage()
                        .iter()
                        .filter_map(|p| namespace.tree.resolve(p))
                        .filter(|id| namespace.tree.get(*id).is_some_and(|i| !i.persisted))
                        .collect();
                    let ufs_move = (
                        namespace.mounts.resolve(&src),
                        namespace.mounts.resolve(&dst),
                        namespace.mounts.resolve(&dst_parent),
                    );
                    (Some(ufs_move), persist_dirs)
                } else {
                    (None, Vec::new())
                };
                (src_id, dst_parent_id, ufs_move, persist_dirs)
            };

            if let Some((ufs_src, ufs_dst, ufs_dst_parent)) = &ufs_move {
                if self.ufs.exists(ufs_src)? {
                    self.ufs.mkdirs(ufs_dst_parent)?;
                    self.ufs.rename(ufs_src, ufs_dst)?;
                }
            }

            let mut entries: Vec<JournalEntry> = persist_dirs
                .into_iter()
                .map(|dir_id| JournalEntry::PersistDirectory { dir_id })
                .collect();
            entries.push(JournalEntry::Rename {
                file_id: src_id,
                dst_parent_id,
                dst_name: dst.name().to_string(),
                op_time_ms: operation_time(None),
            });
            self.journal_and_apply(entries)?;

            outcomes.bump(Counter::PathsRenamed);
            debug!("Renamed {} to {}", src, dst);
            Ok(())
        })
    }

    /// Update attributes of an inode; owner, group and mode optionally
    /// apply to the whole subtree
    pub fn set_attribute(&self, path: &str, options: SetAttributeOptions) -> Result<()> {
        self.metrics.instrument(Counter::SetAttributeOps, |outcomes| {
            let path = FsPath::new(path)?;
            let _locks = self.locks.write(&path);
            let op_time_ms = operation_time(options.operation_time_ms);

            let entries = {
                let namespace = self.namespace.read();
                let (id, inode) = resolve_inode(&namespace, &path)?;
                if options.is_empty() {
                    return Ok(());
                }
                if options.persisted == Some(true)
                    && inode.as_file().is_some_and(|file| !file.completed)
                {
                    return Err(Error::invalid_argument(format!(
                        "cannot persist incomplete file {path}"
                    )));
                }
                let newly_persisted = options.persisted == Some(true) && !inode.persisted;

                let mut entries = vec![JournalEntry::SetAttribute(SetAttributeEntry {
                    id,
                    op_time_ms,
                    pinned: options.pinned,
                    ttl: options.ttl,
                    persisted: options.persisted,
                    owner: options.owner.clone(),
                    group: options.group.clone(),
                    mode: options.mode,
                })];
                if options.recursive && options.has_permission_change() {
                    entries.extend(namespace.tree.descendants(id).into_iter().skip(1).map(
                        |descendant| {
                            JournalEntry::SetAttribute(SetAttributeEntry {
                                id: descendant,
                                op_time_ms,
                                owner: options.owner.clone(),
                                group: options.group.clone(),
                                mode: options.mode,
                                ..Default::default()
                            })
                        },
                    ));
                }
                if newly_persisted {
                    let ancestors = path.parent().map(|p| p.lineage()).unwrap_or_default();
                    entries.extend(
                        ancestors
                            .iter()
                            .filter_map(|p| namespace.tree.resolve(p))
                            .filter(|id| namespace.tree.get(*id).is_some_and(|i| !i.persisted))
                            .map(|dir_id| JournalEntry::PersistDirectory { dir_id }),
                    );
                    if inode.is_file() {
                        outcomes.bump(Counter::FilesPersisted);
                    }
                }
                entries
            };

            self.journal_and_apply(entries)
        })
    }

    /// Free worker copies of every block under `path`. A non-empty
    /// directory needs `recursive`; otherwise `false` is returned.
    pub fn free(&self, path: &str, recursive: bool) -> Result<bool> {
        self.metrics.instrument(Counter::FreeFileOps, |outcomes| {
            let path = FsPath::new(path)?;
            if path.is_root() {
                return Ok(false);
            }
            let _locks = self.locks.read(&path);
            let block_ids: Vec<BlockId> = {
                let namespace = self.namespace.read();
                let (id, inode) = resolve_inode(&namespace, &path)?;
                if inode.has_children() && !recursive {
                    return Ok(false);
                }
                namespace
                    .tree
                    .descendants(id)
                    .into_iter()
                    .filter_map(|id| namespace.tree.get(id))
                    .flat_map(|inode| inode.block_ids().iter().copied())
                    .collect()
            };

            self.block_master.free_blocks(&block_ids);
            outcomes.bump(Counter::FilesFreed);
            debug!("Freed {} blocks under {}", block_ids.len(), path);
            Ok(true)
        })
    }

    /// Mount `ufs_path` at `path`, which must not exist yet
    pub fn mount(&self, path: &str, ufs_path: &str, options: MountOptions) -> Result<()> {
        self.metrics.instrument(Counter::MountOps, |outcomes| {
            let path = FsPath::new(path)?;
            let ufs_path = normalize_ufs_path(ufs_path);
            let _locks = self.locks.write(&path);

            let parent_id = {
                let namespace = self.namespace.read();
                if namespace.tree.resolve(&path).is_some() {
                    return Err(Error::PathAlreadyExists(path.to_string()));
                }
                let parent = path.parent().unwrap_or_else(FsPath::root);
                let parent_id = namespace
                    .tree
                    .resolve(&parent)
                    .ok_or_else(|| Error::PathNotFound(parent.to_string()))?;
                if !namespace.tree.get(parent_id).is_some_and(Inode::is_directory) {
                    return Err(Error::invalid_path(
                        path.as_str(),
                        format!("{parent} is not a directory"),
                    ));
                }
                namespace.mounts.validate_mount(&path, &ufs_path)?;
                check_writable(&namespace, &path)?;
                parent_id
            };

            if !self.ufs.exists(&ufs_path)? {
                return Err(Error::ufs(format!(
                    "under storage path {ufs_path} does not exist"
                )));
            }

            let sequence = self.namespace.write().tree.reserve_directory_ids(1);
            let op_time_ms = operation_time(None);
            self.journal_and_apply(vec![
                JournalEntry::InodeDirectoryIdGenerator {
                    next_sequence: sequence + 1,
                },
                JournalEntry::AddMountPoint {
                    path: path.to_string(),
                    ufs_path: ufs_path.clone(),
                    read_only: options.read_only,
                },
                JournalEntry::InodeDirectory(InodeDirectoryEntry {
                    id: InodeId::for_directory(sequence),
                    parent_id: Some(parent_id),
                    name: path.name().to_string(),
                    creation_time_ms: op_time_ms,
                    last_modification_time_ms: op_time_ms,
                    owner: self.default_owner.clone(),
                    group: self.default_group.clone(),
                    mode: self.directory_mode,
                    ttl: None,
                    persisted: true,
                    pinned: false,
                    mount_point: true,
                }),
            ])?;

            outcomes.bump(Counter::PathsMounted);
            info!("Mounted {} at {}", ufs_path, path);
            Ok(())
        })
    }

    /// Remove a mount point and the metadata below it; under storage is
    /// left alone
    pub fn unmount(&self, path: &str) -> Result<()> {
        self.metrics.instrument(Counter::UnmountOps, |outcomes| {
            let path = FsPath::new(path)?;
            if path.is_root() {
                return Err(Error::invalid_path(path.as_str(), "the root cannot be unmounted"));
            }
            let _locks = self.locks.write(&path);

            let (id, block_ids) = {
                let namespace = self.namespace.read();
                if !namespace.mounts.is_mount_point(&path) {
                    return Err(Error::invalid_path(path.as_str(), "is not a mount point"));
                }
                let (id, _) = resolve_inode(&namespace, &path)?;
                let block_ids: Vec<BlockId> = namespace
                    .tree
                    .descendants(id)
                    .into_iter()
                    .filter_map(|id| namespace.tree.get(id))
                    .flat_map(|inode| inode.block_ids().iter().copied())
                    .collect();
                (id, block_ids)
            };

            self.journal_and_apply(vec![
                JournalEntry::DeleteMountPoint {
                    path: path.to_string(),
                },
                JournalEntry::DeleteFile {
                    file_id: id,
                    op_time_ms: operation_time(None),
                },
            ])?;
            if let Err(e) = self.block_master.remove_blocks(&block_ids) {
                warn!("Failed to remove blocks under unmounted {}: {}", path, e);
            }

            outcomes.bump(Counter::PathsUnmounted);
            info!("Unmounted {}", path);
            Ok(())
        })
    }

    /// Mount table entries in path order, the root first
    pub fn get_mount_table(&self) -> Vec<MountInfo> {
        self.namespace.read().mounts.list()
    }

    /// Under storage location backing `path`
    pub fn get_ufs_path(&self, path: &str) -> Result<String> {
        let path = FsPath::new(path)?;
        let _locks = self.locks.read(&path);
        Ok(self.namespace.read().mounts.resolve(&path))
    }

    /// Inodes whose TTL elapsed by `now_ms`. Taken without path locks; the
    /// caller acts on them through the public operations, which recheck.
    pub fn ttl_candidates(&self, now_ms: u64) -> Vec<TtlCandidate> {
        self.namespace.read().ttl_candidates(now_ms)
    }

    /// Write a namespace checkpoint and drop the log it covers
    pub fn checkpoint(&self) -> Result<()> {
        // Every operation read-locks the root, so this excludes them all
        let _locks = self.locks.write(&FsPath::root());
        let (lsn, entries) = {
            let namespace = self.namespace.read();
            (self.journal.current_lsn(), namespace.checkpoint_entries())
        };
        self.journal.checkpoint(lsn, &entries)?;
        Ok(())
    }

    /// Checkpoint if enough journal entries have accumulated
    pub fn maybe_checkpoint(&self) -> Result<bool> {
        if !self.journal.needs_checkpoint() {
            return Ok(false);
        }
        self.checkpoint()?;
        Ok(true)
    }
}

fn resolve_inode<'a>(namespace: &'a Namespace, path: &FsPath) -> Result<(InodeId, &'a Inode)> {
    namespace
        .tree
        .resolve(path)
        .and_then(|id| namespace.tree.get(id).map(|inode| (id, inode)))
        .ok_or_else(|| Error::FileNotFound(path.to_string()))
}

fn check_writable(namespace: &Namespace, path: &FsPath) -> Result<()> {
    let mount = namespace.mounts.mount_of(path);
    if mount.options.read_only {
        return Err(Error::PermissionDenied(format!(
            "{path} is under read-only mount {}",
            mount.path
        )));
    }
    Ok(())
}

/// Under storage paths to delete for a subtree: each persisted inode that
/// has no persisted ancestor within the subtree. `subtree` is in preorder.
fn topmost_persisted(namespace: &Namespace, subtree: &[InodeId]) -> Vec<(String, bool)> {
    let mut selected: Vec<FsPath> = Vec::new();
    let mut deletes = Vec::new();
    for id in subtree {
        let Some(inode) = namespace.tree.get(*id) else {
            continue;
        };
        if !inode.persisted {
            continue;
        }
        let Some(path) = namespace.tree.path_of(*id) else {
            continue;
        };
        if selected.iter().any(|s| s.is_ancestor_of(&path)) {
            continue;
        }
        deletes.push((namespace.mounts.resolve(&path), inode.is_directory()));
        selected.push(path);
    }
    deletes
}
