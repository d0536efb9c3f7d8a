//! Inodes
//!
//! An inode refers to its parent by id only; the tree arena owns every
//! inode.

use std::collections::BTreeMap;
use tessera_common::{BlockId, InodeId, Ttl, TtlAction};
use tessera_journal::{InodeDirectoryEntry, InodeFileEntry, JournalEntry};

/// File specific state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub block_size_bytes: u64,
    pub length: u64,
    pub completed: bool,
    pub cacheable: bool,
    /// Blocks in file order; only grows until the file is completed
    pub block_ids: Vec<BlockId>,
}

/// Directory specific state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirState {
    pub children: BTreeMap<String, InodeId>,
    pub mount_point: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodeKind {
    File(FileState),
    Directory(DirState),
}

/// A file or directory in the namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub id: InodeId,
    /// `None` only for the root
    pub parent_id: Option<InodeId>,
    pub name: String,
    pub creation_time_ms: u64,
    pub last_modification_time_ms: u64,
    pub owner: String,
    pub group: String,
    pub mode: u16,
    pub ttl: Option<Ttl>,
    pub persisted: bool,
    pub pinned: bool,
    pub kind: InodeKind,
}

impl Inode {
    pub const fn is_directory(&self) -> bool {
        matches!(self.kind, InodeKind::Directory(_))
    }

    pub const fn is_file(&self) -> bool {
        matches!(self.kind, InodeKind::File(_))
    }

    pub const fn as_file(&self) -> Option<&FileState> {
        match &self.kind {
            InodeKind::File(file) => Some(file),
            InodeKind::Directory(_) => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut FileState> {
        match &mut self.kind {
            InodeKind::File(file) => Some(file),
            InodeKind::Directory(_) => None,
        }
    }

    pub const fn as_directory(&self) -> Option<&DirState> {
        match &self.kind {
            InodeKind::Directory(dir) => Some(dir),
            InodeKind::File(_) => None,
        }
    }

    pub fn as_directory_mut(&mut self) -> Option<&mut DirState> {
        match &mut self.kind {
            InodeKind::Directory(dir) => Some(dir),
            InodeKind::File(_) => None,
        }
    }

    /// Whether this is a directory with at least one child
    pub fn has_children(&self) -> bool {
        self.as_directory().is_some_and(|dir| !dir.children.is_empty())
    }

    pub fn is_mount_point(&self) -> bool {
        self.as_directory().is_some_and(|dir| dir.mount_point)
    }

    /// Blocks of a file, empty for a directory
    pub fn block_ids(&self) -> &[BlockId] {
        self.as_file().map_or(&[], |file| file.block_ids.as_slice())
    }

    /// When the TTL elapses and what to do then
    pub fn expiry(&self) -> Option<(u64, TtlAction)> {
        self.ttl
            .map(|ttl| (ttl.expires_at(self.creation_time_ms), ttl.action))
    }

    pub fn from_directory_entry(entry: InodeDirectoryEntry) -> Self {
        Self {
            id: entry.id,
            parent_id: entry.parent_id,
            name: entry.name,
            creation_time_ms: entry.creation_time_ms,
            last_modification_time_ms: entry.last_modification_time_ms,
            owner: entry.owner,
            group: entry.group,
            mode: entry.mode,
            ttl: entry.ttl,
            persisted: entry.persisted,
            pinned: entry.pinned,
            kind: InodeKind::Directory(DirState {
                children: BTreeMap::new(),
                mount_point: entry.mount_point,
            }),
        }
    }

    pub fn from_file_entry(entry: InodeFileEntry) -> Self {
        Self {
            id: entry.id,
            parent_id: Some(entry.parent_id),
            name: entry.name,
            creation_time_ms: entry.creation_time_ms,
            last_modification_time_ms: entry.last_modification_time_ms,
            owner: entry.owner,
            group: entry.group,
            mode: entry.mode,
            ttl: entry.ttl,
            persisted: entry.persisted,
            pinned: entry.pinned,
            kind: InodeKind::File(FileState {
                block_size_bytes: entry.block_size_bytes,
                length: entry.length,
                completed: entry.completed,
                cacheable: entry.cacheable,
                block_ids: entry.block_ids,
            }),
        }
    }

    /// The entry that recreates this inode, children excluded
    pub fn to_journal_entry(&self) -> JournalEntry {
        match &self.kind {
            InodeKind::Directory(dir) => JournalEntry::InodeDirectory(InodeDirectoryEntry {
                id: self.id,
                parent_id: self.parent_id,
                name: self.name.clone(),
                creation_time_ms: self.creation_time_ms,
                last_modification_time_ms: self.last_modification_time_ms,
                owner: self.owner.clone(),
                group: self.group.clone(),
                mode: self.mode,
                ttl: self.ttl,
                persisted: self.persisted,
                pinned: self.pinned,
                mount_point: dir.mount_point,
            }),
            InodeKind::File(file) => JournalEntry::InodeFile(InodeFileEntry {
                id: self.id,
                // Files always have a parent
                parent_id: self.parent_id.unwrap_or(self.id),
                name: self.name.clone(),
                creation_time_ms: self.creation_time_ms,
                last_modification_time_ms: self.last_modification_time_ms,
                owner: self.owner.clone(),
                group: self.group.clone(),
                mode: self.mode,
                ttl: self.ttl,
                persisted: self.persisted,
                pinned: self.pinned,
                cacheable: file.cacheable,
                block_size_bytes: file.block_size_bytes,
                length: file.length,
                completed: file.completed,
                block_ids: file.block_ids.clone(),
            }),
        }
    }
}
