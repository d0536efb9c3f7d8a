//! Journal entry types
//!
//! One variant per kind of mutation. Each carries every field needed to
//! reapply the mutation without re-running validation.

use serde::{Deserialize, Serialize};
use tessera_common::{BlockId, Error, InodeId, Result, Ttl};

/// A journaled mutation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    // File system master
    /// A directory was created (or, in a checkpoint, exists)
    InodeDirectory(InodeDirectoryEntry),
    /// A file was created (or, in a checkpoint, exists)
    InodeFile(InodeFileEntry),
    /// State of the directory id generator
    InodeDirectoryIdGenerator { next_sequence: u64 },
    /// A block id was appended to an incomplete file
    AllocateBlock { file_id: InodeId, block_id: BlockId },
    /// A file was marked complete
    CompleteFile {
        file_id: InodeId,
        length: u64,
        op_time_ms: u64,
    },
    /// An inode and all its descendants were removed
    DeleteFile { file_id: InodeId, op_time_ms: u64 },
    /// An inode was relinked under a new parent and name
    Rename {
        file_id: InodeId,
        dst_parent_id: InodeId,
        dst_name: String,
        op_time_ms: u64,
    },
    /// Partial attribute update
    SetAttribute(SetAttributeEntry),
    /// A directory was marked persisted
    PersistDirectory { dir_id: InodeId },
    /// A mount table entry was added
    AddMountPoint {
        path: String,
        ufs_path: String,
        read_only: bool,
    },
    /// A mount table entry was removed
    DeleteMountPoint { path: String },

    // Block master
    /// State of the block container id generator
    BlockContainerIdGenerator { next_container_id: u64 },
    /// A block became known with the given length
    BlockInfo { block_id: BlockId, length: u64 },
    /// Block metadata was dropped
    DeleteBlocks { block_ids: Vec<BlockId> },

    /// Entries appended atomically as one record
    Batch(Vec<JournalEntry>),
}

impl JournalEntry {
    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| Error::JournalCorrupted(format!("undecodable entry: {e}")))
    }

    /// Short name of the variant, for logging
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InodeDirectory(_) => "InodeDirectory",
            Self::InodeFile(_) => "InodeFile",
            Self::InodeDirectoryIdGenerator { .. } => "InodeDirectoryIdGenerator",
            Self::AllocateBlock { .. } => "AllocateBlock",
            Self::CompleteFile { .. } => "CompleteFile",
            Self::DeleteFile { .. } => "DeleteFile",
            Self::Rename { .. } => "Rename",
            Self::SetAttribute(_) => "SetAttribute",
            Self::PersistDirectory { .. } => "PersistDirectory",
            Self::AddMountPoint { .. } => "AddMountPoint",
            Self::DeleteMountPoint { .. } => "DeleteMountPoint",
            Self::BlockContainerIdGenerator { .. } => "BlockContainerIdGenerator",
            Self::BlockInfo { .. } => "BlockInfo",
            Self::DeleteBlocks { .. } => "DeleteBlocks",
            Self::Batch(_) => "Batch",
        }
    }
}

/// A directory inode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeDirectoryEntry {
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
    pub mount_point: bool,
}

/// A file inode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeFileEntry {
    pub id: InodeId,
    pub parent_id: InodeId,
    pub name: String,
    pub creation_time_ms: u64,
    pub last_modification_time_ms: u64,
    pub owner: String,
    pub group: String,
    pub mode: u16,
    pub ttl: Option<Ttl>,
    pub persisted: bool,
    pub pinned: bool,
    pub cacheable: bool,
    pub block_size_bytes: u64,
    pub length: u64,
    pub completed: bool,
    pub block_ids: Vec<BlockId>,
}

/// Fields left as `None` are unchanged
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAttributeEntry {
    pub id: InodeId,
    pub op_time_ms: u64,
    pub pinned: Option<bool>,
    /// `Some(None)` clears the TTL
    pub ttl: Option<Option<Ttl>>,
    pub persisted: Option<bool>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_is_corruption() {
        let err = JournalEntry::from_bytes(&[0xFF; 3]).unwrap_err();
        assert!(matches!(err, Error::JournalCorrupted(_)));
    }

    #[test]
    fn test_batch_decodes_nested_entries() {
        let batch = JournalEntry::Batch(vec![
            JournalEntry::InodeDirectoryIdGenerator { next_sequence: 4 },
            JournalEntry::DeleteMountPoint {
                path: "/mnt".into(),
            },
        ]);
        let decoded = JournalEntry::from_bytes(&batch.to_bytes().unwrap()).unwrap();
        let JournalEntry::Batch(entries) = decoded else {
            panic!("expected a batch");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].kind(), "DeleteMountPoint");
    }
}
