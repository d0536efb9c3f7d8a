//! Core type definitions for Tessera
//!
//! Identifiers for inodes, blocks and workers, plus the value types handed
//! out by the masters (file info, block info, worker info).

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Number of low bits of a block id holding the sequence number within its
/// container.
pub const BLOCK_SEQUENCE_BITS: u32 = 24;

/// Largest sequence number; reserved for the id of the file owning the
/// container.
pub const MAX_BLOCK_SEQUENCE: u64 = (1 << BLOCK_SEQUENCE_BITS) - 1;

/// High bit marking inode ids handed out by the directory id generator, so
/// directory ids never collide with container-derived file ids.
const DIRECTORY_ID_FLAG: u64 = 1 << 63;

/// Identifier of a block
///
/// A block id is `(container_id << 24) | sequence_number`. All blocks of one
/// file share a container.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into, Display,
)]
#[display("{_0}")]
pub struct BlockId(u64);

impl BlockId {
    /// Wrap a raw block id
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Build a block id from its container and sequence number
    #[must_use]
    pub const fn from_parts(container_id: u64, sequence_number: u64) -> Self {
        Self((container_id << BLOCK_SEQUENCE_BITS) | (sequence_number & MAX_BLOCK_SEQUENCE))
    }

    /// Container the block belongs to
    #[must_use]
    pub const fn container_id(&self) -> u64 {
        self.0 >> BLOCK_SEQUENCE_BITS
    }

    /// Position of the block within its container
    #[must_use]
    pub const fn sequence_number(&self) -> u64 {
        self.0 & MAX_BLOCK_SEQUENCE
    }

    /// Raw id value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

/// Identifier of an inode (file or directory)
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    From,
    Into,
    Display,
)]
#[display("{_0}")]
pub struct InodeId(u64);

impl InodeId {
    /// Wrap a raw inode id
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Id of the file owning the given block container
    #[must_use]
    pub const fn for_container(container_id: u64) -> Self {
        Self(BlockId::from_parts(container_id, MAX_BLOCK_SEQUENCE).as_u64())
    }

    /// Id of the n-th directory handed out by the directory id generator
    #[must_use]
    pub const fn for_directory(sequence: u64) -> Self {
        Self(DIRECTORY_ID_FLAG | sequence)
    }

    /// Whether this id was produced by the directory id generator
    #[must_use]
    pub const fn is_directory_id(&self) -> bool {
        self.0 & DIRECTORY_ID_FLAG != 0
    }

    /// Sequence of a directory id within the directory id generator
    #[must_use]
    pub const fn directory_sequence(&self) -> u64 {
        self.0 & !DIRECTORY_ID_FLAG
    }

    /// Block container of a file id
    #[must_use]
    pub const fn container_id(&self) -> u64 {
        self.0 >> BLOCK_SEQUENCE_BITS
    }

    /// Raw id value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InodeId({})", self.0)
    }
}

/// Identifier of a registered cache worker
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into, Display,
)]
#[display("{_0}")]
pub struct WorkerId(u64);

impl WorkerId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkerId({})", self.0)
    }
}

/// Network address of a worker
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerNetAddress {
    pub host: String,
    pub rpc_port: u16,
    pub data_port: u16,
    pub web_port: u16,
}

impl WorkerNetAddress {
    #[must_use]
    pub fn new(host: impl Into<String>, rpc_port: u16, data_port: u16, web_port: u16) -> Self {
        Self {
            host: host.into(),
            rpc_port,
            data_port,
            web_port,
        }
    }
}

impl fmt::Display for WorkerNetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.rpc_port)
    }
}

/// Storage tier aliases in preference order
pub const STORAGE_TIERS: [&str; 3] = ["MEM", "SSD", "HDD"];

/// Position of a tier alias in the storage hierarchy; unknown aliases sort
/// after the known ones.
#[must_use]
pub fn tier_ordinal(alias: &str) -> usize {
    STORAGE_TIERS
        .iter()
        .position(|tier| tier.eq_ignore_ascii_case(alias))
        .unwrap_or(STORAGE_TIERS.len())
}

/// Per-tier byte counts keyed by tier alias
pub type TierBytes = HashMap<String, u64>;

/// A copy of a block held by a worker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLocation {
    pub worker_id: WorkerId,
    pub worker_address: WorkerNetAddress,
    pub tier_alias: String,
}

/// Master-side view of a block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub block_id: BlockId,
    pub length: u64,
    /// Worker copies, ordered by tier then worker id
    pub locations: Vec<BlockLocation>,
}

/// A block in the context of the file containing it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBlockInfo {
    pub block_info: BlockInfo,
    /// Byte offset of the block within the file
    pub offset: u64,
    /// Under storage locations, set for persisted blocks with no worker copy
    pub ufs_locations: Vec<String>,
}

/// Action taken when an inode's time-to-live elapses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TtlAction {
    /// Delete the inode (recursively for directories)
    #[default]
    Delete,
    /// Drop worker copies of the inode's blocks
    Free,
}

/// Time-to-live of an inode, measured from its creation time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ttl {
    pub duration_ms: u64,
    pub action: TtlAction,
}

impl Ttl {
    #[must_use]
    pub const fn new(duration_ms: u64, action: TtlAction) -> Self {
        Self {
            duration_ms,
            action,
        }
    }

    /// Delete after `duration_ms`
    #[must_use]
    pub const fn delete_after(duration_ms: u64) -> Self {
        Self::new(duration_ms, TtlAction::Delete)
    }

    /// Expiry instant for an inode created at `creation_time_ms`
    #[must_use]
    pub const fn expires_at(&self, creation_time_ms: u64) -> u64 {
        creation_time_ms.saturating_add(self.duration_ms)
    }
}

/// Snapshot of an inode's metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_id: InodeId,
    pub name: String,
    pub path: String,
    pub ufs_path: String,
    pub length: u64,
    pub block_size_bytes: u64,
    pub creation_time_ms: u64,
    pub last_modification_time_ms: u64,
    pub completed: bool,
    pub folder: bool,
    pub pinned: bool,
    pub cacheable: bool,
    pub persisted: bool,
    pub mount_point: bool,
    pub block_ids: Vec<BlockId>,
    pub ttl: Option<Ttl>,
    pub owner: String,
    pub group: String,
    pub mode: u16,
}

/// Liveness of a registered worker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Live,
    Lost,
}

/// Snapshot of a registered worker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub address: WorkerNetAddress,
    pub state: WorkerState,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub start_time_ms: u64,
    pub last_contact_ms: u64,
}

/// Current wall clock time in milliseconds since the Unix epoch
#[must_use]
pub fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
