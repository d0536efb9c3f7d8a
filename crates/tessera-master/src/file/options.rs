//! Options of the file system master operations

use tessera_common::{Ttl, current_time_ms};

/// Options for creating a file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateFileOptions {
    /// `None` uses the configured default block size
    pub block_size_bytes: Option<u64>,
    /// Create missing ancestors as directories
    pub recursive: bool,
    /// The file already exists in under storage
    pub persisted: bool,
    pub ttl: Option<Ttl>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u16>,
    /// `None` means now
    pub operation_time_ms: Option<u64>,
}

impl CreateFileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn block_size_bytes(mut self, block_size_bytes: u64) -> Self {
        self.block_size_bytes = Some(block_size_bytes);
        self
    }

    #[must_use]
    pub const fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    #[must_use]
    pub const fn persisted(mut self, persisted: bool) -> Self {
        self.persisted = persisted;
        self
    }

    #[must_use]
    pub const fn ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub const fn mode(mut self, mode: u16) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub const fn operation_time_ms(mut self, time_ms: u64) -> Self {
        self.operation_time_ms = Some(time_ms);
        self
    }
}

/// Options for creating a directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateDirectoryOptions {
    /// Create missing ancestors
    pub recursive: bool,
    /// Return the existing directory instead of failing
    pub allow_exists: bool,
    /// Also create the directory in under storage
    pub persisted: bool,
    pub ttl: Option<Ttl>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u16>,
    pub operation_time_ms: Option<u64>,
}

impl CreateDirectoryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    #[must_use]
    pub const fn allow_exists(mut self, allow_exists: bool) -> Self {
        self.allow_exists = allow_exists;
        self
    }

    #[must_use]
    pub const fn persisted(mut self, persisted: bool) -> Self {
        self.persisted = persisted;
        self
    }

    #[must_use]
    pub const fn ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[must_use]
    pub const fn mode(mut self, mode: u16) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub const fn operation_time_ms(mut self, time_ms: u64) -> Self {
        self.operation_time_ms = Some(time_ms);
        self
    }
}

/// Options for completing a file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompleteFileOptions {
    /// Length of the file in under storage, used for persisted files
    pub ufs_length: u64,
    pub operation_time_ms: Option<u64>,
}

impl CompleteFileOptions {
    pub const fn with_ufs_length(ufs_length: u64) -> Self {
        Self {
            ufs_length,
            operation_time_ms: None,
        }
    }
}

/// Partial attribute update; `None` fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetAttributeOptions {
    pub pinned: Option<bool>,
    /// `Some(None)` clears the TTL
    pub ttl: Option<Option<Ttl>>,
    pub persisted: Option<bool>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u16>,
    /// Apply owner, group and mode to every descendant as well
    pub recursive: bool,
    pub operation_time_ms: Option<u64>,
}

impl SetAttributeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn pinned(mut self, pinned: bool) -> Self {
        self.pinned = Some(pinned);
        self
    }

    #[must_use]
    pub const fn ttl(mut self, ttl: Option<Ttl>) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub const fn persisted(mut self, persisted: bool) -> Self {
        self.persisted = Some(persisted);
        self
    }

    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub const fn mode(mut self, mode: u16) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub const fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Whether any attribute would change
    pub const fn is_empty(&self) -> bool {
        self.pinned.is_none()
            && self.ttl.is_none()
            && self.persisted.is_none()
            && self.owner.is_none()
            && self.group.is_none()
            && self.mode.is_none()
    }

    /// Whether the attributes that apply recursively are set
    pub const fn has_permission_change(&self) -> bool {
        self.owner.is_some() || self.group.is_some() || self.mode.is_some()
    }
}

/// Options for deleting a path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub recursive: bool,
    /// Only delete if the path still names this inode
    pub expected_id: Option<tessera_common::InodeId>,
    /// Only delete if the inode's TTL has elapsed by this instant
    pub only_if_expired_at: Option<u64>,
}

impl DeleteOptions {
    pub const fn recursive(recursive: bool) -> Self {
        Self {
            recursive,
            expected_id: None,
            only_if_expired_at: None,
        }
    }
}

/// Options for mounting under storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// Refuse namespace mutations below the mount point
    pub read_only: bool,
}

pub(crate) fn operation_time(requested: Option<u64>) -> u64 {
    requested.unwrap_or_else(current_time_ms)
}
