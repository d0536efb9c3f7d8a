//! Configuration types for Tessera
//!
//! Every component receives the configuration it needs through its
//! constructor; nothing reads process-wide settings.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for a master process
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Journal configuration, shared by the block and file system masters
    pub journal: JournalConfig,
    /// TTL checker interval in milliseconds (0 disables the background sweep)
    pub ttl_checker_interval_ms: u64,
    /// Interval between checks for an overdue journal checkpoint
    pub checkpoint_check_interval_ms: u64,
    /// A worker with no heartbeat for this long is reported as lost
    pub worker_timeout_ms: u64,
    /// Block size for files created without an explicit one
    pub default_block_size_bytes: u64,
    /// Under storage location mounted at `/`
    pub root_ufs: String,
    /// Owner of the root directory and default owner of new inodes
    pub default_owner: String,
    /// Group of the root directory and default group of new inodes
    pub default_group: String,
    /// Permission bits masked out of new inodes
    pub umask: u16,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            journal: JournalConfig::default(),
            ttl_checker_interval_ms: 60 * 60 * 1000, // 1 hour
            checkpoint_check_interval_ms: 60 * 1000,
            worker_timeout_ms: 5 * 60 * 1000,
            default_block_size_bytes: 512 * 1024 * 1024, // 512 MB
            root_ufs: "/var/lib/tessera/underfs".to_string(),
            default_owner: "tessera".to_string(),
            default_group: "tessera".to_string(),
            umask: 0o022,
        }
    }
}

impl MasterConfig {
    /// Configuration rooted at a data directory: journals live under
    /// `<dir>/journal` and the root mount points at `<dir>/underfs`.
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            journal: JournalConfig {
                dir: dir.join("journal"),
                ..Default::default()
            },
            root_ufs: dir.join("underfs").to_string_lossy().into_owned(),
            ..Default::default()
        }
    }

    /// `None` when the TTL checker is disabled
    #[must_use]
    pub fn ttl_checker_interval(&self) -> Option<Duration> {
        (self.ttl_checker_interval_ms > 0).then(|| Duration::from_millis(self.ttl_checker_interval_ms))
    }

    #[must_use]
    pub const fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    /// Default permission bits of a new file
    #[must_use]
    pub const fn file_mode(&self) -> u16 {
        0o666 & !self.umask
    }

    /// Default permission bits of a new directory
    #[must_use]
    pub const fn directory_mode(&self) -> u16 {
        0o777 & !self.umask
    }

    /// Reject settings the masters cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.default_block_size_bytes == 0 {
            return Err(Error::Configuration(
                "default_block_size_bytes must be positive".into(),
            ));
        }
        if self.root_ufs.is_empty() {
            return Err(Error::Configuration("root_ufs must be set".into()));
        }
        if self.umask > 0o777 {
            return Err(Error::Configuration(format!(
                "umask {:o} is not a permission mask",
                self.umask
            )));
        }
        self.journal.validate()
    }
}

/// Write-ahead journal configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Base directory; each master journals into its own subdirectory
    pub dir: PathBuf,
    /// fsync after every append
    pub sync_on_write: bool,
    /// Log entries since the last checkpoint before a new one is due
    pub checkpoint_threshold_entries: u64,
    /// Number of checkpoint files to keep
    pub checkpoint_retention: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/tessera/journal"),
            sync_on_write: true,
            checkpoint_threshold_entries: 100_000,
            checkpoint_retention: 2,
        }
    }
}

impl JournalConfig {
    /// Journal directory of one master
    #[must_use]
    pub fn master_dir(&self, master: &str) -> PathBuf {
        self.dir.join(master)
    }

    fn validate(&self) -> Result<()> {
        if self.checkpoint_retention == 0 {
            return Err(Error::Configuration(
                "journal.checkpoint_retention must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
