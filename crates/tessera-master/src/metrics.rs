//! Master operation counters
//!
//! Every public file system operation has an invocation counter that is
//! bumped on each call, and some have outcome counters that move only when
//! the call succeeds. Counter names are stable strings for external
//! monitoring.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_common::Result;

/// A master counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Counter {
    CreateFileOps,
    FilesCreated,
    CreateDirectoryOps,
    DirectoriesCreated,
    GetFileInfoOps,
    FileInfosGot,
    GetFileBlockInfoOps,
    FileBlockInfosGot,
    CompleteFileOps,
    FilesCompleted,
    DeletePathOps,
    PathsDeleted,
    GetNewBlockOps,
    SetAttributeOps,
    FilesPersisted,
    RenamePathOps,
    PathsRenamed,
    FreeFileOps,
    FilesFreed,
    MountOps,
    PathsMounted,
    UnmountOps,
    PathsUnmounted,
}

impl Counter {
    pub const ALL: [Self; 23] = [
        Self::CreateFileOps,
        Self::FilesCreated,
        Self::CreateDirectoryOps,
        Self::DirectoriesCreated,
        Self::GetFileInfoOps,
        Self::FileInfosGot,
        Self::GetFileBlockInfoOps,
        Self::FileBlockInfosGot,
        Self::CompleteFileOps,
        Self::FilesCompleted,
        Self::DeletePathOps,
        Self::PathsDeleted,
        Self::GetNewBlockOps,
        Self::SetAttributeOps,
        Self::FilesPersisted,
        Self::RenamePathOps,
        Self::PathsRenamed,
        Self::FreeFileOps,
        Self::FilesFreed,
        Self::MountOps,
        Self::PathsMounted,
        Self::UnmountOps,
        Self::PathsUnmounted,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreateFileOps => "CreateFileOps",
            Self::FilesCreated => "FilesCreated",
            Self::CreateDirectoryOps => "CreateDirectoryOps",
            Self::DirectoriesCreated => "DirectoriesCreated",
            Self::GetFileInfoOps => "GetFileInfoOps",
            Self::FileInfosGot => "FileInfosGot",
            Self::GetFileBlockInfoOps => "GetFileBlockInfoOps",
            Self::FileBlockInfosGot => "FileBlockInfosGot",
            Self::CompleteFileOps => "CompleteFileOps",
            Self::FilesCompleted => "FilesCompleted",
            Self::DeletePathOps => "DeletePathOps",
            Self::PathsDeleted => "PathsDeleted",
            Self::GetNewBlockOps => "GetNewBlockOps",
            Self::SetAttributeOps => "SetAttributeOps",
            Self::FilesPersisted => "FilesPersisted",
            Self::RenamePathOps => "RenamePathOps",
            Self::PathsRenamed => "PathsRenamed",
            Self::FreeFileOps => "FreeFileOps",
            Self::FilesFreed => "FilesFreed",
            Self::MountOps => "MountOps",
            Self::PathsMounted => "PathsMounted",
            Self::UnmountOps => "UnmountOps",
            Self::PathsUnmounted => "PathsUnmounted",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Outcome counters reported by an operation body.
///
/// They are applied only if the operation returns `Ok`.
#[derive(Debug, Default)]
pub struct Outcomes {
    pending: Vec<(Counter, u64)>,
}

impl Outcomes {
    /// Count one success event
    pub fn bump(&mut self, counter: Counter) {
        self.add(counter, 1);
    }

    /// Count `n` success events
    pub fn add(&mut self, counter: Counter, n: u64) {
        if n > 0 {
            self.pending.push((counter, n));
        }
    }
}

/// Process-wide master counters
#[derive(Debug, Default)]
pub struct MasterMetrics {
    counters: [AtomicU64; Counter::ALL.len()],
}

impl MasterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run an operation body: `invocation` is always counted, outcomes the
    /// body reports are counted only if it succeeds.
    pub fn instrument<T, F>(&self, invocation: Counter, body: F) -> Result<T>
    where
        F: FnOnce(&mut Outcomes) -> Result<T>,
    {
        self.inc(invocation, 1);
        let mut outcomes = Outcomes::default();
        let result = body(&mut outcomes);
        if result.is_ok() {
            for (counter, n) in outcomes.pending {
                self.inc(counter, n);
            }
        }
        result
    }

    fn inc(&self, counter: Counter, n: u64) {
        self.counters[counter.index()].fetch_add(n, Ordering::Relaxed);
    }

    /// Current value of a counter
    pub fn count(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Current value of a counter by its stable name
    pub fn get(&self, name: &str) -> Option<u64> {
        Counter::from_name(name).map(|c| self.count(c))
    }

    /// All counters keyed by name
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        Counter::ALL
            .into_iter()
            .map(|c| (c.as_str(), self.count(c)))
            .collect()
    }
}
