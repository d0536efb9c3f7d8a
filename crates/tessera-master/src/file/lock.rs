//! Path locks
//!
//! Every namespace operation locks the paths it touches: each ancestor in
//! shared mode and its target paths shared or exclusive. Requests are
//! merged per path (the stronger mode wins) and acquired in ascending path
//! order, which is root-to-leaf along any single path and one total order
//! across all operations.

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tessera_common::FsPath;

/// Prune dead entries once the table grows past this many
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    Read,
    Write,
}

enum HeldLock {
    Read(#[allow(dead_code)] ArcRwLockReadGuard<RawRwLock, ()>),
    Write(#[allow(dead_code)] ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// Locks held by one operation; released leaf-to-root on drop
pub struct PathLockSet {
    held: Vec<(FsPath, LockMode, HeldLock)>,
}

impl PathLockSet {
    /// Mode held on `path`, if any
    pub fn mode(&self, path: &FsPath) -> Option<LockMode> {
        self.held
            .iter()
            .find(|(held, ..)| held == path)
            .map(|(_, mode, _)| *mode)
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl Drop for PathLockSet {
    fn drop(&mut self) {
        while let Some((_, _, guard)) = self.held.pop() {
            drop(guard);
        }
    }
}

/// Table of per-path locks, created on demand
#[derive(Default)]
pub struct PathLockManager {
    locks: Mutex<HashMap<FsPath, Weak<RwLock<()>>>>,
}

impl PathLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, path: &FsPath) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(path).and_then(Weak::upgrade) {
            return lock;
        }
        if locks.len() >= PRUNE_THRESHOLD {
            locks.retain(|_, lock| lock.strong_count() > 0);
        }
        let lock = Arc::new(RwLock::new(()));
        locks.insert(path.clone(), Arc::downgrade(&lock));
        lock
    }

    /// Lock the given paths and all their ancestors
    pub fn lock(&self, requests: &[(FsPath, LockMode)]) -> PathLockSet {
        let mut plan: BTreeMap<FsPath, LockMode> = BTreeMap::new();
        for (path, mode) in requests {
            for ancestor in path.lineage() {
                let wanted = if ancestor == *path { *mode } else { LockMode::Read };
                let entry = plan.entry(ancestor).or_insert(wanted);
                *entry = (*entry).max(wanted);
            }
        }

        let held = plan
            .into_iter()
            .map(|(path, mode)| {
                let lock = self.lock_for(&path);
                let guard = match mode {
                    LockMode::Read => HeldLock::Read(lock.read_arc()),
                    LockMode::Write => HeldLock::Write(lock.write_arc()),
                };
                (path, mode, guard)
            })
            .collect();
        PathLockSet { held }
    }

    /// Shared lock on `path`
    pub fn read(&self, path: &FsPath) -> PathLockSet {
        self.lock(&[(path.clone(), LockMode::Read)])
    }

    /// Exclusive lock on `path`
    pub fn write(&self, path: &FsPath) -> PathLockSet {
        self.lock(&[(path.clone(), LockMode::Write)])
    }

    /// Number of paths with a live lock object
    pub fn live_locks(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn path(p: &str) -> FsPath {
        FsPath::new(p).unwrap()
    }

    #[test]
    fn test_ancestors_are_read_locked() {
        let manager = PathLockManager::new();
        let set = manager.write(&path("/a/b"));
        assert_eq!(set.len(), 3);
        assert_eq!(set.mode(&FsPath::root()), Some(LockMode::Read));
        assert_eq!(set.mode(&path("/a")), Some(LockMode::Read));
        assert_eq!(set.mode(&path("/a/b")), Some(LockMode::Write));
    }

    #[test]
    fn test_duplicates_merge_to_stronger_mode() {
        let manager = PathLockManager::new();
        let set = manager.lock(&[
            (path("/a/b"), LockMode::Write),
            (path("/a"), LockMode::Write),
        ]);
        assert_eq!(set.len(), 3);
        assert_eq!(set.mode(&path("/a")), Some(LockMode::Write));
    }

    #[test]
    fn test_locks_are_released_and_pruned() {
        let manager = PathLockManager::new();
        {
            let _set = manager.write(&path("/x/y"));
            assert_eq!(manager.live_locks(), 3);
        }
        assert_eq!(manager.live_locks(), 0);
        // Re-locking after release works
        let _set = manager.write(&path("/x/y"));
    }

    #[test]
    fn test_readers_share_writers_exclude() {
        let manager = Arc::new(PathLockManager::new());
        let _reader = manager.read(&path("/a"));
        let _other_reader = manager.read(&path("/a"));

        let acquired = Arc::new(AtomicUsize::new(0));
        let handle = {
            let manager = Arc::clone(&manager);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _writer = manager.write(&path("/a"));
                acquired.fetch_add(1, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(acquired.load(Ordering::SeqCst), 0);
        drop(_reader);
        drop(_other_reader);
        handle.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_crossing_renames_do_not_deadlock() {
        let manager = Arc::new(PathLockManager::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let (src, dst) = if i % 2 == 0 {
                        (path("/a/x"), path("/b/y"))
                    } else {
                        (path("/b/y"), path("/a/x"))
                    };
                    let _set = manager.lock(&[(src, LockMode::Write), (dst, LockMode::Write)]);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
