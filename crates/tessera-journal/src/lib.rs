//! Tessera Journal - write-ahead journal for the masters
//!
//! Each master owns one journal directory holding an append-only log
//! (`journal.log`) and a few checkpoint files. Mutations are appended before
//! they are applied in memory; on startup the newest checkpoint is loaded
//! and the log records after it are replayed through the same apply path
//! the master uses at runtime.

pub mod checkpoint;
pub mod entry;
pub mod log;

pub use entry::{InodeDirectoryEntry, InodeFileEntry, JournalEntry, SetAttributeEntry};

use crate::checkpoint::{list_checkpoints, prune_checkpoints, read_checkpoint, write_checkpoint};
use crate::log::JournalLog;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_common::{Error, JournalConfig, Result};
use tracing::{debug, info};

const LOG_FILE_NAME: &str = "journal.log";

/// What a replay went through
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// LSN of the checkpoint loaded, 0 if none
    pub checkpoint_lsn: u64,
    /// Entries read from the checkpoint
    pub checkpoint_entries: u64,
    /// Log records replayed after the checkpoint
    pub log_records: u64,
    /// Entries handed to the apply callback, batches flattened
    pub entries_applied: u64,
    /// Last LSN reflected in the recovered state
    pub last_lsn: u64,
}

/// Write-ahead journal of one master
pub struct Journal {
    dir: PathBuf,
    log: JournalLog,
    checkpoint_threshold: u64,
    checkpoint_retention: usize,
    checkpoint_lsn: AtomicU64,
}

impl Journal {
    /// Open the journal in `dir`, creating it if needed.
    ///
    /// A torn record at the end of the log is discarded here; any other
    /// damage is reported as `JournalCorrupted`.
    pub fn open(dir: impl AsRef<Path>, config: &JournalConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Journal(format!("failed to create journal dir {dir:?}: {e}")))?;

        let checkpoint_lsn = list_checkpoints(&dir)?.first().map_or(0, |(_, lsn)| *lsn);
        let log = JournalLog::open(dir.join(LOG_FILE_NAME), config.sync_on_write, checkpoint_lsn + 1)?;

        info!(
            "Opened journal at {:?}: checkpoint lsn {}, {} log records, next lsn {}",
            dir,
            checkpoint_lsn,
            log.record_count(),
            log.current_lsn() + 1
        );

        Ok(Self {
            dir,
            log,
            checkpoint_threshold: config.checkpoint_threshold_entries,
            checkpoint_retention: config.checkpoint_retention,
            checkpoint_lsn: AtomicU64::new(checkpoint_lsn),
        })
    }

    /// Append one entry; returns its LSN once durable
    pub fn append(&self, entry: &JournalEntry) -> Result<u64> {
        let lsn = self.log.append(&entry.to_bytes()?)?;
        debug!("journaled {} at lsn {}", entry.kind(), lsn);
        Ok(lsn)
    }

    /// Append entries as one atomic record.
    ///
    /// A single entry is written as itself; an empty slice writes nothing
    /// and returns the current LSN.
    pub fn append_batch(&self, entries: &[JournalEntry]) -> Result<u64> {
        match entries {
            [] => Ok(self.current_lsn()),
            [entry] => self.append(entry),
            _ => self.append(&JournalEntry::Batch(entries.to_vec())),
        }
    }

    /// Rebuild state: feed the newest checkpoint and every later log record
    /// to `apply`, in LSN order, with batches flattened.
    pub fn replay<F>(&self, mut apply: F) -> Result<ReplayStats>
    where
        F: FnMut(JournalEntry) -> Result<()>,
    {
        let mut stats = ReplayStats::default();

        if let Some((path, _)) = list_checkpoints(&self.dir)?.into_iter().next() {
            let (header, entries) = read_checkpoint(&path)?;
            stats.checkpoint_lsn = header.lsn;
            stats.checkpoint_entries = entries.len() as u64;
            for entry in entries {
                stats.entries_applied += flatten_into(entry, &mut apply)?;
            }
            debug!("Loaded checkpoint {:?} at lsn {}", path, header.lsn);
        }
        stats.last_lsn = stats.checkpoint_lsn;

        for record in self.log.records()? {
            if record.lsn <= stats.checkpoint_lsn {
                continue;
            }
            let entry = JournalEntry::from_bytes(&record.data)?;
            stats.entries_applied += flatten_into(entry, &mut apply)?;
            stats.log_records += 1;
            stats.last_lsn = record.lsn;
        }

        info!(
            "Replayed journal {:?}: checkpoint lsn {} ({} entries), {} log records, last lsn {}",
            self.dir,
            stats.checkpoint_lsn,
            stats.checkpoint_entries,
            stats.log_records,
            stats.last_lsn
        );
        Ok(stats)
    }

    /// Persist a checkpoint of the state as of `lsn`, then drop log records
    /// it covers and checkpoints beyond the retention count.
    ///
    /// The caller must keep new appends out while `entries` and `lsn` are
    /// captured so the two agree.
    pub fn checkpoint(&self, lsn: u64, entries: &[JournalEntry]) -> Result<PathBuf> {
        let path = write_checkpoint(&self.dir, lsn, entries)?;
        self.checkpoint_lsn.store(lsn, Ordering::SeqCst);
        self.log.truncate_through(lsn)?;
        prune_checkpoints(&self.dir, self.checkpoint_retention)?;

        info!(
            "Checkpointed journal {:?} at lsn {} ({} entries)",
            self.dir,
            lsn,
            entries.len()
        );
        Ok(path)
    }

    /// Last LSN handed out
    pub fn current_lsn(&self) -> u64 {
        self.log.current_lsn()
    }

    /// LSN of the newest checkpoint, 0 if none
    pub fn checkpoint_lsn(&self) -> u64 {
        self.checkpoint_lsn.load(Ordering::SeqCst)
    }

    /// Log records written since the newest checkpoint
    pub fn entries_since_checkpoint(&self) -> u64 {
        self.log.record_count()
    }

    /// Whether enough records accumulated for a checkpoint to be due
    pub fn needs_checkpoint(&self) -> bool {
        self.entries_since_checkpoint() >= self.checkpoint_threshold
    }

    /// Flush the log to disk
    pub fn sync(&self) -> Result<()> {
        self.log.sync()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Hand `entry` to `apply`, expanding a top-level batch. Returns the number
/// of entries applied.
fn flatten_into<F>(entry: JournalEntry, apply: &mut F) -> Result<u64>
where
    F: FnMut(JournalEntry) -> Result<()>,
{
    match entry {
        JournalEntry::Batch(entries) => {
            let count = entries.len() as u64;
            for inner in entries {
                if matches!(inner, JournalEntry::Batch(_)) {
                    return Err(Error::JournalCorrupted("nested journal batch".into()));
                }
                apply(inner)?;
            }
            Ok(count)
        }
        entry => {
            apply(entry)?;
            Ok(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config() -> JournalConfig {
        JournalConfig {
            checkpoint_threshold_entries: 3,
            ..Default::default()
        }
    }

    fn generator(n: u64) -> JournalEntry {
        JournalEntry::InodeDirectoryIdGenerator { next_sequence: n }
    }

    fn collect(journal: &Journal) -> (Vec<JournalEntry>, ReplayStats) {
        let mut entries = Vec::new();
        let stats = journal
            .replay(|entry| {
                entries.push(entry);
                Ok(())
            })
            .unwrap();
        (entries, stats)
    }

    #[test]
    fn test_append_and_replay() {
        let dir = tempdir().unwrap();
        {
            let journal = Journal::open(dir.path(), &config()).unwrap();
            journal.append(&generator(1)).unwrap();
            journal
                .append_batch(&[generator(2), generator(3)])
                .unwrap();
            assert_eq!(journal.current_lsn(), 2);
        }

        let journal = Journal::open(dir.path(), &config()).unwrap();
        let (entries, stats) = collect(&journal);
        assert_eq!(entries, vec![generator(1), generator(2), generator(3)]);
        assert_eq!(stats.log_records, 2);
        assert_eq!(stats.entries_applied, 3);
        assert_eq!(stats.last_lsn, 2);
    }

    #[test]
    fn test_empty_batch_writes_nothing() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(dir.path(), &config()).unwrap();
        assert_eq!(journal.append_batch(&[]).unwrap(), 0);
        assert_eq!(journal.entries_since_checkpoint(), 0);
    }

    #[test]
    fn test_checkpoint_replaces_log_prefix() {
        let dir = tempdir().unwrap();
        {
            let journal = Journal::open(dir.path(), &config()).unwrap();
            for n in 1..=3 {
                journal.append(&generator(n)).unwrap();
            }
            assert!(journal.needs_checkpoint());

            journal.checkpoint(3, &[generator(3)]).unwrap();
            assert!(!journal.needs_checkpoint());
            assert_eq!(journal.checkpoint_lsn(), 3);

            assert_eq!(journal.append(&generator(4)).unwrap(), 4);
        }

        let journal = Journal::open(dir.path(), &config()).unwrap();
        let (entries, stats) = collect(&journal);
        assert_eq!(entries, vec![generator(3), generator(4)]);
        assert_eq!(stats.checkpoint_lsn, 3);
        assert_eq!(stats.checkpoint_entries, 1);
        assert_eq!(stats.log_records, 1);
        assert_eq!(stats.last_lsn, 4);
    }

    #[test]
    fn test_lsns_continue_after_checkpoint_with_empty_log() {
        let dir = tempdir().unwrap();
        {
            let journal = Journal::open(dir.path(), &config()).unwrap();
            journal.append(&generator(1)).unwrap();
            journal.append(&generator(2)).unwrap();
            journal.checkpoint(2, &[generator(2)]).unwrap();
        }

        let journal = Journal::open(dir.path(), &config()).unwrap();
        assert_eq!(journal.current_lsn(), 2);
        assert_eq!(journal.append(&generator(3)).unwrap(), 3);
    }

    #[test]
    fn test_nested_batch_is_corruption() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(dir.path(), &config()).unwrap();
        journal
            .append(&JournalEntry::Batch(vec![JournalEntry::Batch(vec![])]))
            .unwrap();

        let result = journal.replay(|_| Ok(()));
        assert!(matches!(result, Err(Error::JournalCorrupted(_))));
    }

    #[test]
    fn test_apply_error_stops_replay() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(dir.path(), &config()).unwrap();
        journal.append(&generator(1)).unwrap();
        journal.append(&generator(2)).unwrap();

        let mut seen = 0;
        let result = journal.replay(|_| {
            seen += 1;
            Err(Error::internal("boom"))
        });
        assert!(result.is_err());
        assert_eq!(seen, 1);
    }
}
