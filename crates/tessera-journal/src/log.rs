//! Append-only journal log
//!
//! Records are framed and checksummed so a reader can always tell a
//! complete record from a torn one:
//!
//! ```text
//! +--------+------+--------+---------+--------+
//! | Magic  | LSN  | Length | Payload | CRC32C |
//! | 4B     | 8B   | 4B     | var     | 4B     |
//! +--------+------+--------+---------+--------+
//! ```
//!
//! A record is written with a single `write_all` while the writer lock is
//! held, and the LSN is assigned under the same lock, so file order and LSN
//! order agree. An append that fails is rolled back by truncating the file
//! to its previous length.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tessera_common::{Error, Result};
use tracing::{debug, warn};

/// Log record magic number
const LOG_MAGIC: u32 = 0x544A_524E; // "TJRN"

/// Record header size (magic + lsn + length)
const RECORD_HEADER_SIZE: usize = 16;

/// Record trailer size (crc)
const RECORD_TRAILER_SIZE: usize = 4;

/// A single log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Log sequence number
    pub lsn: u64,
    /// Serialized entry
    pub data: Vec<u8>,
}

/// Outcome of parsing the bytes at some offset of the log
enum Parsed {
    Record(LogRecord, usize),
    /// Not enough bytes for a whole record: an append that never finished
    Incomplete,
    /// A complete record that fails validation
    Invalid(String),
}

impl LogRecord {
    /// Serialize record to bytes
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(RECORD_HEADER_SIZE + self.data.len() + RECORD_TRAILER_SIZE);

        buf.extend_from_slice(&LOG_MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.lsn.to_le_bytes());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);

        // CRC over everything except the CRC itself
        let crc = crc32c::crc32c(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        buf
    }

    fn parse(data: &[u8]) -> Parsed {
        if data.len() < RECORD_HEADER_SIZE + RECORD_TRAILER_SIZE {
            return Parsed::Incomplete;
        }

        let magic = read_u32(&data[0..4]);
        if magic != LOG_MAGIC {
            // Zero-filled space past the last record is what a crash during
            // file extension leaves behind.
            if data.iter().all(|&b| b == 0) {
                return Parsed::Incomplete;
            }
            return Parsed::Invalid(format!("bad record magic {magic:#010x}"));
        }

        let lsn = read_u64(&data[4..12]);
        let data_len = read_u32(&data[12..16]) as usize;
        let total_size = RECORD_HEADER_SIZE + data_len + RECORD_TRAILER_SIZE;
        if data.len() < total_size {
            return Parsed::Incomplete;
        }

        let stored_crc = read_u32(&data[RECORD_HEADER_SIZE + data_len..total_size]);
        let computed_crc = crc32c::crc32c(&data[..RECORD_HEADER_SIZE + data_len]);
        if computed_crc != stored_crc {
            return Parsed::Invalid(format!("CRC mismatch in record {lsn}"));
        }

        Parsed::Record(
            Self {
                lsn,
                data: data[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + data_len].to_vec(),
            },
            total_size,
        )
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Result of reading a whole log file
#[derive(Debug, Default)]
pub struct LogScan {
    /// Complete, valid records in LSN order
    pub records: Vec<LogRecord>,
    /// Length of the prefix holding those records
    pub valid_len: u64,
    /// Bytes after the last complete record
    pub torn_bytes: u64,
}

/// Read every record of a log file.
///
/// A torn tail is reported through `torn_bytes`; anything else that does not
/// validate, or LSNs that fail to increase, is `JournalCorrupted`.
pub fn scan_log(path: &Path) -> Result<LogScan> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LogScan::default()),
        Err(e) => return Err(Error::Journal(format!("failed to open journal log: {e}"))),
    };

    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .map_err(|e| Error::Journal(format!("failed to read journal log: {e}")))?;

    let mut scan = LogScan::default();
    let mut offset = 0usize;
    let mut last_lsn = 0u64;

    while offset < data.len() {
        match LogRecord::parse(&data[offset..]) {
            Parsed::Record(record, size) => {
                if record.lsn <= last_lsn {
                    return Err(Error::JournalCorrupted(format!(
                        "record {} at offset {offset} follows record {last_lsn}",
                        record.lsn
                    )));
                }
                last_lsn = record.lsn;
                scan.records.push(record);
                offset += size;
            }
            Parsed::Incomplete => break,
            Parsed::Invalid(reason) => {
                return Err(Error::JournalCorrupted(format!(
                    "{reason} at offset {offset} of {}",
                    path.display()
                )));
            }
        }
    }

    scan.valid_len = offset as u64;
    scan.torn_bytes = (data.len() - offset) as u64;
    Ok(scan)
}

struct LogWriter {
    file: File,
    /// Length of the file, all of it complete records
    len: u64,
    /// Next LSN to assign
    next_lsn: u64,
    /// Records currently in the file
    record_count: u64,
    /// Set when a failed append could not be rolled back
    poisoned: bool,
}

/// Append-only journal log file
pub struct JournalLog {
    path: PathBuf,
    writer: Mutex<LogWriter>,
    sync_on_write: bool,
}

impl JournalLog {
    /// Open (or create) the log, discarding a torn tail.
    ///
    /// LSNs continue from the last record in the file, or from
    /// `min_next_lsn` if that is larger.
    pub fn open(path: impl AsRef<Path>, sync_on_write: bool, min_next_lsn: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let scan = scan_log(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::Journal(format!("failed to open journal log: {e}")))?;

        if scan.torn_bytes > 0 {
            warn!(
                "Discarding {} bytes of incomplete journal record at end of {:?}",
                scan.torn_bytes, path
            );
            file.set_len(scan.valid_len)
                .and_then(|()| file.sync_all())
                .map_err(|e| Error::Journal(format!("failed to truncate torn record: {e}")))?;
        }

        let last_lsn = scan.records.last().map_or(0, |r| r.lsn);
        let writer = LogWriter {
            file,
            len: scan.valid_len,
            next_lsn: (last_lsn + 1).max(min_next_lsn),
            record_count: scan.records.len() as u64,
            poisoned: false,
        };

        Ok(Self {
            path,
            writer: Mutex::new(writer),
            sync_on_write,
        })
    }

    /// Append one serialized entry, returning its LSN once it is durable
    pub fn append(&self, payload: &[u8]) -> Result<u64> {
        let mut writer = self.writer.lock();
        if writer.poisoned {
            return Err(Error::Journal(
                "journal log is unusable after a failed rollback".into(),
            ));
        }

        let lsn = writer.next_lsn;
        let bytes = LogRecord {
            lsn,
            data: payload.to_vec(),
        }
        .to_bytes();

        let sync = self.sync_on_write;
        let written = writer
            .file
            .write_all(&bytes)
            .and_then(|()| if sync { writer.file.sync_data() } else { Ok(()) });

        if let Err(e) = written {
            let previous_len = writer.len;
            if let Err(rollback) = writer.file.set_len(previous_len) {
                warn!("Failed to roll back journal append: {}", rollback);
                writer.poisoned = true;
            }
            return Err(Error::Journal(format!("journal append failed: {e}")));
        }

        writer.len += bytes.len() as u64;
        writer.next_lsn += 1;
        writer.record_count += 1;
        debug!("journal append: lsn={}, {} bytes", lsn, bytes.len());
        Ok(lsn)
    }

    /// Read all records currently in the log
    pub fn records(&self) -> Result<Vec<LogRecord>> {
        let _writer = self.writer.lock();
        Ok(scan_log(&self.path)?.records)
    }

    /// Rewrite the log keeping only records with an LSN above `lsn`.
    ///
    /// Called after a checkpoint at `lsn` is durable.
    pub fn truncate_through(&self, lsn: u64) -> Result<()> {
        let mut writer = self.writer.lock();
        let kept: Vec<LogRecord> = scan_log(&self.path)?
            .records
            .into_iter()
            .filter(|r| r.lsn > lsn)
            .collect();

        let new_path = self.path.with_extension("log.new");
        let mut new_len = 0u64;
        {
            let mut new_file = File::create(&new_path)
                .map_err(|e| Error::Journal(format!("failed to create journal log: {e}")))?;
            for record in &kept {
                let bytes = record.to_bytes();
                new_file
                    .write_all(&bytes)
                    .map_err(|e| Error::Journal(format!("journal rewrite failed: {e}")))?;
                new_len += bytes.len() as u64;
            }
            new_file
                .sync_all()
                .map_err(|e| Error::Journal(format!("journal sync failed: {e}")))?;
        }

        // Atomic rename
        std::fs::rename(&new_path, &self.path)
            .map_err(|e| Error::Journal(format!("journal rename failed: {e}")))?;
        if let Some(dir) = self.path.parent() {
            sync_dir(dir)?;
        }

        // Reopen writer to new file
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::Journal(format!("failed to reopen journal log: {e}")))?;
        writer.len = new_len;
        writer.file = file;
        writer.record_count = kept.len() as u64;
        writer.poisoned = false;
        Ok(())
    }

    /// Flush everything to disk
    pub fn sync(&self) -> Result<()> {
        self.writer
            .lock()
            .file
            .sync_all()
            .map_err(|e| Error::Journal(format!("journal sync failed: {e}")))
    }

    /// Last assigned LSN
    pub fn current_lsn(&self) -> u64 {
        self.writer.lock().next_lsn.saturating_sub(1)
    }

    /// Number of records in the log
    pub fn record_count(&self) -> u64 {
        self.writer.lock().record_count
    }

    /// Size of the log in bytes
    pub fn size(&self) -> u64 {
        self.writer.lock().len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// fsync a directory so renames inside it are durable
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| Error::Journal(format!("failed to sync {}: {e}", dir.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};
    use tempfile::tempdir;

    #[test]
    fn test_append_assigns_increasing_lsns() {
        let dir = tempdir().unwrap();
        let log = JournalLog::open(dir.path().join("journal.log"), false, 1).unwrap();

        assert_eq!(log.append(b"one").unwrap(), 1);
        assert_eq!(log.append(b"two").unwrap(), 2);
        assert_eq!(log.current_lsn(), 2);
        assert_eq!(log.record_count(), 2);

        let records = log.records().unwrap();
        assert_eq!(records[1].data, b"two");
    }

    #[test]
    fn test_reopen_continues_lsns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");
        {
            let log = JournalLog::open(&path, true, 1).unwrap();
            log.append(b"one").unwrap();
        }

        let log = JournalLog::open(&path, true, 1).unwrap();
        assert_eq!(log.append(b"two").unwrap(), 2);

        let log = JournalLog::open(&path, true, 10).unwrap();
        assert_eq!(log.append(b"three").unwrap(), 10);
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");
        {
            let log = JournalLog::open(&path, true, 1).unwrap();
            log.append(b"complete").unwrap();
        }

        // Half of a second record
        let partial = LogRecord {
            lsn: 2,
            data: b"never finished".to_vec(),
        }
        .to_bytes();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&partial[..partial.len() / 2]).unwrap();
        drop(file);

        let scan = scan_log(&path).unwrap();
        assert_eq!(scan.records.len(), 1);
        assert!(scan.torn_bytes > 0);

        let log = JournalLog::open(&path, true, 1).unwrap();
        assert_eq!(log.append(b"next").unwrap(), 2);
        let records = log.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].data, b"next");
    }

    #[test]
    fn test_corrupt_last_record_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");
        {
            let log = JournalLog::open(&path, true, 1).unwrap();
            log.append(b"first record").unwrap();
            log.append(b"second record").unwrap();
        }
        let len_before = std::fs::metadata(&path).unwrap().len();

        // Flip a payload byte of the second, complete record
        let first_len = RECORD_HEADER_SIZE + b"first record".len() + RECORD_TRAILER_SIZE;
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start((first_len + RECORD_HEADER_SIZE) as u64))
            .unwrap();
        file.write_all(b"X").unwrap();
        drop(file);

        assert!(matches!(scan_log(&path), Err(Error::JournalCorrupted(_))));
        assert!(matches!(
            JournalLog::open(&path, true, 1),
            Err(Error::JournalCorrupted(_))
        ));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len_before);
    }

    #[test]
    fn test_corrupt_middle_record_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");
        {
            let log = JournalLog::open(&path, true, 1).unwrap();
            log.append(b"first record").unwrap();
            log.append(b"second record").unwrap();
        }

        // Flip a payload byte of the first record
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(RECORD_HEADER_SIZE as u64)).unwrap();
        file.write_all(b"X").unwrap();
        drop(file);

        assert!(matches!(scan_log(&path), Err(Error::JournalCorrupted(_))));
        assert!(JournalLog::open(&path, true, 1).is_err());
    }

    #[test]
    fn test_truncate_through_keeps_later_records() {
        let dir = tempdir().unwrap();
        let log = JournalLog::open(dir.path().join("journal.log"), false, 1).unwrap();
        for i in 0..5u8 {
            log.append(&[i]).unwrap();
        }

        log.truncate_through(3).unwrap();
        let lsns: Vec<u64> = log.records().unwrap().iter().map(|r| r.lsn).collect();
        assert_eq!(lsns, vec![4, 5]);
        assert_eq!(log.record_count(), 2);
        assert_eq!(log.append(b"after").unwrap(), 6);
    }
}
