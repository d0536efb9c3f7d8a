//! Checkpoint files
//!
//! A checkpoint is the full state of one master, expressed as the journal
//! entries that rebuild it, taken at a given LSN. Files are named
//! `checkpoint_<lsn>.ckpt` and carry a fixed header followed by the bincode
//! encoded entries.

use crate::entry::JournalEntry;
use crate::log::sync_dir;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tessera_common::{Error, Result, current_time_ms};
use tracing::{debug, warn};

const CHECKPOINT_PREFIX: &str = "checkpoint_";
const CHECKPOINT_SUFFIX: &str = ".ckpt";

/// Header of a checkpoint file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckpointHeader {
    pub magic: u32,
    pub version: u32,
    /// Last LSN reflected in the checkpoint
    pub lsn: u64,
    /// Number of entries in the body
    pub entry_count: u64,
    /// CRC32C of the body
    pub checksum: u32,
    /// Creation time in milliseconds
    pub created_at: u64,
}

impl CheckpointHeader {
    pub const MAGIC: u32 = 0x5443_4B50; // "TCKP"
    pub const VERSION: u32 = 1;
    pub const SIZE: usize = 36;

    #[must_use]
    pub fn new(lsn: u64, entry_count: u64, checksum: u32) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            lsn,
            entry_count,
            checksum,
            created_at: current_time_ms(),
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.lsn.to_le_bytes());
        buf[16..24].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[24..28].copy_from_slice(&self.checksum.to_le_bytes());
        buf[28..36].copy_from_slice(&self.created_at.to_le_bytes());
        buf
    }

    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        let magic = u32::from_le_bytes(data[0..4].try_into().ok()?);
        if magic != Self::MAGIC {
            return None;
        }
        Some(Self {
            magic,
            version: u32::from_le_bytes(data[4..8].try_into().ok()?),
            lsn: u64::from_le_bytes(data[8..16].try_into().ok()?),
            entry_count: u64::from_le_bytes(data[16..24].try_into().ok()?),
            checksum: u32::from_le_bytes(data[24..28].try_into().ok()?),
            created_at: u64::from_le_bytes(data[28..36].try_into().ok()?),
        })
    }
}

/// Path of the checkpoint taken at `lsn`
#[must_use]
pub fn checkpoint_path(dir: &Path, lsn: u64) -> PathBuf {
    dir.join(format!("{CHECKPOINT_PREFIX}{lsn}{CHECKPOINT_SUFFIX}"))
}

/// All checkpoint files in `dir`, newest first
pub fn list_checkpoints(dir: &Path) -> Result<Vec<(PathBuf, u64)>> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::Journal(format!(
                "failed to read checkpoint dir: {e}"
            )));
        }
    };

    let mut checkpoints: Vec<(PathBuf, u64)> = read_dir
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            name_str
                .strip_prefix(CHECKPOINT_PREFIX)
                .and_then(|s| s.strip_suffix(CHECKPOINT_SUFFIX))
                .and_then(|lsn_str| lsn_str.parse::<u64>().ok())
                .map(|lsn| (entry.path(), lsn))
        })
        .collect();

    checkpoints.sort_by_key(|(_, lsn)| std::cmp::Reverse(*lsn));
    Ok(checkpoints)
}

/// Write a checkpoint atomically and return its path
pub fn write_checkpoint(dir: &Path, lsn: u64, entries: &[JournalEntry]) -> Result<PathBuf> {
    let data = bincode::serialize(entries)
        .map_err(|e| Error::Serialization(format!("failed to serialize checkpoint: {e}")))?;
    let header = CheckpointHeader::new(lsn, entries.len() as u64, crc32c::crc32c(&data));

    std::fs::create_dir_all(dir)
        .map_err(|e| Error::Journal(format!("failed to create checkpoint dir: {e}")))?;

    let path = checkpoint_path(dir, lsn);
    let temp_path = path.with_extension("ckpt.tmp");

    {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| Error::Journal(format!("failed to create checkpoint file: {e}")))?;

        let mut writer = BufWriter::new(file);
        writer
            .write_all(&header.to_bytes())
            .and_then(|()| writer.write_all(&data))
            .and_then(|()| writer.flush())
            .map_err(|e| Error::Journal(format!("failed to write checkpoint: {e}")))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| Error::Journal(format!("failed to sync checkpoint: {e}")))?;
    }

    std::fs::rename(&temp_path, &path)
        .map_err(|e| Error::Journal(format!("failed to rename checkpoint: {e}")))?;
    sync_dir(dir)?;

    debug!(
        "Wrote checkpoint {:?}: lsn={}, {} entries",
        path,
        lsn,
        entries.len()
    );
    Ok(path)
}

/// Read and validate a checkpoint file
pub fn read_checkpoint(path: &Path) -> Result<(CheckpointHeader, Vec<JournalEntry>)> {
    let mut file = File::open(path)
        .map_err(|e| Error::Journal(format!("failed to open checkpoint: {e}")))?;

    let mut header_buf = [0u8; CheckpointHeader::SIZE];
    file.read_exact(&mut header_buf).map_err(|e| {
        Error::JournalCorrupted(format!("truncated checkpoint header in {path:?}: {e}"))
    })?;
    let header = CheckpointHeader::from_bytes(&header_buf)
        .ok_or_else(|| Error::JournalCorrupted(format!("invalid checkpoint header in {path:?}")))?;
    if header.version != CheckpointHeader::VERSION {
        return Err(Error::JournalCorrupted(format!(
            "unsupported checkpoint version {} in {path:?}",
            header.version
        )));
    }

    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .map_err(|e| Error::Journal(format!("failed to read checkpoint data: {e}")))?;

    if crc32c::crc32c(&data) != header.checksum {
        return Err(Error::JournalCorrupted(format!(
            "checkpoint checksum mismatch in {path:?}"
        )));
    }

    let entries: Vec<JournalEntry> = bincode::deserialize(&data).map_err(|e| {
        Error::JournalCorrupted(format!("undecodable checkpoint {path:?}: {e}"))
    })?;
    if entries.len() as u64 != header.entry_count {
        return Err(Error::JournalCorrupted(format!(
            "checkpoint {path:?} holds {} entries, header says {}",
            entries.len(),
            header.entry_count
        )));
    }

    Ok((header, entries))
}

/// Remove checkpoints beyond the newest `retention`, and any leftover
/// temporary files. Returns the number of checkpoints removed.
pub fn prune_checkpoints(dir: &Path, retention: usize) -> Result<usize> {
    let mut removed = 0;
    for (path, lsn) in list_checkpoints(dir)?.into_iter().skip(retention) {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed checkpoint at lsn {}", lsn);
                removed += 1;
            }
            Err(e) => warn!("Failed to remove old checkpoint {:?}: {}", path, e),
        }
    }

    if let Ok(read_dir) = std::fs::read_dir(dir) {
        for entry in read_dir.filter_map(|e| e.ok()) {
            if entry.file_name().to_string_lossy().ends_with(".ckpt.tmp") {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }

    Ok(removed)
}
