//! Error types for Tessera
//!
//! This module defines the common error types used by the journal and the
//! block and file system masters.

use crate::path::PathError;
use crate::types::{BlockId, WorkerId};
use thiserror::Error;

/// Common result type for Tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Tessera
#[derive(Debug, Error)]
pub enum Error {
    // Namespace errors
    #[error("Path {0} already exists")]
    PathAlreadyExists(String),

    #[error("Path {0} does not exist")]
    PathNotFound(String),

    #[error("File {0} does not exist")]
    FileNotFound(String),

    /// The offending path is carried separately from the message so callers
    /// can inspect it without parsing.
    #[error("{message}")]
    InvalidPath { path: String, message: String },

    #[error("File {0} has already been completed")]
    FileAlreadyCompleted(String),

    #[error("Directory {0} is not empty")]
    DirectoryNotEmpty(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    // Block errors
    #[error("Block {0} does not exist")]
    BlockNotFound(BlockId),

    #[error("block info error: {0}")]
    BlockInfoError(String),

    #[error("Unknown worker id {0}")]
    UnknownWorker(WorkerId),

    // Under storage errors
    #[error("under storage error: {0}")]
    Ufs(String),

    // Journal errors
    #[error("journal error: {0}")]
    Journal(String),

    #[error("journal corrupted: {0}")]
    JournalCorrupted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// `InvalidPath` for a path that does not resolve
    pub fn path_does_not_exist(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::InvalidPath {
            message: format!("Path {path} does not exist"),
            path,
        }
    }

    /// `InvalidPath` with a free-form reason
    pub fn invalid_path(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        let path = path.into();
        Self::InvalidPath {
            message: format!("Invalid path {path}: {reason}"),
            path,
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an under storage error
    pub fn ufs(msg: impl Into<String>) -> Self {
        Self::Ufs(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PathNotFound(_)
                | Self::FileNotFound(_)
                | Self::BlockNotFound(_)
                | Self::UnknownWorker(_)
        )
    }

    /// Check if this is an already-exists error
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::PathAlreadyExists(_))
    }

    /// Journal failures abort the mutation that triggered them; on startup
    /// they abort the process.
    #[must_use]
    pub fn is_journal_failure(&self) -> bool {
        matches!(self, Self::Journal(_) | Self::JournalCorrupted(_))
    }
}

impl From<PathError> for Error {
    fn from(e: PathError) -> Self {
        let path = e.path().to_string();
        Self::InvalidPath {
            message: e.to_string(),
            path,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
