//! Tessera Common - Shared types and utilities
//!
//! This crate provides the identifiers, value types, path handling, error
//! definitions and configuration shared by the journal and the masters.

pub mod config;
pub mod error;
pub mod path;
pub mod types;

pub use config::{JournalConfig, MasterConfig};
pub use error::{Error, Result};
pub use path::{FsPath, PathError};
pub use types::*;
