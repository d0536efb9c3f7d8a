//! Tessera Master - metadata authority
//!
//! The block master tracks blocks and the workers caching them; the file
//! system master owns the namespace and mount table. Both journal every
//! mutation and rebuild their state from the journal on startup.

pub mod block;
pub mod file;
pub mod metrics;
pub mod ufs;

// Re-exports
pub use block::{BlockMaster, HeartbeatCommand, TierBlocks};
pub use file::{FileSystemMaster, SweepReport, TtlSweeper};
pub use metrics::{Counter, MasterMetrics};
pub use ufs::{LocalUnderFileSystem, UnderFileSystem};
