//! Block authority
//!
//! Tracks every known block (length and the workers holding a copy) and the
//! registry of cache workers. Workers talk to it directly through
//! registration, heartbeats and block commits; none of these touch the
//! namespace.

mod block_info;
pub mod master;
mod worker;

pub use block_info::MasterBlockInfo;
pub use master::{BlockMaster, HeartbeatCommand, TierBlocks};
pub use worker::MasterWorkerInfo;
