//! File system master: the namespace tree, mount table and path locks, and
//! the operations clients call on them

pub mod inode;
pub mod lock;
pub mod master;
pub mod mount;
pub mod namespace;
pub mod options;
pub mod tree;
pub mod ttl;


pub use inode::{DirState, FileState, Inode, InodeKind};
pub use lock::{LockMode, PathLockManager, PathLockSet};
pub use master::FileSystemMaster;
pub use mount::{MountInfo, MountTable};
pub use namespace::{Namespace, TtlCandidate};
pub use options::{
    CompleteFileOptions, CreateDirectoryOptions, CreateFileOptions, DeleteOptions, MountOptions,
    SetAttributeOptions,
};
pub use tree::InodeTree;
pub use ttl::{SweepReport, TtlSweeper};
