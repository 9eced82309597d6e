//! # partfs-kernel
//!
//! Open-descriptor tracking and mount lifecycle for partition-backed
//! filesystems.
//!
//! A [`MountManager`] owns one [`Mount`] per partition label. Each mount
//! pairs a storage-engine handle with a [`DescriptorTable`] that tracks open
//! files by a 32-bit hash of their path, so the table never has to keep full
//! path strings unless collision-exact matching is asked for.
//!
//! ## Design Decisions
//!
//! - **Engine is a black box**: block allocation, wear levelling and
//!   directory encoding live behind [`StorageEngine`]. This crate only
//!   tracks who has what open.
//! - **Arena, not linked list**: descriptors live in numbered slots with a
//!   generation counter; the [`DescriptorCache`] maps hash → slot ids and is
//!   never the source of truth.
//! - **Refuse, don't force-close**: `unregister` and `format` fail with
//!   `Busy` while descriptors are open.
//! - **Two locks per mount**: a structural gate (shared for file ops,
//!   exclusive for format/unregister) and the table lock. Format holds only
//!   the gate, so it never sits on the table lock for the whole erase.

pub mod config;
pub mod descriptor;
pub mod engine;
mod info;
pub mod manager;
pub mod mount;
pub mod watchdog;

pub use config::MountConfig;
pub use descriptor::{CollisionMode, DescriptorCache, DescriptorTable, InsertError, OpenDescriptor};
pub use engine::{EngineResult, LocalEngine, MemoryEngine, StorageEngine};
pub use manager::{FileHandle, MountInfo, MountManager};
pub use mount::{Mount, MountPhase};
pub use watchdog::{NoopWatchdog, Watchdog, WatchdogGuard};

pub use partfs_types::{
    DescriptorId, ErrorCode, FsError, FsResult, OpenFlags, SeekFrom, Usage, hash_path,
    normalize_path,
};
