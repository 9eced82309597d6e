//! Capacity reporting.

use partfs_types::{FsError, FsResult, Usage};

use crate::engine::StorageEngine;
use crate::manager::MountManager;
use crate::mount::Mount;

impl<E: StorageEngine> Mount<E> {
    /// Capacity and usage reported by the engine.
    ///
    /// Takes the mount lock but leaves the descriptor table untouched.
    pub fn usage(&self) -> FsResult<Usage> {
        self.with_attached(|fs, _table| Ok(self.engine().usage(fs)?))
    }
}

impl<E: StorageEngine> MountManager<E> {
    /// Capacity and usage of a registered, mounted partition.
    pub fn info(&self, label: &str) -> FsResult<Usage> {
        let usage = self.active(label)?.usage();
        if let Err(e) = &usage {
            if !matches!(e, FsError::NotMounted(_)) {
                tracing::warn!(label, error = %e, "usage query failed");
            }
        }
        usage
    }

    /// Total bytes of `label`, or 0 when unavailable.
    pub fn total_bytes(&self, label: &str) -> u64 {
        self.info(label).map_or(0, |usage| usage.total_bytes)
    }

    /// Used bytes of `label`, or 0 when unavailable.
    pub fn used_bytes(&self, label: &str) -> u64 {
        self.info(label).map_or(0, |usage| usage.used_bytes)
    }
}
