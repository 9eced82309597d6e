//! Storage-engine capability interface.
//!
//! The engine owns everything on the partition: block allocation, wear
//! levelling, directory encoding. This crate reaches it only through
//! [`StorageEngine`], and every engine error comes back as a raw
//! [`ErrorCode`] that the caller translates at the boundary.
//!
//! Backends:
//!
//! - [`MemoryEngine`] - simulated partitions in RAM (testing, fault injection)
//! - [`LocalEngine`] - one host directory per partition

mod local;
mod memory;

use partfs_types::{ErrorCode, OpenFlags, SeekFrom, Usage};

pub use local::LocalEngine;
pub use memory::MemoryEngine;

/// Result type returned by storage engines.
pub type EngineResult<T> = Result<T, ErrorCode>;

/// What a filesystem implementation must provide.
///
/// Calls for one mounted instance are serialized by the caller; an engine
/// only needs to be `Sync` so different partitions can be driven from
/// different threads.
pub trait StorageEngine: Send + Sync + 'static {
    /// A mounted filesystem instance.
    type Fs: Send + 'static;
    /// An open file on a mounted instance.
    type File: Send + 'static;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Attach to the partition named `partition`.
    fn mount(&self, partition: &str) -> EngineResult<Self::Fs>;

    /// Detach. On error the instance must still be usable.
    fn unmount(&self, fs: &mut Self::Fs) -> EngineResult<()>;

    /// Erase the partition and lay down an empty filesystem.
    ///
    /// Long-running and not interruptible.
    fn format(&self, partition: &str) -> EngineResult<()>;

    /// Capacity and usage of a mounted instance.
    fn usage(&self, fs: &Self::Fs) -> EngineResult<Usage>;

    // ========================================================================
    // Files
    // ========================================================================

    /// Open `path` (normalized, absolute within the partition).
    fn open_file(&self, fs: &mut Self::Fs, path: &str, flags: OpenFlags)
    -> EngineResult<Self::File>;

    /// Close a file. The handle is consumed even on error.
    fn close_file(&self, fs: &mut Self::Fs, file: Self::File) -> EngineResult<()>;

    /// Read at the file position, returning the byte count (0 at EOF).
    fn read_file(
        &self,
        fs: &mut Self::Fs,
        file: &mut Self::File,
        buf: &mut [u8],
    ) -> EngineResult<usize>;

    /// Write at the file position (or the end, in append mode).
    fn write_file(&self, fs: &mut Self::Fs, file: &mut Self::File, data: &[u8])
    -> EngineResult<usize>;

    /// Move the file position, returning the new absolute offset.
    fn seek_file(&self, fs: &mut Self::Fs, file: &mut Self::File, pos: SeekFrom)
    -> EngineResult<u64>;

    // ========================================================================
    // Entries
    // ========================================================================

    /// Remove a file.
    fn unlink_entry(&self, fs: &mut Self::Fs, path: &str) -> EngineResult<()>;

    /// Rename a file, replacing any existing `to`.
    fn rename_entry(&self, fs: &mut Self::Fs, from: &str, to: &str) -> EngineResult<()>;
}

/// Longest file name component an engine accepts.
pub const NAME_MAX: usize = 255;

/// Reject paths with an over-long component.
pub(crate) fn check_name_len(path: &str) -> EngineResult<()> {
    if path.split('/').any(|component| component.len() > NAME_MAX) {
        return Err(ErrorCode::NameTooLong);
    }
    Ok(())
}

/// Resolve a seek request against the current position and file length.
pub(crate) fn resolve_seek(pos: SeekFrom, current: u64, len: u64) -> EngineResult<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => Some(offset),
        SeekFrom::Current(delta) => current.checked_add_signed(delta),
        SeekFrom::End(delta) => len.checked_add_signed(delta),
    };
    target.ok_or(ErrorCode::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_seek() {
        assert_eq!(resolve_seek(SeekFrom::Start(5), 0, 10), Ok(5));
        assert_eq!(resolve_seek(SeekFrom::Current(-2), 4, 10), Ok(2));
        assert_eq!(resolve_seek(SeekFrom::End(-1), 0, 10), Ok(9));
        assert_eq!(
            resolve_seek(SeekFrom::Current(-5), 4, 10),
            Err(ErrorCode::Invalid)
        );
    }

    #[test]
    fn test_name_len() {
        assert!(check_name_len("/short/name.txt").is_ok());
        let long = format!("/{}", "x".repeat(NAME_MAX + 1));
        assert_eq!(check_name_len(&long), Err(ErrorCode::NameTooLong));
    }
}
