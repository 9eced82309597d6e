//! Local directory storage engine.
//!
//! Each partition is a directory under `root`, named after its label. A
//! partition counts as formatted once it holds the marker file written by
//! [`format`](StorageEngine::format). Paths handed in are already normalized,
//! so `..` cannot climb out of the partition directory.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use partfs_types::{ErrorCode, OpenFlags, SeekFrom, Usage};

use super::{EngineResult, StorageEngine, check_name_len};

/// Marker left in the partition directory by `format`.
const FORMAT_MARKER: &str = ".partfs-format";

/// Map a host I/O error onto an engine code.
fn code_from_io(e: &io::Error) -> ErrorCode {
    match e.kind() {
        io::ErrorKind::NotFound => ErrorCode::NoEntry,
        io::ErrorKind::AlreadyExists => ErrorCode::Exists,
        io::ErrorKind::NotADirectory => ErrorCode::NotDir,
        io::ErrorKind::IsADirectory => ErrorCode::IsDir,
        io::ErrorKind::DirectoryNotEmpty => ErrorCode::NotEmpty,
        io::ErrorKind::StorageFull => ErrorCode::NoSpace,
        io::ErrorKind::FileTooLarge => ErrorCode::FileTooLarge,
        io::ErrorKind::InvalidInput => ErrorCode::Invalid,
        io::ErrorKind::OutOfMemory => ErrorCode::NoMemory,
        _ => ErrorCode::Io,
    }
}

fn io_err(e: io::Error) -> ErrorCode {
    code_from_io(&e)
}

/// Sum the size of every regular file under `dir`.
fn dir_bytes(dir: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_bytes(&entry.path())?;
        } else if entry.file_name() != FORMAT_MARKER {
            total += meta.len();
        }
    }
    Ok(total)
}

/// A mounted [`LocalEngine`] partition.
#[derive(Debug)]
pub struct LocalFs {
    dir: PathBuf,
}

impl LocalFs {
    /// Map a normalized partition path onto the host.
    fn resolve(&self, path: &str) -> EngineResult<PathBuf> {
        check_name_len(path)?;
        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            return Err(ErrorCode::IsDir);
        }
        if relative == FORMAT_MARKER {
            return Err(ErrorCode::Invalid);
        }
        Ok(self.dir.join(relative))
    }
}

/// An open file on a [`LocalEngine`] partition.
#[derive(Debug)]
pub struct LocalFile {
    file: File,
    flags: OpenFlags,
}

/// Storage engine backed by host directories.
#[derive(Debug, Clone)]
pub struct LocalEngine {
    root: PathBuf,
    capacity: u64,
}

impl LocalEngine {
    /// Create an engine whose partitions live under `root`, each reporting
    /// `capacity` bytes.
    pub fn new(root: impl Into<PathBuf>, capacity: u64) -> Self {
        Self {
            root: root.into(),
            capacity,
        }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, label: &str) -> EngineResult<PathBuf> {
        if label.is_empty() || label == "." || label == ".." || label.contains('/') {
            return Err(ErrorCode::Invalid);
        }
        let dir = self.root.join(label);
        if !dir.is_dir() {
            return Err(ErrorCode::NoEntry);
        }
        Ok(dir)
    }
}

impl StorageEngine for LocalEngine {
    type Fs = LocalFs;
    type File = LocalFile;

    fn mount(&self, partition: &str) -> EngineResult<LocalFs> {
        let dir = self.partition_dir(partition)?;
        if !dir.join(FORMAT_MARKER).is_file() {
            return Err(ErrorCode::Corrupt);
        }
        Ok(LocalFs { dir })
    }

    fn unmount(&self, _fs: &mut LocalFs) -> EngineResult<()> {
        Ok(())
    }

    fn format(&self, partition: &str) -> EngineResult<()> {
        let dir = self.partition_dir(partition)?;
        for entry in fs::read_dir(&dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path).map_err(io_err)?;
            } else {
                fs::remove_file(&path).map_err(io_err)?;
            }
        }
        fs::write(dir.join(FORMAT_MARKER), b"").map_err(io_err)
    }

    fn usage(&self, fs: &LocalFs) -> EngineResult<Usage> {
        let used = dir_bytes(&fs.dir).map_err(io_err)?;
        Ok(Usage {
            total_bytes: self.capacity,
            used_bytes: used.min(self.capacity),
        })
    }

    fn open_file(&self, fs: &mut LocalFs, path: &str, flags: OpenFlags) -> EngineResult<LocalFile> {
        let full = fs.resolve(path)?;
        if flags.create {
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let file = OpenOptions::new()
            .read(flags.read)
            .write(flags.write)
            .append(flags.append)
            .truncate(flags.truncate && flags.write && !flags.append)
            .create(flags.create && !flags.exclusive)
            .create_new(flags.create && flags.exclusive)
            .open(&full)
            .map_err(io_err)?;

        if file.metadata().map_err(io_err)?.is_dir() {
            return Err(ErrorCode::IsDir);
        }
        Ok(LocalFile { file, flags })
    }

    fn close_file(&self, _fs: &mut LocalFs, file: LocalFile) -> EngineResult<()> {
        if file.flags.mutates() {
            file.file.sync_all().map_err(io_err)?;
        }
        Ok(())
    }

    fn read_file(&self, _fs: &mut LocalFs, file: &mut LocalFile, buf: &mut [u8]) -> EngineResult<usize> {
        if !file.flags.read {
            return Err(ErrorCode::BadFile);
        }
        file.file.read(buf).map_err(io_err)
    }

    fn write_file(&self, fs: &mut LocalFs, file: &mut LocalFile, data: &[u8]) -> EngineResult<usize> {
        if !file.flags.write && !file.flags.append {
            return Err(ErrorCode::BadFile);
        }
        let len = file.file.metadata().map_err(io_err)?.len();
        let start = if file.flags.append {
            len
        } else {
            file.file.stream_position().map_err(io_err)?
        };
        let end = start
            .checked_add(data.len() as u64)
            .ok_or(ErrorCode::FileTooLarge)?;
        let growth = end.saturating_sub(len);
        if growth > 0 {
            let used = dir_bytes(&fs.dir).map_err(io_err)?;
            if used + growth > self.capacity {
                return Err(ErrorCode::NoSpace);
            }
        }
        file.file.write_all(data).map_err(io_err)?;
        Ok(data.len())
    }

    fn seek_file(&self, _fs: &mut LocalFs, file: &mut LocalFile, pos: SeekFrom) -> EngineResult<u64> {
        let pos = match pos {
            SeekFrom::Start(offset) => io::SeekFrom::Start(offset),
            SeekFrom::Current(delta) => io::SeekFrom::Current(delta),
            SeekFrom::End(delta) => io::SeekFrom::End(delta),
        };
        file.file.seek(pos).map_err(io_err)
    }

    fn unlink_entry(&self, fs: &mut LocalFs, path: &str) -> EngineResult<()> {
        let full = fs.resolve(path)?;
        fs::remove_file(full).map_err(io_err)
    }

    fn rename_entry(&self, fs: &mut LocalFs, from: &str, to: &str) -> EngineResult<()> {
        let from = fs.resolve(from)?;
        let to = fs.resolve(to)?;
        if !from.exists() {
            return Err(ErrorCode::NoEntry);
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::rename(from, to).map_err(io_err)
    }
}
