//! In-memory storage engine.
//!
//! Simulates a set of fixed-size partitions in RAM. Used for testing: each
//! partition can be told to fail mounts, unmounts or formats, and counts how
//! often it was mounted and formatted. All data is lost when dropped.
//!
//! Entries are flat: `/a/b.txt` is a single key, parent directories are not
//! modelled.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use partfs_types::{ErrorCode, OpenFlags, SeekFrom, Usage};

use super::{EngineResult, StorageEngine, check_name_len, resolve_seek};

/// Block size used for usage accounting.
pub const BLOCK_SIZE: u64 = 4096;

/// Blocks a freshly formatted partition spends on metadata.
const METADATA_BLOCKS: u64 = 2;

/// Largest file the engine accepts.
const FILE_MAX: u64 = i32::MAX as u64;

#[derive(Debug, Default)]
struct Faults {
    mounts: u32,
    unmount: bool,
    format: bool,
}

#[derive(Debug, Default)]
struct Partition {
    capacity: u64,
    formatted: bool,
    attached: bool,
    files: BTreeMap<String, Vec<u8>>,
    faults: Faults,
    mount_calls: u32,
    format_calls: u32,
}

impl Partition {
    fn used_bytes(&self) -> u64 {
        let data_blocks: u64 = self
            .files
            .values()
            .map(|data| (data.len() as u64).div_ceil(BLOCK_SIZE))
            .sum();
        (METADATA_BLOCKS + data_blocks) * BLOCK_SIZE
    }

    fn usage(&self) -> Usage {
        Usage {
            total_bytes: self.capacity,
            used_bytes: self.used_bytes().min(self.capacity),
        }
    }
}

/// A mounted [`MemoryEngine`] partition.
#[derive(Debug)]
pub struct MemoryFs {
    label: String,
}

/// An open file on a [`MemoryEngine`] partition.
#[derive(Debug)]
pub struct MemoryFile {
    path: String,
    pos: u64,
    flags: OpenFlags,
}

/// In-memory storage engine.
///
/// Thread-safe via an internal mutex.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    partitions: Mutex<HashMap<String, Partition>>,
}

impl MemoryEngine {
    /// Create an engine with no partitions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an erased (unformatted) partition.
    pub fn add_partition(&self, label: impl Into<String>, capacity: u64) {
        self.partitions.lock().insert(
            label.into(),
            Partition {
                capacity,
                ..Default::default()
            },
        );
    }

    /// Add a partition that already holds an empty filesystem.
    pub fn add_formatted_partition(&self, label: impl Into<String>, capacity: u64) {
        self.partitions.lock().insert(
            label.into(),
            Partition {
                capacity,
                formatted: true,
                ..Default::default()
            },
        );
    }

    /// Make the next `count` mounts of `label` fail with `Corrupt`.
    pub fn fail_mounts(&self, label: &str, count: u32) {
        if let Some(p) = self.partitions.lock().get_mut(label) {
            p.faults.mounts = count;
        }
    }

    /// Make the next unmount of `label` fail with `Io`.
    pub fn fail_next_unmount(&self, label: &str) {
        if let Some(p) = self.partitions.lock().get_mut(label) {
            p.faults.unmount = true;
        }
    }

    /// Make every format of `label` fail with `Io` until cleared.
    pub fn fail_formats(&self, label: &str, fail: bool) {
        if let Some(p) = self.partitions.lock().get_mut(label) {
            p.faults.format = fail;
        }
    }

    /// How many times `mount` was called for `label`.
    pub fn mount_count(&self, label: &str) -> u32 {
        self.partitions.lock().get(label).map_or(0, |p| p.mount_calls)
    }

    /// How many times `format` was called for `label`.
    pub fn format_count(&self, label: &str) -> u32 {
        self.partitions.lock().get(label).map_or(0, |p| p.format_calls)
    }

    /// Whether `label` holds a filesystem.
    pub fn is_formatted(&self, label: &str) -> bool {
        self.partitions.lock().get(label).is_some_and(|p| p.formatted)
    }

    /// Whether `label` is currently mounted at the engine level.
    pub fn is_attached(&self, label: &str) -> bool {
        self.partitions.lock().get(label).is_some_and(|p| p.attached)
    }

    /// Contents of a file, if it exists.
    pub fn file_contents(&self, label: &str, path: &str) -> Option<Vec<u8>> {
        self.partitions
            .lock()
            .get(label)
            .and_then(|p| p.files.get(path).cloned())
    }

    fn with_partition<T>(
        &self,
        label: &str,
        f: impl FnOnce(&mut Partition) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut partitions = self.partitions.lock();
        let partition = partitions.get_mut(label).ok_or(ErrorCode::NoEntry)?;
        f(partition)
    }
}

impl StorageEngine for MemoryEngine {
    type Fs = MemoryFs;
    type File = MemoryFile;

    fn mount(&self, partition: &str) -> EngineResult<MemoryFs> {
        self.with_partition(partition, |p| {
            p.mount_calls += 1;
            if p.faults.mounts > 0 {
                p.faults.mounts -= 1;
                return Err(ErrorCode::Corrupt);
            }
            if !p.formatted {
                return Err(ErrorCode::Corrupt);
            }
            if p.attached {
                return Err(ErrorCode::Exists);
            }
            p.attached = true;
            Ok(MemoryFs {
                label: partition.to_string(),
            })
        })
    }

    fn unmount(&self, fs: &mut MemoryFs) -> EngineResult<()> {
        self.with_partition(&fs.label, |p| {
            if std::mem::take(&mut p.faults.unmount) {
                return Err(ErrorCode::Io);
            }
            p.attached = false;
            Ok(())
        })
    }

    fn format(&self, partition: &str) -> EngineResult<()> {
        self.with_partition(partition, |p| {
            p.format_calls += 1;
            if p.attached {
                return Err(ErrorCode::Invalid);
            }
            if p.faults.format {
                p.formatted = false;
                return Err(ErrorCode::Io);
            }
            p.files.clear();
            p.formatted = true;
            Ok(())
        })
    }

    fn usage(&self, fs: &MemoryFs) -> EngineResult<Usage> {
        self.with_partition(&fs.label, |p| Ok(p.usage()))
    }

    fn open_file(&self, fs: &mut MemoryFs, path: &str, flags: OpenFlags) -> EngineResult<MemoryFile> {
        check_name_len(path)?;
        if path == "/" {
            return Err(ErrorCode::IsDir);
        }
        self.with_partition(&fs.label, |p| {
            let exists = p.files.contains_key(path);
            if exists && flags.create && flags.exclusive {
                return Err(ErrorCode::Exists);
            }
            if !exists {
                if !flags.create {
                    return Err(ErrorCode::NoEntry);
                }
                if p.used_bytes() + BLOCK_SIZE > p.capacity {
                    return Err(ErrorCode::NoSpace);
                }
                p.files.insert(path.to_string(), Vec::new());
            } else if flags.truncate && flags.write {
                if let Some(data) = p.files.get_mut(path) {
                    data.clear();
                }
            }
            Ok(MemoryFile {
                path: path.to_string(),
                pos: 0,
                flags,
            })
        })
    }

    fn close_file(&self, _fs: &mut MemoryFs, _file: MemoryFile) -> EngineResult<()> {
        Ok(())
    }

    fn read_file(
        &self,
        fs: &mut MemoryFs,
        file: &mut MemoryFile,
        buf: &mut [u8],
    ) -> EngineResult<usize> {
        if !file.flags.read {
            return Err(ErrorCode::BadFile);
        }
        self.with_partition(&fs.label, |p| {
            let data = p.files.get(&file.path).ok_or(ErrorCode::NoEntry)?;
            let start = (file.pos as usize).min(data.len());
            let n = buf.len().min(data.len() - start);
            buf[..n].copy_from_slice(&data[start..start + n]);
            file.pos += n as u64;
            Ok(n)
        })
    }

    fn write_file(
        &self,
        fs: &mut MemoryFs,
        file: &mut MemoryFile,
        data: &[u8],
    ) -> EngineResult<usize> {
        if !file.flags.write && !file.flags.append {
            return Err(ErrorCode::BadFile);
        }
        self.with_partition(&fs.label, |p| {
            let current_len = p.files.get(&file.path).ok_or(ErrorCode::NoEntry)?.len() as u64;
            let start = if file.flags.append { current_len } else { file.pos };
            let end = start
                .checked_add(data.len() as u64)
                .ok_or(ErrorCode::FileTooLarge)?;
            if end > FILE_MAX {
                return Err(ErrorCode::FileTooLarge);
            }

            let old_blocks = current_len.div_ceil(BLOCK_SIZE);
            let new_blocks = end.max(current_len).div_ceil(BLOCK_SIZE);
            let extra = new_blocks.saturating_sub(old_blocks) * BLOCK_SIZE;
            if p.used_bytes() + extra > p.capacity {
                return Err(ErrorCode::NoSpace);
            }

            let contents = p.files.get_mut(&file.path).ok_or(ErrorCode::NoEntry)?;
            let (start, end) = (start as usize, end as usize);
            if end > contents.len() {
                contents.resize(end, 0);
            }
            contents[start..end].copy_from_slice(data);
            file.pos = end as u64;
            Ok(data.len())
        })
    }

    fn seek_file(&self, fs: &mut MemoryFs, file: &mut MemoryFile, pos: SeekFrom) -> EngineResult<u64> {
        self.with_partition(&fs.label, |p| {
            let len = p.files.get(&file.path).ok_or(ErrorCode::NoEntry)?.len() as u64;
            file.pos = resolve_seek(pos, file.pos, len)?;
            Ok(file.pos)
        })
    }

    fn unlink_entry(&self, fs: &mut MemoryFs, path: &str) -> EngineResult<()> {
        check_name_len(path)?;
        self.with_partition(&fs.label, |p| {
            p.files.remove(path).map(|_| ()).ok_or(ErrorCode::NoEntry)
        })
    }

    fn rename_entry(&self, fs: &mut MemoryFs, from: &str, to: &str) -> EngineResult<()> {
        check_name_len(from)?;
        check_name_len(to)?;
        self.with_partition(&fs.label, |p| {
            let data = p.files.remove(from).ok_or(ErrorCode::NoEntry)?;
            p.files.insert(to.to_string(), data);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPACITY: u64 = 64 * BLOCK_SIZE;

    fn mounted() -> (MemoryEngine, MemoryFs) {
        let engine = MemoryEngine::new();
        engine.add_formatted_partition("data", CAPACITY);
        let fs = engine.mount("data").unwrap();
        (engine, fs)
    }

    #[test]
    fn test_unformatted_mount_fails() {
        let engine = MemoryEngine::new();
        engine.add_partition("data", CAPACITY);
        assert_eq!(engine.mount("data").unwrap_err(), ErrorCode::Corrupt);
        assert_eq!(engine.mount_count("data"), 1);

        engine.format("data").unwrap();
        assert!(engine.mount("data").is_ok());
        assert_eq!(engine.format_count("data"), 1);
    }

    #[test]
    fn test_unknown_partition() {
        let engine = MemoryEngine::new();
        assert_eq!(engine.mount("nope").unwrap_err(), ErrorCode::NoEntry);
        assert_eq!(engine.format("nope").unwrap_err(), ErrorCode::NoEntry);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (engine, mut fs) = mounted();
        let mut file = engine.open_file(&mut fs, "/a.txt", OpenFlags::create()).unwrap();
        assert_eq!(engine.write_file(&mut fs, &mut file, b"hello").unwrap(), 5);
        engine.seek_file(&mut fs, &mut file, SeekFrom::Start(1)).unwrap();

        let mut buf = [0u8; 16];
        let n = engine.read_file(&mut fs, &mut file, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"ello");
        assert_eq!(engine.file_contents("data", "/a.txt").unwrap(), b"hello");
    }

    #[test]
    fn test_open_flags_enforced() {
        let (engine, mut fs) = mounted();
        assert_eq!(
            engine.open_file(&mut fs, "/missing", OpenFlags::read()).unwrap_err(),
            ErrorCode::NoEntry
        );

        let mut file = engine.open_file(&mut fs, "/f", OpenFlags::create()).unwrap();
        engine.write_file(&mut fs, &mut file, b"x").unwrap();
        assert_eq!(
            engine
                .open_file(&mut fs, "/f", OpenFlags::create_exclusive())
                .unwrap_err(),
            ErrorCode::Exists
        );

        let mut ro = engine.open_file(&mut fs, "/f", OpenFlags::read()).unwrap();
        assert_eq!(
            engine.write_file(&mut fs, &mut ro, b"y").unwrap_err(),
            ErrorCode::BadFile
        );
    }

    #[test]
    fn test_append_and_truncate() {
        let (engine, mut fs) = mounted();
        let mut file = engine.open_file(&mut fs, "/log", OpenFlags::append()).unwrap();
        engine.write_file(&mut fs, &mut file, b"one").unwrap();
        engine.seek_file(&mut fs, &mut file, SeekFrom::Start(0)).unwrap();
        engine.write_file(&mut fs, &mut file, b"two").unwrap();
        assert_eq!(engine.file_contents("data", "/log").unwrap(), b"onetwo");

        engine
            .open_file(&mut fs, "/log", OpenFlags::create_truncate())
            .unwrap();
        assert!(engine.file_contents("data", "/log").unwrap().is_empty());
    }

    #[test]
    fn test_no_space() {
        let engine = MemoryEngine::new();
        engine.add_formatted_partition("tiny", 3 * BLOCK_SIZE);
        let mut fs = engine.mount("tiny").unwrap();
        let mut file = engine.open_file(&mut fs, "/big", OpenFlags::create()).unwrap();

        let block = vec![0u8; BLOCK_SIZE as usize];
        engine.write_file(&mut fs, &mut file, &block).unwrap();
        assert_eq!(
            engine.write_file(&mut fs, &mut file, &block).unwrap_err(),
            ErrorCode::NoSpace
        );
    }

    #[test]
    fn test_usage_accounts_blocks() {
        let (engine, mut fs) = mounted();
        let empty = engine.usage(&fs).unwrap();
        assert_eq!(empty.total_bytes, CAPACITY);
        assert_eq!(empty.used_bytes, METADATA_BLOCKS * BLOCK_SIZE);

        let mut file = engine.open_file(&mut fs, "/f", OpenFlags::create()).unwrap();
        engine.write_file(&mut fs, &mut file, &[1u8; 10]).unwrap();
        assert_eq!(
            engine.usage(&fs).unwrap().used_bytes,
            (METADATA_BLOCKS + 1) * BLOCK_SIZE
        );
    }

    #[test]
    fn test_unlink_and_rename() {
        let (engine, mut fs) = mounted();
        engine.open_file(&mut fs, "/a", OpenFlags::create()).unwrap();
        engine.rename_entry(&mut fs, "/a", "/b").unwrap();
        assert!(engine.file_contents("data", "/a").is_none());
        assert!(engine.file_contents("data", "/b").is_some());

        engine.unlink_entry(&mut fs, "/b").unwrap();
        assert_eq!(
            engine.unlink_entry(&mut fs, "/b").unwrap_err(),
            ErrorCode::NoEntry
        );
    }

    #[test]
    fn test_fault_injection() {
        let (engine, mut fs) = mounted();
        engine.fail_next_unmount("data");
        assert_eq!(engine.unmount(&mut fs).unwrap_err(), ErrorCode::Io);
        assert!(engine.is_attached("data"));
        engine.unmount(&mut fs).unwrap();
        assert!(!engine.is_attached("data"));

        engine.fail_mounts("data", 1);
        assert!(engine.mount("data").is_err());
        let mut fs = engine.mount("data").unwrap();
        engine.unmount(&mut fs).unwrap();

        engine.fail_formats("data", true);
        assert_eq!(engine.format("data").unwrap_err(), ErrorCode::Io);
        assert!(!engine.is_formatted("data"));
    }

    #[test]
    fn test_format_refused_while_attached() {
        let (engine, _fs) = mounted();
        assert_eq!(engine.format("data").unwrap_err(), ErrorCode::Invalid);
    }

    #[test]
    fn test_write_past_end_of_range_fails() {
        let (engine, mut fs) = mounted();
        let mut file = engine.open_file(&mut fs, "/f", OpenFlags::create()).unwrap();

        engine.seek_file(&mut fs, &mut file, SeekFrom::Start(u64::MAX)).unwrap();
        assert_eq!(
            engine.write_file(&mut fs, &mut file, b"x").unwrap_err(),
            ErrorCode::FileTooLarge
        );
        assert_eq!(engine.file_contents("data", "/f").unwrap(), b"");

        engine.seek_file(&mut fs, &mut file, SeekFrom::Start(0)).unwrap();
        assert_eq!(engine.write_file(&mut fs, &mut file, b"ok").unwrap(), 2);
    }
}
