//! Per-partition mount state.
//!
//! A [`Mount`] exists from a successful register until a successful
//! unregister. It owns the engine handle and the descriptor table, guarded by
//! two locks:
//!
//! - `gate` - structural. File operations hold it shared; format and
//!   unregister hold it exclusively, so they wait for in-flight operations
//!   and keep new ones out without sitting on the table lock.
//! - `state` - the table lock. Held from path lookup through the engine call
//!   to the table update, and never across anything that can block on the
//!   caller.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};

use partfs_types::{DescriptorId, FsError, FsResult, OpenFlags, SeekFrom, normalize_path};

use crate::config::MountConfig;
use crate::descriptor::DescriptorTable;
use crate::engine::StorageEngine;

/// Lifecycle phase of a partition label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MountPhase {
    /// No registration exists.
    Unregistered,
    /// The engine mount (and possibly a format) is in progress.
    Registering,
    /// Registered and attached to the engine.
    Mounted,
    /// Registered without an engine handle (`skip_mount`, or a failed
    /// remount after format).
    Detached,
    /// A format is running.
    Formatting,
    /// An unregister is in progress.
    Unregistering,
}

struct MountInner<E: StorageEngine> {
    fs: Option<E::Fs>,
    table: DescriptorTable<E::File>,
}

/// The mount state of one partition.
pub struct Mount<E: StorageEngine> {
    label: Arc<str>,
    base_path: String,
    engine: Arc<E>,
    gate: RwLock<()>,
    state: Mutex<MountInner<E>>,
    attached: AtomicBool,
    formatting: AtomicBool,
    unregistering: AtomicBool,
    retired: AtomicBool,
}

impl<E: StorageEngine> fmt::Debug for Mount<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("label", &self.label)
            .field("base_path", &self.base_path)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl<E: StorageEngine> Mount<E> {
    pub(crate) fn new(config: &MountConfig, engine: Arc<E>, fs: Option<E::Fs>) -> Self {
        let attached = fs.is_some();
        Self {
            label: Arc::from(config.partition_label.as_str()),
            base_path: config.base_path.clone(),
            engine,
            gate: RwLock::new(()),
            state: Mutex::new(MountInner {
                fs,
                table: DescriptorTable::with_limit(config.collision_mode, config.max_open_files),
            }),
            attached: AtomicBool::new(attached),
            formatting: AtomicBool::new(false),
            unregistering: AtomicBool::new(false),
            retired: AtomicBool::new(false),
        }
    }

    /// Partition label.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn label_arc(&self) -> Arc<str> {
        Arc::clone(&self.label)
    }

    pub(crate) fn engine(&self) -> &E {
        &self.engine
    }

    /// Mount point.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Whether the engine is attached.
    pub fn is_mounted(&self) -> bool {
        self.attached.load(Ordering::Acquire) && !self.retired.load(Ordering::Acquire)
    }

    /// True once unregister has detached this mount for good.
    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> MountPhase {
        if self.retired.load(Ordering::Acquire) {
            MountPhase::Unregistered
        } else if self.unregistering.load(Ordering::Acquire) {
            MountPhase::Unregistering
        } else if self.formatting.load(Ordering::Acquire) {
            MountPhase::Formatting
        } else if self.attached.load(Ordering::Acquire) {
            MountPhase::Mounted
        } else {
            MountPhase::Detached
        }
    }

    /// Live descriptor count (`fd_count`).
    pub fn fd_count(&self) -> usize {
        self.state.lock().table.len()
    }

    /// Allocated descriptor slots (`cache_size`).
    pub fn cache_size(&self) -> usize {
        self.state.lock().table.cache_size()
    }

    /// Descriptors currently open on `path`.
    pub fn find_by_path(&self, path: &str) -> Vec<DescriptorId> {
        self.state.lock().table.find_by_path(path)
    }

    /// Whether `path` is held open.
    pub fn is_busy(&self, path: &str) -> bool {
        self.state.lock().table.is_busy(path)
    }

    /// Check the descriptor cache against the table.
    pub fn check_consistency(&self) -> bool {
        self.state.lock().table.check_consistency()
    }

    /// Run `f` with the gate shared and the table lock held, against an
    /// attached engine.
    pub(crate) fn with_attached<T>(
        &self,
        f: impl FnOnce(&mut E::Fs, &mut DescriptorTable<E::File>) -> FsResult<T>,
    ) -> FsResult<T> {
        let _gate = self.gate.read();
        if self.retired.load(Ordering::Acquire) {
            return Err(FsError::not_mounted(self.label()));
        }
        let mut inner = self.state.lock();
        let MountInner { fs, table } = &mut *inner;
        let fs = fs.as_mut().ok_or_else(|| FsError::not_mounted(self.label()))?;
        f(fs, table)
    }

    // ========================================================================
    // File operations
    // ========================================================================

    /// Open `path` (relative to the partition root).
    pub fn open(&self, path: &str, flags: OpenFlags) -> FsResult<DescriptorId> {
        let path = normalize_path(path);
        self.with_attached(|fs, table| {
            let file = self.engine.open_file(fs, &path, flags)?;
            match table.insert(file, &path) {
                Ok(id) => {
                    tracing::debug!(label = %self.label, %path, %id, "opened");
                    Ok(id)
                }
                Err(rejected) => {
                    if let Err(code) = self.engine.close_file(fs, rejected.file) {
                        tracing::warn!(label = %self.label, %path, error = %code, "close after rejected insert failed");
                    }
                    Err(rejected.error)
                }
            }
        })
    }

    /// Close a descriptor. It is released even when the engine close fails.
    pub fn close(&self, id: DescriptorId) -> FsResult<()> {
        self.with_attached(|fs, table| {
            let file = table.remove(id)?;
            tracing::debug!(label = %self.label, %id, "closed");
            self.engine.close_file(fs, file).map_err(FsError::from)
        })
    }

    /// Read from the descriptor's current position.
    pub fn read(&self, id: DescriptorId, buf: &mut [u8]) -> FsResult<usize> {
        self.with_attached(|fs, table| {
            let descriptor = table.get_mut(id)?;
            Ok(self.engine.read_file(fs, descriptor.file_mut(), buf)?)
        })
    }

    /// Write at the descriptor's current position.
    pub fn write(&self, id: DescriptorId, data: &[u8]) -> FsResult<usize> {
        self.with_attached(|fs, table| {
            let descriptor = table.get_mut(id)?;
            Ok(self.engine.write_file(fs, descriptor.file_mut(), data)?)
        })
    }

    /// Move the descriptor's position.
    pub fn seek(&self, id: DescriptorId, pos: SeekFrom) -> FsResult<u64> {
        self.with_attached(|fs, table| {
            let descriptor = table.get_mut(id)?;
            Ok(self.engine.seek_file(fs, descriptor.file_mut(), pos)?)
        })
    }

    /// Remove `path`. Refused with `Busy` while it is open.
    pub fn unlink(&self, path: &str) -> FsResult<()> {
        let path = normalize_path(path);
        self.with_attached(|fs, table| {
            if table.is_busy(&path) {
                return Err(FsError::busy(format!("{} is open", path)));
            }
            self.engine.unlink_entry(fs, &path)?;
            tracing::debug!(label = %self.label, %path, "unlinked");
            Ok(())
        })
    }

    /// Rename `from` to `to`. Refused with `Busy` while either is open.
    pub fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let from = normalize_path(from);
        let to = normalize_path(to);
        self.with_attached(|fs, table| {
            for path in [&from, &to] {
                if table.is_busy(path) {
                    return Err(FsError::busy(format!("{} is open", path)));
                }
            }
            self.engine.rename_entry(fs, &from, &to)?;
            tracing::debug!(label = %self.label, %from, %to, "renamed");
            Ok(())
        })
    }

    // ========================================================================
    // Structural operations
    // ========================================================================

    /// Detach from the engine for unregister.
    ///
    /// Refuses with `Busy` while descriptors are open. On engine failure the
    /// mount is left as it was.
    pub(crate) fn retire(&self) -> FsResult<()> {
        let _gate = self.gate.write();
        if self.retired.load(Ordering::Acquire) {
            return Err(FsError::not_mounted(self.label()));
        }

        let mut inner = self.state.lock();
        if !inner.table.is_empty() {
            return Err(FsError::busy(format!(
                "{} has {} open descriptor(s)",
                self.label,
                inner.table.len()
            )));
        }

        self.unregistering.store(true, Ordering::Release);
        if let Some(fs) = inner.fs.as_mut() {
            if let Err(code) = self.engine.unmount(fs) {
                self.unregistering.store(false, Ordering::Release);
                tracing::warn!(label = %self.label, error = %code, "unmount failed");
                return Err(code.into());
            }
        }
        inner.fs = None;
        self.attached.store(false, Ordering::Release);
        self.retired.store(true, Ordering::Release);
        self.unregistering.store(false, Ordering::Release);
        Ok(())
    }

    /// Erase the partition under this mount.
    ///
    /// Holds the gate exclusively for the whole operation, but the table lock
    /// only while checking for open descriptors and swapping the engine
    /// handle. `format` performs the engine format itself.
    pub(crate) fn reformat(&self, format: impl FnOnce(&str) -> FsResult<()>) -> FsResult<()> {
        let _gate = self.gate.write();
        if self.retired.load(Ordering::Acquire) {
            return Err(FsError::not_mounted(self.label()));
        }

        let was_mounted = {
            let mut inner = self.state.lock();
            if !inner.table.is_empty() {
                return Err(FsError::busy(format!(
                    "{} has {} open descriptor(s)",
                    self.label,
                    inner.table.len()
                )));
            }
            match inner.fs.as_mut() {
                Some(fs) => {
                    self.engine.unmount(fs)?;
                    inner.fs = None;
                    self.attached.store(false, Ordering::Release);
                    true
                }
                None => false,
            }
        };

        self.formatting.store(true, Ordering::Release);
        let formatted = format(&self.label);
        self.formatting.store(false, Ordering::Release);

        if was_mounted {
            match self.engine.mount(&self.label) {
                Ok(fs) => {
                    self.state.lock().fs = Some(fs);
                    self.attached.store(true, Ordering::Release);
                }
                Err(code) => {
                    tracing::warn!(label = %self.label, error = %code, "remount after format failed");
                    formatted?;
                    return Err(FsError::mount_failed(format!("{}: {}", self.label, code)));
                }
            }
        }
        formatted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::CollisionMode;
    use crate::engine::MemoryEngine;

    fn mounted(config: MountConfig) -> Mount<MemoryEngine> {
        let engine = Arc::new(MemoryEngine::new());
        engine.add_formatted_partition(config.partition_label.clone(), 64 * 1024);
        let fs = engine.mount(&config.partition_label).unwrap();
        Mount::new(&config, engine, Some(fs))
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(MountPhase::Mounted.to_string(), "mounted");
        let name: &'static str = MountPhase::Unregistering.into();
        assert_eq!(name, "unregistering");
    }

    #[test]
    fn test_open_normalizes_path() {
        let mount = mounted(MountConfig::new("data", "/data"));
        let id = mount.open("logs//boot.log", OpenFlags::create()).unwrap();
        assert_eq!(mount.find_by_path("/logs/./boot.log"), vec![id]);
        assert!(mount.is_busy("/logs/boot.log"));
        mount.close(id).unwrap();
        assert!(!mount.is_busy("/logs/boot.log"));
    }

    #[test]
    fn test_open_over_limit_is_refused() {
        let mount = mounted(MountConfig::new("data", "/data").with_max_open_files(2));
        let a = mount.open("/a", OpenFlags::create()).unwrap();
        let b = mount.open("/b", OpenFlags::create()).unwrap();

        assert!(matches!(
            mount.open("/c", OpenFlags::create()),
            Err(FsError::OutOfMemory)
        ));
        assert_eq!(mount.fd_count(), 2);
        assert!(!mount.is_busy("/c"));

        mount.close(a).unwrap();
        mount.close(b).unwrap();
        assert_eq!(mount.fd_count(), 0);
        assert!(mount.check_consistency());
    }

    #[test]
    fn test_stale_descriptor_rejected() {
        let mount = mounted(MountConfig::new("data", "/data"));
        let id = mount.open("/a", OpenFlags::create()).unwrap();
        mount.close(id).unwrap();

        let reopened = mount.open("/a", OpenFlags::read()).unwrap();
        assert_eq!(reopened.index(), id.index());
        assert!(matches!(mount.close(id), Err(FsError::InvalidHandle)));
        let mut buf = [0u8; 4];
        assert!(matches!(mount.read(id, &mut buf), Err(FsError::InvalidHandle)));
        mount.close(reopened).unwrap();
    }

    #[test]
    fn test_hash_only_collision_busy() {
        let mount = mounted(
            MountConfig::new("data", "/data").with_collision_mode(CollisionMode::HashOnly),
        );
        let id = mount.open("/bA.txt", OpenFlags::create()).unwrap();

        assert!(mount.is_busy("/bA.txt"));
        assert!(mount.unlink("/bA.txt").unwrap_err().is_busy());
        mount.close(id).unwrap();
        mount.unlink("/bA.txt").unwrap();
    }

    #[test]
    fn test_retire_refuses_when_busy() {
        let mount = mounted(MountConfig::new("data", "/data"));
        let id = mount.open("/a", OpenFlags::create()).unwrap();

        assert!(mount.retire().unwrap_err().is_busy());
        assert_eq!(mount.phase(), MountPhase::Mounted);

        mount.close(id).unwrap();
        mount.retire().unwrap();
        assert_eq!(mount.phase(), MountPhase::Unregistered);
        assert!(matches!(
            mount.open("/a", OpenFlags::read()),
            Err(FsError::NotMounted(_))
        ));
        assert!(matches!(mount.retire(), Err(FsError::NotMounted(_))));
    }
}
