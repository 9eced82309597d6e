//! Partition registry and path routing.
//!
//! [`MountManager`] owns one [`Mount`] per registered partition label and
//! routes absolute paths to them by longest base-path prefix.
//!
//! The registry lock is held only to check and update entries, never across
//! an engine call. A label being mounted or formatted is held by a
//! [`Reservation`] so concurrent callers see it as taken; the reservation
//! releases the label on drop unless the registration commits.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use partfs_types::{DescriptorId, FsError, FsResult, OpenFlags, SeekFrom, normalize_path};

use crate::config::MountConfig;
use crate::engine::StorageEngine;
use crate::mount::{Mount, MountPhase};
use crate::watchdog::{NoopWatchdog, Watchdog, WatchdogGuard};

/// A registry slot.
enum Registration<E: StorageEngine> {
    /// Engine mount in progress.
    Registering { base_path: String },
    /// An unregistered partition is being formatted.
    Formatting,
    Active(Arc<Mount<E>>),
}

impl<E: StorageEngine> Registration<E> {
    fn base_path(&self) -> Option<&str> {
        match self {
            Registration::Registering { base_path } => Some(base_path),
            Registration::Formatting => None,
            Registration::Active(mount) if mount.is_retired() => None,
            Registration::Active(mount) => Some(mount.base_path()),
        }
    }

    /// A retired mount whose unregister has not yet dropped the entry.
    fn is_vacant(&self) -> bool {
        matches!(self, Registration::Active(mount) if mount.is_retired())
    }

    /// The mount, unless retired.
    fn live_mount(&self) -> Option<&Arc<Mount<E>>> {
        match self {
            Registration::Active(mount) if !mount.is_retired() => Some(mount),
            _ => None,
        }
    }
}

type Registry<E> = RwLock<BTreeMap<String, Registration<E>>>;

/// The entry for `label`, treating a retired mount as absent.
fn occupied<'a, E: StorageEngine>(
    registry: &'a BTreeMap<String, Registration<E>>,
    label: &str,
) -> Option<&'a Registration<E>> {
    registry.get(label).filter(|r| !r.is_vacant())
}

/// Holds a label in the registry until committed or dropped.
struct Reservation<'a, E: StorageEngine> {
    registry: &'a Registry<E>,
    label: String,
    armed: bool,
}

impl<E: StorageEngine> Reservation<'_, E> {
    /// Replace the reservation with a live mount.
    fn commit(mut self, mount: Arc<Mount<E>>) {
        self.registry
            .write()
            .insert(self.label.clone(), Registration::Active(mount));
        self.armed = false;
    }
}

impl<E: StorageEngine> Drop for Reservation<'_, E> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.write().remove(&self.label);
        }
    }
}

/// A snapshot of one registered partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountInfo {
    /// Partition label.
    pub label: String,
    /// Mount point.
    pub base_path: String,
    /// Lifecycle phase at the time of the snapshot.
    pub phase: MountPhase,
    /// Open descriptors.
    pub fd_count: usize,
}

/// An open file returned by [`MountManager::open`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileHandle {
    label: Arc<str>,
    id: DescriptorId,
}

impl FileHandle {
    /// Label of the partition the file lives on.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Descriptor within that partition.
    pub fn id(&self) -> DescriptorId {
        self.id
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label, self.id)
    }
}

/// Registers partitions and routes file operations to them.
pub struct MountManager<E: StorageEngine> {
    engine: Arc<E>,
    watchdog: Arc<dyn Watchdog>,
    registry: Registry<E>,
}

impl<E: StorageEngine> fmt::Debug for MountManager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountManager")
            .field("labels", &self.registry.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<E: StorageEngine> MountManager<E> {
    /// Create a manager over `engine` with no watchdog.
    pub fn new(engine: E) -> Self {
        Self::with_watchdog(engine, Arc::new(NoopWatchdog))
    }

    /// Create a manager that suspends `watchdog` around every format.
    pub fn with_watchdog(engine: E, watchdog: Arc<dyn Watchdog>) -> Self {
        Self {
            engine: Arc::new(engine),
            watchdog,
            registry: RwLock::new(BTreeMap::new()),
        }
    }

    /// The storage engine.
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Register and mount a partition.
    ///
    /// With `format_if_mount_failed`, a failed mount formats the partition
    /// and retries once. With `skip_mount`, the label is registered detached
    /// and the engine is not touched.
    pub fn register(&self, config: MountConfig) -> FsResult<Arc<Mount<E>>> {
        config.validate()?;
        let label = config.partition_label.as_str();
        let reservation = self.reserve(&config)?;

        if config.skip_mount {
            let mount = Arc::new(Mount::new(&config, Arc::clone(&self.engine), None));
            reservation.commit(Arc::clone(&mount));
            tracing::info!(label, base_path = %config.base_path, "registered partition without mounting");
            return Ok(mount);
        }

        let fs = self.attach(&config)?;
        let mount = Arc::new(Mount::new(&config, Arc::clone(&self.engine), Some(fs)));
        reservation.commit(Arc::clone(&mount));
        tracing::info!(label, base_path = %config.base_path, "mounted partition");
        Ok(mount)
    }

    /// Unmount and forget a partition.
    ///
    /// Refused with `Busy` while descriptors are open. If the engine unmount
    /// fails the partition stays registered and mounted.
    pub fn unregister(&self, label: &str) -> FsResult<()> {
        let mount = self.active(label)?;
        mount.retire()?;

        let mut registry = self.registry.write();
        if matches!(registry.get(label), Some(Registration::Active(m)) if Arc::ptr_eq(m, &mount)) {
            registry.remove(label);
        }
        tracing::info!(label, "unregistered partition");
        Ok(())
    }

    /// Erase a partition.
    ///
    /// A registered partition must have no open descriptors; it is unmounted
    /// for the format and remounted afterwards if it was mounted. An
    /// unregistered partition is reserved for the duration of the format.
    pub fn format(&self, label: &str) -> FsResult<()> {
        let mount = {
            let mut registry = self.registry.write();
            match occupied(&registry, label) {
                Some(Registration::Active(mount)) => Some(Arc::clone(mount)),
                Some(_) => return Err(FsError::busy(format!("{label} is being registered or formatted"))),
                None => {
                    registry.insert(label.to_string(), Registration::Formatting);
                    None
                }
            }
        };

        match mount {
            Some(mount) => mount.reformat(|label| self.format_partition(label)),
            None => {
                let _reservation = Reservation {
                    registry: &self.registry,
                    label: label.to_string(),
                    armed: true,
                };
                self.format_partition(label)
            }
        }
    }

    /// Reserve the config's label, rejecting duplicate labels and base paths.
    fn reserve(&self, config: &MountConfig) -> FsResult<Reservation<'_, E>> {
        let label = &config.partition_label;
        let base_path = &config.base_path;
        let mut registry = self.registry.write();

        match occupied(&registry, label) {
            Some(Registration::Formatting) => {
                return Err(FsError::busy(format!("{label} is being formatted")));
            }
            Some(_) => return Err(FsError::already_mounted(label.as_str())),
            None => {}
        }
        if registry
            .values()
            .any(|r| r.base_path() == Some(base_path.as_str()))
        {
            return Err(FsError::already_mounted(base_path.as_str()));
        }

        registry.insert(
            label.clone(),
            Registration::Registering {
                base_path: base_path.clone(),
            },
        );
        Ok(Reservation {
            registry: &self.registry,
            label: label.clone(),
            armed: true,
        })
    }

    /// Mount, falling back to format-and-retry when configured.
    fn attach(&self, config: &MountConfig) -> FsResult<E::Fs> {
        let label = config.partition_label.as_str();
        let code = match self.engine.mount(label) {
            Ok(fs) => return Ok(fs),
            Err(code) => code,
        };

        if !config.format_if_mount_failed {
            tracing::warn!(label, error = %code, "mount failed");
            return Err(FsError::mount_failed(format!("{label}: {code}")));
        }

        tracing::warn!(label, error = %code, "mount failed, formatting");
        self.format_partition(label)
            .map_err(|e| FsError::mount_failed(format!("{label}: format failed: {e}")))?;

        self.engine.mount(label).map_err(|code| {
            tracing::warn!(label, error = %code, "mount after format failed");
            FsError::mount_failed(format!("{label}: {code}"))
        })
    }

    /// Run the engine format with the watchdog suspended.
    fn format_partition(&self, label: &str) -> FsResult<()> {
        let _guard = WatchdogGuard::suspend(self.watchdog.as_ref());
        let started = Instant::now();
        let result = self.engine.format(label);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => {
                tracing::info!(label, elapsed_ms, "formatted partition");
                Ok(())
            }
            Err(code) => {
                tracing::warn!(label, elapsed_ms, error = %code, "format failed");
                Err(code.into())
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Whether `label` is registered and attached to the engine.
    pub fn mounted(&self, label: &str) -> bool {
        matches!(occupied(&self.registry.read(), label), Some(Registration::Active(m)) if m.is_mounted())
    }

    /// Lifecycle phase of `label`.
    pub fn phase(&self, label: &str) -> MountPhase {
        match occupied(&self.registry.read(), label) {
            None => MountPhase::Unregistered,
            Some(Registration::Registering { .. }) => MountPhase::Registering,
            Some(Registration::Formatting) => MountPhase::Formatting,
            Some(Registration::Active(mount)) => mount.phase(),
        }
    }

    /// The mount registered under `label`.
    pub fn get(&self, label: &str) -> Option<Arc<Mount<E>>> {
        self.active(label).ok()
    }

    /// Snapshot every registered partition, ordered by label.
    pub fn list(&self) -> Vec<MountInfo> {
        let mounts: Vec<_> = self
            .registry
            .read()
            .values()
            .filter_map(|r| r.live_mount().map(Arc::clone))
            .collect();

        mounts
            .iter()
            .map(|mount| MountInfo {
                label: mount.label().to_string(),
                base_path: mount.base_path().to_string(),
                phase: mount.phase(),
                fd_count: mount.fd_count(),
            })
            .collect()
    }

    pub(crate) fn active(&self, label: &str) -> FsResult<Arc<Mount<E>>> {
        match self.registry.read().get(label).and_then(Registration::live_mount) {
            Some(mount) => Ok(Arc::clone(mount)),
            None => Err(FsError::not_mounted(label)),
        }
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Find the mount owning `path` and the path relative to it.
    ///
    /// Matches by longest base path on component boundaries, so `/data2/x`
    /// does not route to `/data`.
    pub fn resolve(&self, path: &str) -> FsResult<(Arc<Mount<E>>, String)> {
        let normalized = normalize_path(path);
        let registry = self.registry.read();

        let mut best: Option<&Arc<Mount<E>>> = None;
        for registration in registry.values() {
            let Some(mount) = registration.live_mount() else {
                continue;
            };
            let base = mount.base_path();
            let is_match = normalized == base
                || normalized
                    .strip_prefix(base)
                    .is_some_and(|rest| rest.starts_with('/'));
            if is_match && best.is_none_or(|b| base.len() > b.base_path().len()) {
                best = Some(mount);
            }
        }

        let mount = best.ok_or_else(|| FsError::not_mounted(normalized.as_str()))?;
        let relative = normalize_path(&normalized[mount.base_path().len()..]);
        Ok((Arc::clone(mount), relative))
    }

    // ========================================================================
    // File operations
    // ========================================================================

    /// Open an absolute path.
    pub fn open(&self, path: &str, flags: OpenFlags) -> FsResult<FileHandle> {
        let (mount, relative) = self.resolve(path)?;
        let id = mount.open(&relative, flags)?;
        Ok(FileHandle {
            label: mount.label_arc(),
            id,
        })
    }

    /// Close a file.
    pub fn close(&self, handle: FileHandle) -> FsResult<()> {
        self.active(&handle.label)?.close(handle.id)
    }

    /// Read from an open file.
    pub fn read(&self, handle: &FileHandle, buf: &mut [u8]) -> FsResult<usize> {
        self.active(&handle.label)?.read(handle.id, buf)
    }

    /// Write to an open file.
    pub fn write(&self, handle: &FileHandle, data: &[u8]) -> FsResult<usize> {
        self.active(&handle.label)?.write(handle.id, data)
    }

    /// Reposition an open file.
    pub fn seek(&self, handle: &FileHandle, pos: SeekFrom) -> FsResult<u64> {
        self.active(&handle.label)?.seek(handle.id, pos)
    }

    /// Remove a file by absolute path.
    pub fn unlink(&self, path: &str) -> FsResult<()> {
        let (mount, relative) = self.resolve(path)?;
        mount.unlink(&relative)
    }

    /// Rename within one partition.
    pub fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let (from_mount, from_rel) = self.resolve(from)?;
        let (to_mount, to_rel) = self.resolve(to)?;
        if !Arc::ptr_eq(&from_mount, &to_mount) {
            return Err(FsError::invalid_argument(format!(
                "cannot rename across partitions: {} -> {}",
                from_mount.label(),
                to_mount.label()
            )));
        }
        from_mount.rename(&from_rel, &to_rel)
    }
}
