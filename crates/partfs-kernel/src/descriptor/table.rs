//! The descriptor arena.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};

use partfs_types::{DescriptorId, FsError, FsResult, hash_normalized, normalize_path};

use super::cache::{DescriptorCache, GROWTH_FACTOR, MIN_CACHE_SIZE};
use super::{CollisionMode, InsertError, OpenDescriptor};

/// Process-wide so ids from a torn-down table never alias ids from the
/// next one registered under the same label.
static NEXT_GENERATION: AtomicU32 = AtomicU32::new(0);

#[derive(Debug)]
struct Slot<F> {
    generation: u32,
    entry: Option<OpenDescriptor<F>>,
}

/// Owns every open descriptor of one mount.
///
/// Slots are reused lowest-index first. Invariant:
/// `len() <= slots.len() <= cache_size()`.
#[derive(Debug)]
pub struct DescriptorTable<F> {
    mode: CollisionMode,
    max_open: Option<usize>,
    slots: Vec<Slot<F>>,
    free: BTreeSet<u32>,
    cache: DescriptorCache,
    fd_count: usize,
}

impl<F> DescriptorTable<F> {
    /// Create an empty table with no descriptor limit.
    pub fn new(mode: CollisionMode) -> Self {
        Self::with_limit(mode, None)
    }

    /// Create an empty table that refuses to hold more than `max_open`
    /// descriptors.
    pub fn with_limit(mode: CollisionMode, max_open: Option<usize>) -> Self {
        Self {
            mode,
            max_open,
            slots: Vec::with_capacity(MIN_CACHE_SIZE),
            free: BTreeSet::new(),
            cache: DescriptorCache::new(),
            fd_count: 0,
        }
    }

    /// Collision policy in effect.
    pub fn mode(&self) -> CollisionMode {
        self.mode
    }

    /// Number of live descriptors (`fd_count`).
    pub fn len(&self) -> usize {
        self.fd_count
    }

    /// True when nothing is open.
    pub fn is_empty(&self) -> bool {
        self.fd_count == 0
    }

    /// Allocated descriptor slots (`cache_size`).
    pub fn cache_size(&self) -> usize {
        self.cache.size()
    }

    /// Read access to the hash index.
    pub fn cache(&self) -> &DescriptorCache {
        &self.cache
    }

    /// Ids of every live descriptor, in slot order.
    pub fn ids(&self) -> impl Iterator<Item = DescriptorId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry
                .as_ref()
                .map(|_| DescriptorId::new(index as u32, slot.generation))
        })
    }

    /// Track a newly opened file.
    ///
    /// On failure the table is unchanged and the file is handed back.
    pub fn insert(&mut self, file: F, path: &str) -> Result<DescriptorId, InsertError<F>> {
        let normalized = normalize_path(path);
        let hash = hash_normalized(&normalized);

        if let Err(error) = self.reserve(hash) {
            return Err(InsertError { error, file });
        }

        let descriptor = OpenDescriptor {
            file,
            hash,
            path: self.mode.retains_path().then(|| normalized.into_boxed_str()),
        };
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);

        let index = match self.free.pop_first() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = generation;
                slot.entry = Some(descriptor);
                index
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation,
                    entry: Some(descriptor),
                });
                index
            }
        };

        let id = DescriptorId::new(index, generation);
        self.cache.insert(hash, id);
        self.fd_count += 1;
        Ok(id)
    }

    /// Make room for one more descriptor without touching visible state.
    fn reserve(&mut self, hash: u32) -> FsResult<()> {
        if self.max_open.is_some_and(|limit| self.fd_count >= limit) {
            return Err(FsError::OutOfMemory);
        }

        if self.fd_count == self.cache.size() {
            let new_size = self.cache.grown_size(self.max_open);
            self.slots
                .try_reserve_exact(new_size.saturating_sub(self.slots.len()))
                .map_err(|_| FsError::OutOfMemory)?;
            self.cache.reserve(hash).map_err(|_| FsError::OutOfMemory)?;
            tracing::trace!(from = self.cache.size(), to = new_size, "growing descriptor cache");
            self.cache.set_size(new_size);
        } else {
            if self.free.is_empty() {
                self.slots.try_reserve(1).map_err(|_| FsError::OutOfMemory)?;
            }
            self.cache.reserve(hash).map_err(|_| FsError::OutOfMemory)?;
        }
        Ok(())
    }

    /// Stop tracking `id` and return its file.
    pub fn remove(&mut self, id: DescriptorId) -> FsResult<F> {
        let descriptor = self
            .slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.entry.take())
            .ok_or(FsError::InvalidHandle)?;

        if !self.cache.remove(descriptor.hash, id) {
            tracing::warn!(%id, hash = descriptor.hash, "descriptor missing from cache");
        }
        self.free.insert(id.index());
        self.fd_count -= 1;
        self.maybe_shrink();
        Ok(descriptor.file)
    }

    fn maybe_shrink(&mut self) {
        if !self.cache.should_shrink(self.fd_count) {
            return;
        }

        while self.slots.last().is_some_and(|slot| slot.entry.is_none()) {
            self.slots.pop();
            self.free.remove(&(self.slots.len() as u32));
        }

        let new_size = (self.cache.size() / GROWTH_FACTOR)
            .max(self.slots.len())
            .max(MIN_CACHE_SIZE);
        if new_size < self.cache.size() {
            tracing::trace!(from = self.cache.size(), to = new_size, "shrinking descriptor cache");
            self.slots.shrink_to(new_size);
            self.cache.set_size(new_size);
        }
    }

    fn lookup(&self, id: DescriptorId) -> Option<&OpenDescriptor<F>> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.entry.as_ref())
    }

    /// The descriptor behind `id`.
    pub fn get(&self, id: DescriptorId) -> FsResult<&OpenDescriptor<F>> {
        self.lookup(id).ok_or(FsError::InvalidHandle)
    }

    /// The descriptor behind `id`, mutably.
    pub fn get_mut(&mut self, id: DescriptorId) -> FsResult<&mut OpenDescriptor<F>> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(FsError::InvalidHandle)
    }

    /// Descriptors open on `path`, found through the cache.
    ///
    /// In [`CollisionMode::HashOnly`] this returns every descriptor whose
    /// hash matches, including ones opened on a different, colliding path.
    pub fn find_by_path(&self, path: &str) -> Vec<DescriptorId> {
        let normalized = normalize_path(path);
        let hash = hash_normalized(&normalized);
        self.cache
            .candidates(hash)
            .iter()
            .copied()
            .filter(|id| {
                self.lookup(*id)
                    .is_some_and(|d| d.matches(hash, &normalized, self.mode))
            })
            .collect()
    }

    /// Same answer as [`find_by_path`](Self::find_by_path), by walking every
    /// slot instead of trusting the cache.
    pub fn scan_by_path(&self, path: &str) -> Vec<DescriptorId> {
        let normalized = normalize_path(path);
        let hash = hash_normalized(&normalized);
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let descriptor = slot.entry.as_ref()?;
                descriptor
                    .matches(hash, &normalized, self.mode)
                    .then(|| DescriptorId::new(index as u32, slot.generation))
            })
            .collect()
    }

    /// Whether any descriptor is open on `path`.
    ///
    /// Used to refuse unlink and rename of open files. In hash-only mode a
    /// negative cache answer is confirmed with a full scan.
    pub fn is_busy(&self, path: &str) -> bool {
        if !self.find_by_path(path).is_empty() {
            return true;
        }
        self.mode == CollisionMode::HashOnly && !self.scan_by_path(path).is_empty()
    }

    /// Check that the cache and the arena agree.
    pub fn check_consistency(&self) -> bool {
        let live: Vec<_> = self.ids().collect();
        if live.len() != self.fd_count || self.fd_count > self.cache.size() {
            return false;
        }
        if self.slots.len() > self.cache.size() {
            return false;
        }
        let indexed_live = live.iter().all(|id| {
            self.lookup(*id)
                .is_some_and(|d| self.cache.candidates(d.hash).contains(id))
        });
        let no_stale = self
            .cache
            .entries()
            .all(|(hash, id)| self.lookup(id).is_some_and(|d| d.hash == hash));
        indexed_live && no_stale && self.cache.entries().count() == self.fd_count
    }
}
