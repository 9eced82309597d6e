//! Hash-indexed lookup over the descriptor arena.
//!
//! The cache is a redundant index. Every id it returns must be checked
//! against the arena before use; an entry that has gone stale only costs a
//! missed fast-path hit.

use std::collections::HashMap;
use std::collections::TryReserveError;

use partfs_types::DescriptorId;

/// Smallest slot count the cache is sized for.
pub const MIN_CACHE_SIZE: usize = 4;

/// Growth factor applied when every slot is in use.
pub const GROWTH_FACTOR: usize = 2;

/// Maps a path hash to the descriptor ids that were opened with it.
///
/// `size` is the number of descriptor slots currently allocated. It grows
/// geometrically when the table fills up and shrinks with hysteresis when
/// most slots are idle.
#[derive(Debug)]
pub struct DescriptorCache {
    index: HashMap<u32, Vec<DescriptorId>>,
    /// Preallocated bucket for the next new hash.
    spare: Option<Vec<DescriptorId>>,
    size: usize,
}

impl Default for DescriptorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorCache {
    /// Create a cache sized for [`MIN_CACHE_SIZE`] descriptors.
    pub fn new() -> Self {
        Self {
            index: HashMap::with_capacity(MIN_CACHE_SIZE),
            spare: None,
            size: MIN_CACHE_SIZE,
        }
    }

    /// Allocated slot count.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Ids registered under `hash`. May include stale ids.
    pub fn candidates(&self, hash: u32) -> &[DescriptorId] {
        self.index.get(&hash).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct hashes indexed.
    pub fn hash_count(&self) -> usize {
        self.index.len()
    }

    /// Iterate over every `(hash, id)` pair.
    pub fn entries(&self) -> impl Iterator<Item = (u32, DescriptorId)> + '_ {
        self.index
            .iter()
            .flat_map(|(hash, ids)| ids.iter().map(move |id| (*hash, *id)))
    }

    /// Make sure a following [`insert`](Self::insert) of `hash` cannot
    /// allocate.
    pub fn reserve(&mut self, hash: u32) -> Result<(), TryReserveError> {
        if let Some(ids) = self.index.get_mut(&hash) {
            return ids.try_reserve(1);
        }
        self.index.try_reserve(1)?;
        let spare = self.spare.get_or_insert_with(Vec::new);
        if spare.capacity() == 0 {
            spare.try_reserve_exact(1)?;
        }
        Ok(())
    }

    /// Register `id` under `hash`.
    pub fn insert(&mut self, hash: u32, id: DescriptorId) {
        match self.index.get_mut(&hash) {
            Some(ids) => ids.push(id),
            None => {
                let mut ids = self.spare.take().unwrap_or_default();
                ids.push(id);
                self.index.insert(hash, ids);
            }
        }
    }

    /// Drop `id` from `hash`'s bucket. Returns false when it was not there.
    pub fn remove(&mut self, hash: u32, id: DescriptorId) -> bool {
        let Some(ids) = self.index.get_mut(&hash) else {
            return false;
        };
        let Some(pos) = ids.iter().position(|candidate| *candidate == id) else {
            return false;
        };
        ids.swap_remove(pos);
        if ids.is_empty() {
            let emptied = self.index.remove(&hash);
            if self.spare.is_none() {
                self.spare = emptied;
            }
        }
        true
    }

    /// Size to grow to when `size` slots are all in use, capped at `limit`.
    pub fn grown_size(&self, limit: Option<usize>) -> usize {
        let grown = (self.size * GROWTH_FACTOR).max(MIN_CACHE_SIZE);
        limit.map_or(grown, |limit| grown.min(limit.max(MIN_CACHE_SIZE)))
    }

    /// Whether `live` descriptors leave enough idle slots to shrink.
    pub fn should_shrink(&self, live: usize) -> bool {
        self.size > MIN_CACHE_SIZE && live * GROWTH_FACTOR * 2 <= self.size
    }

    /// Record a new slot count.
    pub(crate) fn set_size(&mut self, size: usize) {
        self.size = size.max(MIN_CACHE_SIZE);
        if self.index.capacity() > self.size * GROWTH_FACTOR {
            self.index.shrink_to(self.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(index: u32) -> DescriptorId {
        DescriptorId::new(index, 0)
    }

    #[test]
    fn test_insert_and_remove() {
        let mut cache = DescriptorCache::new();
        cache.reserve(10).unwrap();
        cache.insert(10, id(0));
        cache.reserve(10).unwrap();
        cache.insert(10, id(1));

        assert_eq!(cache.candidates(10).len(), 2);
        assert_eq!(cache.hash_count(), 1);

        assert!(cache.remove(10, id(0)));
        assert_eq!(cache.candidates(10), &[id(1)]);
        assert!(!cache.remove(10, id(0)));

        assert!(cache.remove(10, id(1)));
        assert!(cache.candidates(10).is_empty());
        assert_eq!(cache.hash_count(), 0);
    }

    #[test]
    fn test_reserve_preallocates_new_bucket() {
        let mut cache = DescriptorCache::new();
        cache.reserve(7).unwrap();
        assert!(cache.spare.as_ref().is_some_and(|ids| ids.capacity() >= 1));
        assert!(cache.index.capacity() > cache.index.len());

        cache.insert(7, id(0));
        assert!(cache.spare.is_none());
        assert_eq!(cache.candidates(7), &[id(0)]);

        // An emptied bucket is kept for the next new hash.
        assert!(cache.remove(7, id(0)));
        assert!(cache.spare.as_ref().is_some_and(|ids| ids.capacity() >= 1));
        cache.reserve(8).unwrap();
        cache.insert(8, id(1));
        assert!(cache.spare.is_none());
        assert_eq!(cache.entries().count(), 1);
    }

    #[test]
    fn test_missing_hash_is_empty() {
        let cache = DescriptorCache::new();
        assert!(cache.candidates(99).is_empty());
        assert_eq!(cache.entries().count(), 0);
    }

    #[test]
    fn test_growth() {
        let mut cache = DescriptorCache::new();
        assert_eq!(cache.size(), MIN_CACHE_SIZE);
        assert_eq!(cache.grown_size(None), 8);
        assert_eq!(cache.grown_size(Some(6)), 6);
        // A limit below the minimum never shrinks the cache below it.
        assert_eq!(cache.grown_size(Some(2)), MIN_CACHE_SIZE);

        cache.set_size(16);
        assert_eq!(cache.grown_size(None), 32);
    }

    #[test]
    fn test_shrink_hysteresis() {
        let mut cache = DescriptorCache::new();
        assert!(!cache.should_shrink(0));

        cache.set_size(16);
        assert!(cache.should_shrink(4));
        assert!(!cache.should_shrink(5));
    }
}
