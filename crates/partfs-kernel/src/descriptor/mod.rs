//! Open-descriptor tracking.
//!
//! - [`DescriptorTable`] - authoritative arena of open descriptors
//! - [`DescriptorCache`] - hash → candidate id index over the arena
//!
//! ## Collision handling
//!
//! Descriptors are keyed by a 32-bit path hash. Two distinct paths can hash
//! equal, and [`CollisionMode`] picks what happens then:
//!
//! - [`CollisionMode::HashAndPath`] keeps the normalized path in every
//!   descriptor and compares it on lookup. Exact, costs one string per open
//!   file.
//! - [`CollisionMode::HashOnly`] keeps only the hash. Any descriptor whose
//!   hash matches is treated as a match. Known limitation: while a file is
//!   open, every other path that collides with it cannot be unlinked or
//!   renamed (`Busy`), and if that file stays open for the life of the mount
//!   its collision partner can never be removed.

mod cache;
mod table;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use partfs_types::FsError;

pub use cache::DescriptorCache;
pub use table::DescriptorTable;

/// How descriptors with equal path hashes are told apart.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CollisionMode {
    /// Retain the path and compare it exactly.
    #[default]
    HashAndPath,
    /// Retain only the hash; any hash match counts as a match.
    HashOnly,
}

impl CollisionMode {
    /// True when descriptors keep their path.
    pub fn retains_path(self) -> bool {
        matches!(self, Self::HashAndPath)
    }
}

/// One open file.
#[derive(Debug)]
pub struct OpenDescriptor<F> {
    file: F,
    hash: u32,
    path: Option<Box<str>>,
}

impl<F> OpenDescriptor<F> {
    /// Path hash.
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Normalized path, when the table retains paths.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Engine file handle.
    pub fn file(&self) -> &F {
        &self.file
    }

    /// Engine file handle, mutably.
    pub fn file_mut(&mut self) -> &mut F {
        &mut self.file
    }

    /// Whether this descriptor refers to `normalized` under `mode`.
    fn matches(&self, hash: u32, normalized: &str, mode: CollisionMode) -> bool {
        if self.hash != hash {
            return false;
        }
        match (mode, self.path.as_deref()) {
            (CollisionMode::HashAndPath, Some(path)) => path == normalized,
            _ => true,
        }
    }
}

/// A failed insert. Hands the engine file back so the caller can close it.
#[derive(Debug, Error)]
#[error("descriptor insert failed: {error}")]
pub struct InsertError<F> {
    /// Why the insert failed.
    pub error: FsError,
    /// The file that was not inserted.
    pub file: F,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_collision_mode_strings() {
        assert_eq!(CollisionMode::HashOnly.to_string(), "hash_only");
        assert_eq!(
            CollisionMode::from_str("hash_and_path").unwrap(),
            CollisionMode::HashAndPath
        );
        assert!(CollisionMode::default().retains_path());
        assert!(!CollisionMode::HashOnly.retains_path());
    }

    #[test]
    fn test_descriptor_matching() {
        let exact = OpenDescriptor {
            file: (),
            hash: 7,
            path: Some("/a".into()),
        };
        assert!(exact.matches(7, "/a", CollisionMode::HashAndPath));
        assert!(!exact.matches(7, "/b", CollisionMode::HashAndPath));
        assert!(!exact.matches(8, "/a", CollisionMode::HashAndPath));

        let hashed = OpenDescriptor {
            file: (),
            hash: 7,
            path: None,
        };
        assert!(hashed.matches(7, "/anything", CollisionMode::HashOnly));
        assert!(!hashed.matches(8, "/anything", CollisionMode::HashOnly));
    }
}
