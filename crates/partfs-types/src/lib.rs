//! Shared types for partfs.
//!
//! A leaf crate with no internal partfs dependencies. It holds the pieces
//! that both the kernel and storage engines need to agree on:
//!
//! | Type / fn          | Purpose                                          |
//! |--------------------|--------------------------------------------------|
//! | [`ErrorCode`]      | Raw storage-engine error codes (negative ints)   |
//! | [`FsError`]        | Portable error taxonomy surfaced to callers      |
//! | [`hash_path`]      | 32-bit path hash used to identify open files     |
//! | [`normalize_path`] | Canonical in-partition path form                 |
//! | [`DescriptorId`]   | Stable handle for an open descriptor             |
//! | [`OpenFlags`]      | Open mode requested from the engine              |
//! | [`Usage`]          | Capacity report for a mounted partition          |

mod error;
mod hash;
mod ids;
mod types;

pub use error::{ErrorCode, FsError, FsResult, UNKNOWN_ERROR};
pub use hash::{hash_normalized, hash_path, normalize_path};
pub use ids::DescriptorId;
pub use types::{OpenFlags, SeekFrom, Usage};
