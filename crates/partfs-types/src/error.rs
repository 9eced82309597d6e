//! Error codes and the portable error taxonomy.
//!
//! Storage engines speak [`ErrorCode`], the negative integer codes a
//! littlefs-style engine returns. Everything above the engine boundary speaks
//! [`FsError`]. The conversion between the two is the only place engine codes
//! are interpreted.

use std::io;

use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoStaticStr};
use thiserror::Error;

/// Rendered by [`ErrorCode::describe_raw`] for codes outside the enumeration.
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Raw storage-engine error code.
///
/// Discriminants match the on-device engine so raw values coming across an
/// FFI or log boundary can be mapped back with [`ErrorCode::from_raw`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, IntoStaticStr,
)]
#[repr(i32)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Error during device operation.
    Io = -5,
    /// Corrupted filesystem.
    Corrupt = -84,
    /// No directory entry.
    NoEntry = -2,
    /// Entry already exists.
    Exists = -17,
    /// Entry is not a directory.
    NotDir = -20,
    /// Entry is a directory.
    IsDir = -21,
    /// Directory is not empty.
    NotEmpty = -39,
    /// Bad file number.
    BadFile = -9,
    /// File too large.
    FileTooLarge = -27,
    /// Invalid parameter.
    Invalid = -22,
    /// No space left on device.
    NoSpace = -28,
    /// No more memory available.
    NoMemory = -12,
    /// No data/attr available.
    NoAttr = -61,
    /// File name too long.
    NameTooLong = -36,
}

impl ErrorCode {
    /// The raw negative code.
    pub fn raw(self) -> i32 {
        self as i32
    }

    /// Map a raw code back to the enumeration.
    pub fn from_raw(raw: i32) -> Option<Self> {
        let code = match raw {
            -5 => Self::Io,
            -84 => Self::Corrupt,
            -2 => Self::NoEntry,
            -17 => Self::Exists,
            -20 => Self::NotDir,
            -21 => Self::IsDir,
            -39 => Self::NotEmpty,
            -9 => Self::BadFile,
            -27 => Self::FileTooLarge,
            -22 => Self::Invalid,
            -28 => Self::NoSpace,
            -12 => Self::NoMemory,
            -61 => Self::NoAttr,
            -36 => Self::NameTooLong,
            _ => return None,
        };
        Some(code)
    }

    /// Short symbolic name, e.g. `"NO_SPACE"`.
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Human-readable description for diagnostics.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Io => "error during device operation",
            Self::Corrupt => "corrupted",
            Self::NoEntry => "no directory entry",
            Self::Exists => "entry already exists",
            Self::NotDir => "entry is not a dir",
            Self::IsDir => "entry is a dir",
            Self::NotEmpty => "dir is not empty",
            Self::BadFile => "bad file number",
            Self::FileTooLarge => "file too large",
            Self::Invalid => "invalid parameter",
            Self::NoSpace => "no space left on device",
            Self::NoMemory => "no more memory available",
            Self::NoAttr => "no data/attr available",
            Self::NameTooLong => "file name too long",
        }
    }

    /// Describe a raw code. Zero is success; anything unrecognised renders
    /// as [`UNKNOWN_ERROR`].
    pub fn describe_raw(raw: i32) -> &'static str {
        if raw == 0 {
            return "no error";
        }
        Self::from_raw(raw).map_or(UNKNOWN_ERROR, Self::describe)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.describe(), self.raw())
    }
}

/// Portable filesystem error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    /// Device I/O failed.
    #[error("I/O failure")]
    IoFailure,

    /// On-storage structures are corrupt.
    #[error("filesystem corrupt")]
    Corrupt,

    /// No such file or directory.
    #[error("no such entry")]
    NoSuchEntry,

    /// Path already exists.
    #[error("already exists")]
    AlreadyExists,

    /// Expected a directory.
    #[error("not a directory")]
    NotADirectory,

    /// Expected a file.
    #[error("is a directory")]
    IsADirectory,

    /// Directory not empty.
    #[error("directory not empty")]
    DirectoryNotEmpty,

    /// Descriptor is not open.
    #[error("invalid handle")]
    InvalidHandle,

    /// File exceeds the engine's size limit.
    #[error("file too large")]
    FileTooLarge,

    /// Caller passed something unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Partition is full.
    #[error("no space left on partition")]
    NoSpace,

    /// Allocation failed or the descriptor limit was reached.
    #[error("out of memory")]
    OutOfMemory,

    /// Requested attribute is absent.
    #[error("no attribute")]
    NoAttribute,

    /// Path or component name too long.
    #[error("name too long")]
    NameTooLong,

    /// A mount already exists for the label or base path.
    #[error("already mounted: {0}")]
    AlreadyMounted(String),

    /// No mount exists for the label or path.
    #[error("not mounted: {0}")]
    NotMounted(String),

    /// Refused because live references exist.
    #[error("busy: {0}")]
    Busy(String),

    /// Engine mount failed (after the optional format retry).
    #[error("mount failed: {0}")]
    MountFailed(String),
}

impl FsError {
    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an AlreadyMounted error.
    pub fn already_mounted(what: impl Into<String>) -> Self {
        Self::AlreadyMounted(what.into())
    }

    /// Create a NotMounted error.
    pub fn not_mounted(what: impl Into<String>) -> Self {
        Self::NotMounted(what.into())
    }

    /// Create a Busy error.
    pub fn busy(what: impl Into<String>) -> Self {
        Self::Busy(what.into())
    }

    /// Create a MountFailed error.
    pub fn mount_failed(what: impl Into<String>) -> Self {
        Self::MountFailed(what.into())
    }

    /// True for errors the caller can clear by closing descriptors and
    /// retrying.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

impl From<ErrorCode> for FsError {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Io => Self::IoFailure,
            ErrorCode::Corrupt => Self::Corrupt,
            ErrorCode::NoEntry => Self::NoSuchEntry,
            ErrorCode::Exists => Self::AlreadyExists,
            ErrorCode::NotDir => Self::NotADirectory,
            ErrorCode::IsDir => Self::IsADirectory,
            ErrorCode::NotEmpty => Self::DirectoryNotEmpty,
            ErrorCode::BadFile => Self::InvalidHandle,
            ErrorCode::FileTooLarge => Self::FileTooLarge,
            ErrorCode::Invalid => Self::InvalidArgument(code.describe().to_string()),
            ErrorCode::NoSpace => Self::NoSpace,
            ErrorCode::NoMemory => Self::OutOfMemory,
            ErrorCode::NoAttr => Self::NoAttribute,
            ErrorCode::NameTooLong => Self::NameTooLong,
        }
    }
}

/// Convert FsError to std::io::Error for compatibility.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        let kind = match &e {
            FsError::IoFailure | FsError::Corrupt => io::ErrorKind::Other,
            FsError::NoSuchEntry => io::ErrorKind::NotFound,
            FsError::AlreadyExists => io::ErrorKind::AlreadyExists,
            FsError::NotADirectory => io::ErrorKind::NotADirectory,
            FsError::IsADirectory => io::ErrorKind::IsADirectory,
            FsError::DirectoryNotEmpty => io::ErrorKind::DirectoryNotEmpty,
            FsError::InvalidHandle | FsError::InvalidArgument(_) | FsError::NameTooLong => {
                io::ErrorKind::InvalidInput
            }
            FsError::FileTooLarge => io::ErrorKind::FileTooLarge,
            FsError::NoSpace => io::ErrorKind::StorageFull,
            FsError::OutOfMemory => io::ErrorKind::OutOfMemory,
            FsError::NoAttribute | FsError::NotMounted(_) => io::ErrorKind::NotFound,
            FsError::AlreadyMounted(_) => io::ErrorKind::AlreadyExists,
            FsError::Busy(_) => io::ErrorKind::ResourceBusy,
            FsError::MountFailed(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

/// Result type used throughout partfs.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_raw_roundtrip_covers_every_code() {
        for code in ErrorCode::iter() {
            assert_eq!(ErrorCode::from_raw(code.raw()), Some(code));
        }
    }

    #[test]
    fn test_describe_is_total() {
        for code in ErrorCode::iter() {
            assert!(!code.describe().is_empty());
            assert_ne!(code.describe(), UNKNOWN_ERROR);
        }
    }

    #[test]
    fn test_describe_raw_fails_closed() {
        assert_eq!(ErrorCode::describe_raw(-28), "no space left on device");
        assert_eq!(ErrorCode::describe_raw(0), "no error");
        assert_eq!(ErrorCode::describe_raw(-1000), UNKNOWN_ERROR);
        assert_eq!(ErrorCode::describe_raw(42), UNKNOWN_ERROR);
    }

    #[test]
    fn test_code_names() {
        assert_eq!(ErrorCode::NoSpace.name(), "NO_SPACE");
        assert_eq!(ErrorCode::Io.name(), "IO");
    }

    #[test]
    fn test_translation() {
        assert_eq!(FsError::from(ErrorCode::NoEntry), FsError::NoSuchEntry);
        assert_eq!(FsError::from(ErrorCode::BadFile), FsError::InvalidHandle);
        assert_eq!(FsError::from(ErrorCode::NoMemory), FsError::OutOfMemory);
        assert!(matches!(
            FsError::from(ErrorCode::Invalid),
            FsError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_io_error_kind() {
        let err: io::Error = FsError::busy("spiffs").into();
        assert_eq!(err.kind(), io::ErrorKind::ResourceBusy);

        let err: io::Error = FsError::NoSuchEntry.into();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
