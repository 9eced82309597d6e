//! Core request/response types shared with storage engines.

use serde::{Deserialize, Serialize};

/// Open file flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Every write goes to the end of the file.
    pub append: bool,
    /// Create if not exists.
    pub create: bool,
    /// Truncate on open.
    pub truncate: bool,
    /// Exclusive create (fail if exists).
    pub exclusive: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
            exclusive: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Read and write an existing file.
    pub fn write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    /// Create with write access.
    pub fn create() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            ..Default::default()
        }
    }

    /// Create exclusively (fail if exists).
    pub fn create_exclusive() -> Self {
        Self {
            exclusive: true,
            ..Self::create()
        }
    }

    /// Create and truncate.
    pub fn create_truncate() -> Self {
        Self {
            truncate: true,
            ..Self::create()
        }
    }

    /// Create and append.
    pub fn append() -> Self {
        Self {
            append: true,
            ..Self::create()
        }
    }

    /// Parse an fopen-style mode string (`"r"`, `"w+"`, `"ab"`, `"wx"`, ...).
    pub fn from_mode(mode: &str) -> Option<Self> {
        let plus = mode.contains('+');
        let exclusive = mode.contains('x');
        let mut flags = match mode.chars().next()? {
            'r' => Self {
                write: plus,
                ..Self::read()
            },
            'w' => Self::create_truncate(),
            'a' => Self::append(),
            _ => return None,
        };
        if !plus && mode.starts_with(['w', 'a']) {
            flags.read = false;
        }
        flags.exclusive = exclusive && flags.create;
        Some(flags)
    }

    /// True when the open may modify storage.
    pub fn mutates(&self) -> bool {
        self.write || self.append || self.create || self.truncate
    }
}

/// Seek origin for positioned I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeekFrom {
    /// Absolute offset.
    Start(u64),
    /// Relative to the current position.
    Current(i64),
    /// Relative to end of file.
    End(i64),
}

/// Capacity report for a mounted partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Size of the filesystem in bytes.
    pub total_bytes: u64,
    /// Bytes currently in use.
    pub used_bytes: u64,
}

impl Usage {
    /// Bytes still available.
    pub fn free_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_flags() {
        let read = OpenFlags::read();
        assert!(read.read);
        assert!(!read.write);
        assert!(!read.mutates());

        let create = OpenFlags::create_exclusive();
        assert!(create.create);
        assert!(create.exclusive);
        assert!(create.write);
    }

    #[test]
    fn test_from_mode() {
        assert_eq!(OpenFlags::from_mode("r"), Some(OpenFlags::read()));
        assert_eq!(OpenFlags::from_mode("r+"), Some(OpenFlags::write()));
        assert_eq!(OpenFlags::from_mode("w+"), Some(OpenFlags::create_truncate()));

        let w = OpenFlags::from_mode("wb").unwrap();
        assert!(w.write && w.truncate && !w.read);

        let a = OpenFlags::from_mode("a").unwrap();
        assert!(a.append && a.create && !a.read);

        let wx = OpenFlags::from_mode("wx").unwrap();
        assert!(wx.exclusive);

        assert_eq!(OpenFlags::from_mode(""), None);
        assert_eq!(OpenFlags::from_mode("q"), None);
    }

    #[test]
    fn test_usage_free() {
        let usage = Usage {
            total_bytes: 1000,
            used_bytes: 250,
        };
        assert_eq!(usage.free_bytes(), 750);
        assert_eq!(Usage::default().free_bytes(), 0);
    }
}
