//! Mount configuration.
//!
//! A [`MountConfig`] describes one partition registration. It can be built
//! in code with the `with_*` setters or parsed from TOML:
//!
//! ```toml
//! base_path = "/data"
//! partition_label = "storage"
//! format_if_mount_failed = true
//! collision_mode = "hash_only"
//! max_open_files = 8
//! ```

use serde::{Deserialize, Serialize};

use partfs_types::{FsError, FsResult, normalize_path};

use crate::descriptor::CollisionMode;

/// Longest base path the VFS layer accepts.
pub const VFS_PATH_MAX: usize = 15;

/// Longest partition label, matching the partition table.
pub const PARTITION_LABEL_MAX: usize = 16;

/// Configuration for one partition registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Mount point, e.g. `/spiffs`.
    pub base_path: String,

    /// Label of the partition to mount.
    pub partition_label: String,

    /// Format the partition and retry once if the first mount fails.
    pub format_if_mount_failed: bool,

    /// Register the label without mounting or formatting. Overrides
    /// `format_if_mount_failed`.
    pub skip_mount: bool,

    /// How open descriptors with colliding path hashes are told apart.
    pub collision_mode: CollisionMode,

    /// Upper bound on simultaneously open descriptors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_open_files: Option<usize>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self::new("spiffs", "/spiffs")
    }
}

impl MountConfig {
    /// Create a config for `partition_label` mounted at `base_path`.
    pub fn new(partition_label: impl Into<String>, base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            partition_label: partition_label.into(),
            format_if_mount_failed: false,
            skip_mount: false,
            collision_mode: CollisionMode::default(),
            max_open_files: None,
        }
    }

    /// Set whether a failed mount triggers format-and-retry.
    pub fn with_format_if_mount_failed(mut self, format: bool) -> Self {
        self.format_if_mount_failed = format;
        self
    }

    /// Set whether registration skips mounting.
    pub fn with_skip_mount(mut self, skip: bool) -> Self {
        self.skip_mount = skip;
        self
    }

    /// Set the collision policy.
    pub fn with_collision_mode(mut self, mode: CollisionMode) -> Self {
        self.collision_mode = mode;
        self
    }

    /// Cap the number of open descriptors.
    pub fn with_max_open_files(mut self, max: usize) -> Self {
        self.max_open_files = Some(max);
        self
    }

    /// Parse a config from TOML. Missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> FsResult<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| FsError::invalid_argument(format!("mount config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the config is usable for registration.
    pub fn validate(&self) -> FsResult<()> {
        let label = &self.partition_label;
        if label.is_empty() || label.len() > PARTITION_LABEL_MAX {
            return Err(FsError::invalid_argument(format!(
                "partition label must be 1..={PARTITION_LABEL_MAX} bytes: {label:?}"
            )));
        }
        if label.contains('/') {
            return Err(FsError::invalid_argument(format!(
                "partition label must not contain '/': {label:?}"
            )));
        }

        let base = &self.base_path;
        if !base.starts_with('/') || base.len() < 2 || base.len() > VFS_PATH_MAX {
            return Err(FsError::invalid_argument(format!(
                "base path must start with '/' and be 2..={VFS_PATH_MAX} bytes: {base:?}"
            )));
        }
        if normalize_path(base) != *base {
            return Err(FsError::invalid_argument(format!(
                "base path must be normalized (no trailing '/', '//', '.' or '..'): {base:?}"
            )));
        }

        if self.max_open_files == Some(0) {
            return Err(FsError::invalid_argument("max_open_files must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MountConfig::default();
        assert_eq!(config.partition_label, "spiffs");
        assert_eq!(config.base_path, "/spiffs");
        assert!(!config.format_if_mount_failed);
        assert!(!config.skip_mount);
        assert_eq!(config.collision_mode, CollisionMode::HashAndPath);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = MountConfig::new("data", "/data")
            .with_format_if_mount_failed(true)
            .with_collision_mode(CollisionMode::HashOnly)
            .with_max_open_files(4);
        assert!(config.format_if_mount_failed);
        assert_eq!(config.collision_mode, CollisionMode::HashOnly);
        assert_eq!(config.max_open_files, Some(4));
    }

    #[test]
    fn test_from_toml() {
        let config = MountConfig::from_toml_str(
            r#"
            base_path = "/data"
            partition_label = "storage"
            format_if_mount_failed = true
            collision_mode = "hash_only"
            max_open_files = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.base_path, "/data");
        assert_eq!(config.partition_label, "storage");
        assert!(config.format_if_mount_failed);
        assert_eq!(config.collision_mode, CollisionMode::HashOnly);
        assert_eq!(config.max_open_files, Some(8));
    }

    #[test]
    fn test_from_toml_partial_uses_defaults() {
        let config = MountConfig::from_toml_str(r#"partition_label = "logs""#).unwrap();
        assert_eq!(config.partition_label, "logs");
        assert_eq!(config.base_path, "/spiffs");
        assert!(!config.skip_mount);
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        let err = MountConfig::from_toml_str("collision_mode = \"sometimes\"").unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(_)));
    }

    #[test]
    fn test_validation() {
        let bad = [
            MountConfig::new("", "/data"),
            MountConfig::new("a-very-long-partition-label", "/data"),
            MountConfig::new("a/b", "/data"),
            MountConfig::new("data", "data"),
            MountConfig::new("data", "/"),
            MountConfig::new("data", "/data/"),
            MountConfig::new("data", "/a//b"),
            MountConfig::new("data", "/a/.."),
            MountConfig::new("data", "/./x"),
            MountConfig::new("data", "/a/./b"),
            MountConfig::new("data", "/a/../b"),
            MountConfig::new("data", "/this/path/is/too/long"),
            MountConfig::new("data", "/data").with_max_open_files(0),
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(FsError::InvalidArgument(_))),
                "{config:?}"
            );
        }
        assert!(MountConfig::new("data", "/a/b").validate().is_ok());
    }
}
