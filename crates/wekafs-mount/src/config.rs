//! Mounter configuration.
//!
//! Loaded from JSON by the node daemon; every field has a default so a
//! partial document (or none at all) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::options::{ExclusiveGroup, default_exclusive_groups};

/// Root under which all mount points are created.
pub const DEFAULT_BASE_PATH: &str = "/run/weka-fs-mounts";
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_NFS_MOUNT_ATTEMPTS: u32 = 3;
pub const DEFAULT_NFS_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_NFS_CLIENT_GROUP: &str = "WekaCSIPluginClients";
pub const DEFAULT_NFS_PROTOCOL_VERSION: &str = "4.1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Settings shared by both transport mounters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MounterConfig {
    /// Root directory for mount points.
    pub base_path: PathBuf,
    /// Groups of generic options of which at most one may be active.
    pub exclusive_option_groups: Vec<ExclusiveGroup>,
    /// Inject the SELinux context option without probing the host.
    pub force_selinux: bool,
    /// Allow the native client to pick a protocol (gateway) container.
    pub allow_protocol_containers: bool,
    /// Client group that NFS exports are granted to.
    pub nfs_client_group: String,
    /// NFS protocol version added as `vers=` unless the caller set one.
    pub nfs_protocol_version: String,
    #[serde(with = "humantime_serde")]
    pub gc_interval: Duration,
    pub nfs_mount_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub nfs_mount_retry_delay: Duration,
    /// When set, mounts are bind mounts of `<debug_path>/<filesystem>`.
    pub debug_path: Option<PathBuf>,
}

impl Default for MounterConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from(DEFAULT_BASE_PATH),
            exclusive_option_groups: default_exclusive_groups(),
            force_selinux: false,
            allow_protocol_containers: false,
            nfs_client_group: DEFAULT_NFS_CLIENT_GROUP.to_string(),
            nfs_protocol_version: DEFAULT_NFS_PROTOCOL_VERSION.to_string(),
            gc_interval: DEFAULT_GC_INTERVAL,
            nfs_mount_attempts: DEFAULT_NFS_MOUNT_ATTEMPTS,
            nfs_mount_retry_delay: DEFAULT_NFS_RETRY_DELAY,
            debug_path: None,
        }
    }
}

impl MounterConfig {
    /// NFS mount attempts, never less than one.
    pub fn nfs_attempts(&self) -> u32 {
        self.nfs_mount_attempts.max(1)
    }
}

/// Configuration for a [`crate::MounterGroup`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MounterGroupConfig {
    #[serde(flatten)]
    pub mounter: MounterConfig,
    /// Prefer NFS over the native client.
    pub use_nfs: bool,
    /// Fall back to NFS when the native client is not running.
    pub allow_nfs_failback: bool,
}

impl MounterGroupConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = MounterGroupConfig::default();
        assert_eq!(cfg.mounter.base_path, PathBuf::from(DEFAULT_BASE_PATH));
        assert_eq!(cfg.mounter.gc_interval, Duration::from_secs(600));
        assert_eq!(cfg.mounter.nfs_attempts(), 3);
        assert!(!cfg.use_nfs);
        assert!(!cfg.allow_nfs_failback);
        assert!(cfg.mounter.exclusive_option_groups[0].contains("readcache"));
    }

    #[test]
    fn test_partial_json() {
        let cfg: MounterGroupConfig = serde_json::from_str(
            r#"{"basePath": "/tmp/mounts", "gcInterval": "30s", "allowNfsFailback": true,
                "exclusiveOptionGroups": [["ro", "rw"]]}"#,
        )
        .unwrap();
        assert_eq!(cfg.mounter.base_path, PathBuf::from("/tmp/mounts"));
        assert_eq!(cfg.mounter.gc_interval, Duration::from_secs(30));
        assert!(cfg.allow_nfs_failback);
        assert_eq!(cfg.mounter.exclusive_option_groups, vec![ExclusiveGroup::new(["ro", "rw"])]);
        assert_eq!(cfg.mounter.nfs_mount_retry_delay, DEFAULT_NFS_RETRY_DELAY);
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let cfg = MounterConfig {
            nfs_mount_attempts: 0,
            ..MounterConfig::default()
        };
        assert_eq!(cfg.nfs_attempts(), 1);
    }

    #[test]
    fn test_from_json_file_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            MounterGroupConfig::from_json_file(&missing),
            Err(ConfigError::Read { .. })
        ));
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{not json").unwrap();
        assert!(matches!(
            MounterGroupConfig::from_json_file(&bad),
            Err(ConfigError::Parse { .. })
        ));
    }
}
