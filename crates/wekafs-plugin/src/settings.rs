//! Mounter configuration from a JSON file overlaid with command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use wekafs_mount::{ExclusiveGroup, MounterGroupConfig};

/// Mounter settings. Each flag overrides the config file when given.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct MounterArgs {
    /// Root directory for mount points
    #[arg(long, env = "WEKAFS_MOUNT_BASE_PATH", value_name = "DIR")]
    pub base_path: Option<PathBuf>,

    /// Mount over NFS only, even when the native client is available
    #[arg(long, env = "WEKAFS_USE_NFS")]
    pub use_nfs: bool,

    /// Fall back to NFS when the native client is not running
    #[arg(long, env = "WEKAFS_ALLOW_NFS_FAILBACK")]
    pub allow_nfs_failback: bool,

    /// Always add the SELinux context option
    #[arg(long, env = "WEKAFS_FORCE_SELINUX")]
    pub selinux_support: bool,

    /// Let the native client use protocol containers
    #[arg(long, env = "WEKAFS_ALLOW_PROTOCOL_CONTAINERS")]
    pub allow_protocol_containers: bool,

    /// Mutually exclusive option group, comma-separated (repeatable)
    #[arg(long = "mutually-exclusive-mount-options", value_name = "OPTS")]
    pub exclusive_groups: Vec<ExclusiveGroup>,

    /// Client group NFS exports are granted to
    #[arg(long, env = "WEKAFS_NFS_CLIENT_GROUP", value_name = "NAME")]
    pub nfs_client_group: Option<String>,

    /// NFS protocol version
    #[arg(long, env = "WEKAFS_NFS_PROTOCOL_VERSION", value_name = "VERSION")]
    pub nfs_protocol_version: Option<String>,

    /// Interval between idle-entry sweeps (e.g. "10m")
    #[arg(long, value_parser = humantime::parse_duration, value_name = "DURATION")]
    pub gc_interval: Option<Duration>,

    /// NFS mount attempts before giving up
    #[arg(long, value_name = "N")]
    pub nfs_mount_attempts: Option<u32>,

    /// Delay between NFS mount attempts (e.g. "1s")
    #[arg(long, value_parser = humantime::parse_duration, value_name = "DURATION")]
    pub nfs_mount_retry_delay: Option<Duration>,

    /// Bind mount `<DIR>/<filesystem>` instead of contacting a cluster
    #[arg(long, env = "WEKAFS_DEBUG_PATH", value_name = "DIR")]
    pub debug_path: Option<PathBuf>,
}

impl MounterArgs {
    /// Apply the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut MounterGroupConfig) {
        let mounter = &mut config.mounter;
        if let Some(path) = &self.base_path {
            mounter.base_path.clone_from(path);
        }
        if self.use_nfs {
            config.use_nfs = true;
        }
        if self.allow_nfs_failback {
            config.allow_nfs_failback = true;
        }
        if self.selinux_support {
            mounter.force_selinux = true;
        }
        if self.allow_protocol_containers {
            mounter.allow_protocol_containers = true;
        }
        if !self.exclusive_groups.is_empty() {
            mounter.exclusive_option_groups.clone_from(&self.exclusive_groups);
        }
        if let Some(group) = &self.nfs_client_group {
            mounter.nfs_client_group.clone_from(group);
        }
        if let Some(version) = &self.nfs_protocol_version {
            mounter.nfs_protocol_version.clone_from(version);
        }
        if let Some(interval) = self.gc_interval {
            mounter.gc_interval = interval;
        }
        if let Some(attempts) = self.nfs_mount_attempts {
            mounter.nfs_mount_attempts = attempts;
        }
        if let Some(delay) = self.nfs_mount_retry_delay {
            mounter.nfs_mount_retry_delay = delay;
        }
        if let Some(path) = &self.debug_path {
            mounter.debug_path = Some(path.clone());
        }
    }
}

/// Load the config file if one was given, then overlay the flags.
pub fn load(config_file: Option<&Path>, args: &MounterArgs) -> Result<MounterGroupConfig> {
    let mut config = match config_file {
        Some(path) => MounterGroupConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?,
        None => MounterGroupConfig::default(),
    };
    args.apply(&mut config);
    Ok(config)
}
