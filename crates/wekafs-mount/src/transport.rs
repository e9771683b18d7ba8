//! Data transports a filesystem can be mounted over.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The mechanism used to attach a remote filesystem to this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataTransport {
    /// The native WekaFS kernel client.
    Wekafs,
    /// NFS via a protocol gateway on the cluster.
    Nfs,
}

/// Transports in order of preference: native first, NFS as fallback.
pub const TRANSPORT_PREFERENCE: [DataTransport; 2] = [DataTransport::Wekafs, DataTransport::Nfs];

impl DataTransport {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wekafs => "wekafs",
            Self::Nfs => "nfs",
        }
    }

    /// The filesystem type passed to the mount call.
    pub fn fs_type(self) -> &'static str {
        self.as_str()
    }

    /// Whether a filesystem type reported by the mount table belongs to this transport.
    ///
    /// NFS mounts show up as `nfs`, `nfs4` and so on.
    pub fn matches_fs_type(self, fs_type: &str) -> bool {
        match self {
            Self::Wekafs => fs_type == "wekafs",
            Self::Nfs => fs_type.starts_with("nfs"),
        }
    }

    /// The SELinux context option (name, value) injected when labeling is supported.
    pub fn security_context(self) -> (&'static str, &'static str) {
        match self {
            Self::Wekafs => ("fscontext", "\"system_u:object_r:wekafs_csi_volume_t:s0\""),
            Self::Nfs => ("context", "\"system_u:object_r:nfs_t:s0\""),
        }
    }
}

impl fmt::Display for DataTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown data transport: {0}")]
pub struct UnknownTransport(pub String);

impl FromStr for DataTransport {
    type Err = UnknownTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wekafs" => Ok(Self::Wekafs),
            "nfs" => Ok(Self::Nfs),
            other => Err(UnknownTransport(other.to_string())),
        }
    }
}
