//! Error types for mount lifecycle operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::transport::DataTransport;

/// Errors returned by the remote storage-cluster client.
///
/// The mount manager never interprets these beyond logging; they are
/// surfaced to the caller unchanged inside [`MountError::Remote`].
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The cluster API answered with a failure status.
    #[error("cluster API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    /// The cluster could not be reached at all.
    #[error("cluster is unreachable: {0}")]
    Unreachable(String),

    /// A requested object (filesystem, container, interface) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other failure reported by the client implementation.
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of a failed mount call, used for log messages
/// on the NFS retry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    MissingPath,
    PermissionDenied,
    InvalidArgument,
    Other,
}

impl FailureClass {
    /// Human-readable hint attached to retry log lines.
    pub fn hint(self) -> &'static str {
        match self {
            Self::MissingPath => "mount failed due to a missing path",
            Self::PermissionDenied => "mount failed due to permission denied",
            Self::InvalidArgument => "mount failed due to an invalid argument",
            Self::Other => "mount failed",
        }
    }
}

/// Errors from the host mount executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The mount or unmount command ran and exited unsuccessfully.
    #[error("{program} {target} exited with {}: {stderr}", code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    Command {
        program: String,
        target: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The command could not be spawned, or a filesystem probe failed.
    #[error("{op} {}: {source}", target.display())]
    Io {
        op: &'static str,
        target: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ExecutorError {
    /// Classify the failure for diagnostics.
    pub fn classify(&self) -> FailureClass {
        match self {
            Self::Io { source, .. } => match source.kind() {
                io::ErrorKind::NotFound => FailureClass::MissingPath,
                io::ErrorKind::PermissionDenied => FailureClass::PermissionDenied,
                io::ErrorKind::InvalidInput => FailureClass::InvalidArgument,
                _ => FailureClass::Other,
            },
            Self::Command { stderr, .. } => {
                let stderr = stderr.to_ascii_lowercase();
                if stderr.contains("no such file or directory") || stderr.contains("does not exist") {
                    FailureClass::MissingPath
                } else if stderr.contains("permission denied") || stderr.contains("access denied") {
                    FailureClass::PermissionDenied
                } else if stderr.contains("invalid argument") {
                    FailureClass::InvalidArgument
                } else {
                    FailureClass::Other
                }
            }
        }
    }
}

/// Errors from acquiring or releasing a mount.
#[derive(Debug, Error)]
pub enum MountError {
    /// The native client is not loaded or has no connected frontend.
    #[error("weka client is not running on this host, refusing to mount")]
    NativeClientNotRunning,

    /// A real mount was requested without a remote client.
    #[error("a cluster API client is required to mount {filesystem} over {transport}")]
    NoRemoteClient {
        filesystem: String,
        transport: DataTransport,
    },

    /// NFS mounts require the remote client to be scoped to the root organization.
    #[error("NFS mounts require an API client logged into the Root organization")]
    NotRootOrganization,

    /// Neither transport is enabled in the mounter group.
    #[error("no mounter is enabled for any transport")]
    NoMounterEnabled,

    /// A release drove the reference count below zero; the count was clamped.
    #[error("reference count underflow on {}", mount_point.display())]
    RefCountUnderflow { mount_point: PathBuf },

    /// The request context was cancelled before a remote call completed.
    #[error("operation cancelled")]
    Cancelled,

    /// The request context's deadline passed before a remote call completed.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// Creating or removing a mount-point directory failed.
    #[error("failed to {op} mount point {}: {source}", path.display())]
    MountPoint {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T, E = MountError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    fn command_error(stderr: &str) -> ExecutorError {
        ExecutorError::Command {
            program: "mount".into(),
            target: "/mnt/x".into(),
            code: Some(32),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn test_classify_command_stderr() {
        assert_eq!(
            command_error("mount.nfs: mounting 10.0.0.1:/fs failed, reason given by server: No such file or directory").classify(),
            FailureClass::MissingPath
        );
        assert_eq!(
            command_error("mount.nfs: access denied by server").classify(),
            FailureClass::PermissionDenied
        );
        assert_eq!(
            command_error("mount: /mnt/x: Invalid argument").classify(),
            FailureClass::InvalidArgument
        );
        assert_eq!(command_error("timed out").classify(), FailureClass::Other);
    }

    #[test]
    fn test_classify_io_error() {
        let err = ExecutorError::Io {
            op: "spawn",
            target: "/mnt/x".into(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(err.classify(), FailureClass::PermissionDenied);
    }

    #[test]
    fn test_command_error_display_includes_exit_code() {
        let msg = command_error("boom").to_string();
        assert!(msg.contains("exited with 32"));
        assert!(msg.contains("boom"));
    }
}
