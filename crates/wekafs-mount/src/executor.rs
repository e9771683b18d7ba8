//! Host mount and unmount execution.
//!
//! [`MountExecutor`] is the seam between reference counting and the
//! operating system. [`SystemMountExecutor`] shells out to `mount(8)` and
//! `umount(8)`; tests use the in-memory fake from [`crate::testing`].
//!
//! Sensitive options (mount tokens) are passed to the command line but
//! never appear in logs or error messages.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::ExecutorError;
use crate::node::read_mount_table;

const REDACTED: &str = "<masked>";

/// Performs the OS-level mount operations.
#[async_trait]
pub trait MountExecutor: Send + Sync {
    /// Mount `source` on `target`.
    ///
    /// An empty `fs_type` is allowed for bind mounts. `sensitive_options`
    /// are appended to `options` but must be redacted from any output.
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
        sensitive_options: &[String],
    ) -> Result<(), ExecutorError>;

    async fn unmount(&self, target: &Path) -> Result<(), ExecutorError>;

    /// Whether `target` is an ordinary directory rather than a mount point.
    async fn is_not_a_mount_point(&self, target: &Path) -> Result<bool, ExecutorError>;
}

/// [`MountExecutor`] using the host's `mount` and `umount` binaries.
#[derive(Debug, Clone)]
pub struct SystemMountExecutor {
    mount_bin: PathBuf,
    umount_bin: PathBuf,
    mount_table: PathBuf,
}

impl Default for SystemMountExecutor {
    fn default() -> Self {
        Self {
            mount_bin: PathBuf::from("mount"),
            umount_bin: PathBuf::from("umount"),
            mount_table: PathBuf::from("/proc/self/mounts"),
        }
    }
}

impl SystemMountExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run(
        &self,
        program: &Path,
        args: &[String],
        logged_args: &[String],
        target: &Path,
    ) -> Result<(), ExecutorError> {
        debug!(
            command = %program.display(),
            args = %logged_args.join(" "),
            "Executing mount command"
        );
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|source| ExecutorError::Io {
                op: "spawn",
                target: target.to_path_buf(),
                source,
            })?;
        if output.status.success() {
            trace!(target = %target.display(), "Mount command succeeded");
            return Ok(());
        }
        Err(ExecutorError::Command {
            program: program.display().to_string(),
            target: target.display().to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Build `mount` arguments, returning the real list and a redacted copy for logs.
fn mount_args(
    source: &str,
    target: &Path,
    fs_type: &str,
    options: &[String],
    sensitive_options: &[String],
) -> (Vec<String>, Vec<String>) {
    let mut args = Vec::new();
    let mut logged = Vec::new();
    if !fs_type.is_empty() {
        for a in ["-t", fs_type] {
            args.push(a.to_string());
            logged.push(a.to_string());
        }
    }
    if !options.is_empty() || !sensitive_options.is_empty() {
        let all: Vec<&str> = options
            .iter()
            .chain(sensitive_options)
            .map(String::as_str)
            .collect();
        let masked: Vec<&str> = options
            .iter()
            .map(String::as_str)
            .chain(sensitive_options.iter().map(|_| REDACTED))
            .collect();
        args.extend(["-o".to_string(), all.join(",")]);
        logged.extend(["-o".to_string(), masked.join(",")]);
    }
    let target = target.display().to_string();
    args.extend([source.to_string(), target.clone()]);
    logged.extend([source.to_string(), target]);
    (args, logged)
}

#[async_trait]
impl MountExecutor for SystemMountExecutor {
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
        sensitive_options: &[String],
    ) -> Result<(), ExecutorError> {
        let (args, logged) = mount_args(source, target, fs_type, options, sensitive_options);
        self.run(&self.mount_bin, &args, &logged, target).await
    }

    async fn unmount(&self, target: &Path) -> Result<(), ExecutorError> {
        let args = vec![target.display().to_string()];
        self.run(&self.umount_bin, &args, &args, target).await
    }

    async fn is_not_a_mount_point(&self, target: &Path) -> Result<bool, ExecutorError> {
        let target = target.to_path_buf();
        let mount_table = self.mount_table.clone();
        let probe_target = target.clone();
        tokio::task::spawn_blocking(move || probe_not_mount_point(&probe_target, &mount_table))
            .await
            .map_err(|e| ExecutorError::Io {
                op: "probe",
                target,
                source: io::Error::other(e),
            })?
    }
}

/// A path is a mount point if it sits on a different device than its parent,
/// is the root of its device, or appears in the mount table (bind mounts).
fn probe_not_mount_point(target: &Path, mount_table: &Path) -> Result<bool, ExecutorError> {
    let stat = |path: &Path| {
        nix::sys::stat::stat(path).map_err(|errno| ExecutorError::Io {
            op: "stat",
            target: path.to_path_buf(),
            source: io::Error::from(errno),
        })
    };
    let st = stat(target)?;
    let parent = target.parent().unwrap_or_else(|| Path::new("/"));
    let parent_st = stat(parent)?;
    if st.st_dev != parent_st.st_dev || st.st_ino == parent_st.st_ino {
        return Ok(false);
    }
    match read_mount_table(mount_table) {
        Ok(mounts) => Ok(!mounts.iter().any(|m| m.mountpoint == target)),
        Err(e) => {
            debug!(error = %e, "Mount table unavailable, relying on device check");
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mount_args_redact_sensitive_options() {
        let (args, logged) = mount_args(
            "fs1",
            Path::new("/run/m/fs1"),
            "wekafs",
            &["acl".to_string(), "readcache".to_string()],
            &["token=s3cr3t".to_string()],
        );
        assert_eq!(
            args,
            ["-t", "wekafs", "-o", "acl,readcache,token=s3cr3t", "fs1", "/run/m/fs1"]
        );
        assert!(!logged.join(" ").contains("s3cr3t"));
        assert!(logged.join(" ").contains(REDACTED));
    }

    #[test]
    fn test_bind_mount_args_without_fs_type() {
        let (args, _) = mount_args("/debug/fs1", Path::new("/m"), "", &["bind".to_string()], &[]);
        assert_eq!(args, ["-o", "bind", "/debug/fs1", "/m"]);
    }

    #[test]
    fn test_plain_directory_is_not_a_mount_point() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let table = dir.path().join("mounts");
        std::fs::write(&table, "").unwrap();
        assert!(probe_not_mount_point(&sub, &table).unwrap());

        std::fs::write(&table, format!("tmpfs {} tmpfs rw 0 0\n", sub.display())).unwrap();
        assert!(!probe_not_mount_point(&sub, &table).unwrap());
    }

    #[test]
    fn test_root_is_a_mount_point() {
        assert!(!probe_not_mount_point(Path::new("/"), Path::new("/nonexistent")).unwrap());
    }

    #[test]
    fn test_missing_path_is_error() {
        let err = probe_not_mount_point(Path::new("/definitely/not/here"), Path::new("/proc/self/mounts"))
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Io { op: "stat", .. }));
    }

    #[tokio::test]
    async fn test_failed_command_reports_exit_status() {
        let exec = SystemMountExecutor {
            mount_bin: PathBuf::from("false"),
            umount_bin: PathBuf::from("false"),
            mount_table: PathBuf::from("/proc/self/mounts"),
        };
        let err = exec.unmount(Path::new("/nowhere")).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Command { code: Some(1), .. }));
    }
}
