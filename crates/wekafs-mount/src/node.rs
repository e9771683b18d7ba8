//! Host inspection: native client state, SELinux and the kernel mount table.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

/// Kernel module loaded by the native client.
pub const WEKA_KERNEL_MODULE: &str = "wekafsgw";

/// Marker line in the driver interface file when a frontend is attached.
const CONNECTED_FRONTEND_MARKER: &str = "Connected frontend pid";

/// One line of the kernel mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemMount {
    pub source: String,
    pub mountpoint: PathBuf,
    pub fstype: String,
    pub options: String,
}

/// Read-only view of host state the mount manager depends on.
///
/// Methods may block on filesystem reads. Mount and release paths call them
/// on tokio's blocking pool.
pub trait NodeInspector: Send + Sync {
    /// Whether the native kernel module is loaded and a client frontend is connected.
    fn native_client_running(&self) -> bool;

    /// Names of client containers attached to the native driver.
    fn client_containers(&self) -> Vec<String>;

    /// Whether SELinux is present (permissive or enforcing).
    fn selinux_supported(&self) -> bool;

    /// Current kernel mount table.
    fn mount_table(&self) -> io::Result<Vec<SystemMount>>;

    /// Filesystem type mounted exactly at `path`, if any.
    ///
    /// When several mounts are stacked on the same path the topmost wins.
    fn mount_fstype(&self, path: &Path) -> Option<String> {
        match self.mount_table() {
            Ok(mounts) => mounts
                .into_iter()
                .rev()
                .find(|m| m.mountpoint == path)
                .map(|m| m.fstype),
            Err(e) => {
                warn!(error = %e, "Failed to read mount table");
                None
            }
        }
    }
}

/// [`NodeInspector`] backed by procfs and sysfs.
#[derive(Debug, Clone)]
pub struct HostInspector {
    proc_root: PathBuf,
    selinux_enforce: PathBuf,
}

impl Default for HostInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl HostInspector {
    pub fn new() -> Self {
        Self::with_roots("/proc", "/sys/fs/selinux/enforce")
    }

    /// Inspect an alternate procfs root and SELinux enforce file.
    pub fn with_roots(proc_root: impl Into<PathBuf>, selinux_enforce: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            selinux_enforce: selinux_enforce.into(),
        }
    }

    fn module_loaded(&self) -> bool {
        match fs::read_to_string(self.proc_root.join("modules")) {
            Ok(modules) => modules
                .lines()
                .any(|l| l.split_whitespace().next() == Some(WEKA_KERNEL_MODULE)),
            Err(e) => {
                debug!(error = %e, "Cannot read kernel module list");
                false
            }
        }
    }
}

impl NodeInspector for HostInspector {
    fn native_client_running(&self) -> bool {
        if !self.module_loaded() {
            return false;
        }
        match fs::read_to_string(self.proc_root.join("wekafs/interface")) {
            Ok(interface) => {
                let connected = interface
                    .lines()
                    .any(|l| l.contains(CONNECTED_FRONTEND_MARKER));
                if !connected {
                    error!("Weka kernel module is loaded but no client frontend is connected");
                }
                connected
            }
            Err(e) => {
                error!(error = %e, "Failed to open driver interface");
                false
            }
        }
    }

    fn client_containers(&self) -> Vec<String> {
        let Ok(dir) = fs::read_dir(self.proc_root.join("wekafs")) else {
            return Vec::new();
        };
        let mut names: Vec<String> = dir
            .filter_map(Result::ok)
            .filter(|e| e.path().join("queue").exists())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }

    fn selinux_supported(&self) -> bool {
        match fs::read_to_string(&self.selinux_enforce) {
            Ok(mode) => matches!(mode.trim(), "0" | "1"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                error!(error = %e, "Error reading SELinux status");
                false
            }
        }
    }

    fn mount_table(&self) -> io::Result<Vec<SystemMount>> {
        read_mount_table(&self.proc_root.join("mounts"))
    }
}

/// Parse a `/proc/mounts` style file.
pub fn read_mount_table(path: &Path) -> io::Result<Vec<SystemMount>> {
    let contents = fs::read_to_string(path)?;
    Ok(contents.lines().filter_map(parse_mount_line).collect())
}

/// Parse one mount table line.
///
/// Format: `{source} {mountpoint} {fstype} {options} {dump} {pass}`
fn parse_mount_line(line: &str) -> Option<SystemMount> {
    let mut parts = line.split_whitespace();
    let source = unescape_mount_field(parts.next()?);
    let mountpoint = PathBuf::from(unescape_mount_field(parts.next()?));
    let fstype = parts.next()?.to_string();
    let options = parts.next().unwrap_or_default().to_string();
    Some(SystemMount {
        source,
        mountpoint,
        fstype,
        options,
    })
}

/// Undo the octal escapes the kernel applies to mount table fields
/// (`\040` space, `\011` tab, `\012` newline, `\134` backslash).
fn unescape_mount_field(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..=i + 3].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let code = bytes[i + 1..=i + 3]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(byte) = u8::try_from(code) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_host() -> (TempDir, HostInspector) {
        let dir = TempDir::new().unwrap();
        let inspector = HostInspector::with_roots(dir.path().join("proc"), dir.path().join("enforce"));
        fs::create_dir_all(dir.path().join("proc")).unwrap();
        (dir, inspector)
    }

    #[test]
    fn test_parse_mount_line() {
        let m = parse_mount_line("10.0.0.1:/fs1 /run/weka-fs-mounts/nfs/fs1-X nfs4 rw,hard 0 0").unwrap();
        assert_eq!(m.source, "10.0.0.1:/fs1");
        assert_eq!(m.mountpoint, PathBuf::from("/run/weka-fs-mounts/nfs/fs1-X"));
        assert_eq!(m.fstype, "nfs4");
        assert_eq!(m.options, "rw,hard");
        assert!(parse_mount_line("short line").is_none());
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape_mount_field(r"/mnt/my\040vault"), "/mnt/my vault");
        assert_eq!(unescape_mount_field(r"/mnt/a\134b"), r"/mnt/a\b");
        assert_eq!(unescape_mount_field(r"/mnt/x\04"), r"/mnt/x\04");
        assert_eq!(unescape_mount_field("/plain"), "/plain");
    }

    #[test]
    fn test_native_client_detection() {
        let (dir, host) = fake_host();
        let proc = dir.path().join("proc");
        assert!(!host.native_client_running());

        fs::write(proc.join("modules"), "wekafsgw 2867200 2 - Live 0x0\next4 1 0 - Live 0x0\n").unwrap();
        assert!(!host.native_client_running(), "module alone is not enough");

        fs::create_dir_all(proc.join("wekafs")).unwrap();
        fs::write(proc.join("wekafs/interface"), "Driver version 4.2\n").unwrap();
        assert!(!host.native_client_running());

        fs::write(proc.join("wekafs/interface"), "Connected frontend pid 4242\n").unwrap();
        assert!(host.native_client_running());
    }

    #[test]
    fn test_client_containers() {
        let (dir, host) = fake_host();
        let wekafs = dir.path().join("proc/wekafs");
        for name in ["client2", "client1"] {
            fs::create_dir_all(wekafs.join(name)).unwrap();
            fs::write(wekafs.join(name).join("queue"), "").unwrap();
        }
        fs::create_dir_all(wekafs.join("noqueue")).unwrap();
        assert_eq!(host.client_containers(), vec!["client1", "client2"]);
    }

    #[test]
    fn test_selinux_detection() {
        let (dir, host) = fake_host();
        assert!(!host.selinux_supported());
        fs::write(dir.path().join("enforce"), "0\n").unwrap();
        assert!(host.selinux_supported());
        fs::write(dir.path().join("enforce"), "1").unwrap();
        assert!(host.selinux_supported());
        fs::write(dir.path().join("enforce"), "garbage").unwrap();
        assert!(!host.selinux_supported());
    }

    #[test]
    fn test_mount_fstype_topmost_wins() {
        let (dir, host) = fake_host();
        fs::write(
            dir.path().join("proc/mounts"),
            "tmpfs /m tmpfs rw 0 0\nfs1 /m wekafs rw,container_name=c1 0 0\n",
        )
        .unwrap();
        assert_eq!(host.mount_fstype(Path::new("/m")).as_deref(), Some("wekafs"));
        assert_eq!(host.mount_fstype(Path::new("/other")), None);
    }
}
