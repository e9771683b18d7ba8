//! Deterministic mount-point names.
//!
//! A mount point is `<base>/<transport>/<ascii(fs)>-<digest>` where the digest
//! covers the filesystem name and the canonical option string, so identical
//! requests always land on the same directory across restarts.

use std::path::{Path, PathBuf};

use data_encoding::BASE32_NOPAD;
use sha2::{Digest, Sha256};

use crate::options::MountOptions;
use crate::transport::DataTransport;

/// Maximum length of the human-readable filesystem part of a mount point.
pub const MAX_ASCII_PART: usize = 64;

/// Bytes of the SHA-256 digest kept in the directory name (32 base32 chars).
const DIGEST_BYTES: usize = 20;

/// Separator between mount point and option key inside a table key.
///
/// Never produced by [`ascii_part`] or by canonical option strings.
pub const KEY_SEPARATOR: char = '^';

/// Keep only characters that are safe in a directory name, truncated to `max_len`.
pub fn ascii_part(name: &str, max_len: usize) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
        .take(max_len)
        .collect()
}

/// Base32 of the truncated SHA-256 over `"<filesystem>:<options>"`, using the
/// map-key form of the options.
pub fn unique_id(filesystem: &str, options: &MountOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filesystem.as_bytes());
    hasher.update(b":");
    hasher.update(options.as_map_key().as_bytes());
    let digest = hasher.finalize();
    BASE32_NOPAD.encode(&digest[..DIGEST_BYTES])
}

/// Directory holding all mounts of one transport.
pub fn transport_dir(base: &Path, transport: DataTransport) -> PathBuf {
    base.join(transport.as_str())
}

/// Mount point for a filesystem, without any container suffix.
pub fn base_mount_point(
    base: &Path,
    transport: DataTransport,
    filesystem: &str,
    options: &MountOptions,
) -> PathBuf {
    transport_dir(base, transport).join(format!(
        "{}-{}",
        ascii_part(filesystem, MAX_ASCII_PART),
        unique_id(filesystem, options)
    ))
}

/// Append the local container suffix used by native mounts on multi-container hosts.
pub fn with_container_suffix(mount_point: &Path, container: Option<&str>) -> PathBuf {
    match container {
        Some(name) if !name.is_empty() => {
            let mut raw = mount_point.as_os_str().to_owned();
            raw.push("-");
            raw.push(ascii_part(name, MAX_ASCII_PART));
            PathBuf::from(raw)
        }
        _ => mount_point.to_path_buf(),
    }
}

/// Key identifying a mount instance in the reference-count table.
pub fn mount_key(mount_point: &Path, options: &MountOptions) -> String {
    format!(
        "{}{KEY_SEPARATOR}{}",
        mount_point.display(),
        options.as_map_key()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_part_filters_and_truncates() {
        assert_eq!(ascii_part("abc:%абс", 64), "abc:");
        assert_eq!(ascii_part("+=-_", 64), "-_");
        assert_eq!(ascii_part("123/", 64), "123");
        assert_eq!(ascii_part("abcdef", 3), "abc");
        assert_eq!(ascii_part("|^", 3), "");
    }

    #[test]
    fn test_mount_point_is_deterministic() {
        let base = Path::new("/run/weka-fs-mounts");
        let opts: MountOptions = "writecache,acl".parse().unwrap();
        let a = base_mount_point(base, DataTransport::Wekafs, "fs1", &opts);
        let b = base_mount_point(base, DataTransport::Wekafs, "fs1", &opts);
        assert_eq!(a, b);
        assert!(a.starts_with("/run/weka-fs-mounts/wekafs"));
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("fs1-"));
        assert_eq!(name.len(), "fs1-".len() + 32);
    }

    #[test]
    fn test_mount_point_differs_by_options() {
        let base = Path::new("/run/weka-fs-mounts");
        let a = base_mount_point(base, DataTransport::Nfs, "fs1", &"ro".parse().unwrap());
        let b = base_mount_point(base, DataTransport::Nfs, "fs1", &"rw".parse().unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn test_mount_point_ignores_sync_on_close() {
        let base = Path::new("/run/weka-fs-mounts");
        let a = base_mount_point(base, DataTransport::Wekafs, "fs1", &"acl".parse().unwrap());
        let b = base_mount_point(base, DataTransport::Wekafs, "fs1", &"acl,sync_on_close".parse().unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_container_suffix() {
        let mp = Path::new("/run/weka-fs-mounts/wekafs/fs1-ABC");
        assert_eq!(with_container_suffix(mp, None), mp);
        assert_eq!(with_container_suffix(mp, Some("")), mp);
        assert_eq!(
            with_container_suffix(mp, Some("client1")),
            Path::new("/run/weka-fs-mounts/wekafs/fs1-ABC-client1")
        );
    }

    #[test]
    fn test_key_contains_separator_once() {
        let opts: MountOptions = "acl,readcache".parse().unwrap();
        let key = mount_key(Path::new("/m/fs-X"), &opts);
        assert_eq!(key.matches(KEY_SEPARATOR).count(), 1);
        assert_eq!(key, "/m/fs-X^acl,readcache");
    }
}
