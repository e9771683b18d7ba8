//! Mount option sets.
//!
//! [`MountOptions`] is a value type: every mutator returns a new set and
//! leaves the receiver untouched. Options are kept sorted by name so the
//! canonical string form is stable and can be used in mount-point names and
//! table keys.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::naming::KEY_SEPARATOR;
use crate::transport::DataTransport;

pub const OPTION_SYNC_ON_CLOSE: &str = "sync_on_close";
pub const OPTION_WRITECACHE: &str = "writecache";
pub const OPTION_COHERENT: &str = "coherent";
pub const OPTION_FORCEDIRECT: &str = "forcedirect";
pub const OPTION_READCACHE: &str = "readcache";
pub const OPTION_ACL: &str = "acl";
pub const OPTION_DENTRY_MAX_AGE_POSITIVE: &str = "dentry_max_age_positive";
pub const OPTION_CONTAINER_NAME: &str = "container_name";

/// Options the NFS client understands natively; they survive translation as-is.
const NFS_NATIVE_OPTIONS: &[&str] = &[
    "hard",
    "soft",
    "sync",
    "async",
    "ac",
    "noac",
    "rdirplus",
    "nordirplus",
    "vers",
    "nfsvers",
    "acdirmin",
    "acdirmax",
    "acregmin",
    "acregmax",
    "actimeo",
    "rsize",
    "wsize",
    "timeo",
    "retrans",
    "proto",
    "port",
    "nconnect",
    "lookupcache",
    "user_xattr",
    "context",
];

const NFS_DEFAULT_OPTIONS: &str = "hard,async,rdirplus";

/// A single `name` or `name=value` option.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MountOption {
    name: String,
    value: Option<String>,
}

impl MountOption {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Parse `name` or `name=value`. Whitespace around the option is trimmed;
    /// the table-key separator and control characters are stripped.
    pub fn parse(raw: &str) -> Self {
        let cleaned: String = raw
            .trim()
            .chars()
            .filter(|c| *c != KEY_SEPARATOR && !c.is_control())
            .collect();
        match cleaned.split_once('=') {
            Some((name, value)) => Self::new(name.trim(), Some(value.trim().to_string())),
            None => Self::new(cleaned, None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

impl fmt::Display for MountOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={v}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A set of option names of which at most one may be active.
///
/// Merging an option from the set removes all of its alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExclusiveGroup(Vec<String>);

impl ExclusiveGroup {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    /// Every member except `name`.
    pub fn alternatives<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0.iter().map(String::as_str).filter(move |n| *n != name)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }
}

impl FromStr for ExclusiveGroup {
    type Err = Infallible;

    /// Parse a comma-separated list such as `writecache,coherent,readcache`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(
            s.split(',').map(str::trim).filter(|n| !n.is_empty()),
        ))
    }
}

/// Default exclusive groups for generic options.
pub fn default_exclusive_groups() -> Vec<ExclusiveGroup> {
    vec![ExclusiveGroup::new([
        OPTION_WRITECACHE,
        OPTION_COHERENT,
        OPTION_READCACHE,
    ])]
}

/// Exclusive groups enforced on the NFS side of translation.
fn nfs_exclusive_groups() -> Vec<ExclusiveGroup> {
    vec![
        ExclusiveGroup::new(["sync", "async"]),
        ExclusiveGroup::new(["ac", "noac"]),
        ExclusiveGroup::new(["rdirplus", "nordirplus"]),
        ExclusiveGroup::new(["hard", "soft"]),
    ]
}

/// An ordered set of mount options keyed by option name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MountOptions {
    options: BTreeMap<String, Option<String>>,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Whether an option with this name is present. Accepts `name=value` and
    /// compares only the name.
    pub fn contains(&self, option: &str) -> bool {
        self.options.contains_key(MountOption::parse(option).name())
    }

    /// The value of a `name=value` option, if present.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.options.get(name).and_then(Option::as_deref)
    }

    pub fn iter(&self) -> impl Iterator<Item = MountOption> + '_ {
        self.options
            .iter()
            .map(|(name, value)| MountOption::new(name.clone(), value.clone()))
    }

    /// Each option rendered as `name` or `name=value`, in canonical order.
    pub fn to_vec(&self) -> Vec<String> {
        self.iter().map(|o| o.to_string()).collect()
    }

    /// Returns a copy with `option` added, replacing any option of the same name.
    #[must_use]
    pub fn add(&self, option: &str) -> Self {
        let mut ret = self.clone();
        ret.insert(MountOption::parse(option));
        ret
    }

    /// Returns a copy without the option named by `option` (value ignored).
    #[must_use]
    pub fn remove(&self, option: &str) -> Self {
        let mut ret = self.clone();
        ret.options.remove(MountOption::parse(option).name());
        ret
    }

    /// Returns `self` overlaid with `other`.
    ///
    /// Options from `other` win on name collision. When an option of `other`
    /// belongs to an exclusive group, its alternatives are dropped from the
    /// result.
    #[must_use]
    pub fn merge(&self, other: &Self, groups: &[ExclusiveGroup]) -> Self {
        let mut ret = self.clone();
        for (name, value) in &other.options {
            ret.options.insert(name.clone(), value.clone());
            for group in groups.iter().filter(|g| g.contains(name)) {
                for alt in group.alternatives(name) {
                    ret.options.remove(alt);
                }
            }
        }
        ret
    }

    /// 32-bit FNV-1a over the canonical string.
    pub fn hash32(&self) -> u32 {
        const OFFSET: u32 = 0x811c9dc5;
        const PRIME: u32 = 0x01000193;
        self.to_string()
            .bytes()
            .fold(OFFSET, |h, b| (h ^ u32::from(b)).wrapping_mul(PRIME))
    }

    /// Canonical string of the options that affect mount identity.
    ///
    /// `sync_on_close` only changes flush behavior on the client and does
    /// not split otherwise identical mounts.
    pub fn as_map_key(&self) -> String {
        self.remove(OPTION_SYNC_ON_CLOSE).to_string()
    }

    /// Add or remove the transport's SELinux context option.
    #[must_use]
    pub fn with_security_context(&self, enabled: bool, transport: DataTransport) -> Self {
        let (name, value) = transport.security_context();
        if enabled {
            let mut ret = self.clone();
            ret.options.insert(name.to_string(), Some(value.to_string()));
            ret
        } else {
            self.remove(name)
        }
    }

    /// Translate generic options into the form the transport expects.
    #[must_use]
    pub fn as_transport_specific(&self, transport: DataTransport) -> Self {
        match transport {
            DataTransport::Wekafs => self.clone(),
            DataTransport::Nfs => self.as_nfs(),
        }
    }

    /// Options are translated one at a time and merged with the NFS exclusive
    /// groups, so a later translation replaces its alternatives.
    /// `sync_on_close` goes first: an explicit cache mode overrides it.
    fn as_nfs(&self) -> Self {
        let groups = nfs_exclusive_groups();
        let (flush, rest): (Vec<_>, Vec<_>) = self
            .options
            .iter()
            .partition(|(name, _)| name.as_str() == OPTION_SYNC_ON_CLOSE);
        let translated = flush
            .into_iter()
            .chain(rest)
            .fold(Self::new(), |acc, (name, value)| {
                acc.merge(&Self::nfs_equivalent(name, value.as_ref()), &groups)
            });
        NFS_DEFAULT_OPTIONS
            .parse::<Self>()
            .unwrap_or_default()
            .merge(&translated, &groups)
    }

    fn nfs_equivalent(name: &str, value: Option<&String>) -> Self {
        let mut out = Self::new();
        match name {
            OPTION_WRITECACHE => out.insert_flag("async"),
            OPTION_COHERENT | OPTION_FORCEDIRECT | OPTION_SYNC_ON_CLOSE => out.insert_flag("sync"),
            OPTION_READCACHE => out.insert_flag("noac"),
            OPTION_ACL => {
                out.insert_flag("user_xattr");
                out.insert_flag("acl");
            }
            OPTION_DENTRY_MAX_AGE_POSITIVE => {
                if let Some(age) = value {
                    out.options.insert("acdirmax".into(), Some(age.clone()));
                    out.options.insert("acregmax".into(), Some(age.clone()));
                }
            }
            native if NFS_NATIVE_OPTIONS.contains(&native) => {
                out.options.insert(name.to_string(), value.cloned());
            }
            _ => {}
        }
        out
    }

    fn insert(&mut self, option: MountOption) {
        if !option.name.is_empty() {
            self.options.insert(option.name, option.value);
        }
    }

    fn insert_flag(&mut self, name: &str) {
        self.options.insert(name.to_string(), None);
    }
}

impl FromStr for MountOptions {
    type Err = Infallible;

    /// Parse a comma-separated option string. Empty entries are skipped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.split(',').map(MountOption::parse).collect())
    }
}

impl FromIterator<MountOption> for MountOptions {
    fn from_iter<I: IntoIterator<Item = MountOption>>(iter: I) -> Self {
        let mut ret = Self::new();
        for option in iter {
            ret.insert(option);
        }
        ret
    }
}

impl<'a> FromIterator<&'a str> for MountOptions {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter().map(MountOption::parse).collect()
    }
}

impl fmt::Display for MountOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for option in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{option}")?;
        }
        Ok(())
    }
}

impl Serialize for MountOptions {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MountOptions {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(s: &str) -> MountOptions {
        s.parse().unwrap()
    }

    #[test]
    fn test_add_and_remove() {
        let base = MountOptions::new();
        let with_ro = base.add("ro");
        assert!(with_ro.contains("ro"));
        assert!(base.is_empty(), "add must not mutate the receiver");

        let without = with_ro.remove("ro");
        assert!(!without.contains("ro"));
        assert!(with_ro.contains("ro"));
    }

    #[test]
    fn test_add_replaces_value() {
        let o = opts("dentry_max_age_positive=5").add("dentry_max_age_positive=10");
        assert_eq!(o.value(OPTION_DENTRY_MAX_AGE_POSITIVE), Some("10"));
        assert_eq!(o.len(), 1);
    }

    #[test]
    fn test_merge_drops_exclusive_alternatives() {
        let groups = vec![ExclusiveGroup::new(["ro", "rw"])];
        let merged = opts("ro").merge(&opts("rw"), &groups).add("acl");
        assert!(!merged.contains("ro"));
        assert!(merged.contains("rw"));
        assert!(merged.contains("acl"));
    }

    #[test]
    fn test_merge_default_groups() {
        let merged = opts("writecache,acl").merge(&opts("readcache"), &default_exclusive_groups());
        assert_eq!(merged.to_string(), "acl,readcache");
    }

    #[test]
    fn test_display_is_sorted() {
        assert_eq!(opts("sync_on_close,ro").to_string(), "ro,sync_on_close");
        assert_eq!(opts(" b , a=1 ,,").to_string(), "a=1,b");
    }

    #[test]
    fn test_hash_is_nonzero_and_stable() {
        let a = opts("ro,sync_on_close");
        assert_ne!(a.hash32(), 0);
        assert_eq!(a.hash32(), opts("sync_on_close,ro").hash32());
        assert_ne!(a.hash32(), opts("rw").hash32());
    }

    #[test]
    fn test_map_key_ignores_sync_on_close() {
        assert_eq!(opts("ro,sync_on_close").as_map_key(), "ro");
        assert_eq!(opts("ro").as_map_key(), opts("sync_on_close,ro").as_map_key());
    }

    #[test]
    fn test_security_context_native() {
        let o = MountOptions::new().with_security_context(true, DataTransport::Wekafs);
        assert!(o.contains("fscontext"));
        assert_eq!(
            o.value("fscontext"),
            Some("\"system_u:object_r:wekafs_csi_volume_t:s0\"")
        );
        let o = o.with_security_context(false, DataTransport::Wekafs);
        assert!(!o.contains("fscontext"));
    }

    #[test]
    fn test_security_context_nfs_survives_translation() {
        let o = MountOptions::new()
            .with_security_context(true, DataTransport::Nfs)
            .as_transport_specific(DataTransport::Nfs);
        assert_eq!(o.value("context"), Some("\"system_u:object_r:nfs_t:s0\""));
    }

    #[test]
    fn test_nfs_translation() {
        let nfs = opts("ro,sync_on_close").as_transport_specific(DataTransport::Nfs);
        assert!(!nfs.contains("ro"));
        assert!(!nfs.contains(OPTION_SYNC_ON_CLOSE));
        assert!(nfs.contains("sync"));

        let nfs = opts("coherent,sync_on_close").as_transport_specific(DataTransport::Nfs);
        assert!(!nfs.contains(OPTION_COHERENT));
        assert!(nfs.contains("sync"));
        assert!(!nfs.contains("async"));

        let nfs = opts("forcedirect").as_transport_specific(DataTransport::Nfs);
        assert!(!nfs.contains(OPTION_FORCEDIRECT));
        assert!(nfs.contains("sync"));

        let nfs = opts("readcache").as_transport_specific(DataTransport::Nfs);
        assert!(nfs.contains("noac"));
        assert!(!nfs.contains(OPTION_READCACHE));

        let nfs = opts("writecache").as_transport_specific(DataTransport::Nfs);
        assert!(nfs.contains("async"));
        assert!(!nfs.contains(OPTION_WRITECACHE));

        let nfs = opts("dentry_max_age_positive=10").as_transport_specific(DataTransport::Nfs);
        assert!(!nfs.contains(OPTION_DENTRY_MAX_AGE_POSITIVE));
        assert_eq!(nfs.value("acdirmax"), Some("10"));
        assert_eq!(nfs.value("acregmax"), Some("10"));

        let nfs = opts("acl").as_transport_specific(DataTransport::Nfs);
        assert!(nfs.contains("acl"));
        assert!(nfs.contains("user_xattr"));
    }

    #[test]
    fn test_nfs_cache_mode_overrides_sync_on_close() {
        let nfs = opts("readcache,writecache,sync_on_close").as_transport_specific(DataTransport::Nfs);
        assert!(nfs.contains("async"));
        assert!(!nfs.contains("sync"));
        assert!(!nfs.contains(OPTION_WRITECACHE));
        assert!(!nfs.contains(OPTION_READCACHE));
        assert!(nfs.contains("noac"));

        let nfs = opts("writecache,sync_on_close").as_transport_specific(DataTransport::Nfs);
        assert!(nfs.contains("async"));
        assert!(!nfs.contains("sync"));

        let nfs = opts("forcedirect,sync_on_close").as_transport_specific(DataTransport::Nfs);
        assert!(nfs.contains("sync"));
        assert!(!nfs.contains("async"));

        let nfs = opts("dentry_max_age_positive=10,sync_on_close").as_transport_specific(DataTransport::Nfs);
        assert!(!nfs.contains(OPTION_DENTRY_MAX_AGE_POSITIVE));
        assert_eq!(nfs.value("acdirmax"), Some("10"));
        assert_eq!(nfs.value("acregmax"), Some("10"));
        assert!(nfs.contains("sync"));

        let nfs = MountOptions::new().as_transport_specific(DataTransport::Nfs);
        assert!(nfs.contains("async"));
    }

    #[test]
    fn test_nfs_defaults() {
        let nfs = MountOptions::new().as_transport_specific(DataTransport::Nfs);
        assert_eq!(nfs.to_string(), "async,hard,rdirplus");
    }

    #[test]
    fn test_nfs_native_options_override_defaults() {
        let nfs = opts("soft,nordirplus,vers=4.1").as_transport_specific(DataTransport::Nfs);
        assert_eq!(nfs.to_string(), "async,nordirplus,soft,vers=4.1");
    }

    #[test]
    fn test_native_translation_is_identity() {
        let o = opts("readcache,acl,container_name=c1");
        assert_eq!(o.as_transport_specific(DataTransport::Wekafs), o);
    }

    #[test]
    fn test_parse_strips_key_separator() {
        let o = opts("a^b=c^d");
        assert_eq!(o.to_string(), "ab=cd");
    }
}
