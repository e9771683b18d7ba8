//! Reference-counted filesystem mounts for the WekaFS CSI node plugin.
//!
//! Many volumes on one node can be backed by the same remote filesystem.
//! This crate mounts each `(filesystem, options)` pair once, hands callers a
//! lease on it, and unmounts when the last lease is released. Mounts go over
//! the native WekaFS client or over NFS through a cluster protocol gateway.
//!
//! # Components
//!
//! ## Lifecycle
//!
//! - [`MounterGroup`] - One [`Mounter`] per transport, with transport selection
//! - [`Mounter`] - Reference-count table and mount pipeline for one transport
//! - [`MountLease`] - A held reference; releasing the last one unmounts
//! - [`RefCountTable`] - Concurrent key to counted-entry map with per-key locks
//!
//! ## Options and naming
//!
//! - [`MountOptions`] - Ordered option set with merge, exclusive groups and
//!   per-transport translation
//! - [`naming`] - Deterministic mount-point paths and table keys
//!
//! ## Host and cluster seams
//!
//! - [`MountExecutor`] / [`SystemMountExecutor`] - Performs mount and unmount
//! - [`NodeInspector`] / [`HostInspector`] - Native client, SELinux and mount table
//! - [`RemoteClient`] - Tokens, gateway address, export permissions
//! - [`testing`] - In-memory fakes of all three
//!
//! # Why reference counting?
//!
//! Kubernetes publishes and unpublishes volumes independently and in
//! parallel. Two volumes on the same filesystem must share one mount, and
//! unpublishing one must not pull the mount out from under the other. Each
//! key has its own async lock so the mount on first reference and the
//! unmount on last release are serialized per key without blocking
//! unrelated keys.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use wekafs_mount::testing::{FakeNode, FakeRemote};
//! use wekafs_mount::{DataTransport, MountContext, Mounter, MounterConfig};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let dir = tempfile::tempdir().unwrap();
//! let config = MounterConfig {
//!     base_path: dir.path().to_path_buf(),
//!     ..MounterConfig::default()
//! };
//! let node = Arc::new(FakeNode::new());
//! let mounter = Mounter::new(DataTransport::Wekafs, config, node.clone(), node.clone());
//! let remote = FakeRemote::new();
//!
//! let ctx = MountContext::new();
//! let a = mounter.mount(&ctx, "fs1", Some(&remote)).await.unwrap();
//! let b = mounter.mount(&ctx, "fs1", Some(&remote)).await.unwrap();
//! assert_eq!(a.path(), b.path());
//! assert_eq!(node.mount_calls(), 1);
//!
//! a.release().await.unwrap();
//! b.release().await.unwrap();
//! assert_eq!(node.unmount_calls(), 1);
//! # });
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod group;
pub mod mount;
pub mod mounter;
pub mod naming;
pub mod node;
pub mod options;
pub mod refcount;
pub mod remote;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, MounterConfig, MounterGroupConfig};
pub use context::MountContext;
pub use error::{ExecutorError, FailureClass, MountError, RemoteError, Result};
pub use executor::{MountExecutor, SystemMountExecutor};
pub use group::MounterGroup;
pub use mount::{Mount, MountEntry, MountSpec, NfsMount, WekafsMount};
pub use mounter::{MountLease, Mounter};
pub use node::{HostInspector, NodeInspector, SystemMount};
pub use options::{ExclusiveGroup, MountOption, MountOptions};
pub use refcount::{EntryGuard, EntrySnapshot, RefCountTable, RefEntry};
pub use remote::RemoteClient;
pub use transport::{DataTransport, TRANSPORT_PREFERENCE};
