//! In-memory fakes for exercising the mount manager without touching the host.
//!
//! - [`FakeNode`]: a [`MountExecutor`](crate::MountExecutor) and
//!   [`NodeInspector`](crate::NodeInspector) sharing one simulated mount table
//! - [`FakeRemote`]: a [`RemoteClient`](crate::RemoteClient) with call counters
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use wekafs_mount::testing::{FakeNode, FakeRemote};
//! use wekafs_mount::{DataTransport, MountContext, Mounter, MounterConfig};
//!
//! let node = Arc::new(FakeNode::new());
//! let mounter = Mounter::new(DataTransport::Wekafs, MounterConfig::default(), node.clone(), node.clone());
//! let lease = mounter.mount(&MountContext::new(), "fs1", Some(&FakeRemote::new())).await?;
//! assert!(node.is_mounted(lease.path()));
//! ```

mod node;
mod remote;

pub use node::FakeNode;
pub use remote::{FAKE_TOKEN, FakeRemote};
