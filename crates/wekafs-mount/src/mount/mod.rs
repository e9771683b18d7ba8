//! Transport mount instances and their reference-counted lifecycle.
//!
//! A [`Mount`] describes one filesystem mounted with one option set at one
//! mount point. It lives inside a [`RefEntry`] of its mounter's table; the
//! entry's lock serializes the `UNMOUNTED -> MOUNTED -> UNMOUNTED`
//! transitions driven by [`RefEntry::inc_ref`] and [`RefEntry::dec_ref`].

mod nfs;
mod wekafs;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

pub use nfs::NfsMount;
pub use wekafs::WekafsMount;

use crate::config::MounterConfig;
use crate::context::MountContext;
use crate::error::{MountError, Result};
use crate::executor::MountExecutor;
use crate::node::NodeInspector;
use crate::options::MountOptions;
use crate::refcount::{EntryGuard, RefEntry};
use crate::remote::RemoteClient;
use crate::transport::DataTransport;

/// Host collaborators and settings shared by every mount of a mounter.
pub(crate) struct MountEnv {
    pub(crate) executor: Arc<dyn MountExecutor>,
    pub(crate) inspector: Arc<dyn NodeInspector>,
    pub(crate) config: MounterConfig,
}

impl MountEnv {
    /// Run a node inspector query on the blocking pool. Host inspectors read
    /// procfs and sysfs synchronously.
    pub(crate) async fn inspect<T, F>(&self, query: F) -> Option<T>
    where
        F: FnOnce(&dyn NodeInspector) -> T + Send + 'static,
        T: Send + 'static,
    {
        let inspector = Arc::clone(&self.inspector);
        match tokio::task::spawn_blocking(move || query(inspector.as_ref())).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "Node inspection task failed");
                None
            }
        }
    }
}

impl fmt::Debug for MountEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountEnv")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// What is mounted where, independent of transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub filesystem: String,
    pub mount_point: PathBuf,
    pub options: MountOptions,
}

/// A mount instance for one transport.
#[derive(Debug)]
pub enum Mount {
    Wekafs(WekafsMount),
    Nfs(NfsMount),
}

pub type MountEntry = RefEntry<Mount>;

impl Mount {
    pub fn transport(&self) -> DataTransport {
        match self {
            Self::Wekafs(_) => DataTransport::Wekafs,
            Self::Nfs(_) => DataTransport::Nfs,
        }
    }

    pub fn spec(&self) -> &MountSpec {
        match self {
            Self::Wekafs(m) => &m.spec,
            Self::Nfs(m) => &m.spec,
        }
    }

    pub fn filesystem(&self) -> &str {
        &self.spec().filesystem
    }

    pub fn mount_point(&self) -> &Path {
        &self.spec().mount_point
    }

    pub fn options(&self) -> &MountOptions {
        &self.spec().options
    }

    fn env(&self) -> &MountEnv {
        match self {
            Self::Wekafs(m) => &m.env,
            Self::Nfs(m) => &m.env,
        }
    }

    async fn do_mount(&self, ctx: &MountContext, remote: Option<&dyn RemoteClient>) -> Result<()> {
        match self {
            Self::Wekafs(m) => m.do_mount(ctx, remote).await,
            Self::Nfs(m) => m.do_mount(ctx, remote).await,
        }
    }

    /// Unmount and remove the mount-point directory.
    ///
    /// A failed unmount leaves the directory in place. A failed directory
    /// removal after a successful unmount is only logged.
    async fn do_unmount(&self) -> Result<()> {
        let mount_point = self.mount_point();
        debug!(
            mount_point = %mount_point.display(),
            filesystem = self.filesystem(),
            transport = %self.transport(),
            "Unmounting"
        );
        if let Err(e) = self.env().executor.unmount(mount_point).await {
            error!(mount_point = %mount_point.display(), error = %e, "Failed to unmount");
            return Err(e.into());
        }
        match tokio::fs::remove_dir(mount_point).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(mount_point = %mount_point.display(), error = %e, "Failed to remove mount point directory");
            }
        }
        Ok(())
    }

    /// Whether the OS currently has this mount in place.
    pub async fn is_mounted(&self) -> bool {
        let mount_point = self.mount_point();
        if !tokio::fs::try_exists(mount_point).await.unwrap_or(false) {
            return false;
        }
        let env = self.env();
        if env.config.debug_path.is_some() {
            return matches!(env.executor.is_not_a_mount_point(mount_point).await, Ok(false));
        }
        let path = mount_point.to_path_buf();
        env.inspect(move |inspector| inspector.mount_fstype(&path))
            .await
            .flatten()
            .is_some_and(|fs_type| self.transport().matches_fs_type(&fs_type))
    }
}

/// Create the mount-point directory (and parents) if missing.
pub(super) async fn ensure_mount_point(mount_point: &Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true).mode(0o750);
    builder
        .create(mount_point)
        .await
        .map_err(|source| MountError::MountPoint {
            op: "create",
            path: mount_point.to_path_buf(),
            source,
        })
}

/// Dev mode: bind mount `<debug_root>/<filesystem>` instead of the real thing.
pub(super) async fn bind_debug_source(spec: &MountSpec, env: &MountEnv, debug_root: &Path) -> Result<()> {
    let source = debug_root.join(&spec.filesystem);
    tokio::fs::create_dir_all(&source)
        .await
        .map_err(|err| MountError::MountPoint {
            op: "create",
            path: source.clone(),
            source: err,
        })?;
    ensure_mount_point(&spec.mount_point).await?;
    debug!(
        source = %source.display(),
        mount_point = %spec.mount_point.display(),
        "Debug mode, bind mounting local directory"
    );
    env.executor
        .mount(
            &source.display().to_string(),
            &spec.mount_point,
            "",
            &["bind".to_string()],
            &[],
        )
        .await?;
    Ok(())
}

/// Outcome of taking a reference on an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Acquire {
    /// Reference taken; carries the new count.
    Acquired(i64),
    /// The entry was garbage collected; look the key up again.
    Retired,
}

impl RefEntry<Mount> {
    /// Take a reference, mounting on the first one or when the OS lost the mount.
    ///
    /// A first reference to a path the OS already has mounted (left by a
    /// previous process) adopts that mount instead of stacking another.
    pub(crate) async fn inc_ref(
        &self,
        ctx: &MountContext,
        remote: Option<&dyn RemoteClient>,
    ) -> Result<Acquire> {
        let mut guard = self.lock().await;
        if guard.is_retired() {
            return Ok(Acquire::Retired);
        }
        let mount = self.value();
        let count = guard.count();
        match (count, mount.is_mounted().await) {
            (0, true) => {
                info!(
                    mount_point = %mount.mount_point().display(),
                    filesystem = mount.filesystem(),
                    "Found existing mount not tracked by any reference, adopting it"
                );
            }
            (0, false) => mount.do_mount(ctx, remote).await?,
            (_, true) => {}
            (_, false) => {
                warn!(
                    mount_point = %mount.mount_point().display(),
                    refcount = count,
                    "Mount does not exist although refcount says it should, remounting"
                );
                mount.do_mount(ctx, remote).await?;
            }
        }
        let count = guard.increment();
        trace!(
            refcount = count,
            mount_options = %mount.options(),
            filesystem = mount.filesystem(),
            mount_point = %mount.mount_point().display(),
            "RefCount increased"
        );
        Ok(Acquire::Acquired(count))
    }

    /// Drop a reference, unmounting when it was the last one.
    pub(crate) async fn dec_ref(&self, _ctx: &MountContext) -> Result<i64> {
        let mut guard = self.lock().await;
        self.release_locked(&mut guard).await
    }

    /// Release for a caller that lost its lease.
    ///
    /// With references outstanding this behaves like [`Self::dec_ref`]. With
    /// none, an OS mount left behind (previous process, failed release) is
    /// unmounted directly.
    pub(crate) async fn release_untracked(&self, _ctx: &MountContext) -> Result<Acquire> {
        let mut guard = self.lock().await;
        if guard.is_retired() {
            return Ok(Acquire::Retired);
        }
        if guard.count() > 0 {
            return self.release_locked(&mut guard).await.map(Acquire::Acquired);
        }
        let mount = self.value();
        if mount.is_mounted().await {
            warn!(
                mount_point = %mount.mount_point().display(),
                "Mount is not tracked by any reference, unmounting directly"
            );
            mount.do_unmount().await?;
        } else {
            debug!(mount_point = %mount.mount_point().display(), "Nothing to release");
        }
        Ok(Acquire::Acquired(0))
    }

    /// Decrement under the entry lock. A failed unmount restores the count
    /// so a later release can retry.
    async fn release_locked(&self, guard: &mut EntryGuard<'_, Mount>) -> Result<i64> {
        let mount = self.value();
        let remaining = match guard.decrement() {
            Ok(remaining) => remaining,
            Err(previous) => {
                error!(
                    refcount = previous,
                    mount_point = %mount.mount_point().display(),
                    mount_options = %mount.options(),
                    "Refcount would drop below zero, clamped to 0"
                );
                return Err(MountError::RefCountUnderflow {
                    mount_point: mount.mount_point().to_path_buf(),
                });
            }
        };
        trace!(
            refcount = remaining,
            filesystem = mount.filesystem(),
            mount_point = %mount.mount_point().display(),
            "RefCount decreased"
        );
        if remaining == 0 {
            if let Err(e) = mount.do_unmount().await {
                guard.set(1);
                return Err(e);
            }
        }
        Ok(remaining)
    }
}
