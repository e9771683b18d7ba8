//! Per-transport mount manager.
//!
//! A [`Mounter`] owns the reference-count table for one transport. Callers
//! receive a [`MountLease`] from [`Mounter::mount`]; the filesystem stays
//! mounted until every lease for the same key has been released.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::config::MounterConfig;
use crate::context::MountContext;
use crate::error::{MountError, Result};
use crate::executor::MountExecutor;
use crate::mount::{Acquire, Mount, MountEntry, MountEnv, MountSpec, NfsMount, WekafsMount};
use crate::naming;
use crate::node::{NodeInspector, SystemMount};
use crate::options::{MountOptions, OPTION_CONTAINER_NAME};
use crate::refcount::{EntrySnapshot, RefCountTable};
use crate::remote::RemoteClient;
use crate::transport::DataTransport;

/// Mount manager for a single transport.
pub struct Mounter {
    transport: DataTransport,
    table: RefCountTable<Mount>,
    env: Arc<MountEnv>,
    security_context: OnceLock<bool>,
    enabled: AtomicBool,
    gc_shutdown: CancellationToken,
    gc_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    /// Local client container attached to the remote cluster, once resolved.
    container: parking_lot::Mutex<Option<String>>,
}

impl std::fmt::Debug for Mounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mounter")
            .field("transport", &self.transport)
            .field("enabled", &self.is_enabled())
            .field("entries", &self.table.len())
            .finish_non_exhaustive()
    }
}

impl Mounter {
    pub fn new(
        transport: DataTransport,
        config: MounterConfig,
        executor: Arc<dyn MountExecutor>,
        inspector: Arc<dyn NodeInspector>,
    ) -> Self {
        Self {
            transport,
            table: RefCountTable::new(),
            env: Arc::new(MountEnv {
                executor,
                inspector,
                config,
            }),
            security_context: OnceLock::new(),
            enabled: AtomicBool::new(true),
            gc_shutdown: CancellationToken::new(),
            gc_task: parking_lot::Mutex::new(None),
            container: parking_lot::Mutex::new(None),
        }
    }

    pub fn transport(&self) -> DataTransport {
        self.transport
    }

    pub fn config(&self) -> &MounterConfig {
        &self.env.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn enable(&self) {
        if !self.enabled.swap(true, Ordering::AcqRel) {
            info!(transport = %self.transport, "Mounter enabled");
        }
    }

    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::AcqRel) {
            info!(transport = %self.transport, "Mounter disabled");
        }
    }

    /// Whether to inject the SELinux context option. Probed once per mounter
    /// unless forced by configuration.
    pub fn security_context_supported(&self) -> bool {
        if self.env.config.force_selinux {
            return true;
        }
        *self.security_context.get_or_init(|| {
            let supported = self.env.inspector.selinux_supported();
            debug!(transport = %self.transport, supported, "Detected SELinux support");
            supported
        })
    }

    /// The options actually used for a request: configured exclusive groups
    /// applied over the defaults, security context, then transport translation.
    pub fn effective_options(&self, requested: &MountOptions) -> MountOptions {
        let merged = MountOptions::new().merge(requested, &self.env.config.exclusive_option_groups);
        let options = merged
            .with_security_context(self.security_context_supported(), self.transport)
            .as_transport_specific(self.transport);
        let version = &self.env.config.nfs_protocol_version;
        if self.transport == DataTransport::Nfs
            && !version.is_empty()
            && !options.contains("vers")
            && !options.contains("nfsvers")
        {
            return options.add(&format!("vers={version}"));
        }
        options
    }

    /// Mount `filesystem` with default options.
    pub async fn mount(
        &self,
        ctx: &MountContext,
        filesystem: &str,
        remote: Option<&dyn RemoteClient>,
    ) -> Result<MountLease> {
        self.mount_with_options(ctx, filesystem, &MountOptions::new(), remote)
            .await
    }

    /// Mount `filesystem` with caller options layered over the defaults.
    pub async fn mount_with_options(
        &self,
        ctx: &MountContext,
        filesystem: &str,
        requested: &MountOptions,
        remote: Option<&dyn RemoteClient>,
    ) -> Result<MountLease> {
        let span = info_span!(
            "mount",
            request_id = ctx.request_id(),
            transport = %self.transport,
            filesystem
        );
        self.acquire(ctx, filesystem, requested, remote)
            .instrument(span)
            .await
    }

    async fn acquire(
        &self,
        ctx: &MountContext,
        filesystem: &str,
        requested: &MountOptions,
        remote: Option<&dyn RemoteClient>,
    ) -> Result<MountLease> {
        let options = self.effective_options(requested);
        let container = self.resolve_container(ctx, remote).await?;
        let spec = self.spec_for(filesystem, options, container.as_deref());
        let key = naming::mount_key(&spec.mount_point, &spec.options);

        loop {
            let entry = self
                .table
                .get_or_insert_with(&key, || self.new_mount(spec.clone(), container.clone()));
            match entry.inc_ref(ctx, remote).await {
                Ok(Acquire::Acquired(_)) => return Ok(MountLease::new(entry)),
                Ok(Acquire::Retired) => {
                    trace!(key = %key, "Entry was garbage collected while waiting, retrying");
                }
                Err(e) => {
                    error!(
                        filesystem,
                        mount_point = %spec.mount_point.display(),
                        error = %e,
                        "Failed mounting"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Release a mount by identity, for callers that no longer hold the lease.
    ///
    /// Decrements a tracked mount; unmounts an untracked mount the OS still
    /// has at the computed path; otherwise does nothing.
    pub async fn unmount_with_options(
        &self,
        ctx: &MountContext,
        filesystem: &str,
        requested: &MountOptions,
    ) -> Result<()> {
        let span = info_span!(
            "unmount",
            request_id = ctx.request_id(),
            transport = %self.transport,
            filesystem
        );
        self.release_by_identity(ctx, filesystem, requested)
            .instrument(span)
            .await
    }

    async fn release_by_identity(
        &self,
        ctx: &MountContext,
        filesystem: &str,
        requested: &MountOptions,
    ) -> Result<()> {
        let options = self.effective_options(requested);
        let container = self.locate_container(filesystem, &options).await;
        let spec = self.spec_for(filesystem, options, container.as_deref());
        let key = naming::mount_key(&spec.mount_point, &spec.options);
        loop {
            let entry = self
                .table
                .get_or_insert_with(&key, || self.new_mount(spec.clone(), container.clone()));
            match entry.release_untracked(ctx).await? {
                Acquire::Acquired(_) => return Ok(()),
                Acquire::Retired => continue,
            }
        }
    }

    fn spec_for(&self, filesystem: &str, options: MountOptions, container: Option<&str>) -> MountSpec {
        let base = naming::base_mount_point(&self.env.config.base_path, self.transport, filesystem, &options);
        MountSpec {
            filesystem: filesystem.to_string(),
            mount_point: naming::with_container_suffix(&base, container),
            options,
        }
    }

    fn new_mount(&self, spec: MountSpec, container: Option<String>) -> Mount {
        match self.transport {
            DataTransport::Wekafs => {
                Mount::Wekafs(WekafsMount::new(spec, container, Arc::clone(&self.env)))
            }
            DataTransport::Nfs => Mount::Nfs(NfsMount::new(spec, Arc::clone(&self.env))),
        }
    }

    /// Native mounts on hosts with several client containers are pinned to
    /// the container attached to the remote cluster. The container is asked
    /// for once and kept for the lifetime of the mounter.
    async fn resolve_container(
        &self,
        ctx: &MountContext,
        remote: Option<&dyn RemoteClient>,
    ) -> Result<Option<String>> {
        if self.transport != DataTransport::Wekafs || self.env.config.debug_path.is_some() {
            return Ok(None);
        }
        let Some(remote) = remote else {
            return Ok(None);
        };
        let cached = self.container.lock().clone();
        if cached.is_some() {
            return Ok(cached);
        }
        let containers = self
            .env
            .inspect(|inspector| inspector.client_containers().len())
            .await
            .unwrap_or(0);
        if containers <= 1 {
            return Ok(None);
        }
        let name = ctx
            .run(remote.ensure_local_container_identity(ctx, self.env.config.allow_protocol_containers))
            .await?;
        if name.is_empty() {
            return Ok(None);
        }
        debug!(transport = %self.transport, container = %name, "Resolved local client container");
        *self.container.lock() = Some(name.clone());
        Ok(Some(name))
    }

    /// Recover the container a native mount was pinned to from the mount table.
    async fn locate_container(&self, filesystem: &str, options: &MountOptions) -> Option<String> {
        if self.transport != DataTransport::Wekafs {
            return None;
        }
        let base = naming::base_mount_point(&self.env.config.base_path, self.transport, filesystem, options);
        let prefix = format!("{}-", base.display());
        let mounts = self
            .env
            .inspect(|inspector| inspector.mount_table())
            .await?
            .ok()?;
        mounts
            .into_iter()
            .filter(|m| self.transport.matches_fs_type(&m.fstype))
            .find(|m| m.mountpoint.to_string_lossy().starts_with(&prefix))
            .and_then(|m| {
                m.options
                    .parse::<MountOptions>()
                    .ok()?
                    .value(OPTION_CONTAINER_NAME)
                    .map(str::to_string)
            })
    }

    /// Number of tracked entries, active or idle.
    pub fn mount_count(&self) -> usize {
        self.table.len()
    }

    /// Number of entries with at least one reference.
    pub fn active_mount_count(&self) -> usize {
        self.table.active_count()
    }

    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        self.table.snapshot()
    }

    /// Reference count for a filesystem mounted with `requested` options, if tracked.
    pub fn ref_count(&self, filesystem: &str, requested: &MountOptions) -> Option<i64> {
        let options = self.effective_options(requested);
        let base = naming::base_mount_point(&self.env.config.base_path, self.transport, filesystem, &options);
        let base = base.to_string_lossy();
        let map_key = options.as_map_key();
        self.table
            .entries()
            .into_iter()
            .find(|e| {
                let mount = e.value();
                mount.mount_point().to_string_lossy().starts_with(base.as_ref())
                    && mount.options().as_map_key() == map_key
            })
            .map(|e| e.count())
    }

    pub fn log_active_mounts(&self) {
        let snapshot = self.table.snapshot();
        let active = snapshot.iter().filter(|e| e.count > 0).count();
        for entry in snapshot.iter().filter(|e| e.count > 0) {
            trace!(
                transport = %self.transport,
                key = %entry.key,
                refcount = entry.count,
                last_used = ?entry.last_used.elapsed(),
                "Active mount"
            );
        }
        debug!(
            transport = %self.transport,
            total = snapshot.len(),
            active,
            "Periodic checkup on mount map"
        );
    }

    /// Drop idle entries from the table. Performs no OS I/O.
    pub fn gc_inactive_mounts(&self) -> usize {
        let removed = self.table.prune_idle();
        for key in &removed {
            trace!(transport = %self.transport, key = %key, "Removing inactive mount from map");
        }
        if !removed.is_empty() {
            debug!(transport = %self.transport, removed = removed.len(), "Garbage collected inactive mounts");
        }
        removed.len()
    }

    /// Run [`Self::gc_inactive_mounts`] every configured interval until
    /// [`Self::stop_gc`]. Calling it again while running has no effect.
    pub fn schedule_periodic_gc(self: &Arc<Self>) {
        let mut slot = self.gc_task.lock();
        if slot.is_some() {
            debug!(transport = %self.transport, "Periodic GC already scheduled");
            return;
        }
        let mounter = Arc::clone(self);
        *slot = Some(tokio::spawn(async move { mounter.run_gc().await }));
    }

    async fn run_gc(&self) {
        let period = self.env.config.gc_interval.max(std::time::Duration::from_millis(1));
        info!(transport = %self.transport, interval = ?period, "Starting periodic mount GC");
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.log_active_mounts();
                    self.gc_inactive_mounts();
                }
                () = self.gc_shutdown.cancelled() => {
                    info!(transport = %self.transport, "Shutdown signal received, stopping mount GC");
                    break;
                }
            }
        }
    }

    /// Stop the periodic GC task and wait for it to exit.
    pub async fn stop_gc(&self) {
        self.gc_shutdown.cancel();
        let handle = self.gc_task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(transport = %self.transport, error = %e, "Mount GC task ended abnormally");
            }
        }
    }

    /// Mounts of this transport under its base directory that no table entry tracks.
    pub fn find_orphaned_mounts(&self) -> Vec<SystemMount> {
        let dir = naming::transport_dir(&self.env.config.base_path, self.transport);
        let tracked: Vec<PathBuf> = self
            .table
            .entries()
            .iter()
            .filter(|e| e.count() > 0)
            .map(|e| e.value().mount_point().to_path_buf())
            .collect();
        match self.env.inspector.mount_table() {
            Ok(mounts) => mounts
                .into_iter()
                .filter(|m| m.mountpoint.starts_with(&dir))
                .filter(|m| self.transport.matches_fs_type(&m.fstype))
                .filter(|m| !tracked.contains(&m.mountpoint))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Failed to read mount table while scanning for orphans");
                Vec::new()
            }
        }
    }
}

/// A held reference to a mounted filesystem.
///
/// Release explicitly with [`MountLease::release`]. A lease dropped without
/// release schedules the release on the current tokio runtime.
#[derive(Debug)]
pub struct MountLease {
    entry: Arc<MountEntry>,
    released: AtomicBool,
}

impl MountLease {
    fn new(entry: Arc<MountEntry>) -> Self {
        Self {
            entry,
            released: AtomicBool::new(false),
        }
    }

    /// Where the filesystem is mounted.
    pub fn path(&self) -> &Path {
        self.entry.value().mount_point()
    }

    pub fn filesystem(&self) -> &str {
        self.entry.value().filesystem()
    }

    pub fn transport(&self) -> DataTransport {
        self.entry.value().transport()
    }

    pub fn options(&self) -> &MountOptions {
        self.entry.value().options()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Give up this reference. Only the first call has an effect; if the
    /// final unmount fails the lease stays unreleased so the call can be retried.
    pub async fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.entry.dec_ref(&MountContext::new()).await {
            Ok(_) => Ok(()),
            Err(e @ MountError::RefCountUnderflow { .. }) => Err(e),
            Err(e) => {
                self.released.store(false, Ordering::Release);
                Err(e)
            }
        }
    }
}

impl Drop for MountLease {
    fn drop(&mut self) {
        if self.is_released() {
            return;
        }
        let entry = Arc::clone(&self.entry);
        warn!(
            mount_point = %entry.value().mount_point().display(),
            "Mount lease dropped without release, releasing in background"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = entry.dec_ref(&MountContext::new()).await {
                        error!(
                            mount_point = %entry.value().mount_point().display(),
                            error = %e,
                            "Background release failed"
                        );
                    }
                });
            }
            Err(_) => error!(
                mount_point = %entry.value().mount_point().display(),
                "No runtime available, mount reference leaked"
            ),
        }
    }
}
