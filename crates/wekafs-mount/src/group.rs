//! One mounter per transport, and transport selection.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::MounterGroupConfig;
use crate::error::{MountError, Result};
use crate::executor::MountExecutor;
use crate::mounter::Mounter;
use crate::node::NodeInspector;
use crate::transport::{DataTransport, TRANSPORT_PREFERENCE};

/// The node's mounters, constructed once at daemon start and passed down.
#[derive(Debug, Clone)]
pub struct MounterGroup {
    wekafs: Arc<Mounter>,
    nfs: Arc<Mounter>,
}

impl MounterGroup {
    /// Build both mounters and enable them according to `config`:
    ///
    /// - `use_nfs`: NFS only.
    /// - `allow_nfs_failback`: NFS enabled; native disabled when its client
    ///   is not running on this host.
    /// - otherwise: native only.
    pub fn new(
        config: &MounterGroupConfig,
        executor: Arc<dyn MountExecutor>,
        inspector: Arc<dyn NodeInspector>,
    ) -> Self {
        info!("Configuring mounter group");
        let mounter = |transport| {
            Arc::new(Mounter::new(
                transport,
                config.mounter.clone(),
                Arc::clone(&executor),
                Arc::clone(&inspector),
            ))
        };
        let group = Self {
            wekafs: mounter(DataTransport::Wekafs),
            nfs: mounter(DataTransport::Nfs),
        };
        group.nfs.disable();

        if config.use_nfs {
            warn!("Enforcing NFS transport due to configuration");
            group.nfs.enable();
            group.wekafs.disable();
        } else if config.allow_nfs_failback {
            group.nfs.enable();
            if inspector.native_client_running() {
                info!("Weka client is running, preferring native transport");
            } else {
                warn!("Weka client not found, failing back to NFS transport");
                group.wekafs.disable();
            }
        } else {
            info!("Enforcing WekaFS transport");
        }
        group
    }

    pub fn mounter_by_transport(&self, transport: DataTransport) -> &Arc<Mounter> {
        match transport {
            DataTransport::Wekafs => &self.wekafs,
            DataTransport::Nfs => &self.nfs,
        }
    }

    /// The first enabled mounter in preference order.
    pub fn preferred_mounter(&self) -> Result<&Arc<Mounter>> {
        TRANSPORT_PREFERENCE
            .iter()
            .map(|t| self.mounter_by_transport(*t))
            .find(|m| m.is_enabled())
            .ok_or_else(|| {
                error!("No enabled mounter found");
                MountError::NoMounterEnabled
            })
    }

    pub fn mounters(&self) -> impl Iterator<Item = &Arc<Mounter>> {
        TRANSPORT_PREFERENCE.iter().map(|t| self.mounter_by_transport(*t))
    }

    /// Start periodic GC on every mounter.
    pub fn schedule_periodic_gc(&self) {
        for mounter in self.mounters() {
            mounter.schedule_periodic_gc();
        }
    }

    /// Stop periodic GC on every mounter and wait for the tasks to exit.
    pub async fn stop_gc(&self) {
        for mounter in self.mounters() {
            mounter.stop_gc().await;
        }
    }

    pub fn log_active_mounts(&self) {
        for mounter in self.mounters() {
            mounter.log_active_mounts();
        }
    }
}
