//! Serve command - run the node mount manager until signalled.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};
use wekafs_mount::{HostInspector, MounterGroup, MounterGroupConfig, SystemMountExecutor};

#[instrument(level = "info", name = "cmd::serve", skip_all)]
pub async fn execute(config: MounterGroupConfig) -> Result<()> {
    info!(
        base_path = %config.mounter.base_path.display(),
        use_nfs = config.use_nfs,
        allow_nfs_failback = config.allow_nfs_failback,
        gc_interval = %humantime::format_duration(config.mounter.gc_interval),
        debug_path = ?config.mounter.debug_path,
        "Starting WekaFS node mount manager"
    );

    let group = MounterGroup::new(
        &config,
        Arc::new(SystemMountExecutor::new()),
        Arc::new(HostInspector::new()),
    );

    for mounter in group.mounters() {
        for orphan in mounter.find_orphaned_mounts() {
            warn!(
                transport = %mounter.transport(),
                mount_point = %orphan.mountpoint.display(),
                source = %orphan.source,
                "Found mount not tracked by this process, leaving it in place"
            );
        }
    }

    group.schedule_periodic_gc();
    shutdown_signal().await.context("Failed to listen for shutdown signals")?;

    info!("Shutting down");
    group.log_active_mounts();
    group.stop_gc().await;
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Received SIGINT");
        }
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
    Ok(())
}
