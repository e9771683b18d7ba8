use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{MountEnv, MountSpec, bind_debug_source, ensure_mount_point};
use crate::context::MountContext;
use crate::error::{MountError, Result};
use crate::remote::RemoteClient;
use crate::transport::DataTransport;

/// A filesystem mounted over NFS through a cluster protocol gateway.
#[derive(Debug)]
pub struct NfsMount {
    pub(super) spec: MountSpec,
    remote_ip: parking_lot::Mutex<Option<IpAddr>>,
    pub(super) env: Arc<MountEnv>,
}

impl NfsMount {
    pub(crate) fn new(spec: MountSpec, env: Arc<MountEnv>) -> Self {
        Self {
            spec,
            remote_ip: parking_lot::Mutex::new(None),
            env,
        }
    }

    /// Gateway address used by the last successful resolution.
    pub fn remote_ip(&self) -> Option<IpAddr> {
        *self.remote_ip.lock()
    }

    async fn ensure_remote_ip(&self, ctx: &MountContext, remote: &dyn RemoteClient) -> Result<IpAddr> {
        if let Some(ip) = self.remote_ip() {
            return Ok(ip);
        }
        let ip = ctx.run(remote.resolve_remote_ip(ctx)).await?;
        *self.remote_ip.lock() = Some(ip);
        Ok(ip)
    }

    fn source(&self, ip: IpAddr) -> String {
        match ip {
            IpAddr::V4(v4) => format!("{v4}:/{}", self.spec.filesystem),
            IpAddr::V6(v6) => format!("[{v6}]:/{}", self.spec.filesystem),
        }
    }

    pub(super) async fn do_mount(
        &self,
        ctx: &MountContext,
        remote: Option<&dyn RemoteClient>,
    ) -> Result<()> {
        if let Some(debug_root) = &self.env.config.debug_path {
            return bind_debug_source(&self.spec, &self.env, debug_root).await;
        }
        let remote = remote.ok_or_else(|| MountError::NoRemoteClient {
            filesystem: self.spec.filesystem.clone(),
            transport: DataTransport::Nfs,
        })?;
        if !remote.is_root_organization() {
            error!("Cannot mount NFS with an API client outside the Root organization");
            return Err(MountError::NotRootOrganization);
        }

        let ip = self.ensure_remote_ip(ctx, remote).await?;
        ctx.run(remote.ensure_export_permissions(
            ctx,
            &self.spec.filesystem,
            &self.env.config.nfs_client_group,
        ))
        .await?;

        ensure_mount_point(&self.spec.mount_point).await?;
        let source = self.source(ip);
        let options = self.spec.options.to_vec();
        let attempts = self.env.config.nfs_attempts();
        let mut attempt = 1;
        loop {
            debug!(
                mount_point = %self.spec.mount_point.display(),
                mount_options = %self.spec.options,
                source = %source,
                attempt,
                "Mounting"
            );
            let Err(e) = self
                .env
                .executor
                .mount(&source, &self.spec.mount_point, DataTransport::Nfs.fs_type(), &options, &[])
                .await
            else {
                info!(
                    mount_point = %self.spec.mount_point.display(),
                    filesystem = %self.spec.filesystem,
                    remote_ip = %ip,
                    "Successfully mounted"
                );
                return Ok(());
            };
            warn!(
                mount_point = %self.spec.mount_point.display(),
                attempt,
                attempts,
                error = %e,
                "{}", e.classify().hint()
            );
            if attempt >= attempts {
                error!(
                    mount_point = %self.spec.mount_point.display(),
                    filesystem = %self.spec.filesystem,
                    "Failed to mount after {attempts} attempts"
                );
                return Err(e.into());
            }
            ctx.sleep(self.env.config.nfs_mount_retry_delay).await?;
            attempt += 1;
        }
    }
}
