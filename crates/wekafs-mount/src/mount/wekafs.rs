use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing::{debug, error, info, trace};

use super::{MountEnv, MountSpec, bind_debug_source, ensure_mount_point};
use crate::context::MountContext;
use crate::error::{MountError, Result};
use crate::options::OPTION_CONTAINER_NAME;
use crate::remote::RemoteClient;
use crate::transport::DataTransport;

/// A filesystem mounted through the native WekaFS client.
#[derive(Debug)]
pub struct WekafsMount {
    pub(super) spec: MountSpec,
    container: Option<String>,
    pub(super) env: Arc<MountEnv>,
}

impl WekafsMount {
    pub(crate) fn new(spec: MountSpec, container: Option<String>, env: Arc<MountEnv>) -> Self {
        Self {
            spec,
            container,
            env,
        }
    }

    /// Local client container this mount is pinned to, if the host runs several.
    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    pub(super) async fn do_mount(
        &self,
        ctx: &MountContext,
        remote: Option<&dyn RemoteClient>,
    ) -> Result<()> {
        if let Some(debug_root) = &self.env.config.debug_path {
            return bind_debug_source(&self.spec, &self.env, debug_root).await;
        }

        let client_ready = self
            .env
            .inspect(|inspector| {
                inspector.native_client_running() && !inspector.client_containers().is_empty()
            })
            .await
            .unwrap_or(false);
        if !client_ready {
            error!(
                filesystem = %self.spec.filesystem,
                "Weka client is not running on host, cannot mount filesystem"
            );
            return Err(MountError::NativeClientNotRunning);
        }

        let Some(remote) = remote else {
            error!(
                filesystem = %self.spec.filesystem,
                "No API client for mount, cannot obtain mount token"
            );
            return Err(MountError::NoRemoteClient {
                filesystem: self.spec.filesystem.clone(),
                transport: DataTransport::Wekafs,
            });
        };
        trace!(filesystem = %self.spec.filesystem, "Requesting mount token");
        let token = ctx.run(remote.mount_token(ctx, &self.spec.filesystem)).await?;

        let mut options = self.spec.options.clone();
        if let Some(container) = &self.container {
            options = options.add(&format!("{OPTION_CONTAINER_NAME}={container}"));
        }
        let sensitive = vec![format!("token={}", token.expose_secret())];

        ensure_mount_point(&self.spec.mount_point).await?;
        debug!(
            mount_point = %self.spec.mount_point.display(),
            mount_options = %options,
            filesystem = %self.spec.filesystem,
            "Mounting"
        );
        if let Err(e) = self
            .env
            .executor
            .mount(
                &self.spec.filesystem,
                &self.spec.mount_point,
                DataTransport::Wekafs.fs_type(),
                &options.to_vec(),
                &sensitive,
            )
            .await
        {
            error!(
                mount_point = %self.spec.mount_point.display(),
                filesystem = %self.spec.filesystem,
                error = %e,
                "Failed to mount"
            );
            return Err(e.into());
        }
        info!(
            mount_point = %self.spec.mount_point.display(),
            filesystem = %self.spec.filesystem,
            "Successfully mounted"
        );
        Ok(())
    }
}
