//! Remote storage-cluster client seam.

use std::net::IpAddr;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::context::MountContext;
use crate::error::RemoteError;

/// Operations the mount manager needs from the cluster API.
///
/// Implementations are expected to cache where it makes sense; the mount
/// manager calls these on every first mount of a key.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Short-lived token authorizing a native mount of `filesystem`.
    async fn mount_token(
        &self,
        ctx: &MountContext,
        filesystem: &str,
    ) -> Result<SecretString, RemoteError>;

    /// Address of a protocol gateway serving NFS to this host.
    async fn resolve_remote_ip(&self, ctx: &MountContext) -> Result<IpAddr, RemoteError>;

    /// Make sure `filesystem` is exported to `client_group` with permissions
    /// covering this host.
    async fn ensure_export_permissions(
        &self,
        ctx: &MountContext,
        filesystem: &str,
        client_group: &str,
    ) -> Result<(), RemoteError>;

    /// Name of the local client container attached to this cluster.
    async fn ensure_local_container_identity(
        &self,
        ctx: &MountContext,
        allow_protocol_containers: bool,
    ) -> Result<String, RemoteError>;

    /// Whether the client is logged into the cluster's root organization.
    fn is_root_organization(&self) -> bool;
}
