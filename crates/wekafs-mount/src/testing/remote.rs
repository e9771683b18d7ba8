use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::context::MountContext;
use crate::error::RemoteError;
use crate::remote::RemoteClient;

/// Token issued by [`FakeRemote`]; tests assert it reaches the executor.
pub const FAKE_TOKEN: &str = "fake-mount-token";

/// Scripted cluster client that counts its calls.
#[derive(Debug)]
pub struct FakeRemote {
    ip: IpAddr,
    container: String,
    root_organization: AtomicBool,
    fail_tokens: AtomicBool,
    fail_ip: AtomicBool,
    fail_permissions: AtomicBool,
    token_delay: parking_lot::Mutex<Duration>,
    token_calls: AtomicUsize,
    ip_calls: AtomicUsize,
    permission_calls: AtomicUsize,
    container_calls: AtomicUsize,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            container: "client1".to_string(),
            root_organization: AtomicBool::new(true),
            fail_tokens: AtomicBool::new(false),
            fail_ip: AtomicBool::new(false),
            fail_permissions: AtomicBool::new(false),
            token_delay: parking_lot::Mutex::new(Duration::ZERO),
            token_calls: AtomicUsize::new(0),
            ip_calls: AtomicUsize::new(0),
            permission_calls: AtomicUsize::new(0),
            container_calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = ip;
        self
    }

    #[must_use]
    pub fn with_container(mut self, name: impl Into<String>) -> Self {
        self.container = name.into();
        self
    }

    pub fn set_root_organization(&self, root: bool) {
        self.root_organization.store(root, Ordering::SeqCst);
    }

    pub fn set_fail_tokens(&self, fail: bool) {
        self.fail_tokens.store(fail, Ordering::SeqCst);
    }

    /// Make NFS interface lookups report an unreachable cluster.
    pub fn set_fail_ip(&self, fail: bool) {
        self.fail_ip.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_permissions(&self, fail: bool) {
        self.fail_permissions.store(fail, Ordering::SeqCst);
    }

    /// Delay token requests, for cancellation and deadline tests.
    pub fn set_token_delay(&self, delay: Duration) {
        *self.token_delay.lock() = delay;
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn ip_calls(&self) -> usize {
        self.ip_calls.load(Ordering::SeqCst)
    }

    pub fn permission_calls(&self) -> usize {
        self.permission_calls.load(Ordering::SeqCst)
    }

    pub fn container_calls(&self) -> usize {
        self.container_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn mount_token(
        &self,
        _ctx: &MountContext,
        filesystem: &str,
    ) -> Result<SecretString, RemoteError> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.token_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_tokens.load(Ordering::SeqCst) {
            return Err(RemoteError::Api {
                status: 403,
                message: format!("not allowed to mount {filesystem}"),
            });
        }
        Ok(SecretString::from(FAKE_TOKEN.to_string()))
    }

    async fn resolve_remote_ip(&self, _ctx: &MountContext) -> Result<IpAddr, RemoteError> {
        self.ip_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_ip.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("no NFS interface group".into()));
        }
        Ok(self.ip)
    }

    async fn ensure_export_permissions(
        &self,
        _ctx: &MountContext,
        filesystem: &str,
        client_group: &str,
    ) -> Result<(), RemoteError> {
        self.permission_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_permissions.load(Ordering::SeqCst) {
            return Err(RemoteError::Api {
                status: 500,
                message: format!("failed to grant {client_group} access to {filesystem}"),
            });
        }
        Ok(())
    }

    async fn ensure_local_container_identity(
        &self,
        _ctx: &MountContext,
        _allow_protocol_containers: bool,
    ) -> Result<String, RemoteError> {
        self.container_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.container.clone())
    }

    fn is_root_organization(&self) -> bool {
        self.root_organization.load(Ordering::SeqCst)
    }
}
