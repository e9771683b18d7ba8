//! NFS mounts through the cluster protocol gateway.

use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use wekafs_mount::testing::{FakeNode, FakeRemote};
use wekafs_mount::{
    DataTransport, MountContext, MountError, MountOptions, Mounter, MounterConfig,
};

fn nfs_mounter(retry_delay: Duration) -> (TempDir, Arc<FakeNode>, Mounter) {
    let dir = TempDir::new().unwrap();
    let config = MounterConfig {
        base_path: dir.path().to_path_buf(),
        nfs_mount_retry_delay: retry_delay,
        ..MounterConfig::default()
    };
    let node = Arc::new(FakeNode::new());
    let mounter = Mounter::new(DataTransport::Nfs, config, node.clone(), node.clone());
    (dir, node, mounter)
}

#[tokio::test]
async fn test_mount_uses_gateway_source_and_nfs_options() {
    let (_dir, node, mounter) = nfs_mounter(Duration::from_millis(10));
    let remote = FakeRemote::new();
    let lease = mounter
        .mount_with_options(&MountContext::new(), "fs1", &"ro,readcache".parse().unwrap(), Some(&remote))
        .await
        .unwrap();

    assert_eq!(lease.transport(), DataTransport::Nfs);
    assert!(lease.path().starts_with(mounter.config().base_path.join("nfs")));
    assert_eq!(node.mount_source(lease.path()).as_deref(), Some("10.0.0.1:/fs1"));
    assert_eq!(
        node.mount_options(lease.path()).as_deref(),
        Some("async,hard,noac,rdirplus,vers=4.1")
    );
    assert!(node.last_sensitive_options().is_empty());
    assert_eq!(remote.permission_calls(), 1);
    assert_eq!(remote.token_calls(), 0);

    lease.release().await.unwrap();
    assert_eq!(node.mounted_count(), 0);
}

#[tokio::test]
async fn test_ipv6_gateway_is_bracketed() {
    let (_dir, node, mounter) = nfs_mounter(Duration::from_millis(10));
    let remote = FakeRemote::new().with_ip(IpAddr::V6(Ipv6Addr::LOCALHOST));
    let lease = mounter
        .mount(&MountContext::new(), "fs1", Some(&remote))
        .await
        .unwrap();
    assert_eq!(node.mount_source(lease.path()).as_deref(), Some("[::1]:/fs1"));
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_gateway_address_resolved_once_per_entry() {
    let (_dir, _node, mounter) = nfs_mounter(Duration::from_millis(10));
    let remote = FakeRemote::new();
    let ctx = MountContext::new();

    let first = mounter.mount(&ctx, "fs1", Some(&remote)).await.unwrap();
    first.release().await.unwrap();
    let second = mounter.mount(&ctx, "fs1", Some(&remote)).await.unwrap();

    assert_eq!(remote.ip_calls(), 1);
    assert_eq!(remote.permission_calls(), 2);
    second.release().await.unwrap();
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let (_dir, node, mounter) = nfs_mounter(Duration::from_millis(10));
    let remote = FakeRemote::new();
    node.fail_next_mounts(2);

    let lease = mounter
        .mount(&MountContext::new(), "fs1", Some(&remote))
        .await
        .unwrap();
    assert_eq!(node.mount_calls(), 3);
    assert!(node.is_mounted(lease.path()));
    assert_eq!(mounter.ref_count("fs1", &MountOptions::new()), Some(1));
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_gives_up_after_configured_attempts() {
    let (_dir, node, mounter) = nfs_mounter(Duration::from_millis(10));
    let remote = FakeRemote::new();
    node.fail_next_mounts(5);

    let err = mounter
        .mount(&MountContext::new(), "fs1", Some(&remote))
        .await
        .unwrap_err();
    assert!(matches!(err, MountError::Executor(_)), "{err}");
    assert_eq!(node.mount_calls(), 3);
    assert_eq!(mounter.ref_count("fs1", &MountOptions::new()), Some(0));
    assert_eq!(mounter.active_mount_count(), 0);
}

#[tokio::test]
async fn test_retry_wait_honors_deadline() {
    let (_dir, node, mounter) = nfs_mounter(Duration::from_secs(30));
    let remote = FakeRemote::new();
    node.fail_next_mounts(3);

    let ctx = MountContext::new().with_timeout(Duration::from_millis(100));
    let err = mounter.mount(&ctx, "fs1", Some(&remote)).await.unwrap_err();
    assert!(matches!(err, MountError::DeadlineExceeded), "{err}");
    assert_eq!(node.mount_calls(), 1);
}

#[tokio::test]
async fn test_requires_remote_client() {
    let (_dir, node, mounter) = nfs_mounter(Duration::from_millis(10));
    let err = mounter
        .mount(&MountContext::new(), "fs1", None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, MountError::NoRemoteClient { transport: DataTransport::Nfs, .. }),
        "{err}"
    );
    assert_eq!(node.mount_calls(), 0);
}

#[tokio::test]
async fn test_requires_root_organization() {
    let (_dir, node, mounter) = nfs_mounter(Duration::from_millis(10));
    let remote = FakeRemote::new();
    remote.set_root_organization(false);
    let err = mounter
        .mount(&MountContext::new(), "fs1", Some(&remote))
        .await
        .unwrap_err();
    assert!(matches!(err, MountError::NotRootOrganization), "{err}");
    assert_eq!(remote.ip_calls(), 0);
    assert_eq!(node.mount_calls(), 0);
}

#[tokio::test]
async fn test_selinux_adds_nfs_context() {
    let (_dir, node, mounter) = nfs_mounter(Duration::from_millis(10));
    node.set_selinux(true);
    let remote = FakeRemote::new();
    let lease = mounter
        .mount(&MountContext::new(), "fs1", Some(&remote))
        .await
        .unwrap();
    let options: MountOptions = node.mount_options(lease.path()).unwrap().parse().unwrap();
    assert!(options.contains("context"));
    assert!(!options.contains("fscontext"));
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_gateway_lookup_failure_surfaces_without_mounting() {
    let (_dir, node, mounter) = nfs_mounter(Duration::from_millis(10));
    let remote = FakeRemote::new();
    remote.set_fail_ip(true);

    let err = mounter
        .mount(&MountContext::new(), "fs1", Some(&remote))
        .await
        .unwrap_err();
    assert!(matches!(err, MountError::Remote(_)), "{err}");
    assert_eq!(remote.ip_calls(), 1);
    assert_eq!(remote.permission_calls(), 0);
    assert_eq!(node.mount_calls(), 0);
    assert_eq!(mounter.ref_count("fs1", &MountOptions::new()), Some(0));

    // The lookup is retried on the next request rather than cached as failed.
    remote.set_fail_ip(false);
    let lease = mounter
        .mount(&MountContext::new(), "fs1", Some(&remote))
        .await
        .unwrap();
    assert_eq!(remote.ip_calls(), 2);
    assert_eq!(node.mount_source(lease.path()).as_deref(), Some("10.0.0.1:/fs1"));
    lease.release().await.unwrap();
}

#[tokio::test]
async fn test_export_permission_failure_surfaces_without_mounting() {
    let (_dir, node, mounter) = nfs_mounter(Duration::from_millis(10));
    let remote = FakeRemote::new();
    remote.set_fail_permissions(true);

    let err = mounter
        .mount(&MountContext::new(), "fs1", Some(&remote))
        .await
        .unwrap_err();
    assert!(matches!(err, MountError::Remote(_)), "{err}");
    assert_eq!(remote.permission_calls(), 1);
    assert_eq!(node.mount_calls(), 0);
    assert_eq!(mounter.active_mount_count(), 0);
    assert_eq!(mounter.ref_count("fs1", &MountOptions::new()), Some(0));
}

#[tokio::test]
async fn test_failed_os_mount_keeps_granted_export_permissions() {
    let (_dir, node, mounter) = nfs_mounter(Duration::from_millis(1));
    let remote = FakeRemote::new();
    node.fail_next_mounts(3);

    let err = mounter
        .mount(&MountContext::new(), "fs1", Some(&remote))
        .await
        .unwrap_err();
    assert!(matches!(err, MountError::Executor(_)), "{err}");
    assert_eq!(node.mount_calls(), 3);
    assert_eq!(mounter.ref_count("fs1", &MountOptions::new()), Some(0));
    // The grant is not rolled back; a later attempt simply re-applies it.
    assert_eq!(remote.permission_calls(), 1);

    let lease = mounter
        .mount(&MountContext::new(), "fs1", Some(&remote))
        .await
        .unwrap();
    assert_eq!(remote.permission_calls(), 2);
    assert_eq!(remote.ip_calls(), 1, "gateway IP is cached on the mount");
    lease.release().await.unwrap();
}
