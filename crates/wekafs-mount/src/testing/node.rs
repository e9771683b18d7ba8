use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecutorError;
use crate::executor::MountExecutor;
use crate::node::{NodeInspector, SystemMount};

/// Simulated host: records mounts instead of performing them.
#[derive(Debug)]
pub struct FakeNode {
    mounts: parking_lot::Mutex<Vec<SystemMount>>,
    mount_calls: AtomicUsize,
    unmount_calls: AtomicUsize,
    failing_mounts: AtomicU32,
    failing_unmounts: AtomicU32,
    mount_delay: parking_lot::Mutex<Duration>,
    native_running: AtomicBool,
    containers: parking_lot::Mutex<Vec<String>>,
    selinux: AtomicBool,
    last_sensitive: parking_lot::Mutex<Vec<String>>,
}

impl Default for FakeNode {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeNode {
    /// A host with a running native client and one client container.
    pub fn new() -> Self {
        Self {
            mounts: parking_lot::Mutex::new(Vec::new()),
            mount_calls: AtomicUsize::new(0),
            unmount_calls: AtomicUsize::new(0),
            failing_mounts: AtomicU32::new(0),
            failing_unmounts: AtomicU32::new(0),
            mount_delay: parking_lot::Mutex::new(Duration::ZERO),
            native_running: AtomicBool::new(true),
            containers: parking_lot::Mutex::new(vec!["default".to_string()]),
            selinux: AtomicBool::new(false),
            last_sensitive: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn mount_calls(&self) -> usize {
        self.mount_calls.load(Ordering::SeqCst)
    }

    pub fn unmount_calls(&self) -> usize {
        self.unmount_calls.load(Ordering::SeqCst)
    }

    /// Whether the simulated mount table has anything mounted at `path`.
    pub fn is_mounted(&self, path: &Path) -> bool {
        self.mounts.lock().iter().any(|m| m.mountpoint == path)
    }

    /// Number of entries in the simulated mount table.
    pub fn mounted_count(&self) -> usize {
        self.mounts.lock().len()
    }

    /// Options recorded for the topmost mount at `path`.
    pub fn mount_options(&self, path: &Path) -> Option<String> {
        self.mounts
            .lock()
            .iter()
            .rev()
            .find(|m| m.mountpoint == path)
            .map(|m| m.options.clone())
    }

    /// Source recorded for the topmost mount at `path`.
    pub fn mount_source(&self, path: &Path) -> Option<String> {
        self.mounts
            .lock()
            .iter()
            .rev()
            .find(|m| m.mountpoint == path)
            .map(|m| m.source.clone())
    }

    /// Sensitive options passed to the most recent mount call.
    pub fn last_sensitive_options(&self) -> Vec<String> {
        self.last_sensitive.lock().clone()
    }

    /// Remove a mount behind the manager's back, as an external `umount` would.
    pub fn drop_mount(&self, path: &Path) {
        self.mounts.lock().retain(|m| m.mountpoint != path);
    }

    /// Add a mount the manager did not create.
    pub fn add_foreign_mount(&self, mount: SystemMount) {
        self.mounts.lock().push(mount);
    }

    /// Make the next `n` mount calls fail.
    pub fn fail_next_mounts(&self, n: u32) {
        self.failing_mounts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` unmount calls fail.
    pub fn fail_next_unmounts(&self, n: u32) {
        self.failing_unmounts.store(n, Ordering::SeqCst);
    }

    /// Delay every mount call, widening race windows in concurrency tests.
    pub fn set_mount_delay(&self, delay: Duration) {
        *self.mount_delay.lock() = delay;
    }

    pub fn set_native_client_running(&self, running: bool) {
        self.native_running.store(running, Ordering::SeqCst);
    }

    pub fn set_client_containers<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.containers.lock() = names.into_iter().map(Into::into).collect();
    }

    pub fn set_selinux(&self, supported: bool) {
        self.selinux.store(supported, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MountExecutor for FakeNode {
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
        sensitive_options: &[String],
    ) -> Result<(), ExecutorError> {
        self.mount_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.mount_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        *self.last_sensitive.lock() = sensitive_options.to_vec();
        if Self::take_failure(&self.failing_mounts) {
            return Err(ExecutorError::Command {
                program: "mount".into(),
                target: target.display().to_string(),
                code: Some(32),
                stderr: "mount: permission denied".into(),
            });
        }
        self.mounts.lock().push(SystemMount {
            source: source.to_string(),
            mountpoint: target.to_path_buf(),
            fstype: if fs_type.is_empty() { "none".into() } else { fs_type.to_string() },
            options: options.join(","),
        });
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<(), ExecutorError> {
        self.unmount_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_unmounts) {
            return Err(ExecutorError::Command {
                program: "umount".into(),
                target: target.display().to_string(),
                code: Some(32),
                stderr: "umount: target is busy".into(),
            });
        }
        let mut mounts = self.mounts.lock();
        match mounts.iter().rposition(|m| m.mountpoint == target) {
            Some(idx) => {
                mounts.remove(idx);
                Ok(())
            }
            None => Err(ExecutorError::Command {
                program: "umount".into(),
                target: target.display().to_string(),
                code: Some(32),
                stderr: "umount: not mounted".into(),
            }),
        }
    }

    async fn is_not_a_mount_point(&self, target: &Path) -> Result<bool, ExecutorError> {
        Ok(!self.is_mounted(target))
    }
}

impl NodeInspector for FakeNode {
    fn native_client_running(&self) -> bool {
        self.native_running.load(Ordering::SeqCst)
    }

    fn client_containers(&self) -> Vec<String> {
        self.containers.lock().clone()
    }

    fn selinux_supported(&self) -> bool {
        self.selinux.load(Ordering::SeqCst)
    }

    fn mount_table(&self) -> io::Result<Vec<SystemMount>> {
        Ok(self.mounts.lock().clone())
    }
}
