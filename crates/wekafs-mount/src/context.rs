//! Per-request cancellation and deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::MountError;

/// Request-scoped context carried through mount and unmount calls.
///
/// Cancellation and the deadline bound remote calls (token fetch, IP
/// resolution, export permissions) and NFS retry sleeps. An OS mount or
/// unmount that has already started runs to completion.
#[derive(Debug, Clone, Default)]
pub struct MountContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    request_id: Option<String>,
}

impl MountContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail fast if the context is already cancelled or expired.
    pub fn check(&self) -> Result<(), MountError> {
        if self.cancel.is_cancelled() {
            return Err(MountError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(MountError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` until it completes, the context is cancelled or the deadline passes.
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T, MountError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<MountError>,
    {
        self.check()?;
        let guarded = async {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(MountError::Cancelled),
                res = fut => res.map_err(Into::into),
            }
        };
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .unwrap_or(Err(MountError::DeadlineExceeded)),
            None => guarded.await,
        }
    }

    /// Sleep for `delay`, returning early with an error on cancellation or deadline.
    pub async fn sleep(&self, delay: Duration) -> Result<(), MountError> {
        self.run(async {
            tokio::time::sleep(delay).await;
            Ok::<_, MountError>(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;

    #[tokio::test]
    async fn test_run_passes_through_result() {
        let ctx = MountContext::new();
        let ok = ctx.run(async { Ok::<_, RemoteError>(7) }).await.unwrap();
        assert_eq!(ok, 7);
        let err = ctx
            .run(async { Err::<(), _>(RemoteError::Other("nope".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, MountError::Remote(_)));
    }

    #[tokio::test]
    async fn test_run_cancelled() {
        let ctx = MountContext::new();
        ctx.cancel();
        let err = ctx
            .run(async { Ok::<_, RemoteError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, MountError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_exceeded() {
        let ctx = MountContext::new().with_timeout(Duration::from_millis(50));
        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, RemoteError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MountError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cancel_is_shared_between_clones() {
        let ctx = MountContext::new().with_request_id("req-1");
        let clone = ctx.clone();
        clone.cancel();
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.request_id(), Some("req-1"));
    }
}
