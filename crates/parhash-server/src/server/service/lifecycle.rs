use crate::server::config::ShutdownMode;
use core::time::Duration;
use parhash_core::Error;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Admission control for top-level requests.
///
/// Tracks requests currently inside the dispatcher so that shutdown can drain
/// them, and owns the server-wide shutdown token that the executor listens to.
#[derive(Debug)]
pub struct Lifecycle {
    accepting: AtomicBool,
    inflight: AtomicUsize,
    shutdown_token: CancellationToken,
}

/// Marks one request as in flight until dropped.
#[derive(Debug)]
pub struct InflightGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.inflight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Lifecycle {
    pub fn new(shutdown_token: CancellationToken) -> Self {
        Self {
            accepting: AtomicBool::new(true),
            inflight: AtomicUsize::new(0),
            shutdown_token,
        }
    }

    /// Admits a request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once shutdown has begun.
    pub fn enter(&self) -> Result<InflightGuard<'_>, Error> {
        // Count first, then check: a request that passes the check is always
        // visible to a concurrent drain.
        let guard = InflightGuard { lifecycle: self };
        self.inflight.fetch_add(1, Ordering::SeqCst);

        if self.accepting.load(Ordering::SeqCst) {
            Ok(guard)
        } else {
            Err(Error::ServiceShutdown)
        }
    }

    /// Number of requests currently admitted.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stops the service.
    ///
    /// - Stops admitting new requests.
    /// - In [`ShutdownMode::Drain`], waits up to `drain_timeout` for in-flight
    ///   requests to finish.
    /// - Cancels the shutdown token; anything still running fails with
    ///   [`Error::ServiceShutdown`] and releases its permits.
    pub async fn shutdown(&self, mode: ShutdownMode, drain_timeout: Duration) {
        // === Phase 0: Stop accepting new requests ===
        tracing::info!("Refusing new requests");
        self.accepting.store(false, Ordering::SeqCst);

        // === Phase 1: Wait for in-flight requests to drain ===
        if mode == ShutdownMode::Drain {
            tracing::info!("Draining in-flight requests ({} active)", self.inflight());
            let drain_result = timeout(drain_timeout, async {
                while self.inflight() > 0 {
                    sleep(Duration::from_millis(50)).await;
                }
            })
            .await;

            match drain_result {
                Ok(()) => tracing::debug!("All in-flight requests drained"),
                Err(_) => tracing::warn!(
                    "Graceful drain timed out ({} requests still active)",
                    self.inflight()
                ),
            }
        }

        // === Phase 2: Cancel any remaining work ===
        tracing::debug!("Cancelling remaining work via shutdown token");
        self.shutdown_token.cancel();

        tracing::info!("Dispatcher shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_tracks_inflight_requests() {
        let lifecycle = Lifecycle::new(CancellationToken::new());
        {
            let _a = lifecycle.enter().unwrap();
            let _b = lifecycle.enter().unwrap();
            assert_eq!(lifecycle.inflight(), 2);
        }
        assert_eq!(lifecycle.inflight(), 0);
    }

    #[tokio::test]
    async fn rejects_requests_after_shutdown() {
        let token = CancellationToken::new();
        let lifecycle = Lifecycle::new(token.clone());

        lifecycle
            .shutdown(ShutdownMode::Drain, Duration::from_millis(100))
            .await;

        assert!(!lifecycle.is_accepting());
        assert!(matches!(lifecycle.enter(), Err(Error::ServiceShutdown)));
        assert_eq!(lifecycle.inflight(), 0);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_inflight_requests() {
        let token = CancellationToken::new();
        let lifecycle = std::sync::Arc::new(Lifecycle::new(token.clone()));

        let worker = {
            let lifecycle = std::sync::Arc::clone(&lifecycle);
            tokio::spawn(async move {
                let _guard = lifecycle.enter().unwrap();
                sleep(Duration::from_millis(120)).await;
            })
        };
        tokio::task::yield_now().await;
        while lifecycle.inflight() == 0 {
            tokio::task::yield_now().await;
        }

        lifecycle
            .shutdown(ShutdownMode::Drain, Duration::from_secs(2))
            .await;

        // The token only fires after the request finished on its own.
        assert!(worker.is_finished());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn abort_cancels_without_waiting() {
        let token = CancellationToken::new();
        let lifecycle = Lifecycle::new(token.clone());
        let _guard = lifecycle.enter().unwrap();

        timeout(
            Duration::from_millis(100),
            lifecycle.shutdown(ShutdownMode::Abort, Duration::from_secs(60)),
        )
        .await
        .expect("abort must not wait for in-flight requests");

        assert!(token.is_cancelled());
        assert_eq!(lifecycle.inflight(), 1);
    }
}
