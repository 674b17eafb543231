//! Bounded concurrent execution of backend sub-calls.
//!
//! A single [`BoundedExecutor`] owns the server-wide concurrency budget: a
//! [`Semaphore`] whose permits are held by in-flight sub-calls. Each top-level
//! request opens its own [`Batch`], submits one task per buffer, and joins the
//! batch as a unit. Budgets are global; batches and their join are per
//! request.
//!
//! ## Failure and cancellation
//!
//! - The first task error (by completion order) is captured in the batch
//!   before anything else reacts to it, then the batch's
//!   [`CancellationToken`] is fired so siblings stop early.
//! - Each batch token is a child of the server shutdown token, so hard
//!   shutdown reaches every running batch.
//! - Dropping a batch aborts its tasks. Permits live inside the tasks and are
//!   released on drop no matter how the task ends.

use core::future::Future;
use parhash_core::{Error, Result};
use std::sync::{Arc, OnceLock};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

/// Process-wide cap on concurrently executing sub-calls.
#[derive(Debug, Clone)]
pub struct BoundedExecutor {
    permits: Arc<Semaphore>,
    budget: usize,
    shutdown_token: CancellationToken,
}

impl BoundedExecutor {
    /// Creates an executor with `budget` permits.
    ///
    /// Cancelling `shutdown_token` fails every blocked submit and running task
    /// with [`Error::ServiceShutdown`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `budget` is zero or exceeds
    /// [`Semaphore::MAX_PERMITS`].
    pub fn new(budget: usize, shutdown_token: CancellationToken) -> Result<Self> {
        if budget == 0 {
            return Err(Error::InvalidConfig {
                reason: "concurrency limit must be greater than 0".to_string(),
            });
        }
        if budget > Semaphore::MAX_PERMITS {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "concurrency limit {} exceeds maximum ({})",
                    budget,
                    Semaphore::MAX_PERMITS
                ),
            });
        }

        Ok(Self {
            permits: Arc::new(Semaphore::new(budget)),
            budget,
            shutdown_token,
        })
    }

    /// Opens a new batch drawing from this executor's budget.
    pub fn batch<T: Send + 'static>(&self) -> Batch<T> {
        Batch {
            permits: Arc::clone(&self.permits),
            shutdown_token: self.shutdown_token.clone(),
            token: self.shutdown_token.child_token(),
            first_error: Arc::new(OnceLock::new()),
            tasks: JoinSet::new(),
        }
    }

    /// The configured budget.
    pub const fn budget(&self) -> usize {
        self.budget
    }

    /// Permits not currently held by any sub-call.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

/// The set of sub-calls belonging to one top-level request.
///
/// Dropping a batch before [`join`](Self::join) aborts its tasks.
#[derive(Debug)]
pub struct Batch<T> {
    permits: Arc<Semaphore>,
    shutdown_token: CancellationToken,
    token: CancellationToken,
    first_error: Arc<OnceLock<Error>>,
    tasks: JoinSet<Result<T>>,
}

impl<T: Send + 'static> Batch<T> {
    /// Waits for a permit, then spawns `task`.
    ///
    /// The permit is held for exactly as long as the task runs.
    ///
    /// # Errors
    ///
    /// Returns the batch's failure (a sibling's error, or
    /// [`Error::ServiceShutdown`]) if the batch was cancelled before a permit
    /// became available. The task is not started in that case and the same
    /// error is reported by [`join`](Self::join).
    pub async fn submit<F>(&mut self, task: F) -> Result<()>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            () = self.token.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        };

        let Some(permit) = permit else {
            let err = self.cancellation_error();
            self.fail(err.clone());
            return Err(err);
        };

        self.tasks.spawn(run_with_permit(
            permit,
            task,
            self.token.clone(),
            self.shutdown_token.clone(),
            Arc::clone(&self.first_error),
        ));

        Ok(())
    }

    /// Waits for every submitted task to finish.
    ///
    /// # Errors
    ///
    /// Returns the first error recorded for this batch. Outputs of tasks that
    /// succeeded are discarded in that case.
    pub async fn join(mut self) -> Result<Vec<T>> {
        let mut outputs = Vec::with_capacity(self.tasks.len());

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(output)) => outputs.push(output),
                // Already recorded by the task itself.
                Ok(Err(_)) => {}
                Err(e) => self.fail(Error::TaskFailed {
                    context: e.to_string(),
                }),
            }
        }

        match self.first_error.get() {
            Some(err) => Err(err.clone()),
            None => Ok(outputs),
        }
    }

    /// Number of tasks spawned and not yet joined.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn fail(&self, err: Error) {
        record_failure(&self.first_error, &self.token, err);
    }

    fn cancellation_error(&self) -> Error {
        if let Some(err) = self.first_error.get() {
            err.clone()
        } else if self.shutdown_token.is_cancelled() {
            Error::ServiceShutdown
        } else {
            Error::RequestCancelled
        }
    }
}

async fn run_with_permit<T, F>(
    _permit: OwnedSemaphorePermit,
    task: F,
    token: CancellationToken,
    shutdown_token: CancellationToken,
    first_error: Arc<OnceLock<Error>>,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let outcome = tokio::select! {
        biased;
        () = token.cancelled() => Err(if shutdown_token.is_cancelled() {
            Error::ServiceShutdown
        } else {
            Error::RequestCancelled
        }),
        res = task => res,
    };

    if let Err(e) = &outcome {
        record_failure(&first_error, &token, e.clone());
    }

    outcome
}

/// Stores `err` if it is the batch's first failure, then cancels the batch.
///
/// The error is published before the token fires, so siblings that end with a
/// cancellation error can never overtake the failure that caused it.
fn record_failure(first_error: &OnceLock<Error>, token: &CancellationToken, err: Error) {
    let _ = first_error.set(err);
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use portable_atomic::{AtomicUsize, Ordering};
    use tokio::{sync::Notify, time::Instant};

    fn executor(budget: usize) -> BoundedExecutor {
        BoundedExecutor::new(budget, CancellationToken::new()).unwrap()
    }

    /// Tracks how many tasks run at once and the highest value seen.
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn rejects_zero_budget() {
        assert!(matches!(
            BoundedExecutor::new(0, CancellationToken::new()),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn empty_batch_joins_immediately() {
        let exec = executor(2);
        let batch = exec.batch::<()>();
        assert!(batch.is_empty());
        assert!(batch.join().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_budget() {
        let exec = executor(2);
        let gauge = Arc::new(Gauge::default());
        // Closed gate: tasks park here until the test hands out permits.
        let gate = Arc::new(Semaphore::new(0));

        let submitter = {
            let exec = exec.clone();
            let gauge = Arc::clone(&gauge);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let mut batch = exec.batch();
                for i in 0..5 {
                    let gauge = Arc::clone(&gauge);
                    let gate = Arc::clone(&gate);
                    batch
                        .submit(async move {
                            gauge.enter();
                            gate.acquire().await.unwrap().forget();
                            gauge.exit();
                            Ok(i)
                        })
                        .await
                        .unwrap();
                }
                batch.join().await
            })
        };

        // Two tasks hold both permits; the submitter is parked on the third.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gauge.current.load(Ordering::SeqCst), 2);
        assert_eq!(exec.available_permits(), 0);
        assert!(!submitter.is_finished());

        gate.add_permits(5);
        let mut outputs = submitter.await.unwrap().unwrap();
        outputs.sort_unstable();

        assert_eq!(outputs, vec![0, 1, 2, 3, 4]);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
        assert_eq!(exec.available_permits(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn budget_of_one_serializes_tasks() {
        let exec = executor(1);
        let mut batch = exec.batch();

        for _ in 0..3 {
            batch
                .submit(async {
                    let start = Instant::now();
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok((start, Instant::now()))
                })
                .await
                .unwrap();
        }

        let mut windows = batch.join().await.unwrap();
        windows.sort_by_key(|(start, _)| *start);
        for pair in windows.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "overlapping windows: {pair:?}");
        }
    }

    #[tokio::test]
    async fn budget_is_shared_across_batches() {
        let exec = executor(1);
        let release = Arc::new(Notify::new());

        let mut first = exec.batch();
        let r = Arc::clone(&release);
        first
            .submit(async move {
                r.notified().await;
                Ok(())
            })
            .await
            .unwrap();

        let mut second = exec.batch::<()>();
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            second.submit(async { Ok(()) }),
        )
        .await;
        assert!(blocked.is_err(), "second batch must wait for the permit");

        release.notify_one();
        first.join().await.unwrap();
        second.submit(async { Ok(()) }).await.unwrap();
        second.join().await.unwrap();
        assert_eq!(exec.available_permits(), 1);
    }

    #[tokio::test]
    async fn join_returns_first_error_and_releases_permits() {
        let exec = executor(3);
        let mut batch = exec.batch::<u32>();

        batch.submit(async { Ok(1) }).await.unwrap();
        batch
            .submit(async {
                Err(Error::InvalidRequest {
                    reason: "boom".to_string(),
                })
            })
            .await
            .unwrap();
        // Would never finish on its own; must be cancelled by the failure.
        let _ = batch
            .submit(async {
                futures::future::pending::<()>().await;
                Ok(3)
            })
            .await;

        let err = batch.join().await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { ref reason } if reason == "boom"));
        assert_eq!(exec.available_permits(), 3);
    }

    #[tokio::test]
    async fn blocked_submit_fails_fast_after_sibling_error() {
        let exec = executor(1);
        let mut batch = exec.batch::<()>();

        batch
            .submit(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(Error::RequestCancelled)
            })
            .await
            .unwrap();

        // Budget exhausted; this submit must return once the sibling fails.
        let submitted = tokio::time::timeout(
            Duration::from_secs(1),
            batch.submit(async { Ok(()) }),
        )
        .await
        .expect("submit should not hang");
        assert!(submitted.is_err());

        assert!(matches!(batch.join().await, Err(Error::RequestCancelled)));
    }

    #[tokio::test]
    async fn shutdown_cancels_running_and_blocked_work() {
        let shutdown = CancellationToken::new();
        let exec = BoundedExecutor::new(1, shutdown.clone()).unwrap();
        let mut batch = exec.batch::<()>();

        batch
            .submit(async {
                futures::future::pending::<()>().await;
                Ok(())
            })
            .await
            .unwrap();

        let canceller = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                shutdown.cancel();
            })
        };

        assert!(matches!(
            batch.submit(async { Ok(()) }).await,
            Err(Error::ServiceShutdown)
        ));
        assert!(matches!(batch.join().await, Err(Error::ServiceShutdown)));
        canceller.await.unwrap();
        assert_eq!(exec.available_permits(), 1);
    }

    #[tokio::test]
    async fn panicking_task_is_reported() {
        let exec = executor(2);
        let mut batch = exec.batch::<()>();
        batch
            .submit(async {
                if true {
                    panic!("backend client bug");
                }
                Ok(())
            })
            .await
            .unwrap();

        assert!(matches!(batch.join().await, Err(Error::TaskFailed { .. })));
        assert_eq!(exec.available_permits(), 2);
    }

    #[tokio::test]
    async fn dropping_batch_releases_permits() {
        let exec = executor(2);
        let mut batch = exec.batch::<()>();
        for _ in 0..2 {
            batch
                .submit(async {
                    futures::future::pending::<()>().await;
                    Ok(())
                })
                .await
                .unwrap();
        }
        assert_eq!(exec.available_permits(), 0);

        drop(batch);
        // Aborted tasks drop their permits once the runtime polls them.
        tokio::time::timeout(Duration::from_secs(1), async {
            while exec.available_permits() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("permits should be released after abort");
    }
}
