//! Fan-out of one `ParallelHash` request.
//!
//! [`Dispatcher::parallel_hash`] splits a request into one sub-call per
//! buffer, assigns each sub-call a backend through the shared [`RoundRobin`]
//! cursor, runs them under the global [`BoundedExecutor`] budget, and
//! reassembles the hashes in request order.
//!
//! Either every buffer is hashed and the full, ordered response is returned,
//! or the first sub-call error is returned and nothing else is.

use crate::server::{
    backend::BackendRegistry,
    pool::{BoundedExecutor, RoundRobin},
    telemetry::{LatencyTimer, Telemetry},
};
use parhash_core::{
    Error, Result,
    types::{Buffer, Hash},
};
use std::sync::Arc;

/// Process-wide fan-out engine. One instance serves every request.
pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
    selector: RoundRobin,
    executor: BoundedExecutor,
    telemetry: Arc<dyn Telemetry>,
    max_buffers: usize,
}

impl Dispatcher {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the registry is empty.
    pub fn new(
        registry: Arc<BackendRegistry>,
        executor: BoundedExecutor,
        telemetry: Arc<dyn Telemetry>,
        max_buffers: usize,
    ) -> Result<Self> {
        let selector = RoundRobin::new(registry.len())?;

        Ok(Self {
            registry,
            selector,
            executor,
            telemetry,
            max_buffers,
        })
    }

    /// Hashes every buffer on the backend fleet.
    ///
    /// `result[i]` is the hash of `buffers[i]`. The request counter is
    /// incremented exactly once per call, including for empty and failing
    /// requests.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if more than `max_buffers` buffers are
    ///   supplied. No backend is called.
    /// - The first sub-call failure (by completion order). Hashes already
    ///   computed for the request are discarded.
    pub async fn parallel_hash(&self, buffers: Vec<Buffer>) -> Result<Vec<Hash>> {
        self.telemetry.record_call();

        if buffers.len() > self.max_buffers {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "{} buffers exceeds maximum allowed ({})",
                    buffers.len(),
                    self.max_buffers
                ),
            });
        }

        let mut slots: Vec<Option<Hash>> = vec![None; buffers.len()];
        let mut batch = self.executor.batch();

        for (position, buffer) in buffers.into_iter().enumerate() {
            let backend = Arc::clone(self.registry.get(self.selector.pick()));
            let telemetry = Arc::clone(&self.telemetry);

            let submitted = batch
                .submit(async move {
                    let _timer = LatencyTimer::start(telemetry, Arc::clone(&backend));
                    let hash = backend.hash(buffer).await?;
                    Ok::<_, Error>((position, hash))
                })
                .await;

            // The batch already failed; `join` reports why.
            if submitted.is_err() {
                break;
            }
        }

        let outputs = batch.join().await.inspect_err(|e| {
            tracing::debug!("ParallelHash failed: {e}");
        })?;

        for (position, hash) in outputs {
            slots[position] = Some(hash);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                slot.ok_or_else(|| Error::TaskFailed {
                    context: format!("no hash produced for buffer {position}"),
                })
            })
            .collect()
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &BoundedExecutor {
        &self.executor
    }
}
