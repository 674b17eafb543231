//! gRPC service implementation for parallel hashing.
//!
//! This module defines [`ParHashService`], the concrete implementation of the
//! [`ParallelHashSvc`] gRPC service defined in `parhash.proto`. It
//! accepts an ordered list of buffers and answers with one hash per buffer,
//! in the same order, computed by the backend fleet.
//!
//! ## Responsibilities
//!
//! - Admit or refuse requests depending on the shutdown state.
//! - Hand the buffers to the shared [`Dispatcher`].
//! - Convert the first sub-call failure into a single gRPC status.

use crate::server::{
    config::ShutdownMode,
    service::{dispatcher::Dispatcher, lifecycle::Lifecycle},
};
use core::time::Duration;
use parhash_core::proto::parhash::{
    ParHashReq, ParHashResp, parallel_hash_svc_server::ParallelHashSvc,
};
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// gRPC front service fanning each request out to the backend fleet.
///
/// Cloning is cheap: every clone shares the same dispatcher (and therefore
/// the same round-robin cursor and concurrency budget) and lifecycle.
#[derive(Clone)]
pub struct ParHashService {
    dispatcher: Arc<Dispatcher>,
    lifecycle: Arc<Lifecycle>,
}

impl ParHashService {
    pub const fn new(dispatcher: Arc<Dispatcher>, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            dispatcher,
            lifecycle,
        }
    }

    /// Stops admitting requests and resolves in-flight ones according to
    /// `mode`.
    pub async fn shutdown(&self, mode: ShutdownMode, drain_timeout: Duration) {
        self.lifecycle.shutdown(mode, drain_timeout).await;
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

#[tonic::async_trait]
impl ParallelHashSvc for ParHashService {
    /// Hashes every buffer of the request on the backends.
    ///
    /// Returns either all hashes, in request order, or the first sub-call
    /// error. A request arriving during shutdown is refused with
    /// `UNAVAILABLE`.
    #[tracing::instrument(skip_all, fields(buffers = req.get_ref().data.len()))]
    async fn parallel_hash(
        &self,
        req: Request<ParHashReq>,
    ) -> Result<Response<ParHashResp>, Status> {
        let _inflight = self.lifecycle.enter()?;

        let hashes = self
            .dispatcher
            .parallel_hash(req.into_inner().data)
            .await?;

        Ok(Response::new(ParHashResp { hashes }))
    }
}
