//! Fixed, ordered set of backend handles.
//!
//! The registry is built once at startup, one handle per configured backend
//! address in configuration order, and is read-only afterwards. Handles are
//! shared across all requests through [`Arc`]; a handle's position in the
//! registry is its identity for round-robin selection and telemetry.
//!
//! Connections are released when the registry is dropped. If startup fails
//! part way through [`BackendRegistry::connect`], the channels established so
//! far are dropped with the failed future, so each connection is closed
//! exactly once in both cases.

use super::client::{GrpcBackend, HashBackend};
use core::time::Duration;
use parhash_core::{
    Error, Result,
    types::{Buffer, Hash},
};
use std::sync::Arc;

/// One backend: its configured address, its registry position, and the
/// established capability used to reach it.
pub struct BackendHandle {
    index: usize,
    addr: String,
    backend: Arc<dyn HashBackend>,
}

impl BackendHandle {
    /// Position of this backend in the registry.
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Configured address, used as the telemetry identity.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Hashes `buffer` on this backend.
    pub async fn hash(&self, buffer: Buffer) -> Result<Hash> {
        self.backend.hash(buffer).await
    }
}

impl core::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("index", &self.index)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct BackendRegistry {
    backends: Vec<Arc<BackendHandle>>,
}

impl BackendRegistry {
    /// Builds a registry from already-established backends, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `backends` is empty.
    pub fn new<I>(backends: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Arc<dyn HashBackend>)>,
    {
        let backends: Vec<_> = backends
            .into_iter()
            .enumerate()
            .map(|(index, (addr, backend))| {
                Arc::new(BackendHandle {
                    index,
                    addr,
                    backend,
                })
            })
            .collect();

        if backends.is_empty() {
            return Err(Error::InvalidConfig {
                reason: "at least one backend address is required".to_string(),
            });
        }

        Ok(Self { backends })
    }

    /// Connects to every address concurrently and builds the registry.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::Connect`] if any backend is unreachable, or
    /// [`Error::InvalidConfig`] if `addrs` is empty.
    pub async fn connect(addrs: &[String], connect_timeout: Duration) -> Result<Self> {
        let connecting = addrs.iter().map(|addr| async move {
            let backend = GrpcBackend::connect(addr, connect_timeout).await?;
            tracing::debug!("Connected to backend {addr}");
            Ok::<_, Error>((addr.clone(), Arc::new(backend) as Arc<dyn HashBackend>))
        });

        let backends = futures::future::try_join_all(connecting).await?;
        Self::new(backends)
    }

    /// Returns the handle at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`. Indices produced by a
    /// [`RoundRobin`](crate::server::pool::RoundRobin) sized with
    /// [`len`](Self::len) are always in range.
    pub fn get(&self, index: usize) -> &Arc<BackendHandle> {
        &self.backends[index]
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<BackendHandle>> {
        self.backends.iter()
    }
}

impl Drop for BackendRegistry {
    fn drop(&mut self) {
        tracing::debug!("Releasing {} backend connections", self.backends.len());
    }
}
