use core::time::Duration;
use parhash_core::{
    Error, Result,
    proto::hashsvc::{HashReq, hash_svc_client::HashSvcClient},
    types::{Buffer, Hash},
};
use tonic::transport::{Channel, Endpoint};

/// Remote capability that hashes a single buffer.
///
/// The fan-out engine never computes hashes itself; every buffer is handed to
/// exactly one implementation of this trait.
#[tonic::async_trait]
pub trait HashBackend: Send + Sync + 'static {
    async fn hash(&self, buffer: Buffer) -> Result<Hash>;
}

/// [`HashBackend`] backed by a `hashsvc.HashSvc` gRPC endpoint.
///
/// Holds one established [`Channel`]. Tonic channels multiplex requests over
/// HTTP/2, so a single instance serves every concurrent sub-call; cloning the
/// generated client per call only clones the channel handle.
#[derive(Debug, Clone)]
pub struct GrpcBackend {
    addr: String,
    client: HashSvcClient<Channel>,
}

impl GrpcBackend {
    /// Connects to the backend at `addr` (`host:port`, or a full `http://`
    /// URI).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the address is malformed or the endpoint
    /// cannot be reached within `connect_timeout`.
    pub async fn connect(addr: &str, connect_timeout: Duration) -> Result<Self> {
        let uri = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };

        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| Error::Connect {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?
            .connect_timeout(connect_timeout)
            .tcp_nodelay(true);

        let channel = endpoint.connect().await.map_err(|e| Error::Connect {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            addr: addr.to_string(),
            client: HashSvcClient::new(channel),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[tonic::async_trait]
impl HashBackend for GrpcBackend {
    async fn hash(&self, buffer: Buffer) -> Result<Hash> {
        let mut client = self.client.clone();
        let resp = client
            .hash(HashReq { data: buffer })
            .await
            .map_err(|status| Error::backend(&self.addr, &status))?;

        Ok(resp.into_inner().hash)
    }
}
