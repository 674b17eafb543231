pub mod error;
pub mod types;

pub use error::{Error, Result};

/// Generated protobuf messages and tonic client/server bindings.
pub mod proto {
    /// Front service: `parhash.ParallelHashSvc`.
    pub mod parhash {
        tonic::include_proto!("parhash");
    }

    /// Backend service: `hashsvc.HashSvc`.
    pub mod hashsvc {
        tonic::include_proto!("hashsvc");
    }

    /// Encoded descriptor set for both packages, used by gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("parhash_descriptor");
}
