/// Builds the gRPC client and server code for the `parhash.proto` (front
/// service) and `hashsvc.proto` (backend service) definitions using
/// `tonic-prost-build`.
///
/// # Byte Field Optimization
///
/// Every `bytes` field in both packages is generated as `Bytes` (from the
/// `bytes` crate) instead of `Vec<u8>`. Buffers received by the front service
/// are handed to backend requests without copying, and backend hashes are
/// moved into the response the same way.
///
/// # Files and Paths
///
/// - Proto files: `proto/parhash.proto`, `proto/hashsvc.proto`
/// - Includes: `proto/`
///
/// # Panics
///
/// This function will `panic!` if code generation fails (for example when
/// `protoc` is not installed).
///
/// # Output
///
/// Generated code is exposed through the `proto` module of this crate:
///
/// ```rust,ignore
/// pub mod parhash {
///     tonic::include_proto!("parhash");
/// }
/// pub mod hashsvc {
///     tonic::include_proto!("hashsvc");
/// }
/// ```
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("parhash_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    // "." matches every bytes field in every compiled package.
    config
        .bytes(["."])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(
            config,
            &["proto/parhash.proto", "proto/hashsvc.proto"],
            &["proto"],
        )
        .unwrap();
}
