/// Builds the gRPC client and server code for the `batchid.proto` definition
/// using `tonic-prost-build`.
///
/// This code generation step processes the Protocol Buffer definitions located
/// in the `proto` directory and emits Rust modules with gRPC bindings into the
/// crate's `OUT_DIR`. A file descriptor set is written next to them for the
/// reflection service.
///
/// # Protoc
///
/// The `protoc` binary comes from `protoc-bin-vendored`, so building does not
/// depend on a system-wide protobuf installation.
///
/// # Files and Paths
///
/// - Proto file: `proto/batchid.proto`
/// - Includes: `proto/`
/// - Descriptor set: `$OUT_DIR/batchid_descriptor.bin`
///
/// # Output
///
/// Generated code will be accessible in Rust via:
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("batchid");
/// }
/// ```
///
/// This module will include both gRPC service traits and message types.
use std::env;
use std::error::Error;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("batchid_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config
        .protoc_executable(protoc_bin_vendored::protoc_bin_path()?)
        .file_descriptor_set_path(&descriptor_path);

    println!("cargo:rerun-if-changed=proto/batchid.proto");

    tonic_prost_build::configure().compile_with_config(
        config,
        &["proto/batchid.proto"],
        &["proto"],
    )?;
    Ok(())
}
