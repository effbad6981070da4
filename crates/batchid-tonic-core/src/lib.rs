#![doc = include_str!("../README.md")]

mod common;
mod remote;

pub use common::*;
pub use remote::*;

// Public re-export so downstream crates can access `batchid` via
// `batchid_tonic_core::batchid`
pub use batchid;

/// Messages and service bindings generated from `proto/batchid.proto`.
pub mod proto {
    tonic::include_proto!("batchid");

    /// Encoded descriptor set of `batchid.proto`, served by gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("batchid_descriptor");
}
