//! Error types at the gRPC boundary.
//!
//! [`Error`] is what the service handlers produce. It implements
//! `From<Error>` for `tonic::Status` so handlers can use `?`, and
//! [`status_to_error`] maps a received status back onto
//! [`batchid::Error`] for the remote clients.
//!
//! ## Status Codes
//! - `UnconfiguredTag` <-> `NOT_FOUND`
//! - `InvalidTag` <-> `INVALID_ARGUMENT`
//! - `InvalidRequest` <-> `OUT_OF_RANGE`
//! - `SequenceExhausted` <-> `RESOURCE_EXHAUSTED`
//! - `AllocationUnavailable` -> `UNAVAILABLE`
//! - `Configuration` -> `FAILED_PRECONDITION`
//! - Any other received code -> `AllocationUnavailable`

use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the gRPC handlers.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Allocation or generation failed.
    #[error(transparent)]
    Allocation(#[from] batchid::Error),
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Allocation(e) => match e {
                batchid::Error::UnconfiguredTag { .. } => Status::not_found(e.to_string()),
                batchid::Error::InvalidTag { reason, .. } => Status::invalid_argument(reason),
                batchid::Error::InvalidRequest { reason } => Status::out_of_range(reason),
                batchid::Error::SequenceExhausted { .. } => {
                    Status::resource_exhausted(e.to_string())
                }
                batchid::Error::AllocationUnavailable { reason } => Status::unavailable(reason),
                batchid::Error::Configuration { reason } => Status::failed_precondition(reason),
                other => Status::internal(other.to_string()),
            },
        }
    }
}

/// Maps a status returned by a remote call about `tag` onto the error the
/// local caller would have seen.
pub fn status_to_error(status: &Status, tag: &str) -> batchid::Error {
    match status.code() {
        Code::NotFound => batchid::Error::UnconfiguredTag {
            tag: tag.to_owned(),
        },
        Code::InvalidArgument => batchid::Error::InvalidTag {
            tag: tag.to_owned(),
            reason: status.message().to_owned(),
        },
        Code::OutOfRange => batchid::Error::InvalidRequest {
            reason: status.message().to_owned(),
        },
        Code::ResourceExhausted => batchid::Error::SequenceExhausted {
            tag: tag.to_owned(),
        },
        code => batchid::Error::AllocationUnavailable {
            reason: format!("remote call failed ({code:?}): {}", status.message()),
        },
    }
}
