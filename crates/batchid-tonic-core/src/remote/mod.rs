//! gRPC clients for processes that host neither the allocator nor the
//! generator they use.
//!
//! Both clients share one lazily connected [`Channel`] per role, balanced
//! across every configured host. Calls are never retried here, and deadlines
//! belong to the channel (see [`HostAddr::endpoint`]). A transport failure or
//! an expired deadline reaches the caller as
//! [`batchid::Error::AllocationUnavailable`].
//!
//! [`Channel`]: tonic::transport::Channel

mod generator;
mod hosts;
mod requester;

pub use generator::*;
pub use hosts::*;
pub use requester::*;

use crate::status_to_error;
use tonic::{Response, Status};

/// Unwraps the reply to one call about `tag`, mapping a failure onto
/// [`batchid::Error`].
fn reply<T>(tag: &str, result: Result<Response<T>, Status>) -> batchid::Result<T> {
    result
        .map(Response::into_inner)
        .map_err(|status| status_to_error(&status, tag))
}
