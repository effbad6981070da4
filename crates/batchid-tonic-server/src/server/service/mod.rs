//! gRPC endpoints of the two roles.
//!
//! ## Structure
//!
//! - [`batch`] - allocator endpoint (`BatchService`), reserves whole batches.
//! - [`id`] - generator endpoint (`IdService`), serves IDs from cached
//!   batches.
//!
//! Both record request counts, durations and failures through
//! [`telemetry`](crate::server::telemetry) and turn errors into a
//! [`Status`] with the shared mapping of `batchid-tonic-core`.

pub mod batch;
pub mod id;

pub use batch::BatchHandler;
pub use id::IdHandler;

use crate::server::telemetry::{increment_errors, record_request_duration};
use batchid_tonic_core::Error;
use std::time::Instant;
use tonic::{Response, Status};

/// Records the outcome of one call and converts it into a gRPC reply.
fn finish<T>(
    method: &'static str,
    started: Instant,
    result: Result<T, Error>,
) -> Result<Response<T>, Status> {
    record_request_duration(method, started.elapsed().as_secs_f64() * 1000.0);
    match result {
        Ok(message) => Ok(Response::new(message)),
        Err(e) => {
            increment_errors(method);
            tracing::warn!(method, "request failed: {e}");
            Err(e.into())
        }
    }
}
