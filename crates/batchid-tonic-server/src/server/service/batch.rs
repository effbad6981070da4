use super::finish;
use crate::server::telemetry::{increment_batches_issued, increment_requests};
use batchid::{Allocator, BatchRequester, LocalRequester};
use batchid_tonic_core::{
    Error,
    proto::{GetBatchRequest, GetBatchResponse, batch_service_server::BatchService},
    shard_from_proto,
};
use std::sync::Arc;
use std::time::Instant;
use tonic::{Request, Response, Status};

const GET_BATCH: &str = "GetBatch";

/// Allocator endpoint: reserves batches from an allocator owned by this
/// process.
#[derive(Clone)]
pub struct BatchHandler {
    requester: LocalRequester,
}

impl BatchHandler {
    pub fn new(allocator: Arc<Allocator>) -> Self {
        Self {
            requester: LocalRequester::new(allocator),
        }
    }

    async fn reserve(&self, request: GetBatchRequest) -> Result<GetBatchResponse, Error> {
        let GetBatchRequest { tag, shard } = request;
        let batch = self
            .requester
            .get_batch(&tag, &shard_from_proto(shard))
            .await?;

        increment_batches_issued();
        Ok(batch.into())
    }
}

#[tonic::async_trait]
impl BatchService for BatchHandler {
    #[tracing::instrument(skip_all, fields(tag = %req.get_ref().tag))]
    async fn get_batch(
        &self,
        req: Request<GetBatchRequest>,
    ) -> Result<Response<GetBatchResponse>, Status> {
        let started = Instant::now();
        increment_requests(GET_BATCH);
        let result = self.reserve(req.into_inner()).await;
        finish(GET_BATCH, started, result)
    }
}
