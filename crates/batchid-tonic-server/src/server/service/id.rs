//! Generator endpoint.
//!
//! [`IdHandler`] exposes a [`LocalGenerator`] owned by this process, so that
//! other processes share its cached batches instead of holding their own.
//! `BatchGenerate` is bounded by the generator's own limit, so remote callers
//! see exactly what a local caller of the same generator would.

use super::finish;
use crate::server::telemetry::{increment_ids_generated, increment_requests};
use crate::server::topology::LocalGenerator;
use batchid_tonic_core::{
    Error,
    proto::{
        BatchGenerateRequest, BatchGenerateResponse, GenerateRequest, GenerateResponse,
        PreloadRequest, PreloadResponse, WasLoadedRequest, WasLoadedResponse,
        id_service_server::IdService,
    },
    shard_from_proto,
};
use std::sync::Arc;
use std::time::Instant;
use tonic::{Request, Response, Status};

const GENERATE: &str = "Generate";
const BATCH_GENERATE: &str = "BatchGenerate";
const WAS_LOADED: &str = "WasLoaded";
const PRELOAD: &str = "Preload";

#[derive(Clone)]
pub struct IdHandler {
    generator: Arc<LocalGenerator>,
}

impl IdHandler {
    pub fn new(generator: Arc<LocalGenerator>) -> Self {
        Self { generator }
    }
}

#[tonic::async_trait]
impl IdService for IdHandler {
    #[tracing::instrument(skip_all, fields(tag = %req.get_ref().tag))]
    async fn generate(
        &self,
        req: Request<GenerateRequest>,
    ) -> Result<Response<GenerateResponse>, Status> {
        let started = Instant::now();
        increment_requests(GENERATE);

        let GenerateRequest { tag, shard } = req.into_inner();
        let result = self
            .generator
            .generate(&tag, shard_from_proto(shard))
            .await
            .map(|id| {
                increment_ids_generated(1);
                GenerateResponse { id }
            })
            .map_err(Error::from);

        finish(GENERATE, started, result)
    }

    #[tracing::instrument(skip_all, fields(tag = %req.get_ref().tag, count = req.get_ref().count))]
    async fn batch_generate(
        &self,
        req: Request<BatchGenerateRequest>,
    ) -> Result<Response<BatchGenerateResponse>, Status> {
        let started = Instant::now();
        increment_requests(BATCH_GENERATE);

        let BatchGenerateRequest { tag, count, shard } = req.into_inner();
        let result = self
            .generator
            .batch_generate(&tag, count, shard_from_proto(shard))
            .await
            .map(|ids| {
                increment_ids_generated(ids.len() as u64);
                BatchGenerateResponse { ids }
            })
            .map_err(Error::from);

        finish(BATCH_GENERATE, started, result)
    }

    async fn was_loaded(
        &self,
        req: Request<WasLoadedRequest>,
    ) -> Result<Response<WasLoadedResponse>, Status> {
        let started = Instant::now();
        increment_requests(WAS_LOADED);

        let loaded = self.generator.was_loaded(&req.get_ref().tag);
        finish(WAS_LOADED, started, Ok(WasLoadedResponse { loaded }))
    }

    #[tracing::instrument(skip_all, fields(tag = %req.get_ref().tag))]
    async fn preload(
        &self,
        req: Request<PreloadRequest>,
    ) -> Result<Response<PreloadResponse>, Status> {
        let started = Instant::now();
        increment_requests(PRELOAD);

        let PreloadRequest { tag, shard } = req.into_inner();
        let result = self
            .generator
            .preload(&tag, shard_from_proto(shard))
            .await
            .map(|()| PreloadResponse {})
            .map_err(Error::from);

        finish(PRELOAD, started, result)
    }
}
