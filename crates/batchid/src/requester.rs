use crate::{Allocator, Batch, Error, Result, ShardKey};
use std::sync::Arc;

/// How a client obtains batches from an allocator.
///
/// The in-process variant is [`LocalRequester`]. A gRPC variant talking to a
/// remote allocator lives in `batchid-tonic-core`. Implementations surface
/// failures immediately and never retry on their own.
pub trait BatchRequester: Send + Sync {
    /// Reserves the next batch for `(tag, shard)`.
    fn get_batch(
        &self,
        tag: &str,
        shard: &ShardKey,
    ) -> impl Future<Output = Result<Batch>> + Send;
}

impl<R: BatchRequester> BatchRequester for Arc<R> {
    fn get_batch(
        &self,
        tag: &str,
        shard: &ShardKey,
    ) -> impl Future<Output = Result<Batch>> + Send {
        (**self).get_batch(tag, shard)
    }
}

/// Calls an [`Allocator`] owned by the same process.
///
/// The allocator locks and writes storage synchronously, so each call runs on
/// tokio's blocking pool and never stalls an async worker.
#[derive(Clone)]
pub struct LocalRequester {
    allocator: Arc<Allocator>,
}

impl LocalRequester {
    pub fn new(allocator: Arc<Allocator>) -> Self {
        Self { allocator }
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }
}

impl BatchRequester for LocalRequester {
    async fn get_batch(&self, tag: &str, shard: &ShardKey) -> Result<Batch> {
        let allocator = Arc::clone(&self.allocator);
        let (tag, shard) = (tag.to_owned(), shard.clone());
        tokio::task::spawn_blocking(move || allocator.get_batch(&tag, &shard))
            .await
            .map_err(|e| Error::unavailable(format!("allocation task failed: {e}")))?
    }
}
