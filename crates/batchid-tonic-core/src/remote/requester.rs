use super::reply;
use crate::proto::{GetBatchRequest, GetBatchResponse, batch_service_client::BatchServiceClient};
use crate::{HostAddr, balanced_channel};
use batchid::{Batch, BatchRequester, Error, Result, ShardKey};
use core::time::Duration;
use tonic::transport::Channel;

/// Fetches batches from allocator processes over gRPC.
///
/// Cloning is cheap and shares the underlying channel.
#[derive(Clone, Debug)]
pub struct RemoteRequester {
    client: BatchServiceClient<Channel>,
}

impl RemoteRequester {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: BatchServiceClient::new(channel),
        }
    }

    /// Balances requests across `hosts`, connecting on first use. Each call
    /// is bounded by `request_timeout` when one is given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `hosts` is empty.
    pub fn connect_lazy(hosts: &[HostAddr], request_timeout: Option<Duration>) -> Result<Self> {
        balanced_channel(hosts, request_timeout).map(Self::new)
    }
}

impl BatchRequester for RemoteRequester {
    async fn get_batch(&self, tag: &str, shard: &ShardKey) -> Result<Batch> {
        let request = GetBatchRequest {
            tag: tag.to_owned(),
            shard: Some(shard.into()),
        };
        let mut client = self.client.clone();
        let response = reply(tag, client.get_batch(request).await)?;
        batch_from_response(tag, &response)
    }
}

/// Accepts a reply only if it names a non-empty range that fits in `u64`.
fn batch_from_response(tag: &str, response: &GetBatchResponse) -> Result<Batch> {
    if response.len == 0 || response.start.checked_add(response.len).is_none() {
        return Err(Error::AllocationUnavailable {
            reason: format!(
                "allocator returned unusable batch start={} len={} for `{tag}`",
                response.start, response.len
            ),
        });
    }
    Ok(Batch::new(response.start, response.len))
}
