use super::reply;
use crate::proto::{
    BatchGenerateRequest, GenerateRequest, PreloadRequest, WasLoadedRequest,
    id_service_client::IdServiceClient,
};
use crate::{HostAddr, balanced_channel, proto};
use batchid::{Error, Result, ShardKey, check_batch_count};
use core::time::Duration;
use tonic::transport::Channel;

/// Client of a generator process: the same contract as a local
/// [`IdGenerator`](batchid::IdGenerator), served over gRPC.
///
/// IDs come from the cache of whichever generator host answers the call.
/// That host enforces its own `batch_generate` limit; a limit set here is
/// checked before the call is sent.
#[derive(Clone, Debug)]
pub struct RemoteGenerator {
    client: IdServiceClient<Channel>,
    max_batch_generate: Option<u64>,
}

impl RemoteGenerator {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: IdServiceClient::new(channel),
            max_batch_generate: None,
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

    #[must_use]
    pub fn with_max_batch_generate(mut self, max: u64) -> Self {
        self.max_batch_generate = Some(max);
        self
    }

    pub async fn generate(&self, tag: &str, shard: impl Into<ShardKey>) -> Result<u64> {
        let request = GenerateRequest {
            tag: tag.to_owned(),
            shard: Some(wire_shard(shard)),
        };
        let mut client = self.client.clone();
        Ok(reply(tag, client.generate(request).await)?.id)
    }

    /// Returns `count` IDs; `count == 0` is answered locally.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] if `count` exceeds the local limit, without
    /// a call being made. Besides the remote error, a response that does not hold exactly
    /// `count` strictly increasing IDs is reported as
    /// [`Error::AllocationUnavailable`].
    pub async fn batch_generate(
        &self,
        tag: &str,
        count: u64,
        shard: impl Into<ShardKey>,
    ) -> Result<Vec<u64>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        check_batch_count(count, self.max_batch_generate)?;
        let request = BatchGenerateRequest {
            tag: tag.to_owned(),
            count,
            shard: Some(wire_shard(shard)),
        };
        let mut client = self.client.clone();
        let ids = reply(tag, client.batch_generate(request).await)?.ids;

        let increasing = ids.windows(2).all(|pair| pair[0] < pair[1]);
        if ids.len() as u64 != count || !increasing {
            return Err(Error::AllocationUnavailable {
                reason: format!("generator returned a malformed batch for `{tag}`"),
            });
        }
        Ok(ids)
    }

    pub async fn was_loaded(&self, tag: &str) -> Result<bool> {
        let request = WasLoadedRequest {
            tag: tag.to_owned(),
        };
        let mut client = self.client.clone();
        Ok(reply(tag, client.was_loaded(request).await)?.loaded)
    }

    pub async fn preload(&self, tag: &str, shard: impl Into<ShardKey>) -> Result<()> {
        let request = PreloadRequest {
            tag: tag.to_owned(),
            shard: Some(wire_shard(shard)),
        };
        let mut client = self.client.clone();
        reply(tag, client.preload(request).await)?;
        Ok(())
    }
}

fn wire_shard(shard: impl Into<ShardKey>) -> proto::ShardKey {
    let shard: ShardKey = shard.into();
    proto::ShardKey::from(shard)
}
