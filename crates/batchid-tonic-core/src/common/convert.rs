//! Conversions between `batchid` types and their protobuf messages.

use crate::proto::{self, shard_key::Kind};
use batchid::{Batch, ShardKey};

impl From<&ShardKey> for proto::ShardKey {
    fn from(shard: &ShardKey) -> Self {
        let kind = match shard {
            ShardKey::Int(n) => Kind::Int(*n),
            ShardKey::Str(s) => Kind::Str(s.clone()),
        };
        Self { kind: Some(kind) }
    }
}

impl From<ShardKey> for proto::ShardKey {
    fn from(shard: ShardKey) -> Self {
        let kind = match shard {
            ShardKey::Int(n) => Kind::Int(n),
            ShardKey::Str(s) => Kind::Str(s),
        };
        Self { kind: Some(kind) }
    }
}

impl From<proto::ShardKey> for ShardKey {
    fn from(shard: proto::ShardKey) -> Self {
        match shard.kind {
            Some(Kind::Int(n)) => ShardKey::Int(n),
            Some(Kind::Str(s)) => ShardKey::Str(s),
            None => ShardKey::default(),
        }
    }
}

/// Reads an optional wire shard. A missing shard is the default shard.
pub fn shard_from_proto(shard: Option<proto::ShardKey>) -> ShardKey {
    shard.map(ShardKey::from).unwrap_or_default()
}

impl From<Batch> for proto::GetBatchResponse {
    fn from(batch: Batch) -> Self {
        Self {
            start: batch.start,
            len: batch.len,
        }
    }
}
