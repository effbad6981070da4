//! Authoritative batch reservation.
//!
//! The [`Allocator`] owns the watermark of every `(tag, shard)` key. A batch is
//! only released after the storage has durably accepted the new watermark, so
//! a crash between the two wastes the batch but can never hand it out twice.

#[cfg(test)]
mod tests;

use crate::{
    Batch, Error, Result, SeqKey, ShardKey, StorageError, TagConfigs, WatermarkStorage,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Compare-and-swap rounds an allocation may lose to other allocators sharing
/// the storage before it reports [`Error::AllocationUnavailable`].
pub const MAX_CAS_ATTEMPTS: usize = 64;

/// Reserves disjoint ID ranges per `(tag, shard)`.
///
/// Allocations for one key are serialized by a per-key lock, so concurrent
/// callers in this process never race on a watermark, while different keys
/// proceed in parallel. Other allocator instances and processes sharing the
/// storage are kept disjoint by [`WatermarkStorage::compare_and_swap`].
pub struct Allocator {
    storage: Arc<dyn WatermarkStorage>,
    tags: TagConfigs,
    locks: Mutex<HashMap<SeqKey, Arc<Mutex<()>>>>,
}

impl Allocator {
    pub fn new(storage: Arc<dyn WatermarkStorage>, tags: TagConfigs) -> Self {
        Self {
            storage,
            tags,
            locks: Mutex::default(),
        }
    }

    pub fn tags(&self) -> &TagConfigs {
        &self.tags
    }

    pub fn storage(&self) -> &Arc<dyn WatermarkStorage> {
        &self.storage
    }

    /// Returns the persisted watermark of a key: the highest ID ever reserved
    /// for it, `0` if none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationUnavailable`] if the storage cannot be read.
    pub fn watermark(&self, tag: &str, shard: &ShardKey) -> Result<u64> {
        let key = SeqKey::new(tag, shard);
        self.storage.read_watermark(&key).map_err(storage_failure)
    }

    /// Reserves the next batch for `(tag, shard)`.
    ///
    /// Reads the watermark `w`, persists `w + step` and returns
    /// `[w + 1, w + 1 + step)`. For a fresh key the tag's configured `start`
    /// acts as a floor.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTag`] / [`Error::UnconfiguredTag`] /
    ///   [`Error::Configuration`] from the tag configuration.
    /// - [`Error::SequenceExhausted`] if the key has no room for another
    ///   batch.
    /// - [`Error::AllocationUnavailable`] if the storage failed, or lost more
    ///   than [`MAX_CAS_ATTEMPTS`] races. No batch was reserved.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn get_batch(&self, tag: &str, shard: &ShardKey) -> Result<Batch> {
        let config = self.tags.get(tag)?;
        let key = SeqKey::new(tag, shard);

        let lock = self.key_lock(&key);
        let _guard = lock.lock();

        let floor = config.start - 1;
        let mut current = self.storage.read_watermark(&key).map_err(storage_failure)?;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let base = current.max(floor);
            // The batch end (`base + step + 1`) must stay representable.
            let end = base
                .checked_add(config.step)
                .filter(|end| *end < u64::MAX)
                .ok_or_else(|| Error::SequenceExhausted {
                    tag: tag.to_owned(),
                })?;

            match self.storage.compare_and_swap(&key, current, end) {
                Ok(()) => {
                    let batch = Batch::new(base + 1, config.step);
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%key, start = batch.start, len = batch.len, "issued batch");
                    return Ok(batch);
                }
                Err(StorageError::Conflict { current: now }) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%key, expected = current, now, "watermark moved concurrently");
                    current = now;
                }
                Err(e) => return Err(storage_failure(e)),
            }
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(%key, "giving up after {MAX_CAS_ATTEMPTS} conflicting writes");

        Err(Error::unavailable(format!(
            "watermark of {key} kept changing; gave up after {MAX_CAS_ATTEMPTS} attempts"
        )))
    }

    fn key_lock(&self, key: &SeqKey) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().entry(key.clone()).or_default())
    }
}

fn storage_failure(e: StorageError) -> Error {
    #[cfg(feature = "tracing")]
    tracing::error!("watermark storage failed: {e}");
    Error::unavailable(format!("watermark storage failed: {e}"))
}
