//! Client-side ID generation from cached batches.
//!
//! An [`IdGenerator`] keeps one batch per `(tag, shard)` and hands out its
//! values in order. When a batch runs out the next one is fetched through the
//! [`BatchRequester`] while the key's entry stays locked, so concurrent callers
//! of the same key queue behind the refill instead of fetching twice.
//!
//! Cached batches are never persisted. IDs left in a batch when the process
//! stops are skipped for good; allocation stays unique and increasing, only
//! dense sequences are given up.


use crate::batch::CacheEntry;
use crate::{BatchRequester, Error, Result, SeqKey, ShardKey, validate_tag};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Upper bound on the up-front allocation for one `batch_generate` result.
const MAX_PREALLOCATED_IDS: u64 = 1 << 16;

/// Rejects a `batch_generate` of `count` IDs when it exceeds `max`.
///
/// # Errors
///
/// Returns [`Error::InvalidRequest`] if `count > max`.
pub fn check_batch_count(count: u64, max: Option<u64>) -> Result<()> {
    match max {
        Some(max) if count > max => Err(Error::InvalidRequest {
            reason: format!("count {count} exceeds the maximum of {max} IDs per call"),
        }),
        _ => Ok(()),
    }
}

/// Serves IDs from per-key batches obtained through `R`.
pub struct IdGenerator<R> {
    requester: R,
    max_batch_generate: Option<u64>,
    entries: RwLock<HashMap<SeqKey, Arc<Mutex<CacheEntry>>>>,
    loaded_tags: RwLock<HashSet<String>>,
}

impl<R> IdGenerator<R>
where
    R: BatchRequester,
{
    pub fn new(requester: R) -> Self {
        Self {
            requester,
            max_batch_generate: None,
            entries: RwLock::default(),
            loaded_tags: RwLock::default(),
        }
    }

    /// Caps the number of IDs a single [`IdGenerator::batch_generate`] call
    /// may ask for. Unlimited by default.
    #[must_use]
    pub fn with_max_batch_generate(mut self, max: u64) -> Self {
        self.max_batch_generate = Some(max);
        self
    }

    pub fn requester(&self) -> &R {
        &self.requester
    }

    pub fn max_batch_generate(&self) -> Option<u64> {
        self.max_batch_generate
    }

    /// Returns the next unused ID of `(tag, shard)`.
    ///
    /// Fetches a new batch first if the key has none cached or has used it
    /// up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTag`] for unusable tag names, otherwise
    /// whatever the requester reported for the refill (for example
    /// [`Error::UnconfiguredTag`] or [`Error::AllocationUnavailable`]).
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self, shard)))]
    pub async fn generate(&self, tag: &str, shard: impl Into<ShardKey>) -> Result<u64> {
        validate_tag(tag)?;
        let key = SeqKey::new(tag, shard);
        let entry = self.entry(&key);
        let mut entry = entry.lock().await;

        if let Some(id) = entry.take() {
            return Ok(id);
        }
        self.refill(&key, &mut entry).await?;
        entry
            .take()
            .ok_or_else(|| Error::unavailable(format!("empty batch for {key}")))
    }

    /// Returns `count` strictly increasing IDs of `(tag, shard)`.
    ///
    /// Batches are fetched as needed while the result is filled. Values are
    /// contiguous within a batch; a batch boundary may leave a gap.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `count` exceeds the configured
    /// maximum; nothing is drawn then. If any refill fails the whole call
    /// fails and nothing is returned. IDs already drawn from the cache for
    /// this call are not given back, so a retry continues after them.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self, shard)))]
    pub async fn batch_generate(
        &self,
        tag: &str,
        count: u64,
        shard: impl Into<ShardKey>,
    ) -> Result<Vec<u64>> {
        validate_tag(tag)?;
        if count == 0 {
            return Ok(Vec::new());
        }
        check_batch_count(count, self.max_batch_generate)?;

        let key = SeqKey::new(tag, shard);
        let entry = self.entry(&key);
        let mut entry = entry.lock().await;

        let capacity = usize::try_from(count.min(MAX_PREALLOCATED_IDS)).unwrap_or_default();
        let mut ids = Vec::with_capacity(capacity);
        let mut missing = count;
        loop {
            missing -= entry.take_into(missing, &mut ids);
            if missing == 0 {
                return Ok(ids);
            }
            self.refill(&key, &mut entry).await?;
        }
    }

    /// Whether any shard of `tag` has loaded a batch in this generator.
    pub fn was_loaded(&self, tag: &str) -> bool {
        self.loaded_tags.read().contains(tag)
    }

    /// Loads a batch for `(tag, shard)` unless one is already cached.
    ///
    /// # Errors
    ///
    /// Same as [`IdGenerator::generate`].
    pub async fn preload(&self, tag: &str, shard: impl Into<ShardKey>) -> Result<()> {
        validate_tag(tag)?;
        let key = SeqKey::new(tag, shard);
        let entry = self.entry(&key);
        let mut entry = entry.lock().await;

        if !entry.is_loaded() {
            self.refill(&key, &mut entry).await?;
        }
        Ok(())
    }

    fn entry(&self, key: &SeqKey) -> Arc<Mutex<CacheEntry>> {
        if let Some(entry) = self.entries.read().get(key) {
            return Arc::clone(entry);
        }
        Arc::clone(self.entries.write().entry(key.clone()).or_default())
    }

    async fn refill(&self, key: &SeqKey, entry: &mut CacheEntry) -> Result<()> {
        let batch = self.requester.get_batch(&key.tag, &key.shard).await?;

        if batch.len == 0 {
            return Err(Error::unavailable(format!(
                "allocator returned an empty batch for {key}"
            )));
        }
        if !entry.accepts(&batch) {
            #[cfg(feature = "tracing")]
            tracing::error!(%key, start = batch.start, "allocator returned a batch below the cached one");
            return Err(Error::unavailable(format!(
                "allocator returned batch starting at {} for {key}, below IDs already issued",
                batch.start
            )));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(%key, start = batch.start, len = batch.len, "refilled batch");

        entry.refill(batch);
        if !self.was_loaded(&key.tag) {
            self.loaded_tags.write().insert(key.tag.clone());
        }
        Ok(())
    }
}
