use core::ops::Range;

/// A reserved, half-open range of IDs: `[start, start + len)`.
///
/// Batches for the same key are disjoint across every allocator instance,
/// process and restart that shares a storage backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Batch {
    pub start: u64,
    pub len: u64,
}

impl Batch {
    pub const fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    /// One past the last ID of the batch.
    pub const fn end(&self) -> u64 {
        self.start + self.len
    }

    pub const fn range(&self) -> Range<u64> {
        self.start..self.end()
    }

    pub const fn contains(&self, id: u64) -> bool {
        id >= self.start && id < self.end()
    }

    pub const fn overlaps(&self, other: &Batch) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Per-key client state: the batch currently being served and the next
/// unissued value inside it.
#[derive(Debug, Default)]
pub(crate) struct CacheEntry {
    batch: Option<Batch>,
    cursor: u64,
}

impl CacheEntry {
    pub(crate) fn is_loaded(&self) -> bool {
        self.batch.is_some()
    }

    pub(crate) fn remaining(&self) -> u64 {
        self.batch.map_or(0, |b| b.end() - self.cursor)
    }

    /// Whether `batch` lies entirely above everything this entry has issued.
    pub(crate) fn accepts(&self, batch: &Batch) -> bool {
        self.batch.is_none_or(|b| batch.start >= b.end())
    }

    /// Replaces the cached batch. Whatever was left of the old one is
    /// forfeited.
    pub(crate) fn refill(&mut self, batch: Batch) {
        self.batch = Some(batch);
        self.cursor = batch.start;
    }

    /// Issues the next value, or `None` when the batch is used up.
    pub(crate) fn take(&mut self) -> Option<u64> {
        if self.remaining() == 0 {
            return None;
        }
        let id = self.cursor;
        self.cursor += 1;
        Some(id)
    }

    /// Issues up to `want` values into `out`, returning how many were taken.
    pub(crate) fn take_into(&mut self, want: u64, out: &mut Vec<u64>) -> u64 {
        let n = want.min(self.remaining());
        out.extend(self.cursor..self.cursor + n);
        self.cursor += n;
        n
    }
}
