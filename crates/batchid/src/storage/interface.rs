use crate::{SeqKey, StorageError};

/// Durable persistence of one watermark per [`SeqKey`].
///
/// The watermark is the highest ID ever reserved for a key. Implementations
/// must make every write durable before returning `Ok`, and must make
/// [`compare_and_swap`](WatermarkStorage::compare_and_swap) atomic for a key
/// across every handle that shares the backend; allocators sharing one
/// backend rely on it to stay disjoint.
pub trait WatermarkStorage: Send + Sync {
    /// Returns the persisted watermark, or `0` if the key was never written.
    ///
    /// # Errors
    ///
    /// Fails if the record cannot be read or does not hold an integer.
    fn read_watermark(&self, key: &SeqKey) -> Result<u64, StorageError>;

    /// Persists `value` unconditionally.
    ///
    /// # Errors
    ///
    /// Fails if the value could not be made durable. The previous value is
    /// then still in place.
    fn write_watermark(&self, key: &SeqKey, value: u64) -> Result<(), StorageError>;

    /// Persists `new` only if the stored watermark is still `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] carrying the current value when it
    /// differs from `expected`, or another error if the write failed.
    fn compare_and_swap(
        &self,
        key: &SeqKey,
        expected: u64,
        new: u64,
    ) -> Result<(), StorageError>;
}
