use crate::{SeqKey, StorageError, WatermarkStorage};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Process-local watermark storage.
///
/// Nothing survives a restart, so this is only disjoint for allocators that
/// share the same instance. Meant for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    watermarks: Mutex<HashMap<SeqKey, u64>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatermarkStorage for MemoryStorage {
    fn read_watermark(&self, key: &SeqKey) -> Result<u64, StorageError> {
        Ok(self.watermarks.lock().get(key).copied().unwrap_or(0))
    }

    fn write_watermark(&self, key: &SeqKey, value: u64) -> Result<(), StorageError> {
        self.watermarks.lock().insert(key.clone(), value);
        Ok(())
    }

    fn compare_and_swap(
        &self,
        key: &SeqKey,
        expected: u64,
        new: u64,
    ) -> Result<(), StorageError> {
        let mut watermarks = self.watermarks.lock();
        let current = watermarks.get(key).copied().unwrap_or(0);
        if current != expected {
            return Err(StorageError::Conflict { current });
        }
        watermarks.insert(key.clone(), new);
        Ok(())
    }
}
