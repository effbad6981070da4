use crate::{
    Allocator, Batch, Error, FileStorage, MAX_CAS_ATTEMPTS, MemoryStorage, SeqKey, ShardKey,
    StorageError, TagConfig, TagConfigs, WatermarkStorage,
};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::scope;

fn default_shard() -> ShardKey {
    ShardKey::default()
}

fn memory_allocator(steps: &[(&str, u64)]) -> (Allocator, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let allocator = Allocator::new(
        storage.clone(),
        TagConfigs::from_steps(steps.iter().copied()),
    );
    (allocator, storage)
}

/// Fails every write, as a full disk or a revoked mount would.
struct BrokenStorage;

impl WatermarkStorage for BrokenStorage {
    fn read_watermark(&self, _key: &SeqKey) -> Result<u64, StorageError> {
        Ok(0)
    }

    fn write_watermark(&self, _key: &SeqKey, _value: u64) -> Result<(), StorageError> {
        Err(StorageError::Io {
            path: "/broken".into(),
            source: io::Error::other("disk full"),
        })
    }

    fn compare_and_swap(
        &self,
        key: &SeqKey,
        _expected: u64,
        new: u64,
    ) -> Result<(), StorageError> {
        self.write_watermark(key, new)
    }
}

/// Loses every compare-and-swap to an imaginary faster writer.
struct RacingStorage {
    attempts: AtomicUsize,
}

impl WatermarkStorage for RacingStorage {
    fn read_watermark(&self, _key: &SeqKey) -> Result<u64, StorageError> {
        Ok(0)
    }

    fn write_watermark(&self, _key: &SeqKey, _value: u64) -> Result<(), StorageError> {
        Ok(())
    }

    fn compare_and_swap(
        &self,
        _key: &SeqKey,
        expected: u64,
        _new: u64,
    ) -> Result<(), StorageError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        Err(StorageError::Conflict {
            current: expected + 10,
        })
    }
}

fn assert_disjoint(mut batches: Vec<Batch>) {
    batches.sort_by_key(|b| b.start);
    for pair in batches.windows(2) {
        assert!(
            !pair[0].overlaps(&pair[1]),
            "overlapping batches {:?} and {:?}",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn first_batches_are_consecutive_steps() {
    let (allocator, storage) = memory_allocator(&[("order", 1000)]);
    let shard = default_shard();

    assert_eq!(allocator.get_batch("order", &shard).unwrap(), Batch::new(1, 1000));
    assert_eq!(
        allocator.get_batch("order", &shard).unwrap(),
        Batch::new(1001, 1000)
    );
    assert_eq!(
        storage
            .read_watermark(&SeqKey::new("order", shard))
            .unwrap(),
        2000
    );
}

#[test]
fn shards_and_tags_have_independent_counters() {
    let (allocator, _) = memory_allocator(&[("order", 10), ("user", 3)]);

    assert_eq!(allocator.get_batch("order", &1.into()).unwrap().start, 1);
    assert_eq!(allocator.get_batch("order", &2.into()).unwrap().start, 1);
    assert_eq!(allocator.get_batch("order", &"1".into()).unwrap().start, 1);
    assert_eq!(allocator.get_batch("order", &1.into()).unwrap().start, 11);
    assert_eq!(
        allocator.get_batch("user", &1.into()).unwrap(),
        Batch::new(1, 3)
    );
}

#[test]
fn configured_start_is_a_floor_for_fresh_keys() {
    let storage = Arc::new(MemoryStorage::new());
    let allocator = Allocator::new(
        storage.clone(),
        TagConfigs::default().with(
            "invoice",
            TagConfig {
                step: 100,
                start: 10_000,
            },
        ),
    );
    let shard = default_shard();

    assert_eq!(
        allocator.get_batch("invoice", &shard).unwrap(),
        Batch::new(10_000, 100)
    );
    assert_eq!(allocator.get_batch("invoice", &shard).unwrap().start, 10_100);

    // A watermark already past the floor wins.
    let other = ShardKey::from("migrated");
    storage
        .write_watermark(&SeqKey::new("invoice", other.clone()), 50_000)
        .unwrap();
    assert_eq!(allocator.get_batch("invoice", &other).unwrap().start, 50_001);
}

#[test]
fn restart_resumes_above_the_persisted_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let shard = ShardKey::from("X");

    FileStorage::new(dir.path())
        .write_watermark(&SeqKey::new("tag", shard.clone()), 5000)
        .unwrap();

    let allocator = Allocator::new(
        Arc::new(FileStorage::new(dir.path())),
        TagConfigs::from_steps([("tag", 100)]),
    );
    assert_eq!(
        allocator.get_batch("tag", &shard).unwrap(),
        Batch::new(5001, 100)
    );
    drop(allocator);

    // Second "crash": the in-memory state is gone, the watermark is not.
    let allocator = Allocator::new(
        Arc::new(FileStorage::new(dir.path())),
        TagConfigs::from_steps([("tag", 100)]),
    );
    assert_eq!(allocator.watermark("tag", &shard).unwrap(), 5100);
    assert_eq!(allocator.get_batch("tag", &shard).unwrap().start, 5101);
}

#[test]
fn unconfigured_tags_reserve_nothing() {
    let (allocator, storage) = memory_allocator(&[("order", 10)]);
    let shard = default_shard();

    assert_eq!(
        allocator.get_batch("invoice", &shard),
        Err(Error::UnconfiguredTag {
            tag: "invoice".into()
        })
    );
    assert_eq!(
        storage
            .read_watermark(&SeqKey::new("invoice", shard))
            .unwrap(),
        0
    );
}

#[test]
fn storage_failures_release_no_batch() {
    let allocator = Allocator::new(
        Arc::new(BrokenStorage),
        TagConfigs::from_steps([("order", 10)]),
    );
    assert!(matches!(
        allocator.get_batch("order", &default_shard()),
        Err(Error::AllocationUnavailable { .. })
    ));
}

#[test]
fn endless_conflicts_are_bounded() {
    let storage = Arc::new(RacingStorage {
        attempts: AtomicUsize::new(0),
    });
    let allocator = Allocator::new(storage.clone(), TagConfigs::from_steps([("order", 10)]));

    assert!(matches!(
        allocator.get_batch("order", &default_shard()),
        Err(Error::AllocationUnavailable { .. })
    ));
    assert_eq!(storage.attempts.load(Ordering::Relaxed), MAX_CAS_ATTEMPTS);
}

#[test]
fn exhausted_keys_fail_instead_of_wrapping() {
    let (allocator, storage) = memory_allocator(&[("order", 10)]);
    let shard = default_shard();
    storage
        .write_watermark(&SeqKey::new("order", shard.clone()), u64::MAX - 15)
        .unwrap();

    assert_eq!(
        allocator.get_batch("order", &shard).unwrap(),
        Batch::new(u64::MAX - 14, 10)
    );
    assert_eq!(
        allocator.get_batch("order", &shard),
        Err(Error::SequenceExhausted {
            tag: "order".into()
        })
    );
}

#[test]
fn concurrent_callers_of_one_allocator_get_disjoint_batches() {
    const THREADS: usize = 8;
    const BATCHES: usize = 100;

    let (allocator, _) = memory_allocator(&[("order", 7)]);
    let shard = default_shard();

    let batches: Vec<Batch> = scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    (0..BATCHES)
                        .map(|_| allocator.get_batch("order", &shard).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    assert_eq!(batches.len(), THREADS * BATCHES);
    assert_disjoint(batches);
}

#[test]
fn allocators_sharing_memory_storage_never_overlap() {
    let storage: Arc<dyn WatermarkStorage> = Arc::new(MemoryStorage::new());
    let a = Allocator::new(storage.clone(), TagConfigs::from_steps([("order", 5)]));
    let b = Allocator::new(storage, TagConfigs::from_steps([("order", 5)]));
    let shard = default_shard();

    let batches: Vec<Batch> = scope(|s| {
        let handles: Vec<_> = [&a, &b, &a, &b]
            .into_iter()
            .map(|allocator| {
                let shard = &shard;
                s.spawn(move || {
                    (0..200)
                        .map(|_| allocator.get_batch("order", shard).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    assert_eq!(batches.len(), 800);
    assert_disjoint(batches);
}

#[test]
fn allocators_sharing_a_storage_directory_never_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let a = Allocator::new(
        Arc::new(FileStorage::new(dir.path())),
        TagConfigs::from_steps([("order", 50)]),
    );
    let b = Allocator::new(
        Arc::new(FileStorage::new(dir.path())),
        TagConfigs::from_steps([("order", 50)]),
    );
    let shard = ShardKey::from("X");

    let batches: Vec<Batch> = scope(|s| {
        let handles: Vec<_> = [&a, &b]
            .into_iter()
            .map(|allocator| {
                let shard = &shard;
                s.spawn(move || {
                    (0..40)
                        .map(|_| allocator.get_batch("order", shard).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    assert_eq!(batches.len(), 80);
    assert_disjoint(batches);
    assert_eq!(a.watermark("order", &shard).unwrap(), 80 * 50);
}
