use crate::{SeqKey, ShardKey, StorageError, WatermarkStorage, validate_tag};
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};

/// Watermark storage on the local filesystem.
///
/// Each key is one small text file holding the decimal watermark:
///
/// ```text
/// <root>/<tag>/i<n>          integer shard n
/// <root>/<tag>/s<hex bytes>  string shard
/// ```
///
/// Writes go to a sibling temp file that is synced and renamed over the
/// record, so a record is always either the old or the new value. Every write
/// holds an exclusive OS lock on `<record>.lock`, which makes
/// [`compare_and_swap`](WatermarkStorage::compare_and_swap) atomic across
/// handles and processes sharing the directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Creates a storage rooted at `root`. Directories are created on first
    /// write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &SeqKey) -> Result<PathBuf, StorageError> {
        let dir = self.root.join(&key.tag);
        if validate_tag(&key.tag).is_err() {
            return Err(StorageError::io(
                dir,
                std::io::Error::new(ErrorKind::InvalidInput, "tag is not a valid file name"),
            ));
        }
        Ok(dir.join(shard_file_name(&key.shard)))
    }

    /// Opens and exclusively locks the lock file guarding `record`. The lock
    /// is released when the returned handle is dropped.
    fn lock(record: &Path) -> Result<File, StorageError> {
        if let Some(dir) = record.parent() {
            fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
        }
        let path = with_suffix(record, ".lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;
        file.lock().map_err(|e| StorageError::io(&path, e))?;
        Ok(file)
    }
}

impl WatermarkStorage for FileStorage {
    fn read_watermark(&self, key: &SeqKey) -> Result<u64, StorageError> {
        read_record(&self.record_path(key)?)
    }

    fn write_watermark(&self, key: &SeqKey, value: u64) -> Result<(), StorageError> {
        let record = self.record_path(key)?;
        let _lock = Self::lock(&record)?;
        write_record(&record, value)
    }

    fn compare_and_swap(
        &self,
        key: &SeqKey,
        expected: u64,
        new: u64,
    ) -> Result<(), StorageError> {
        let record = self.record_path(key)?;
        let _lock = Self::lock(&record)?;

        let current = read_record(&record)?;
        if current != expected {
            return Err(StorageError::Conflict { current });
        }
        write_record(&record, new)
    }
}

fn shard_file_name(shard: &ShardKey) -> String {
    match shard {
        ShardKey::Int(n) => format!("i{n}"),
        ShardKey::Str(s) => {
            let mut name = String::with_capacity(1 + s.len() * 2);
            name.push('s');
            for b in s.bytes() {
                let _ = write!(name, "{b:02x}");
            }
            name
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

fn read_record(path: &Path) -> Result<u64, StorageError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    raw.trim().parse().map_err(|_| StorageError::Corrupt {
        path: path.to_owned(),
        content: raw,
    })
}

fn write_record(path: &Path, value: u64) -> Result<(), StorageError> {
    let tmp = with_suffix(path, ".tmp");
    {
        let mut file = File::create(&tmp).map_err(|e| StorageError::io(&tmp, e))?;
        file.write_all(value.to_string().as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| StorageError::io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| StorageError::io(path, e))?;

    // Persist the rename itself.
    #[cfg(unix)]
    if let Some(dir) = path.parent() {
        File::open(dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| StorageError::io(dir, e))?;
    }
    Ok(())
}
