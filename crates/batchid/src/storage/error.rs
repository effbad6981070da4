use std::path::PathBuf;

/// Errors raised by a [`WatermarkStorage`] backend.
///
/// [`WatermarkStorage`]: crate::WatermarkStorage
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum StorageError {
    /// Reading, writing, syncing or locking a record failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record exists but does not hold a watermark.
    #[error("Corrupt watermark record {}: {content:?}", path.display())]
    Corrupt { path: PathBuf, content: String },

    /// A compare-and-swap lost against a concurrent writer.
    #[error("Watermark changed concurrently (now {current})")]
    Conflict { current: u64 },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
