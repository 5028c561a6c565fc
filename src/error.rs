use thiserror::Error;

/// Errors reported by an [`ImageSource`](crate::decode::ImageSource) while
/// probing or decoding encoded image data.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Not enough memory to hold the decoded pixels at this sample factor
    #[error("Insufficient memory: {requested} bytes requested at sample factor {sample_factor}")]
    OutOfMemory { requested: u64, sample_factor: u32 },

    /// The decoder needs more memory than its limit even at the smallest
    /// scale it can decode at, so a larger sample factor cannot help
    #[error("Decode needs {requested} bytes, over the decoder allocation limit")]
    ExceedsLimit { requested: u64 },

    /// Encoded data is not in a format the decoder understands
    #[error("Unsupported image format: {0}")]
    Unsupported(String),

    /// Encoded data is damaged or truncated
    #[error("Corrupt image data: {0}")]
    Corrupt(String),

    /// The source could not be read
    #[error("I/O error: {0}")]
    Io(String),
}

impl SourceError {
    /// Whether a retry at a larger sample factor may succeed.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, SourceError::OutOfMemory { .. })
    }
}

impl From<image::ImageError> for SourceError {
    fn from(err: image::ImageError) -> Self {
        use image::error::LimitErrorKind;
        use image::ImageError;

        match err {
            ImageError::Limits(limit) => match limit.kind() {
                LimitErrorKind::InsufficientMemory => SourceError::OutOfMemory {
                    requested: 0,
                    sample_factor: 0,
                },
                _ => SourceError::Unsupported(limit.to_string()),
            },
            ImageError::Unsupported(e) => SourceError::Unsupported(e.to_string()),
            ImageError::IoError(e) => SourceError::Io(e.to_string()),
            other => SourceError::Corrupt(other.to_string()),
        }
    }
}

/// Errors surfaced to callers of the decode pipeline.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The source could not be decoded (not retried)
    #[error("Decode failed: {0}")]
    Source(#[from] SourceError),

    /// Every retry at a larger sample factor ran out of memory
    #[error("Decode failed after retrying up to sample factor {last_factor}: {source}")]
    RetriesExhausted {
        last_factor: u32,
        #[source]
        source: SourceError,
    },

    /// The task was not run because its runner shut down
    #[error("Decode task cancelled")]
    Cancelled,
}

/// Errors from the disk tier.
///
/// These never reach callers of [`Cache`](crate::cache::Cache): a failing
/// disk tier degrades to a cache miss.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem error on a blob or the journal
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The journal header does not match this cache format
    #[error("Unexpected journal header: {0}")]
    JournalHeader(String),

    /// A blob could not be encoded or decoded
    #[error("Blob codec error: {0}")]
    Codec(String),

    /// The disk tier was disabled after a persistent I/O failure
    #[error("Disk cache disabled")]
    Disabled,
}
