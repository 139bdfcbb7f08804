//! Error types for rewind-core operations.

/// All errors that can occur in rewind-core operations.
///
/// Most of the core deliberately does not surface these to callers: lifecycle
/// failures land in `CaptureState`, ingestion failures are logged and retried
/// on the next tick. The enum exists for the facade seams (storage, artifact
/// reads) where a concrete cause is worth keeping.
#[derive(Debug, thiserror::Error)]
pub enum RewindError {
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Convenience type alias for Results using RewindError.
pub type Result<T> = std::result::Result<T, RewindError>;

impl From<RewindError> for String {
    fn from(err: RewindError) -> String {
        err.to_string()
    }
}
