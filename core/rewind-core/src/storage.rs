//! Facade traits for the collaborators this core consumes: durable record
//! storage, the alert-rule store, and the filesystem holding the capture
//! artifact. Production code injects real implementations (SQLite in the
//! daemon, `FsArtifactSource` here); tests inject in-memory fakes.

use chrono::{DateTime, Utc};
use std::path::Path;

use crate::error::{Result, RewindError};
use crate::types::{AlertRule, NormalizedRecord, Notification};

/// Durable storage for normalized records. Upserts are keyed by `record_id`,
/// so duplicate delivery from ingestion is harmless by construction.
pub trait RecordStore: Send + Sync {
    fn upsert_batch(&self, records: &[NormalizedRecord]) -> Result<()>;
    fn count_all(&self) -> Result<u64>;
    /// Removes every stored record and returns how many were deleted.
    /// Callers should follow up with `SyncEngine::reset_synced_tracking`.
    fn delete_all(&self) -> Result<u64>;
}

/// Read/write access to externally-managed alert rules and notifications.
pub trait RuleStore: Send + Sync {
    fn list_enabled_rules(&self) -> Result<Vec<AlertRule>>;
    fn mark_triggered(&self, rule_id: &str, at: DateTime<Utc>) -> Result<()>;
    fn insert_notification(&self, notification: &Notification) -> Result<()>;
}

/// Access to the artifact the capture agent rewrites periodically.
pub trait ArtifactSource: Send + Sync {
    /// Last-modified time, or `None` when the artifact does not exist yet
    /// (an expected transient condition, not an error).
    fn modified_time(&self, path: &Path) -> Option<DateTime<Utc>>;
    fn read_full(&self, path: &Path) -> Result<Vec<u8>>;
}

/// Real filesystem implementation of [`ArtifactSource`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FsArtifactSource;

impl ArtifactSource for FsArtifactSource {
    fn modified_time(&self, path: &Path) -> Option<DateTime<Utc>> {
        let metadata = fs_err::metadata(path).ok()?;
        let modified = metadata.modified().ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    fn read_full(&self, path: &Path) -> Result<Vec<u8>> {
        fs_err::read(path).map_err(|err| RewindError::Io {
            context: format!("reading artifact {}", path.display()),
            source: err,
        })
    }
}
