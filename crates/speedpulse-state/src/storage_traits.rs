//! Storage trait definitions for speedpulse
//!
//! These traits define the collaborators the run pipeline consumes:
//! - `ResultStore`: finished measurement persistence (insert, query by time)
//! - `SettingsStore`: read-only operator settings
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::record::{RecordId, ResultRecord, StoredResult};
use crate::settings::Settings;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ResultStore: Measurement Persistence
// ---------------------------------------------------------------------------

/// Persistence for finished measurements.
///
/// Guarantees:
/// - `insert` assigns a fresh identifier and never mutates the record.
/// - `query_range` returns rows with `from <= timestamp < to`, oldest first.
/// - `latest` returns at most `limit` rows, newest first.
/// - Only the store-owned flags change after insert (`set_excluded`).
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist a finished record, returning its assigned identifier.
    async fn insert(&self, record: &ResultRecord) -> StorageResult<RecordId>;

    /// Retrieve a stored result. Returns `StorageError::NotFound` if absent.
    async fn get(&self, id: &RecordId) -> StorageResult<StoredResult>;

    /// All results whose timestamp falls in `[from, to)`, oldest first.
    async fn query_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<StoredResult>>;

    /// The most recent `limit` results, newest first.
    async fn latest(&self, limit: usize) -> StorageResult<Vec<StoredResult>>;

    /// Mark a result as excluded from statistics and optionally classify it.
    async fn set_excluded(
        &self,
        id: &RecordId,
        excluded: bool,
        classification: Option<String>,
    ) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// SettingsStore: Operator Settings (read-only)
// ---------------------------------------------------------------------------

/// Read-only access to operator settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load the current settings snapshot.
    async fn load(&self) -> StorageResult<Settings>;
}

/// Sort rows oldest first. The sort is stable, so rows sharing a timestamp
/// keep their insertion order.
pub(crate) fn sort_chronological(rows: &mut [StoredResult]) {
    rows.sort_by_key(|row| row.record.timestamp);
}
