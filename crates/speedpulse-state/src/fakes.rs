//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryResultStore` and `StaticSettings` that satisfy the trait
//! contracts without touching the filesystem.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::record::{RecordId, ResultRecord, StoredResult};
use crate::settings::Settings;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryResultStore
// ---------------------------------------------------------------------------

/// In-memory result store backed by an insertion-ordered `Vec`.
///
/// Counts insert calls (including failed ones) so tests can assert that a
/// failed run never reached persistence.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    rows: Mutex<Vec<StoredResult>>,
    insert_calls: AtomicUsize,
    fail_inserts: AtomicBool,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert fail with an I/O error.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Number of times `insert` has been called.
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of all stored rows in insertion order.
    pub fn rows(&self) -> Vec<StoredResult> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn insert(&self, record: &ResultRecord) -> StorageResult<RecordId> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "insert disabled",
            )));
        }
        let id = RecordId::new();
        let mut rows = self.rows.lock().unwrap();
        rows.push(StoredResult::new(id.clone(), record.clone()));
        Ok(id)
    }

    async fn get(&self, id: &RecordId) -> StorageResult<StoredResult> {
        let rows = self.rows.lock().unwrap();
        rows.iter()
            .find(|r| r.id == *id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound { id: id.0.clone() })
    }

    async fn query_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<StoredResult>> {
        let rows = self.rows.lock().unwrap();
        let mut matched: Vec<StoredResult> = rows
            .iter()
            .filter(|r| r.record.timestamp >= from && r.record.timestamp < to)
            .cloned()
            .collect();
        sort_chronological(&mut matched);
        Ok(matched)
    }

    async fn latest(&self, limit: usize) -> StorageResult<Vec<StoredResult>> {
        let mut rows = self.rows.lock().unwrap().clone();
        sort_chronological(&mut rows);
        rows.reverse(); // newest first
        rows.truncate(limit);
        Ok(rows)
    }

    async fn set_excluded(
        &self,
        id: &RecordId,
        excluded: bool,
        classification: Option<String>,
    ) -> StorageResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.id == *id)
            .ok_or_else(|| StorageError::NotFound { id: id.0.clone() })?;
        row.exclude_from_stats = excluded;
        row.classification = classification;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticSettings
// ---------------------------------------------------------------------------

/// Settings store that always returns the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    settings: Settings,
}

impl StaticSettings {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SettingsStore for StaticSettings {
    async fn load(&self) -> StorageResult<Settings> {
        Ok(self.settings.clone())
    }
}
