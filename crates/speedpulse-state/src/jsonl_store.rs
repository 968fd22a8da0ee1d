//! Append-only JSON-lines result journal.
//!
//! Every mutation is one line in the journal file:
//!
//! ```text
//! {"op":"insert","row":{"id":"…","timestamp":"…","ping":12.1,…}}
//! {"op":"classify","id":"…","excluded":true,"classification":"wifi"}
//! ```
//!
//! The journal is replayed into memory on [`JsonlResultStore::open`]; reads
//! are served from memory and writes go to memory and disk together. Lines
//! that fail to parse are skipped with a warning so one torn write does not
//! make the whole history unreadable. A trailing partial line is cut off on
//! open, so the next append starts on a fresh line.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::record::{RecordId, ResultRecord, StoredResult};
use crate::storage_traits::*;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    Insert {
        row: StoredResult,
    },
    Classify {
        id: RecordId,
        excluded: bool,
        #[serde(default)]
        classification: Option<String>,
    },
}

/// File-backed [`ResultStore`].
#[derive(Debug)]
pub struct JsonlResultStore {
    path: PathBuf,
    rows: Mutex<Vec<StoredResult>>,
}

impl JsonlResultStore {
    /// Open (or lazily create) the journal at `path` and replay it.
    pub async fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let mut rows: Vec<StoredResult> = Vec::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                for (lineno, line) in text.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JournalEntry>(line) {
                        Ok(entry) => apply(&mut rows, entry),
                        Err(e) => warn!(
                            path = %path.display(),
                            line = lineno + 1,
                            error = %e,
                            "skipping unreadable journal line"
                        ),
                    }
                }
                if !text.is_empty() && !text.ends_with('\n') {
                    truncate_torn_tail(&path, &text).await?;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        debug!(path = %path.display(), rows = rows.len(), "result journal opened");
        Ok(Self {
            path,
            rows: Mutex::new(rows),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: &JournalEntry) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Drop everything after the last complete line.
async fn truncate_torn_tail(path: &Path, text: &str) -> StorageResult<()> {
    let keep = text.rfind('\n').map_or(0, |i| i + 1);
    warn!(
        path = %path.display(),
        dropped_bytes = text.len() - keep,
        "truncating partial journal line"
    );
    let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.set_len(keep as u64).await?;
    file.sync_all().await?;
    Ok(())
}

fn apply(rows: &mut Vec<StoredResult>, entry: JournalEntry) {
    match entry {
        JournalEntry::Insert { row } => rows.push(row),
        JournalEntry::Classify {
            id,
            excluded,
            classification,
        } => {
            if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
                row.exclude_from_stats = excluded;
                row.classification = classification;
            }
        }
    }
}

#[async_trait]
impl ResultStore for JsonlResultStore {
    async fn insert(&self, record: &ResultRecord) -> StorageResult<RecordId> {
        let row = StoredResult::new(RecordId::new(), record.clone());
        let id = row.id.clone();
        let entry = JournalEntry::Insert { row };

        // Held across the write so journal order matches memory order.
        let mut rows = self.rows.lock().await;
        self.append(&entry).await?;
        apply(&mut rows, entry);
        Ok(id)
    }

    async fn get(&self, id: &RecordId) -> StorageResult<StoredResult> {
        let rows = self.rows.lock().await;
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
        let rows = self.rows.lock().await;
        let mut matched: Vec<StoredResult> = rows
            .iter()
            .filter(|r| r.record.timestamp >= from && r.record.timestamp < to)
            .cloned()
            .collect();
        sort_chronological(&mut matched);
        Ok(matched)
    }

    async fn latest(&self, limit: usize) -> StorageResult<Vec<StoredResult>> {
        let mut rows = self.rows.lock().await.clone();
        sort_chronological(&mut rows);
        rows.reverse();
        rows.truncate(limit);
        Ok(rows)
    }

    async fn set_excluded(
        &self,
        id: &RecordId,
        excluded: bool,
        classification: Option<String>,
    ) -> StorageResult<()> {
        let mut rows = self.rows.lock().await;
        if !rows.iter().any(|r| r.id == *id) {
            return Err(StorageError::NotFound { id: id.0.clone() });
        }
        let entry = JournalEntry::Classify {
            id: id.clone(),
            excluded,
            classification,
        };
        self.append(&entry).await?;
        apply(&mut rows, entry);
        Ok(())
    }
}
