//! Operator settings: quality thresholds, retry policy, server blacklist.
//!
//! Settings are read-only from the pipeline's point of view. They are loaded
//! from a TOML file by [`TomlSettingsStore`]; every section is optional.
//!
//! ```toml
//! # Entries match a server id or a sponsor name (case-insensitive).
//! server_blacklist = ["1234", "Example ISP"]
//!
//! [thresholds]
//! max_ping_ms = 80.0
//! min_download_mbps = 50.0
//!
//! [retry]
//! max_attempts = 3
//! delay_secs = 20
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{SettingsStore, StorageResult};

/// Limits a measurement must satisfy to count as acceptable.
///
/// Unset limits are not checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub max_ping_ms: Option<f64>,
    pub min_download_mbps: Option<f64>,
    pub min_upload_mbps: Option<f64>,
    pub max_packet_loss_pct: Option<f64>,
}

/// How many attempts an orchestrator may make when a run is unacceptable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one (1 = never retry).
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay_secs: u64,
    /// Retry when the result misses a quality threshold, not only on failure.
    pub retry_on_quality: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            delay_secs: 30,
            retry_on_quality: true,
        }
    }
}

/// Full settings snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server ids or server names whose results should not be accepted.
    pub server_blacklist: Vec<String>,
    pub thresholds: QualityThresholds,
    pub retry: RetryPolicy,
}

impl Settings {
    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(text: &str) -> StorageResult<Self> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> StorageResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(StorageError::InvalidSettings(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        let limits = [
            ("thresholds.max_ping_ms", self.thresholds.max_ping_ms),
            ("thresholds.min_download_mbps", self.thresholds.min_download_mbps),
            ("thresholds.min_upload_mbps", self.thresholds.min_upload_mbps),
            ("thresholds.max_packet_loss_pct", self.thresholds.max_packet_loss_pct),
        ];
        for (name, value) in limits {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(StorageError::InvalidSettings(format!(
                        "{name} must be a non-negative number, got {v}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether a server is blacklisted, by exact id or by sponsor name.
    pub fn is_blacklisted(&self, server_id: Option<&str>, server_name: Option<&str>) -> bool {
        self.server_blacklist.iter().any(|entry| {
            server_id.is_some_and(|id| id == entry)
                || server_name.is_some_and(|name| name.eq_ignore_ascii_case(entry))
        })
    }
}

/// Settings read from a TOML file on every `load`.
///
/// A missing file yields default settings so a fresh install works unconfigured.
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for TomlSettingsStore {
    async fn load(&self) -> StorageResult<Settings> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Settings::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "settings file missing, using defaults");
                Ok(Settings::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}
