//! Canonical measurement result and its stored form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder for textual fields the utility never reported.
pub const UNKNOWN: &str = "unknown";

/// Identifier assigned to a result when it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    /// Generate a new random RecordId
    pub fn new() -> Self {
        RecordId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one completed measurement run.
///
/// Core numeric fields are always present and default to zero when the
/// utility never reported them; core text fields default to [`UNKNOWN`].
/// Extended fields are only set when the utility printed them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub timestamp: DateTime<Utc>,
    /// Idle latency in milliseconds
    pub ping: f64,
    /// Download rate in Mbps
    pub download: f64,
    /// Upload rate in Mbps
    pub upload: f64,
    /// Packet loss in percent
    pub packet_loss: f64,
    pub isp: String,
    pub server_location: String,
    pub server_country: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_vpn: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_elapsed_ms: Option<u64>,
}

impl ResultRecord {
    /// A record with every field at its "never reported" value.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ping: 0.0,
            download: 0.0,
            upload: 0.0,
            packet_loss: 0.0,
            isp: UNKNOWN.to_string(),
            server_location: UNKNOWN.to_string(),
            server_country: UNKNOWN.to_string(),
            jitter: None,
            server_id: None,
            server_name: None,
            external_ip: None,
            is_vpn: None,
            result_url: None,
            download_bytes: None,
            upload_bytes: None,
            download_elapsed_ms: None,
            upload_elapsed_ms: None,
        }
    }
}

/// A persisted result: the immutable record plus the fields the store owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResult {
    pub id: RecordId,
    #[serde(flatten)]
    pub record: ResultRecord,
    /// Set post hoc by an operator to keep this row out of aggregates
    #[serde(default)]
    pub exclude_from_stats: bool,
    /// Free-form manual classification (e.g. "wifi", "maintenance window")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
}

impl StoredResult {
    pub fn new(id: RecordId, record: ResultRecord) -> Self {
        Self {
            id,
            record,
            exclude_from_stats: false,
            classification: None,
        }
    }
}
