//! Quality gate over finished results.

use serde::{Deserialize, Serialize};
use speedpulse_state::{ResultRecord, Settings};

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum QualityViolation {
    PingTooHigh { value: f64, limit: f64 },
    DownloadTooLow { value: f64, limit: f64 },
    UploadTooLow { value: f64, limit: f64 },
    PacketLossTooHigh { value: f64, limit: f64 },
    BlacklistedServer { server: String },
}

impl std::fmt::Display for QualityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityViolation::PingTooHigh { value, limit } => {
                write!(f, "ping {value} ms exceeds {limit} ms")
            }
            QualityViolation::DownloadTooLow { value, limit } => {
                write!(f, "download {value} Mbps below {limit} Mbps")
            }
            QualityViolation::UploadTooLow { value, limit } => {
                write!(f, "upload {value} Mbps below {limit} Mbps")
            }
            QualityViolation::PacketLossTooHigh { value, limit } => {
                write!(f, "packet loss {value}% exceeds {limit}%")
            }
            QualityViolation::BlacklistedServer { server } => {
                write!(f, "server '{server}' is blacklisted")
            }
        }
    }
}

/// Gate evaluation verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<QualityViolation>,

    /// Summary message.
    pub message: String,
}

/// Threshold and blacklist rules for a single result.
pub struct QualityGate;

impl QualityGate {
    /// Check `record` against the thresholds and blacklist in `settings`.
    ///
    /// Unset thresholds are skipped. A blacklist entry matches the server id
    /// exactly or the server name case-insensitively.
    pub fn evaluate(record: &ResultRecord, settings: &Settings) -> QualityVerdict {
        let limits = &settings.thresholds;
        let mut violations = Vec::new();

        if let Some(limit) = limits.max_ping_ms {
            if record.ping > limit {
                violations.push(QualityViolation::PingTooHigh {
                    value: record.ping,
                    limit,
                });
            }
        }
        if let Some(limit) = limits.min_download_mbps {
            if record.download < limit {
                violations.push(QualityViolation::DownloadTooLow {
                    value: record.download,
                    limit,
                });
            }
        }
        if let Some(limit) = limits.min_upload_mbps {
            if record.upload < limit {
                violations.push(QualityViolation::UploadTooLow {
                    value: record.upload,
                    limit,
                });
            }
        }
        if let Some(limit) = limits.max_packet_loss_pct {
            if record.packet_loss > limit {
                violations.push(QualityViolation::PacketLossTooHigh {
                    value: record.packet_loss,
                    limit,
                });
            }
        }
        if settings.is_blacklisted(record.server_id.as_deref(), record.server_name.as_deref()) {
            let server = record
                .server_name
                .clone()
                .or_else(|| record.server_id.clone())
                .unwrap_or_default();
            violations.push(QualityViolation::BlacklistedServer { server });
        }

        let passed = violations.is_empty();
        let message = if passed {
            "All quality checks passed".to_string()
        } else {
            format!("Quality gate failed with {} violation(s)", violations.len())
        };

        QualityVerdict {
            passed,
            violations,
            message,
        }
    }
}
