//! Events delivered to run observers and their wire framing.

use serde::{Deserialize, Serialize};
use speedpulse_state::StoredResult;

use crate::parser::{Phase, Reading};

/// One message on a run's observer stream.
///
/// Serialized as `{"type": "progress" | "error" | "done", ...}`. `error` and
/// `done` are terminal: nothing follows them on the same stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress { phase: Phase, value: f64 },
    Error { message: String },
    Done { result: StoredResult },
}

impl ProgressEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress { .. })
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Error { .. } => "error",
            ProgressEvent::Done { .. } => "done",
        }
    }

    /// Server-sent-events frame: `data: <json>\n\n`.
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

impl From<Reading> for ProgressEvent {
    fn from(reading: Reading) -> Self {
        ProgressEvent::Progress {
            phase: reading.phase,
            value: reading.value,
        }
    }
}
