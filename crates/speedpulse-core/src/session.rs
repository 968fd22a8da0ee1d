//! State of one measurement attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::parser::LineParser;

/// Lifecycle of the coordinator's active slot.
///
/// `Idle -> Starting -> Running -> Finalizing -> Done`, with `Failed`
/// reachable from `Starting` (launch) and `Finalizing` (exit code or
/// persistence). The coordinator returns to `Idle` once the terminal event
/// is out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Starting,
    Running,
    Finalizing,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Finalizing => "finalizing",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt, owned by the coordinator's drive task.
#[derive(Debug)]
pub struct RunSession {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub state: RunState,
    pub parser: LineParser,
    pub stderr: StderrTail,
    /// Progress events emitted so far.
    pub readings: u64,
}

impl RunSession {
    pub fn new(stderr_limit: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            state: RunState::Starting,
            parser: LineParser::new(),
            stderr: StderrTail::new(stderr_limit),
            readings: 0,
        }
    }
}

/// The last `limit` bytes of stderr, trimmed at a char boundary.
#[derive(Debug, Clone, Default)]
pub struct StderrTail {
    text: String,
    limit: usize,
}

impl StderrTail {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        if self.text.len() <= self.limit {
            return;
        }
        let mut cut = self.text.len() - self.limit;
        while !self.text.is_char_boundary(cut) {
            cut += 1;
        }
        self.text.drain(..cut);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_starting() {
        let session = RunSession::new(64);
        assert_eq!(session.state, RunState::Starting);
        assert_eq!(session.parser.buffer(), "");
    }

    #[test]
    fn test_stderr_tail_keeps_last_bytes() {
        let mut tail = StderrTail::new(5);
        tail.push("abc");
        tail.push("defgh");
        assert_eq!(tail.as_str(), "defgh");
    }

    #[test]
    fn test_stderr_tail_respects_char_boundaries() {
        let mut tail = StderrTail::new(3);
        tail.push("aü!!");
        // "ü" is two bytes; a cut inside it moves forward past it.
        assert_eq!(tail.as_str(), "!!");
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunState::Finalizing).unwrap(),
            "\"finalizing\""
        );
        assert!(RunState::Failed.is_terminal());
        assert!(!RunState::Running.is_terminal());
    }
}
