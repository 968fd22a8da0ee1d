//! Error taxonomy for the run pipeline.
//!
//! Only [`LaunchError`] and [`RunFailed`] ever reach observers (as an `error`
//! event). [`StartError::ConcurrentRunRejected`] is returned to the caller of
//! `start` directly because no session exists yet. Parse noise and observer
//! disconnects are absorbed and never become errors.

use std::path::PathBuf;

/// The measurement utility could not be started.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("measurement utility not found: {}", program.display())]
    NotFound { program: PathBuf },

    #[error("permission denied launching {}", program.display())]
    PermissionDenied { program: PathBuf },

    #[error("failed to launch {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("launched process has no {0} pipe")]
    MissingPipe(&'static str),
}

impl LaunchError {
    /// Classify a spawn failure by its I/O error kind.
    pub fn from_spawn(program: PathBuf, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => LaunchError::NotFound { program },
            std::io::ErrorKind::PermissionDenied => LaunchError::PermissionDenied { program },
            _ => LaunchError::Spawn { program, source },
        }
    }
}

/// Why a start request did not produce a running session.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("a measurement run is already in progress")]
    ConcurrentRunRejected,

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Terminal failure of a session that did start.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunFailed {
    /// Non-zero exit. The stderr tail is kept for diagnostics only and is
    /// deliberately absent from the display message.
    #[error("measurement utility exited with code {exit_code}")]
    ProcessFailure { exit_code: i32, stderr_tail: String },

    #[error("waiting for the measurement utility failed: {0}")]
    Wait(String),

    #[error("failed to persist result: {0}")]
    Persistence(String),

    #[error("run task aborted: {0}")]
    Aborted(String),
}

/// Errors loading pipeline configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Errors surfaced by the retry orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Start(#[from] StartError),

    #[error("storage unavailable: {0}")]
    Storage(#[from] speedpulse_state::StorageError),
}
