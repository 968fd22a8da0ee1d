//! Speedpulse Core: the measurement run pipeline
//!
//! Drives one run of the Ookla `speedtest` CLI at a time and turns its loose
//! text output into typed progress events and a single persisted result.
//!
//! ## Key Components
//!
//! - `launcher`: spawns the utility from an allow-listed [`Invocation`]
//! - `parser`: incremental, chunk-boundary-safe extraction of readings
//! - `emitter`: per-session publish/subscribe hub with bounded queues
//! - `finalizer`: authoritative re-scan of the full buffer at exit
//! - `coordinator`: single-flight state machine tying the above together
//! - `gate` / `retry`: quality checks and retry orchestration over runs
//! - `obs` / `metrics` / `telemetry`: tracing hooks, counters, subscriber init

pub mod config;
pub mod coordinator;
pub mod emitter;
pub mod error;
pub mod events;
pub mod fakes;
pub mod finalizer;
pub mod gate;
pub mod invocation;
pub mod launcher;
pub mod metrics;
pub mod obs;
pub mod parser;
mod patterns;
pub mod retry;
pub mod session;
pub mod telemetry;

pub use config::CoreConfig;
pub use coordinator::{RunCoordinator, RunHandle, RunOutcome};
pub use emitter::{EventHub, EventStream};
pub use error::{ConfigError, LaunchError, OrchestratorError, RunFailed, StartError};
pub use events::ProgressEvent;
pub use finalizer::{finalize, NonZeroExit};
pub use gate::{QualityGate, QualityVerdict, QualityViolation};
pub use invocation::{Invocation, UtilityFlag};
pub use launcher::{LaunchedProcess, Launcher, ProcessLauncher};
pub use metrics::METRICS;
pub use obs::{
    emit_gate_evaluated, emit_launch_failed, emit_observer_dropped, emit_persisted,
    emit_progress, emit_run_failed, emit_run_finished, emit_run_rejected, emit_run_started,
    emit_stderr, RunSpan,
};
pub use parser::{LastSeen, LineParser, Phase, Reading};
pub use retry::{AttemptOutcome, AttemptReport, RetryOrchestrator, RetryReport};
pub use session::{RunSession, RunState};
