//! Structured observability hooks for the run lifecycle.
//!
//! This module provides:
//! - Run-scoped tracing spans via [`run_span`] and the [`RunSpan`] guard
//! - Emission functions for lifecycle events: start, reject, progress,
//!   observer drop, persistence, finish
//!
//! Events are emitted at `info!` level unless noted. Filtering follows
//! `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{debug, info, warn};

/// Span covering one run. The coordinator instruments its drive task with it.
pub fn run_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("speedpulse.run", session_id = %session_id)
}

/// RAII guard that enters a run-scoped span for synchronous sections.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(session_id: &str) -> Self {
        Self {
            _span: run_span(session_id).entered(),
        }
    }
}

/// Emit event: the utility was spawned for a new session.
pub fn emit_run_started(session_id: &str, program: &str) {
    info!(event = "run.started", session_id = %session_id, program = %program);
}

/// Emit event: a start request arrived while a run was active.
pub fn emit_run_rejected(active_session_id: Option<&str>) {
    info!(
        event = "run.rejected",
        active_session_id = active_session_id.unwrap_or("-"),
    );
}

/// Emit event: the utility could not be spawned (warning level).
pub fn emit_launch_failed(program: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.launch_failed", program = %program, error = %error);
}

/// Emit event: one live reading (debug level, one per reading).
pub fn emit_progress(session_id: &str, phase: &str, value: f64) {
    debug!(event = "run.progress", session_id = %session_id, phase = %phase, value = value);
}

/// Emit event: a line of the utility's stderr (warning level).
pub fn emit_stderr(session_id: &str, line: &str) {
    warn!(event = "run.stderr", session_id = %session_id, line = %line);
}

/// Emit event: an observer was removed because its queue was closed or full.
pub fn emit_observer_dropped(session_id: &str, observer: u64, reason: &str) {
    debug!(
        event = "observer.dropped",
        session_id = %session_id,
        observer = observer,
        reason = %reason,
    );
}

/// Emit event: the finished record reached the store.
pub fn emit_persisted(session_id: &str, record_id: &str) {
    info!(event = "run.persisted", session_id = %session_id, record_id = %record_id);
}

/// Emit event: run reached a terminal state.
pub fn emit_run_finished(session_id: &str, duration_ms: u64, readings: u64, success: bool) {
    info!(
        event = "run.finished",
        session_id = %session_id,
        duration_ms = duration_ms,
        readings = readings,
        success = success,
    );
}

/// Emit event: run failed after it started (warning level).
pub fn emit_run_failed(session_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", session_id = %session_id, error = %error);
}

/// Emit event: quality gate evaluated a result.
pub fn emit_gate_evaluated(record_id: &str, passed: bool, violations: usize) {
    info!(
        event = "gate.evaluated",
        record_id = %record_id,
        passed = passed,
        violations = violations,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("test-session");
    }
}
