//! Observability tests for the run lifecycle.
//!
//! These verify that the structured tracing events are emitted for the key
//! lifecycle points and that the counters move.

use std::sync::Arc;

use speedpulse_core::fakes::{Script, ScriptedLauncher};
use speedpulse_core::{
    emit_gate_evaluated, emit_observer_dropped, emit_run_finished, emit_run_rejected,
    emit_run_started, CoreConfig, RunCoordinator, RunSpan, METRICS,
};
use speedpulse_state::fakes::MemoryResultStore;
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emit_run_started_logs_session_and_program() {
    emit_run_started("session-123", "/usr/bin/speedtest");
    assert!(logs_contain("run.started"));
    assert!(logs_contain("session-123"));
}

#[traced_test]
#[test]
fn test_emit_run_finished_logs_outcome() {
    emit_run_finished("session-456", 5000, 3, true);
    assert!(logs_contain("run.finished"));
}

#[traced_test]
#[test]
fn test_emit_run_rejected_without_active_id() {
    emit_run_rejected(None);
    assert!(logs_contain("run.rejected"));
}

#[traced_test]
#[test]
fn test_emit_observer_dropped_and_gate() {
    emit_observer_dropped("session-789", 2, "queue_full");
    emit_gate_evaluated("record-1", false, 2);
    assert!(logs_contain("observer.dropped"));
    assert!(logs_contain("gate.evaluated"));
}

#[traced_test]
#[test]
fn test_run_span_scopes_events() {
    {
        let _span = RunSpan::enter("span-session-42");
        emit_run_rejected(None);
    }
    assert!(logs_contain("speedpulse.run"));
    assert!(logs_contain("span-session-42"));
}

#[traced_test]
#[tokio::test]
async fn test_launch_failure_is_logged_inside_run_span() {
    let coordinator = RunCoordinator::new(
        Arc::new(ScriptedLauncher::new(Script::launch_failure())),
        Arc::new(MemoryResultStore::new()),
        CoreConfig::default(),
    );

    assert!(coordinator.start().is_err());

    assert!(logs_contain("run.launch_failed"));
    assert!(logs_contain("speedpulse.run"));
}

#[traced_test]
#[tokio::test]
async fn test_coordinator_emits_lifecycle_events() {
    let started_before = METRICS.runs_started();
    let rejected_before = METRICS.runs_rejected();

    let launcher = Arc::new(ScriptedLauncher::held(Script::stdout(&[
        "Download: 8 Mbps\n",
    ])));
    let coordinator = RunCoordinator::new(
        launcher.clone(),
        Arc::new(MemoryResultStore::new()),
        CoreConfig::default(),
    );

    let handle = coordinator.start().unwrap();
    assert!(coordinator.start().is_err());
    launcher.release();
    handle.outcome().await.unwrap();

    assert!(logs_contain("run.started"));
    assert!(logs_contain("run.rejected"));
    assert!(METRICS.runs_started() > started_before);
    assert!(METRICS.runs_rejected() > rejected_before);
}
