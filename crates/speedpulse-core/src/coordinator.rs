//! Run coordinator: one measurement at a time, from spawn to persisted record.
//!
//! [`RunCoordinator::start`] claims the single active slot, launches the
//! utility and hands the rest of the run to a spawned task. That task feeds
//! stdout through the parser, pushes every reading to the session's
//! [`EventHub`], finalizes once both streams are closed and the exit code is
//! known, persists the record and emits exactly one terminal event.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use speedpulse_state::{ResultStore, StoredResult};
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::emitter::{EventHub, EventStream};
use crate::error::{RunFailed, StartError};
use crate::events::ProgressEvent;
use crate::finalizer;
use crate::launcher::{LaunchedProcess, Launcher};
use crate::metrics::METRICS;
use crate::obs;
use crate::parser::Reading;
use crate::session::{RunSession, RunState};

#[derive(Debug, Default)]
struct Slot {
    state: RunState,
    active: Option<ActiveRun>,
}

#[derive(Debug)]
struct ActiveRun {
    session_id: Uuid,
    hub: Arc<EventHub>,
}

impl Slot {
    fn release(&mut self) {
        self.state = RunState::Idle;
        self.active = None;
    }
}

/// Orchestrates launcher, parser, emitter, finalizer and store.
///
/// Cloning shares the active slot, so every clone sees the same run.
#[derive(Clone)]
pub struct RunCoordinator {
    launcher: Arc<dyn Launcher>,
    store: Arc<dyn ResultStore>,
    config: CoreConfig,
    slot: Arc<Mutex<Slot>>,
}

impl RunCoordinator {
    pub fn new(launcher: Arc<dyn Launcher>, store: Arc<dyn ResultStore>, config: CoreConfig) -> Self {
        Self {
            launcher,
            store,
            config,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Start a run.
    ///
    /// Fails with [`StartError::ConcurrentRunRejected`] while another run is
    /// active and with [`StartError::Launch`] when the utility cannot be
    /// spawned; in both cases no session exists and nothing is persisted.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<RunHandle, StartError> {
        {
            let mut slot = self.lock_slot();
            if slot.state != RunState::Idle {
                METRICS.inc_runs_rejected();
                let active = slot.active.as_ref().map(|a| a.session_id.to_string());
                obs::emit_run_rejected(active.as_deref());
                return Err(StartError::ConcurrentRunRejected);
            }
            slot.state = RunState::Starting;
        }

        let mut session = RunSession::new(self.config.stderr_tail_bytes);
        let _span = obs::RunSpan::enter(&session.id.to_string());
        let invocation = self.config.invocation();
        let program = invocation.program.display().to_string();

        let process = match self.launcher.launch(&invocation) {
            Ok(process) => process,
            Err(err) => {
                METRICS.inc_runs_failed();
                obs::emit_launch_failed(&program, &err);
                self.lock_slot().release();
                return Err(err.into());
            }
        };

        let session_id = session.id;
        let hub = Arc::new(EventHub::new(
            session_id.to_string(),
            self.config.observer_queue_capacity,
        ));
        let events = hub.subscribe();
        session.state = RunState::Running;
        {
            let mut slot = self.lock_slot();
            slot.state = RunState::Running;
            slot.active = Some(ActiveRun {
                session_id,
                hub: Arc::clone(&hub),
            });
        }

        METRICS.inc_runs_started();
        obs::emit_run_started(&session_id.to_string(), &program);

        let driver = Driver {
            session,
            hub,
            store: Arc::clone(&self.store),
            slot: Arc::clone(&self.slot),
        };
        let span = obs::run_span(&session_id.to_string());
        let task = tokio::spawn(driver.run(process).instrument(span));

        Ok(RunHandle {
            session_id,
            events,
            task,
        })
    }

    /// Attach another observer to the active run. It receives events from
    /// this point on. `None` when no run is active.
    pub fn subscribe(&self) -> Option<EventStream> {
        self.lock_slot().active.as_ref().map(|a| a.hub.subscribe())
    }

    pub fn state(&self) -> RunState {
        self.lock_slot().state
    }

    pub fn active_session(&self) -> Option<Uuid> {
        self.lock_slot().active.as_ref().map(|a| a.session_id)
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A started run: its first observer stream and the task driving it.
///
/// Dropping the handle does not cancel the run.
#[derive(Debug)]
pub struct RunHandle {
    session_id: Uuid,
    events: EventStream,
    task: JoinHandle<Result<StoredResult, RunFailed>>,
}

impl RunHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn events(&mut self) -> &mut EventStream {
        &mut self.events
    }

    pub fn into_parts(self) -> (EventStream, RunOutcome) {
        (self.events, RunOutcome { task: self.task })
    }

    /// Wait for the run to finish, ignoring its events.
    pub async fn outcome(self) -> Result<StoredResult, RunFailed> {
        let (_, outcome) = self.into_parts();
        outcome.await_result().await
    }
}

/// Completion side of a [`RunHandle`].
#[derive(Debug)]
pub struct RunOutcome {
    task: JoinHandle<Result<StoredResult, RunFailed>>,
}

impl RunOutcome {
    pub async fn await_result(self) -> Result<StoredResult, RunFailed> {
        match self.task.await {
            Ok(result) => result,
            Err(join_err) => Err(RunFailed::Aborted(join_err.to_string())),
        }
    }
}

/// State moved into the spawned task for one run.
struct Driver {
    session: RunSession,
    hub: Arc<EventHub>,
    store: Arc<dyn ResultStore>,
    slot: Arc<Mutex<Slot>>,
}

impl Driver {
    async fn run(mut self, process: LaunchedProcess) -> Result<StoredResult, RunFailed> {
        let started = Instant::now();
        let session_id = self.session.id.to_string();
        let LaunchedProcess {
            mut stdout,
            mut stderr,
            exit,
            ..
        } = process;

        let mut stdout_open = true;
        let mut stderr_open = true;
        while stdout_open || stderr_open {
            tokio::select! {
                chunk = stdout.next(), if stdout_open => match chunk {
                    Some(Ok(text)) => {
                        let readings = self.session.parser.feed(&text);
                        self.publish(readings);
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, error = %e, "stdout read failed");
                        stdout_open = false;
                    }
                    None => stdout_open = false,
                },
                chunk = stderr.next(), if stderr_open => match chunk {
                    Some(Ok(text)) => self.record_stderr(&text),
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, error = %e, "stderr read failed");
                        stderr_open = false;
                    }
                    None => stderr_open = false,
                },
            }
        }
        let tail = self.session.parser.finish();
        self.publish(tail);

        let exit_code = exit.await.map_err(|e| RunFailed::Wait(e.to_string()));
        debug!(session_id = %session_id, exit_code = ?exit_code, "measurement utility exited");
        self.advance(RunState::Finalizing);

        let result = match exit_code {
            Ok(code) => self.finalize_and_persist(code).await,
            Err(e) => Err(e),
        };

        let success = result.is_ok();
        self.advance(if success { RunState::Done } else { RunState::Failed });
        if success {
            METRICS.inc_runs_completed();
        } else {
            METRICS.inc_runs_failed();
        }
        if let Err(err) = &result {
            obs::emit_run_failed(&session_id, err);
        }
        obs::emit_run_finished(
            &session_id,
            started.elapsed().as_millis() as u64,
            self.session.readings,
            success,
        );

        // Idle before the terminal event goes out, so an observer reacting to
        // it can start the next run immediately.
        self.lock_slot().release();
        let terminal = match &result {
            Ok(stored) => ProgressEvent::Done {
                result: stored.clone(),
            },
            Err(err) => ProgressEvent::error(err.to_string()),
        };
        self.hub.emit(terminal);

        result
    }

    async fn finalize_and_persist(&mut self, exit_code: i32) -> Result<StoredResult, RunFailed> {
        let live_ping = self.session.parser.last_seen().ping;
        let record = finalizer::finalize(
            self.session.parser.buffer(),
            exit_code,
            live_ping,
            Utc::now(),
        )
        .map_err(|e| RunFailed::ProcessFailure {
            exit_code: e.exit_code,
            stderr_tail: self.session.stderr.as_str().to_string(),
        })?;

        let id = self
            .store
            .insert(&record)
            .await
            .map_err(|e| RunFailed::Persistence(e.to_string()))?;
        obs::emit_persisted(&self.session.id.to_string(), &id.0);
        Ok(StoredResult::new(id, record))
    }

    fn publish(&mut self, readings: Vec<Reading>) {
        let session_id = self.session.id.to_string();
        for reading in readings {
            self.session.readings += 1;
            METRICS.inc_progress_events();
            obs::emit_progress(&session_id, reading.phase.as_str(), reading.value);
            self.hub.emit(ProgressEvent::from(reading));
        }
    }

    fn record_stderr(&mut self, text: &str) {
        self.session.stderr.push(text);
        let session_id = self.session.id.to_string();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            obs::emit_stderr(&session_id, line);
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!(from = %self.session.state, to = %next, "run state");
        self.session.state = next;
        if !next.is_terminal() {
            self.lock_slot().state = next;
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
