//! Request routing for the daemon.
//!
//! | Route                 | Behaviour                                          |
//! |-----------------------|----------------------------------------------------|
//! | `POST /run`           | start a run; 202 with its session id, 409 if busy  |
//! | `GET /events`         | start a run and stream its events (SSE)            |
//! | `GET /events/attach`  | stream the active run's events from now on (SSE)   |
//! | `GET /results?limit=` | latest results, newest first (JSON)                |

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use speedpulse_core::{
    EventStream, OrchestratorError, ProgressEvent, RetryOrchestrator, RunCoordinator, StartError,
    METRICS,
};
use speedpulse_state::{ResultStore, SettingsStore};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::http::{self, Request};

const DEFAULT_RESULTS_LIMIT: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: RunCoordinator,
    pub store: Arc<dyn ResultStore>,
    pub settings: Arc<dyn SettingsStore>,
}

/// Accept connections forever, one task per connection.
pub async fn serve(listener: TcpListener, state: AppState) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &state).await {
                debug!(peer = %peer, error = %e, "connection ended with error");
            }
        });
    }
}

pub async fn handle_connection<S>(mut stream: S, state: &AppState) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = match http::read_request(&mut stream).await {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            return http::write_json(&mut stream, 400, &json!({ "error": e.to_string() })).await;
        }
        Err(e) => return Err(e),
    };
    debug!(method = %request.method, path = %request.path, "request");

    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/run") => trigger_run(&mut stream, state).await,
        ("GET", "/events") => start_and_stream(&mut stream, state).await,
        ("GET", "/events/attach") => attach(&mut stream, state).await,
        ("GET", "/results") => results(&mut stream, state, &request).await,
        (_, "/run" | "/events" | "/events/attach" | "/results") => {
            http::write_json(&mut stream, 405, &json!({ "error": "method not allowed" })).await
        }
        _ => http::write_json(&mut stream, 404, &json!({ "error": "not found" })).await,
    }
}

async fn trigger_run<W>(stream: &mut W, state: &AppState) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match state.coordinator.start() {
        Ok(handle) => {
            let session_id = handle.session_id();
            // The run keeps going detached; clients observe it via attach.
            drop(handle);
            http::write_json(stream, 202, &json!({ "sessionId": session_id })).await
        }
        Err(StartError::ConcurrentRunRejected) => {
            http::write_json(
                stream,
                409,
                &json!({ "error": StartError::ConcurrentRunRejected.to_string() }),
            )
            .await
        }
        Err(StartError::Launch(e)) => {
            http::write_json(stream, 500, &json!({ "error": e.to_string() })).await
        }
    }
}

async fn start_and_stream<W>(stream: &mut W, state: &AppState) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match state.coordinator.start() {
        Ok(handle) => {
            let (events, _outcome) = handle.into_parts();
            stream_events(stream, events).await
        }
        Err(StartError::ConcurrentRunRejected) => {
            http::write_json(
                stream,
                409,
                &json!({ "error": StartError::ConcurrentRunRejected.to_string() }),
            )
            .await
        }
        Err(StartError::Launch(e)) => {
            // No session exists, but the observer still gets its error event.
            http::write_sse_head(stream).await?;
            write_frame(stream, &ProgressEvent::error(e.to_string())).await
        }
    }
}

async fn attach<W>(stream: &mut W, state: &AppState) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match state.coordinator.subscribe() {
        Some(events) => stream_events(stream, events).await,
        None => http::write_json(stream, 404, &json!({ "error": "no active run" })).await,
    }
}

async fn results<W>(stream: &mut W, state: &AppState, request: &Request) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let limit = match request.query_param("limit") {
        None => DEFAULT_RESULTS_LIMIT,
        Some(raw) => match raw.parse::<usize>() {
            Ok(limit) => limit,
            Err(_) => {
                return http::write_json(stream, 400, &json!({ "error": "invalid limit" })).await
            }
        },
    };
    match state.store.latest(limit).await {
        Ok(rows) => {
            let body = serde_json::to_value(&rows).map_err(io::Error::other)?;
            http::write_json(stream, 200, &body).await
        }
        Err(e) => {
            warn!(error = %e, "failed to read results");
            http::write_json(stream, 500, &json!({ "error": e.to_string() })).await
        }
    }
}

/// Forward events as SSE frames until the terminal event or the client leaves.
/// A write error drops `events`, which removes this observer; the run goes on.
async fn stream_events<W>(stream: &mut W, mut events: EventStream) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    http::write_sse_head(stream).await?;
    while let Some(event) = events.next().await {
        write_frame(stream, &event).await?;
    }
    Ok(())
}

async fn write_frame<W>(stream: &mut W, event: &ProgressEvent) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = event.to_sse_frame().map_err(io::Error::other)?;
    stream.write_all(frame.as_bytes()).await?;
    stream.flush().await
}

/// Start a run every `period` through the retry orchestrator. Ticks that
/// find a run already active are skipped.
pub async fn run_schedule(state: AppState, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let orchestrator = RetryOrchestrator::new(
            state.coordinator.clone(),
            Arc::clone(&state.store),
            Arc::clone(&state.settings),
        );
        match orchestrator.run().await {
            Ok(report) => info!(
                attempts = report.attempts.len(),
                selected = report.selected.as_ref().map(|s| s.id.0.as_str()).unwrap_or("-"),
                "scheduled run finished"
            ),
            Err(OrchestratorError::Start(StartError::ConcurrentRunRejected)) => {
                info!("scheduled run skipped: a run is already active")
            }
            Err(e) => warn!(error = %e, "scheduled run failed"),
        }
        METRICS.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speedpulse_core::fakes::{Script, ScriptedLauncher};
    use speedpulse_core::CoreConfig;
    use speedpulse_state::fakes::{MemoryResultStore, StaticSettings};
    use speedpulse_state::{ResultRecord, Settings};
    use tokio::io::AsyncReadExt;

    fn state(launcher: Arc<ScriptedLauncher>) -> (AppState, Arc<MemoryResultStore>) {
        let store = Arc::new(MemoryResultStore::new());
        let state = AppState {
            coordinator: RunCoordinator::new(launcher, store.clone(), CoreConfig::default()),
            store: store.clone(),
            settings: Arc::new(StaticSettings::new(Settings::default())),
        };
        (state, store)
    }

    /// Send one raw request and return the full response text.
    async fn request(state: &AppState, raw: &str) -> String {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let state = state.clone();
        let task = tokio::spawn(async move { handle_connection(server, &state).await });
        client.write_all(raw.as_bytes()).await.unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        task.await.unwrap().unwrap();
        out
    }

    fn frames(response: &str) -> Vec<serde_json::Value> {
        let (_, body) = response.split_once("\r\n\r\n").unwrap();
        body.split("\n\n")
            .filter(|f| !f.is_empty())
            .map(|f| serde_json::from_str(f.strip_prefix("data: ").unwrap()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_events_streams_progress_then_done() {
        let launcher = Arc::new(ScriptedLauncher::new(Script::stdout(&[
            "Idle Latency: 24.58 ms\n",
            "Download: 45.34 Mbps\n",
        ])));
        let (state, store) = state(launcher);

        let response = request(&state, "GET /events HTTP/1.1\r\n\r\n").await;

        assert!(response.contains("Content-Type: text/event-stream"));
        let frames = frames(&response);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0]["type"], "progress");
        assert_eq!(frames[0]["phase"], "ping");
        assert_eq!(frames[2]["type"], "done");
        assert_eq!(frames[2]["result"]["download"], 45.34);
        assert_eq!(store.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_events_with_launch_failure_sends_error_frame() {
        let launcher = Arc::new(ScriptedLauncher::new(Script::launch_failure()));
        let (state, _) = state(launcher);

        let response = request(&state, "GET /events HTTP/1.1\r\n\r\n").await;

        let frames = frames(&response);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "error");
    }

    #[tokio::test]
    async fn test_run_conflict_while_active() {
        let launcher = Arc::new(ScriptedLauncher::held(Script::stdout(&[
            "Download: 1 Mbps\n",
        ])));
        let (state, _) = state(launcher.clone());

        let first = request(&state, "POST /run HTTP/1.1\r\nContent-Length: 0\r\n\r\n").await;
        let second = request(&state, "POST /run HTTP/1.1\r\nContent-Length: 0\r\n\r\n").await;

        assert!(first.starts_with("HTTP/1.1 202 Accepted"));
        assert!(first.contains("sessionId"));
        assert!(second.starts_with("HTTP/1.1 409 Conflict"));
        assert_eq!(launcher.launches(), 1);
        launcher.release();
    }

    #[tokio::test]
    async fn test_attach_without_run_is_404() {
        let launcher = Arc::new(ScriptedLauncher::new(Script::default()));
        let (state, _) = state(launcher);

        let response = request(&state, "GET /events/attach HTTP/1.1\r\n\r\n").await;

        assert!(response.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn test_attach_streams_active_run() {
        let launcher = Arc::new(ScriptedLauncher::held(Script::stdout(&[
            "Upload: 9 Mbps\n",
        ])));
        let (state, _) = state(launcher.clone());
        request(&state, "POST /run HTTP/1.1\r\n\r\n").await;

        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let attach_state = state.clone();
        let task = tokio::spawn(async move { handle_connection(server, &attach_state).await });
        client
            .write_all(b"GET /events/attach HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        // The SSE head is written only after the handler has subscribed.
        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            let mut byte = [0u8; 1];
            client.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        assert!(String::from_utf8_lossy(&head).contains("text/event-stream"));
        launcher.release();

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        task.await.unwrap().unwrap();

        let out = format!("{}{out}", String::from_utf8_lossy(&head));
        let kinds: Vec<String> = frames(&out)
            .iter()
            .map(|f| f["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds.last().map(String::as_str), Some("done"));
    }

    #[tokio::test]
    async fn test_results_limit_and_validation() {
        let launcher = Arc::new(ScriptedLauncher::new(Script::default()));
        let (state, store) = state(launcher);
        for _ in 0..3 {
            store
                .insert(&ResultRecord::empty(chrono::Utc::now()))
                .await
                .unwrap();
        }

        let ok = request(&state, "GET /results?limit=2 HTTP/1.1\r\n\r\n").await;
        let (_, body) = ok.split_once("\r\n\r\n").unwrap();
        let rows: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(rows.as_array().unwrap().len(), 2);

        let bad = request(&state, "GET /results?limit=lots HTTP/1.1\r\n\r\n").await;
        assert!(bad.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn test_unknown_route_and_method() {
        let launcher = Arc::new(ScriptedLauncher::new(Script::default()));
        let (state, _) = state(launcher);

        assert!(request(&state, "GET /nope HTTP/1.1\r\n\r\n")
            .await
            .starts_with("HTTP/1.1 404"));
        assert!(request(&state, "DELETE /results HTTP/1.1\r\n\r\n")
            .await
            .starts_with("HTTP/1.1 405"));
        assert!(request(&state, "garbage\r\n\r\n")
            .await
            .starts_with("HTTP/1.1 400"));
    }
}
