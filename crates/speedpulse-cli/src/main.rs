//! speedpulse - network speed measurement CLI
//!
//! Runs the Ookla `speedtest` utility through the speedpulse pipeline and
//! manages the local result history.
//!
//! ## Commands
//!
//! - `run`: measure once (or with retries), streaming live progress
//! - `history`: list the most recent results
//! - `exclude`: keep a result out of statistics, optionally classifying it

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

use speedpulse_core::telemetry::init_tracing;
use speedpulse_core::{
    CoreConfig, Phase, ProcessLauncher, ProgressEvent, RetryOrchestrator, RetryReport,
    RunCoordinator, METRICS,
};
use speedpulse_state::{
    JsonlResultStore, RecordId, ResultStore, SettingsStore, StoredResult, TomlSettingsStore,
};

#[derive(Parser)]
#[command(name = "speedpulse")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Network speed measurement runner", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Pipeline configuration (TOML); missing file means defaults
    #[arg(long, global = true, env = "SPEEDPULSE_CONFIG", default_value = "speedpulse.toml")]
    config: PathBuf,

    /// Result journal (JSON lines)
    #[arg(
        long,
        global = true,
        env = "SPEEDPULSE_RESULTS",
        default_value = "speedpulse-results.jsonl"
    )]
    results: PathBuf,

    /// Operator settings (TOML): blacklist, thresholds, retry policy
    #[arg(
        long,
        global = true,
        env = "SPEEDPULSE_SETTINGS",
        default_value = "speedpulse-settings.toml"
    )]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one measurement and store the result
    Run {
        /// Path to the speedtest executable (overrides config)
        #[arg(long)]
        utility: Option<PathBuf>,

        /// Pin the measurement to one server (overrides config)
        #[arg(long)]
        server_id: Option<u32>,

        /// Retry according to the settings' retry policy and quality thresholds
        #[arg(long)]
        retry: bool,

        /// Print raw `data: <json>` event frames instead of text
        #[arg(long)]
        sse: bool,
    },

    /// Show the most recent results, newest first
    History {
        /// Maximum number of results to show
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,

        /// One JSON object per line
        #[arg(long)]
        raw: bool,
    },

    /// Exclude a result from statistics
    Exclude {
        /// Result id as printed by `history`
        id: String,

        /// Manual classification (e.g. "wifi", "maintenance")
        #[arg(short, long)]
        classification: Option<String>,

        /// Re-include a previously excluded result
        #[arg(long)]
        include: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let store = JsonlResultStore::open(&cli.results)
        .await
        .with_context(|| format!("Failed to open result journal {}", cli.results.display()))?;
    let store: Arc<dyn ResultStore> = Arc::new(store);

    let outcome = match cli.command {
        Commands::Run {
            utility,
            server_id,
            retry,
            sse,
        } => {
            let mut config = CoreConfig::load(&cli.config)
                .await
                .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
            if let Some(utility) = utility {
                config.utility_path = utility;
            }
            if server_id.is_some() {
                config.server_id = server_id;
            }
            let coordinator =
                RunCoordinator::new(Arc::new(ProcessLauncher::new()), store.clone(), config);
            if retry {
                cmd_run_with_retry(coordinator, store, &cli.settings, sse).await
            } else {
                cmd_run(&coordinator, sse).await
            }
        }
        Commands::History { limit, raw } => cmd_history(store.as_ref(), limit, raw).await,
        Commands::Exclude {
            id,
            classification,
            include,
        } => cmd_exclude(store.as_ref(), &id, !include, classification).await,
    };

    METRICS.flush();
    outcome
}

/// Run once, printing events as they arrive.
async fn cmd_run(coordinator: &RunCoordinator, sse: bool) -> Result<()> {
    let handle = coordinator
        .start()
        .context("Failed to start measurement")?;
    let (mut events, outcome) = handle.into_parts();

    while let Some(event) = events.next().await {
        print!("{}", render_event(&event, sse)?);
    }

    let stored = outcome
        .await_result()
        .await
        .context("Measurement failed")?;
    info!(record_id = %stored.id, "measurement stored");
    Ok(())
}

/// Run with the retry policy from the settings file.
async fn cmd_run_with_retry(
    coordinator: RunCoordinator,
    store: Arc<dyn ResultStore>,
    settings_path: &Path,
    sse: bool,
) -> Result<()> {
    let settings: Arc<dyn SettingsStore> = Arc::new(TomlSettingsStore::new(settings_path));
    let orchestrator = RetryOrchestrator::new(coordinator, store, settings);

    let report = orchestrator
        .run_observed(|attempt, event| match render_event(event, sse) {
            Ok(text) if sse => print!("{text}"),
            Ok(text) => print!("[attempt {attempt}] {text}"),
            Err(e) => warn!(error = %e, "failed to render event"),
        })
        .await
        .context("Retry orchestration failed")?;

    println!("{}", render_report(&report));
    if report.selected.is_none() {
        bail!("all {} attempt(s) failed", report.attempts.len());
    }
    Ok(())
}

/// List recent results.
async fn cmd_history(store: &dyn ResultStore, limit: usize, raw: bool) -> Result<()> {
    let rows = store
        .latest(limit)
        .await
        .context("Failed to read result history")?;

    if rows.is_empty() {
        println!("No results recorded yet");
        return Ok(());
    }

    for row in &rows {
        if raw {
            println!("{}", serde_json::to_string(row)?);
        } else {
            println!("{}", render_history_line(row));
        }
    }
    Ok(())
}

/// Set or clear the exclusion flag on one result.
async fn cmd_exclude(
    store: &dyn ResultStore,
    id: &str,
    excluded: bool,
    classification: Option<String>,
) -> Result<()> {
    let id = RecordId(id.to_string());
    store
        .set_excluded(&id, excluded, classification)
        .await
        .with_context(|| format!("Failed to update result {id}"))?;

    if excluded {
        println!("Excluded {id} from statistics");
    } else {
        println!("Included {id} in statistics");
    }
    Ok(())
}

fn unit(phase: Phase) -> &'static str {
    match phase {
        Phase::Ping => "ms",
        Phase::Download | Phase::Upload => "Mbps",
    }
}

fn render_event(event: &ProgressEvent, sse: bool) -> Result<String> {
    if sse {
        return Ok(event.to_sse_frame()?);
    }
    Ok(match event {
        ProgressEvent::Progress { phase, value } => {
            format!("{:<9} {:>10.2} {}\n", phase.as_str(), value, unit(*phase))
        }
        ProgressEvent::Error { message } => format!("error: {message}\n"),
        ProgressEvent::Done { result } => render_summary(result),
    })
}

fn render_summary(stored: &StoredResult) -> String {
    let r = &stored.record;
    let mut out = format!(
        "\nResult {}\n  Ping:        {:.2} ms\n  Download:    {:.2} Mbps\n  Upload:      {:.2} Mbps\n  Packet loss: {:.1}%\n  ISP:         {}\n  Server:      {}, {}\n",
        stored.id,
        r.ping,
        r.download,
        r.upload,
        r.packet_loss,
        r.isp,
        r.server_location,
        r.server_country,
    );
    if let Some(url) = &r.result_url {
        out.push_str(&format!("  Result URL:  {url}\n"));
    }
    out
}

fn render_history_line(row: &StoredResult) -> String {
    let r = &row.record;
    let mut line = format!(
        "{}  {}  ping {:>7.2} ms  down {:>8.2} Mbps  up {:>8.2} Mbps  {}",
        row.id,
        r.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        r.ping,
        r.download,
        r.upload,
        r.isp,
    );
    if row.exclude_from_stats {
        line.push_str("  [excluded");
        if let Some(class) = &row.classification {
            line.push_str(&format!(": {class}"));
        }
        line.push(']');
    }
    line
}

fn render_report(report: &RetryReport) -> String {
    let mut out = format!("{} attempt(s)", report.attempts.len());
    match (&report.selected, &report.verdict) {
        (Some(stored), Some(verdict)) => {
            out.push_str(&format!(", selected {}: {}", stored.id, verdict.message));
            for violation in &verdict.violations {
                out.push_str(&format!("\n  - {violation}"));
            }
        }
        _ => out.push_str(", no result"),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clap::CommandFactory;
    use speedpulse_core::fakes::{Script, ScriptedLauncher};
    use speedpulse_state::fakes::MemoryResultStore;
    use speedpulse_state::ResultRecord;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::try_parse_from([
            "speedpulse",
            "--results",
            "/tmp/r.jsonl",
            "run",
            "--server-id",
            "4242",
            "--retry",
        ])
        .unwrap();
        assert_eq!(cli.results, PathBuf::from("/tmp/r.jsonl"));
        match cli.command {
            Commands::Run {
                server_id, retry, ..
            } => {
                assert_eq!(server_id, Some(4242));
                assert!(retry);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_render_progress_text_and_sse() {
        let event = ProgressEvent::Progress {
            phase: Phase::Ping,
            value: 24.58,
        };
        assert_eq!(render_event(&event, false).unwrap(), "ping           24.58 ms\n");
        assert!(render_event(&event, true)
            .unwrap()
            .starts_with("data: {\"type\":\"progress\""));
    }

    #[test]
    fn test_history_line_marks_excluded() {
        let mut row = StoredResult::new(RecordId("r-1".into()), ResultRecord::empty(Utc::now()));
        row.exclude_from_stats = true;
        row.classification = Some("wifi".into());
        let line = render_history_line(&row);
        assert!(line.starts_with("r-1"));
        assert!(line.ends_with("[excluded: wifi]"));
    }

    #[tokio::test]
    async fn test_cmd_run_persists_result() {
        let store = Arc::new(MemoryResultStore::new());
        let launcher = Arc::new(ScriptedLauncher::new(Script::stdout(&[
            "Download: 42 Mbps\n",
        ])));
        let coordinator = RunCoordinator::new(launcher, store.clone(), CoreConfig::default());

        cmd_run(&coordinator, false).await.unwrap();

        assert_eq!(store.rows()[0].record.download, 42.0);
    }

    #[tokio::test]
    async fn test_cmd_run_reports_failure() {
        let store = Arc::new(MemoryResultStore::new());
        let launcher = Arc::new(ScriptedLauncher::new(
            Script::stdout(&[]).with_exit_code(1),
        ));
        let coordinator = RunCoordinator::new(launcher, store.clone(), CoreConfig::default());

        assert!(cmd_run(&coordinator, true).await.is_err());
        assert_eq!(store.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_exclude_then_history_on_journal() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlResultStore::open(dir.path().join("results.jsonl"))
            .await
            .unwrap();
        let id = store.insert(&ResultRecord::empty(Utc::now())).await.unwrap();

        cmd_exclude(&store, &id.0, true, Some("vpn".into()))
            .await
            .unwrap();
        cmd_history(&store, 5, false).await.unwrap();

        let stored = store.get(&id).await.unwrap();
        assert!(stored.exclude_from_stats);
        assert_eq!(stored.classification.as_deref(), Some("vpn"));
    }

    #[tokio::test]
    async fn test_exclude_unknown_id_fails() {
        let store = MemoryResultStore::new();
        assert!(cmd_exclude(&store, "missing", true, None).await.is_err());
    }

    #[tokio::test]
    async fn test_retry_uses_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("settings.toml");
        std::fs::write(
            &settings,
            "[thresholds]\nmin_download_mbps = 100.0\n[retry]\nmax_attempts = 2\ndelay_secs = 0\n",
        )
        .unwrap();
        let store = Arc::new(MemoryResultStore::new());
        let launcher = Arc::new(ScriptedLauncher::sequence(vec![
            Script::stdout(&["Download: 10 Mbps\n"]),
            Script::stdout(&["Download: 150 Mbps\n"]),
        ]));
        let coordinator =
            RunCoordinator::new(launcher.clone(), store.clone(), CoreConfig::default());

        cmd_run_with_retry(coordinator, store.clone(), &settings, false)
            .await
            .unwrap();

        assert_eq!(launcher.launches(), 2);
        assert!(store.rows()[0].exclude_from_stats);
    }
}
