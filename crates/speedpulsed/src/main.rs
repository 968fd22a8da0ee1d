//! speedpulsed - speed measurement daemon
//!
//! Serves run triggers, live progress streams and the result history over
//! HTTP, and optionally runs measurements on a fixed interval.

mod http;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, Level};

use speedpulse_core::telemetry::init_tracing;
use speedpulse_core::{CoreConfig, ProcessLauncher, RunCoordinator, METRICS};
use speedpulse_state::{JsonlResultStore, ResultStore, SettingsStore, TomlSettingsStore};

use crate::server::AppState;

#[derive(Parser, Debug)]
#[command(name = "speedpulsed")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Network speed measurement daemon", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "SPEEDPULSE_LISTEN", default_value = "127.0.0.1:8077")]
    listen: SocketAddr,

    /// Pipeline configuration (TOML); missing file means defaults
    #[arg(long, env = "SPEEDPULSE_CONFIG", default_value = "speedpulse.toml")]
    config: PathBuf,

    /// Result journal (JSON lines)
    #[arg(long, env = "SPEEDPULSE_RESULTS", default_value = "speedpulse-results.jsonl")]
    results: PathBuf,

    /// Operator settings (TOML): blacklist, thresholds, retry policy
    #[arg(
        long,
        env = "SPEEDPULSE_SETTINGS",
        default_value = "speedpulse-settings.toml"
    )]
    settings: PathBuf,

    /// Run a measurement every N seconds (0 disables scheduling)
    #[arg(long, env = "SPEEDPULSE_INTERVAL_SECS", default_value_t = 0)]
    interval_secs: u64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(args.json, level);

    let state = build_state(&args).await?;

    if args.interval_secs > 0 {
        let period = Duration::from_secs(args.interval_secs);
        info!(interval_secs = args.interval_secs, "scheduled runs enabled");
        tokio::spawn(server::run_schedule(state.clone(), period));
    }

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!(addr = %args.listen, "speedpulsed listening");

    tokio::select! {
        res = server::serve(listener, state) => res.context("accept loop failed")?,
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for ctrl-c")?;
            info!("shutting down");
        }
    }

    METRICS.flush();
    Ok(())
}

async fn build_state(args: &Args) -> Result<AppState> {
    let config = CoreConfig::load(&args.config)
        .await
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    let store = JsonlResultStore::open(&args.results)
        .await
        .with_context(|| format!("Failed to open result journal {}", args.results.display()))?;
    let store: Arc<dyn ResultStore> = Arc::new(store);
    let settings: Arc<dyn SettingsStore> = Arc::new(TomlSettingsStore::new(&args.settings));

    let coordinator = RunCoordinator::new(Arc::new(ProcessLauncher::new()), Arc::clone(&store), config);
    Ok(AppState {
        coordinator,
        store,
        settings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_debug_assert() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["speedpulsed"]).unwrap();
        assert_eq!(args.listen.port(), 8077);
        assert_eq!(args.interval_secs, 0);
        assert!(!args.verbose);
    }

    #[tokio::test]
    async fn test_build_state_with_missing_files_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args::try_parse_from([
            "speedpulsed",
            "--config",
            dir.path().join("none.toml").to_str().unwrap(),
            "--results",
            dir.path().join("results.jsonl").to_str().unwrap(),
            "--settings",
            dir.path().join("settings.toml").to_str().unwrap(),
        ])
        .unwrap();

        let state = build_state(&args).await.unwrap();
        assert!(state.coordinator.active_session().is_none());
        assert!(state.store.latest(5).await.unwrap().is_empty());
    }
}
