//! Retry orchestration across runs.
//!
//! The coordinator never retries within a run. [`RetryOrchestrator`] sits on
//! top of it: it starts one run per attempt, checks each persisted result
//! with the [`QualityGate`], and stops at the first acceptable result or when
//! `retry.max_attempts` is used up. With `retry_on_quality` off, the first
//! persisted result ends the loop even when it is below quality. Results it does not select are marked
//! excluded from statistics in the store.

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use speedpulse_state::{RecordId, ResultStore, SettingsStore, StoredResult};
use tracing::{info, warn};

use crate::coordinator::RunCoordinator;
use crate::error::{OrchestratorError, StartError};
use crate::events::ProgressEvent;
use crate::gate::{QualityGate, QualityVerdict, QualityViolation};
use crate::obs;

/// Classification set on results replaced by a later attempt.
pub const SUPERSEDED: &str = "superseded-by-retry";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted {
        record_id: RecordId,
    },
    BelowQuality {
        record_id: RecordId,
        violations: Vec<QualityViolation>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptReport {
    pub attempt: u32,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryReport {
    pub attempts: Vec<AttemptReport>,
    /// The accepted result, or the one with the fewest violations when none
    /// passed. `None` when every attempt failed.
    pub selected: Option<StoredResult>,
    pub verdict: Option<QualityVerdict>,
}

pub struct RetryOrchestrator {
    coordinator: RunCoordinator,
    store: Arc<dyn ResultStore>,
    settings: Arc<dyn SettingsStore>,
}

impl RetryOrchestrator {
    pub fn new(
        coordinator: RunCoordinator,
        store: Arc<dyn ResultStore>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            coordinator,
            store,
            settings,
        }
    }

    pub async fn run(&self) -> Result<RetryReport, OrchestratorError> {
        self.run_observed(|_, _| {}).await
    }

    /// Like [`run`](Self::run), passing every event of every attempt to
    /// `observe` along with the attempt number.
    ///
    /// A concurrent run aborts the whole orchestration; a launch failure
    /// counts as a failed attempt.
    pub async fn run_observed<F>(&self, mut observe: F) -> Result<RetryReport, OrchestratorError>
    where
        F: FnMut(u32, &ProgressEvent) + Send,
    {
        let settings = self.settings.load().await?;
        let policy = settings.retry.clone();

        let mut attempts = Vec::new();
        let mut rejected: Vec<(StoredResult, QualityVerdict)> = Vec::new();
        let mut accepted = None;

        for attempt in 1..=policy.max_attempts.max(1) {
            if attempt > 1 && policy.delay_secs > 0 {
                tokio::time::sleep(Duration::from_secs(policy.delay_secs)).await;
            }
            info!(attempt, max_attempts = policy.max_attempts, "starting attempt");

            let handle = match self.coordinator.start() {
                Ok(handle) => handle,
                Err(StartError::ConcurrentRunRejected) => {
                    return Err(StartError::ConcurrentRunRejected.into())
                }
                Err(StartError::Launch(err)) => {
                    attempts.push(AttemptReport {
                        attempt,
                        outcome: AttemptOutcome::Failed {
                            error: err.to_string(),
                        },
                    });
                    continue;
                }
            };

            let (mut events, outcome) = handle.into_parts();
            while let Some(event) = events.next().await {
                observe(attempt, &event);
            }

            let stored = match outcome.await_result().await {
                Ok(stored) => stored,
                Err(err) => {
                    attempts.push(AttemptReport {
                        attempt,
                        outcome: AttemptOutcome::Failed {
                            error: err.to_string(),
                        },
                    });
                    continue;
                }
            };

            let verdict = QualityGate::evaluate(&stored.record, &settings);
            obs::emit_gate_evaluated(&stored.id.0, verdict.passed, verdict.violations.len());
            if verdict.passed {
                attempts.push(AttemptReport {
                    attempt,
                    outcome: AttemptOutcome::Accepted {
                        record_id: stored.id.clone(),
                    },
                });
                accepted = Some((stored, verdict));
                break;
            }
            attempts.push(AttemptReport {
                attempt,
                outcome: AttemptOutcome::BelowQuality {
                    record_id: stored.id.clone(),
                    violations: verdict.violations.clone(),
                },
            });
            rejected.push((stored, verdict));
            if !policy.retry_on_quality {
                // Kept as the selected result, but still reported as below quality.
                break;
            }
        }

        let selected = accepted.or_else(|| {
            let best = rejected
                .iter()
                .enumerate()
                .min_by_key(|(i, (_, verdict))| (verdict.violations.len(), Reverse(*i)))
                .map(|(i, _)| i)?;
            Some(rejected.remove(best))
        });

        for (superseded, _) in &rejected {
            if let Err(err) = self
                .store
                .set_excluded(&superseded.id, true, Some(SUPERSEDED.to_string()))
                .await
            {
                warn!(record_id = %superseded.id, error = %err, "failed to exclude superseded result");
            }
        }

        let (selected, verdict) = match selected {
            Some((stored, verdict)) => (Some(stored), Some(verdict)),
            None => (None, None),
        };
        Ok(RetryReport {
            attempts,
            selected,
            verdict,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::fakes::{Script, ScriptedLauncher};
    use speedpulse_state::fakes::{MemoryResultStore, StaticSettings};
    use speedpulse_state::{QualityThresholds, RetryPolicy, Settings};

    fn settings(max_attempts: u32, min_download: f64) -> Settings {
        Settings {
            thresholds: QualityThresholds {
                min_download_mbps: Some(min_download),
                ..QualityThresholds::default()
            },
            retry: RetryPolicy {
                max_attempts,
                delay_secs: 0,
                retry_on_quality: true,
            },
            ..Settings::default()
        }
    }

    fn download(mbps: &str) -> Script {
        Script::stdout(&[&format!("Download: {mbps} Mbps\n")])
    }

    fn orchestrator(
        scripts: Vec<Script>,
        settings: Settings,
    ) -> (RetryOrchestrator, Arc<ScriptedLauncher>, Arc<MemoryResultStore>) {
        let launcher = Arc::new(ScriptedLauncher::sequence(scripts));
        let store = Arc::new(MemoryResultStore::new());
        let coordinator = RunCoordinator::new(launcher.clone(), store.clone(), CoreConfig::default());
        let orchestrator = RetryOrchestrator::new(
            coordinator,
            store.clone(),
            Arc::new(StaticSettings::new(settings)),
        );
        (orchestrator, launcher, store)
    }

    #[tokio::test]
    async fn test_first_acceptable_result_stops() {
        let (orch, launcher, _) = orchestrator(vec![download("150")], settings(3, 100.0));

        let report = orch.run().await.unwrap();

        assert_eq!(launcher.launches(), 1);
        assert_eq!(report.attempts.len(), 1);
        assert!(matches!(report.attempts[0].outcome, AttemptOutcome::Accepted { .. }));
        assert_eq!(report.selected.unwrap().record.download, 150.0);
    }

    #[tokio::test]
    async fn test_retry_until_quality_met_and_supersede() {
        let (orch, launcher, store) =
            orchestrator(vec![download("20"), download("120")], settings(3, 100.0));

        let report = orch.run().await.unwrap();

        assert_eq!(launcher.launches(), 2);
        let selected = report.selected.unwrap();
        assert_eq!(selected.record.download, 120.0);

        let rows = store.rows();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].exclude_from_stats);
        assert_eq!(rows[0].classification.as_deref(), Some(SUPERSEDED));
        assert!(!rows[1].exclude_from_stats);
    }

    #[tokio::test]
    async fn test_no_acceptable_result_selects_fewest_violations() {
        let mut strict = settings(2, 100.0);
        strict.thresholds.min_upload_mbps = Some(50.0);
        let first = Script::stdout(&["Download: 10 Mbps\n", "Upload: 60 Mbps\n"]);
        let second = Script::stdout(&["Download: 10 Mbps\n", "Upload: 5 Mbps\n"]);
        let (orch, _, store) = orchestrator(vec![first, second], strict);

        let report = orch.run().await.unwrap();

        let selected = report.selected.unwrap();
        assert_eq!(selected.record.upload, 60.0);
        assert!(!report.verdict.unwrap().passed);
        let rows = store.rows();
        assert!(!rows[0].exclude_from_stats);
        assert!(rows[1].exclude_from_stats);
    }

    #[tokio::test]
    async fn test_failures_are_retried() {
        let scripts = vec![
            Script::launch_failure(),
            Script::stdout(&[]).with_exit_code(1),
            download("200"),
        ];
        let (orch, launcher, _) = orchestrator(scripts, settings(3, 100.0));

        let report = orch.run().await.unwrap();

        assert_eq!(launcher.launches(), 3);
        assert!(matches!(report.attempts[0].outcome, AttemptOutcome::Failed { .. }));
        assert!(matches!(report.attempts[1].outcome, AttemptOutcome::Failed { .. }));
        assert_eq!(report.selected.unwrap().record.download, 200.0);
    }

    #[tokio::test]
    async fn test_all_attempts_failed() {
        let (orch, _, store) = orchestrator(
            vec![Script::stdout(&[]).with_exit_code(2)],
            settings(2, 100.0),
        );

        let report = orch.run().await.unwrap();

        assert_eq!(report.attempts.len(), 2);
        assert!(report.selected.is_none());
        assert_eq!(store.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_quality_retry_disabled_keeps_first_as_below_quality() {
        let mut lenient = settings(3, 100.0);
        lenient.retry.retry_on_quality = false;
        let (orch, launcher, store) = orchestrator(vec![download("20")], lenient);

        let report = orch.run().await.unwrap();

        assert_eq!(launcher.launches(), 1);
        assert!(matches!(
            &report.attempts[0].outcome,
            AttemptOutcome::BelowQuality { violations, .. } if violations.len() == 1
        ));
        let selected = report.selected.expect("below-quality result is still selected");
        assert!(!report.verdict.unwrap().passed);
        let row = store.get(&selected.id).await.unwrap();
        assert!(!row.exclude_from_stats);
    }

    #[tokio::test]
    async fn test_observer_sees_each_attempt() {
        let (orch, _, _) = orchestrator(vec![download("20"), download("120")], settings(2, 100.0));
        let mut seen = Vec::new();

        orch.run_observed(|attempt, event| seen.push((attempt, event.kind())))
            .await
            .unwrap();

        assert_eq!(
            seen,
            vec![(1, "progress"), (1, "done"), (2, "progress"), (2, "done")]
        );
    }
}
