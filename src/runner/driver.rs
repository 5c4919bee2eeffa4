use crate::config::Config;
use crate::error::{ReduceError, RoundError};
use crate::gate::CancellationGate;
use crate::queue::{is_valid_id, new_id, JobQueue};
use crate::state::{RoundRecord, RunPhase, RunRecord};
use crate::store::Store;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::orchestrator::{RoundOrchestrator, RoundOutcome, SubmittedRound};
use super::round::{Round, RESULT_PREFIX};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Remove leftovers of a previous run before starting
    pub clean: bool,
    /// Use this id instead of generating one
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Converged { value: i64, result_path: PathBuf },
    Cancelled { round: u32 },
}

#[derive(Debug)]
pub struct ReductionReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub rounds: u32,
    pub total_duration: Duration,
}

/// Seeds round 1 and dispatches each round's completion to the
/// orchestrator until the run converges, stalls, fails or is cancelled.
pub struct ReductionDriver {
    config: Config,
    store: Arc<dyn Store>,
    gate: Arc<dyn CancellationGate>,
}

impl ReductionDriver {
    pub fn new(config: Config, store: Arc<dyn Store>, gate: Arc<dyn CancellationGate>) -> Self {
        Self {
            config,
            store,
            gate,
        }
    }

    pub async fn run(&self, options: &RunOptions) -> Result<ReductionReport, ReduceError> {
        if let Some(run_id) = options.run_id.as_deref() {
            if !is_valid_id(run_id) {
                return Err(ReduceError::InvalidRunId(run_id.to_string()));
            }
        }

        let start = std::time::Instant::now();
        let base = self.config.base_dir.clone();
        let input = self.config.input_dir();

        self.preflight(&base, &input, options.clean)?;

        let run_id = options.run_id.clone().unwrap_or_else(new_id);
        let mut record = RunRecord::new(&run_id, &base, &input);
        self.save(&record)?;

        let (queue, mut completions) = JobQueue::new(
            self.config.concurrency,
            self.config.retry.clone(),
            Duration::from_millis(self.config.launch_delay_ms),
        );
        let queue = Arc::new(queue);
        let orchestrator = RoundOrchestrator::new(
            self.store.clone(),
            self.gate.clone(),
            queue.clone(),
            self.config.fan_in,
            self.config.combine,
        );

        info!(
            "Starting run {}: {} of {} with fan-in {}",
            run_id,
            self.config.combine,
            input.display(),
            self.config.fan_in
        );

        let first = Round::first(&run_id, &base, &input);
        record.transition(RunPhase::RoundSubmitted { round: 1 });
        match orchestrator.submit_round(first.clone()).await {
            Ok(submitted) => self.round_running(&mut record, &first, &submitted)?,
            Err(e) => return Err(self.fail(&mut record, &queue, 1, e)),
        }

        loop {
            let Some(completion) = completions.recv().await else {
                record.error = Some(ReduceError::ChannelClosed.to_string());
                record.transition(RunPhase::Failed);
                self.save(&record)?;
                return Err(ReduceError::ChannelClosed);
            };

            let number = completion.meta.number;
            if let Some(round) = record.round_mut(number) {
                round.succeeded = Some(completion.status.succeeded);
                round.cancelled = Some(completion.status.cancelled);
                round.failed = Some(completion.status.failures.len());
                round.finished_at = Some(Utc::now());
            }

            match orchestrator.on_complete(completion).await {
                Ok(RoundOutcome::Continued { next, submitted }) => {
                    record.transition(RunPhase::RoundSubmitted { round: next.number });
                    self.round_running(&mut record, &next, &submitted)?;
                }
                Ok(RoundOutcome::Converged(result)) => {
                    queue.close();
                    record.result_path = Some(result.item.path.clone());
                    record.transition(RunPhase::Converged {
                        value: result.value,
                    });
                    self.save(&record)?;

                    info!(
                        "Run {} converged on {} after {} rounds",
                        run_id, result.value, result.rounds
                    );
                    return Ok(ReductionReport {
                        run_id,
                        outcome: RunOutcome::Converged {
                            value: result.value,
                            result_path: result.item.path,
                        },
                        rounds: result.rounds,
                        total_duration: start.elapsed(),
                    });
                }
                Ok(RoundOutcome::Cancelled { round }) => {
                    queue.close();
                    record.transition(RunPhase::Cancelled { round });
                    self.save(&record)?;

                    warn!("Run {} cancelled in round {}", run_id, round);
                    return Ok(ReductionReport {
                        run_id,
                        outcome: RunOutcome::Cancelled { round },
                        rounds: round,
                        total_duration: start.elapsed(),
                    });
                }
                Err(e) => return Err(self.fail(&mut record, &queue, number, e)),
            }
        }
    }

    /// Refuse to start on top of a previous run's leftovers unless `clean`
    fn preflight(&self, base: &Path, input: &Path, clean: bool) -> Result<(), ReduceError> {
        let intermediates = Round::intermediate_root(base);
        if self.store.exists(&intermediates) {
            if !clean {
                return Err(ReduceError::StaleIntermediates {
                    path: intermediates,
                });
            }
            info!("Removing stale intermediates {}", intermediates.display());
            self.store.remove(&intermediates)?;
        }

        // Results are promoted into the base; a seed collection may also
        // hold one when it doubles as the base
        let mut collections = vec![input];
        if base != input {
            collections.push(base);
        }
        for collection in collections {
            if !self.store.exists(collection) {
                continue;
            }
            for item in self.store.list(collection)? {
                if !item.name.starts_with(RESULT_PREFIX) {
                    continue;
                }
                if !clean {
                    return Err(ReduceError::ResultAlreadyPresent { path: item.path });
                }
                info!("Removing previous result {}", item.path.display());
                self.store.delete(&item)?;
            }
        }

        Ok(())
    }

    fn round_running(
        &self,
        record: &mut RunRecord,
        round: &Round,
        submitted: &SubmittedRound,
    ) -> Result<(), ReduceError> {
        record.rounds.push(RoundRecord {
            number: round.number,
            batch_id: submitted.batch_id.clone(),
            input: round.input.clone(),
            output: round.output.clone(),
            inputs: submitted.inputs,
            groups: submitted.groups,
            succeeded: None,
            cancelled: None,
            failed: None,
            finished_at: None,
        });
        record.transition(RunPhase::RoundRunning {
            round: round.number,
        });
        self.save(record)
    }

    /// Record a fatal round error; intermediates stay in place for inspection
    fn fail(
        &self,
        record: &mut RunRecord,
        queue: &JobQueue<Round>,
        round: u32,
        err: RoundError,
    ) -> ReduceError {
        queue.close();
        error!("Run {} failed in round {}: {}", record.run_id, round, err);

        let phase = match err {
            RoundError::Stall { round, .. } => RunPhase::Stalled { round },
            _ => RunPhase::Failed,
        };
        record.error = Some(err.to_string());
        record.transition(phase);
        if let Err(e) = self.save(record) {
            warn!("Failed to save run state: {}", e);
        }
        err.into()
    }

    fn save(&self, record: &RunRecord) -> Result<(), ReduceError> {
        record
            .save(&self.config.state_dir)
            .map_err(ReduceError::State)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Combine;
    use crate::gate::FileGate;
    use crate::store::FsStore;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<dyn Store>,
        gate: Arc<FileGate>,
        config: Config,
    }

    impl Fixture {
        fn new(values: &[i64]) -> Self {
            let dir = TempDir::new().unwrap();
            let base = dir.path().join("batch_0");
            let store: Arc<dyn Store> = Arc::new(FsStore::new());
            store.ensure(&base).unwrap();
            for (i, v) in values.iter().enumerate() {
                store.write(&base, &(i + 1).to_string(), *v).unwrap();
            }

            let config = Config {
                base_dir: base,
                state_dir: dir.path().join("state"),
                concurrency: 3,
                ..Config::default()
            };
            let gate = Arc::new(FileGate::new(&config.state_dir, 60));
            Self {
                _dir: dir,
                store,
                gate,
                config,
            }
        }

        fn driver(&self) -> ReductionDriver {
            ReductionDriver::new(self.config.clone(), self.store.clone(), self.gate.clone())
        }

        fn base(&self) -> PathBuf {
            self.config.base_dir.clone()
        }

        fn item_names(&self) -> Vec<String> {
            self.store
                .list(&self.base())
                .unwrap()
                .into_iter()
                .map(|i| i.name)
                .collect()
        }
    }

    fn converged_value(report: &ReductionReport) -> i64 {
        match &report.outcome {
            RunOutcome::Converged { value, .. } => *value,
            other => panic!("expected convergence, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_four_items_reduce_in_two_rounds() {
        let fx = Fixture::new(&[1, 2, 3, 4]);
        let report = fx.driver().run(&RunOptions::default()).await.unwrap();

        assert_eq!(converged_value(&report), 10);
        assert_eq!(report.rounds, 2);
        assert!(fx.base().join("result_is_10").is_file());
        assert!(!fx.base().join("batch_1").exists());
        // seeds are never consumed
        assert_eq!(fx.item_names().len(), 5);
    }

    #[tokio::test]
    async fn test_twenty_items_sum() {
        let values: Vec<i64> = (1..=20).collect();
        let fx = Fixture::new(&values);
        let report = fx.driver().run(&RunOptions::default()).await.unwrap();

        assert_eq!(converged_value(&report), 210);
        assert_eq!(report.rounds, 5);

        let record = RunRecord::load(&fx.config.state_dir, &report.run_id).unwrap();
        assert_eq!(record.phase, RunPhase::Converged { value: 210 });
        let counts: Vec<usize> = record.rounds.iter().map(|r| r.inputs).collect();
        assert_eq!(counts, vec![20, 10, 5, 3, 2]);
    }

    #[tokio::test]
    async fn test_single_item_passes_through() {
        let fx = Fixture::new(&[5]);
        let report = fx.driver().run(&RunOptions::default()).await.unwrap();

        assert_eq!(converged_value(&report), 5);
        assert_eq!(report.rounds, 1);
        assert!(fx.base().join("result_is_5").is_file());
    }

    #[tokio::test]
    async fn test_result_independent_of_fan_in_and_combinator() {
        let values: Vec<i64> = vec![7, -3, 12, 5, 9, 1, 4];
        for fan_in in [2, 3, 5] {
            let mut fx = Fixture::new(&values);
            fx.config.fan_in = fan_in;
            let report = fx.driver().run(&RunOptions::default()).await.unwrap();
            assert_eq!(converged_value(&report), 35, "fan_in {}", fan_in);
        }

        let mut fx = Fixture::new(&values);
        fx.config.combine = Combine::Max;
        let report = fx.driver().run(&RunOptions::default()).await.unwrap();
        assert_eq!(converged_value(&report), 12);
    }

    #[tokio::test]
    async fn test_empty_input_stalls() {
        let fx = Fixture::new(&[]);
        let err = fx
            .driver()
            .run(&RunOptions {
                run_id: Some("stall".into()),
                ..RunOptions::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReduceError::Round(RoundError::Stall { round: 1, .. })
        ));

        let record = RunRecord::load(&fx.config.state_dir, "stall").unwrap();
        assert_eq!(record.phase, RunPhase::Stalled { round: 1 });
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn test_failed_round_keeps_intermediates() {
        let fx = Fixture::new(&[1, 2, 3]);
        std::fs::write(fx.base().join("4"), "not a number").unwrap();

        let err = fx.driver().run(&RunOptions::default()).await.unwrap_err();
        assert!(matches!(
            err,
            ReduceError::Round(RoundError::TasksFailed { .. })
        ));
        assert!(fx.base().join("batch_1").is_dir());
    }

    #[tokio::test]
    async fn test_cancelled_run_produces_nothing() {
        let fx = Fixture::new(&[1, 2, 3, 4]);
        fx.gate.cancel("doomed").unwrap();

        let report = fx
            .driver()
            .run(&RunOptions {
                run_id: Some("doomed".into()),
                ..RunOptions::default()
            })
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Cancelled { round: 1 });
        assert!(fx
            .store
            .list(&fx.base().join("batch_1"))
            .unwrap()
            .is_empty());
        assert!(!fx.item_names().iter().any(|n| n.starts_with(RESULT_PREFIX)));
    }

    #[tokio::test]
    async fn test_stale_intermediates_require_clean() {
        let fx = Fixture::new(&[1, 2]);
        fx.store.ensure(&fx.base().join("batch_1")).unwrap();
        fx.store.write(&fx.base().join("batch_1"), "1+2", 3).unwrap();

        let err = fx.driver().run(&RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, ReduceError::StaleIntermediates { .. }));

        let report = fx
            .driver()
            .run(&RunOptions {
                clean: true,
                ..RunOptions::default()
            })
            .await
            .unwrap();
        assert_eq!(converged_value(&report), 3);
    }

    #[tokio::test]
    async fn test_rerun_requires_clean_previous_result() {
        let fx = Fixture::new(&[1, 2, 3]);
        fx.driver().run(&RunOptions::default()).await.unwrap();

        let err = fx.driver().run(&RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, ReduceError::ResultAlreadyPresent { .. }));

        let report = fx
            .driver()
            .run(&RunOptions {
                clean: true,
                ..RunOptions::default()
            })
            .await
            .unwrap();
        assert_eq!(converged_value(&report), 6);
        assert_eq!(fx.item_names(), vec!["1", "2", "3", "result_is_6"]);
    }

    #[tokio::test]
    async fn test_path_like_run_id_is_rejected() {
        let fx = Fixture::new(&[1, 2]);
        let err = fx
            .driver()
            .run(&RunOptions {
                run_id: Some("../outside".into()),
                ..RunOptions::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ReduceError::InvalidRunId(_)));
        assert!(!fx.config.state_dir.join("outside.json").exists());
        assert!(!fx.base().join("batch_1").exists());
    }

    #[tokio::test]
    async fn test_separate_input_dir_rerun_and_clean() {
        let mut fx = Fixture::new(&[1, 2, 3, 4]);
        let seeds = fx.base();
        let out = seeds.with_file_name("out");
        fx.config.input_dir = Some(seeds.clone());
        fx.config.base_dir = out.clone();

        let report = fx.driver().run(&RunOptions::default()).await.unwrap();
        assert_eq!(converged_value(&report), 10);
        assert!(out.join("result_is_10").is_file());

        let err = fx.driver().run(&RunOptions::default()).await.unwrap_err();
        match err {
            ReduceError::ResultAlreadyPresent { path } => {
                assert_eq!(path, out.join("result_is_10"))
            }
            other => panic!("expected a previous result, got {:?}", other),
        }
        assert!(!out.join("batch_1").exists());

        let report = fx
            .driver()
            .run(&RunOptions {
                clean: true,
                ..RunOptions::default()
            })
            .await
            .unwrap();
        assert_eq!(converged_value(&report), 10);
        assert_eq!(fx.item_names(), vec!["result_is_10"]);
        assert_eq!(fx.store.list(&seeds).unwrap().len(), 4);
        assert!(!out.join("batch_1").exists());
    }
}
