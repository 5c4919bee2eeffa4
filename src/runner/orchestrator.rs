use crate::config::Combine;
use crate::error::RoundError;
use crate::gate::CancellationGate;
use crate::queue::{new_id, Completion, JobQueue};
use crate::store::{tree_lines, Store, WorkItem};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::round::{partition_groups, result_name, Round};
use super::task::MergeTask;

/// What was handed to the queue for one round
#[derive(Debug, Clone)]
pub struct SubmittedRound {
    pub batch_id: String,
    pub inputs: usize,
    pub groups: usize,
}

#[derive(Debug, Clone)]
pub struct FinalResult {
    pub value: i64,
    pub item: WorkItem,
    pub rounds: u32,
}

/// Result of a round's completion reaction
#[derive(Debug)]
pub enum RoundOutcome {
    /// More than one item left; the next round has been submitted
    Continued {
        next: Round,
        submitted: SubmittedRound,
    },
    /// Exactly one item left, promoted to the base location
    Converged(FinalResult),
    /// The batch or run was flagged, or cancelled groups left only a
    /// partial value; nothing was promoted
    Cancelled { round: u32 },
}

pub struct RoundOrchestrator {
    store: Arc<dyn Store>,
    gate: Arc<dyn CancellationGate>,
    queue: Arc<JobQueue<Round>>,
    fan_in: usize,
    combine: Combine,
}

impl RoundOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        gate: Arc<dyn CancellationGate>,
        queue: Arc<JobQueue<Round>>,
        fan_in: usize,
        combine: Combine,
    ) -> Self {
        Self {
            store,
            gate,
            queue,
            fan_in,
            combine,
        }
    }

    /// Partition the round's input into merge groups and enqueue one merge
    /// task per group as a single batch carrying `round` as its metadata.
    /// Returns once every task is queued.
    pub async fn submit_round(&self, round: Round) -> Result<SubmittedRound, RoundError> {
        self.store.ensure(&round.output)?;

        let items = self.store.list(&round.input)?;
        let groups = partition_groups(&items, self.fan_in);
        info!(
            "Round {}: {} items in {} -> {} groups",
            round.number,
            items.len(),
            round.input.display(),
            groups.len()
        );

        let description = round.output.display().to_string();
        let batch = self.queue.batch(description, round.clone());
        let group_count = groups.len();

        for group in groups {
            let task = MergeTask {
                id: new_id(),
                batch_id: batch.id().to_string(),
                run_id: round.run_id.clone(),
                group,
                output: round.output.clone(),
                combine: self.combine,
                store: self.store.clone(),
                gate: self.gate.clone(),
            };
            let task_id = task.id.clone();

            // No retry here; the missing output surfaces in the batch status
            if let Err(e) = self.queue.enqueue(&batch, task).await {
                warn!("Failed to enqueue merge task {}: {}", task_id, e);
                batch.record_enqueue_failure(&task_id, e.to_string());
            }
        }
        batch.seal();

        info!("Just started batch {} for round {}", batch.id(), round.number);
        Ok(SubmittedRound {
            batch_id: batch.id().to_string(),
            inputs: items.len(),
            groups: group_count,
        })
    }

    /// Completion reaction for one round's batch
    pub async fn on_complete(
        &self,
        completion: Completion<Round>,
    ) -> Result<RoundOutcome, RoundError> {
        let Completion {
            batch_id,
            description,
            status,
            meta: round,
        } = completion;

        if self
            .gate
            .any_cancelled(&[batch_id.as_str(), round.run_id.as_str()])
        {
            info!("Round {} (batch {}) cancelled", round.number, batch_id);
            return Ok(RoundOutcome::Cancelled {
                round: round.number,
            });
        }

        debug!(
            "Batch {} ({}) for round {} finished: {} succeeded, {} cancelled, {} failed\n{}",
            batch_id,
            description,
            round.number,
            status.succeeded,
            status.cancelled,
            status.failures.len(),
            tree_lines(&round.base).join("\n")
        );

        if !status.is_success() {
            return Err(RoundError::TasksFailed {
                round: round.number,
                failures: status.failures.iter().map(|f| f.to_string()).collect(),
            });
        }

        let dropped = round.dropped + status.cancelled;
        if status.cancelled > 0 {
            warn!(
                "Round {}: {} merge tasks were cancelled; their groups are dropped",
                round.number, status.cancelled
            );
        }

        let mut items = self.store.list(&round.output)?;
        match items.len() {
            0 => Err(RoundError::Stall {
                round: round.number,
                output: round.output,
            }),
            // A value missing dropped groups is not the reduction of the input
            1 if dropped > 0 => {
                warn!(
                    "Round {} left one item but {} groups were dropped; not promoting a partial result",
                    round.number, dropped
                );
                Ok(RoundOutcome::Cancelled {
                    round: round.number,
                })
            }
            1 => {
                let item = items.remove(0);
                self.converge(&round, item).map(RoundOutcome::Converged)
            }
            n => {
                let mut next = round.next();
                next.dropped = dropped;
                info!(
                    "Round {} left {} items, enqueuing round {}",
                    round.number, n, next.number
                );
                let submitted = self.submit_round(next.clone()).await?;
                Ok(RoundOutcome::Continued { next, submitted })
            }
        }
    }

    fn converge(&self, round: &Round, item: WorkItem) -> Result<FinalResult, RoundError> {
        let value = self.store.read(&item)?;
        info!("Reached final result = {}", value);

        let promoted = self
            .store
            .promote(&item, &round.base, &result_name(value))?;
        info!("Moved result to {}", promoted.path.display());

        let intermediates = Round::intermediate_root(&round.base);
        self.store.remove(&intermediates)?;
        info!("Cleaned up {}", intermediates.display());

        Ok(FinalResult {
            value,
            item: promoted,
            rounds: round.number,
        })
    }
}
