use crate::store::WorkItem;
use std::path::{Path, PathBuf};

/// Directory name prefix for each round's output collection
pub const ROUND_DIR_PREFIX: &str = "batch_";

/// Name prefix of the promoted final result
pub const RESULT_PREFIX: &str = "result_is_";

/// Metadata carried by a round's batch to its completion reaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub run_id: String,
    pub number: u32,
    pub base: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    /// Groups skipped by cancellation in this round or any before it
    pub dropped: usize,
}

impl Round {
    pub fn first(run_id: &str, base: &Path, input: &Path) -> Self {
        Self {
            run_id: run_id.to_string(),
            number: 1,
            base: base.to_path_buf(),
            input: input.to_path_buf(),
            output: Self::intermediate_root(base),
            dropped: 0,
        }
    }

    /// The following round reads this round's output and writes to a
    /// collection nested inside it
    pub fn next(&self) -> Self {
        let number = self.number + 1;
        Self {
            run_id: self.run_id.clone(),
            number,
            base: self.base.clone(),
            input: self.output.clone(),
            output: self
                .output
                .join(format!("{}{}", ROUND_DIR_PREFIX, number)),
            dropped: self.dropped,
        }
    }

    /// Output of round 1; every later round lives below it
    pub fn intermediate_root(base: &Path) -> PathBuf {
        base.join(format!("{}1", ROUND_DIR_PREFIX))
    }
}

pub fn result_name(value: i64) -> String {
    format!("{}{}", RESULT_PREFIX, value)
}

/// Split items into merge groups of `fan_in`, in listing order. The last
/// group holds the remainder when the count is not a multiple of `fan_in`.
pub fn partition_groups(items: &[WorkItem], fan_in: usize) -> Vec<Vec<WorkItem>> {
    items.chunks(fan_in.max(1)).map(|c| c.to_vec()).collect()
}

/// Rounds needed to reduce `items` down to one
pub fn expected_rounds(items: usize, fan_in: usize) -> u32 {
    let fan_in = fan_in.max(2);
    let mut remaining = items;
    let mut rounds = 1;
    while remaining > fan_in {
        remaining = remaining.div_ceil(fan_in);
        rounds += 1;
    }
    rounds
}
