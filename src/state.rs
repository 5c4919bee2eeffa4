use crate::queue::is_valid_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const RUNS_DIR: &str = "runs";

/// Lifecycle of one reduction run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RunPhase {
    Seeded,
    RoundSubmitted { round: u32 },
    RoundRunning { round: u32 },
    Converged { value: i64 },
    Stalled { round: u32 },
    Failed,
    Cancelled { round: u32 },
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Converged { .. }
                | RunPhase::Stalled { .. }
                | RunPhase::Failed
                | RunPhase::Cancelled { .. }
        )
    }

    pub fn can_transition_to(&self, next: &RunPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, RunPhase::Failed) => true,
            (RunPhase::Seeded, RunPhase::RoundSubmitted { round }) => *round == 1,
            (RunPhase::RoundSubmitted { round: a }, RunPhase::RoundRunning { round: b }) => a == b,
            (RunPhase::RoundRunning { round: a }, RunPhase::RoundSubmitted { round: b }) => {
                *b == a + 1
            }
            (RunPhase::RoundRunning { .. }, RunPhase::Converged { .. }) => true,
            (RunPhase::RoundRunning { round: a }, RunPhase::Stalled { round: b })
            | (RunPhase::RoundRunning { round: a }, RunPhase::Cancelled { round: b }) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Seeded => write!(f, "seeded"),
            RunPhase::RoundSubmitted { round } => write!(f, "round {} submitted", round),
            RunPhase::RoundRunning { round } => write!(f, "round {} running", round),
            RunPhase::Converged { value } => write!(f, "converged: {}", value),
            RunPhase::Stalled { round } => write!(f, "stalled in round {}", round),
            RunPhase::Failed => write!(f, "failed"),
            RunPhase::Cancelled { round } => write!(f, "cancelled in round {}", round),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseChange {
    pub phase: RunPhase,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub number: u32,
    pub batch_id: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub inputs: usize,
    pub groups: usize,
    #[serde(default)]
    pub succeeded: Option<usize>,
    #[serde(default)]
    pub cancelled: Option<usize>,
    #[serde(default)]
    pub failed: Option<usize>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Persisted record of one run, rewritten after every phase change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub base: PathBuf,
    pub input: PathBuf,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub phase: RunPhase,
    #[serde(default)]
    pub history: Vec<PhaseChange>,
    #[serde(default)]
    pub rounds: Vec<RoundRecord>,
    #[serde(default)]
    pub result_path: Option<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn new(run_id: &str, base: &Path, input: &Path) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            base: base.to_path_buf(),
            input: input.to_path_buf(),
            started_at: now,
            updated_at: now,
            phase: RunPhase::Seeded,
            history: vec![PhaseChange {
                phase: RunPhase::Seeded,
                at: now,
            }],
            rounds: Vec::new(),
            result_path: None,
            error: None,
        }
    }

    /// Move to `next`, returning false (and staying put) if the state
    /// machine does not allow it
    pub fn transition(&mut self, next: RunPhase) -> bool {
        if !self.phase.can_transition_to(&next) {
            warn!(
                "Run {}: ignoring invalid transition {} -> {}",
                self.run_id, self.phase, next
            );
            return false;
        }

        let now = Utc::now();
        self.history.push(PhaseChange {
            phase: next.clone(),
            at: now,
        });
        self.phase = next;
        self.updated_at = now;
        true
    }

    pub fn round_mut(&mut self, number: u32) -> Option<&mut RoundRecord> {
        self.rounds.iter_mut().find(|r| r.number == number)
    }

    /// Save the record under `<state_dir>/runs/<run_id>.json`
    pub fn save(&self, state_dir: &Path) -> std::io::Result<()> {
        if !is_valid_id(&self.run_id) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid run id {:?}", self.run_id),
            ));
        }
        let runs_dir = state_dir.join(RUNS_DIR);
        fs::create_dir_all(&runs_dir)?;

        let json = serde_json::to_string_pretty(self)?;
        fs::write(Self::record_path(state_dir, &self.run_id), json)
    }

    pub fn load(state_dir: &Path, run_id: &str) -> Option<Self> {
        if !is_valid_id(run_id) {
            return None;
        }
        let content = fs::read_to_string(Self::record_path(state_dir, run_id)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// All readable records, oldest first
    pub fn load_all(state_dir: &Path) -> Vec<Self> {
        let Ok(entries) = fs::read_dir(state_dir.join(RUNS_DIR)) else {
            return Vec::new();
        };

        let mut records: Vec<Self> = entries
            .flatten()
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|e| {
                let content = fs::read_to_string(e.path()).ok()?;
                match serde_json::from_str(&content) {
                    Ok(record) => Some(record),
                    Err(err) => {
                        warn!("Skipping unreadable run record {}: {}", e.path().display(), err);
                        None
                    }
                }
            })
            .collect();

        records.sort_by_key(|r| r.started_at);
        records
    }

    fn record_path(state_dir: &Path, run_id: &str) -> PathBuf {
        state_dir.join(RUNS_DIR).join(format!("{}.json", run_id))
    }
}
