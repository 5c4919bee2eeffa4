use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReduceError {
    #[error("Round error: {0}")]
    Round(#[from] RoundError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cancellation gate error: {0}")]
    Gate(#[from] GateError),

    #[error("Failed to persist run state: {0}")]
    State(std::io::Error),

    #[error("Intermediate rounds from a previous run are still present at '{path}' (use --clean)")]
    StaleIntermediates { path: PathBuf },

    #[error("A previous result already exists: '{path}' (use --clean)")]
    ResultAlreadyPresent { path: PathBuf },

    #[error("Invalid run id {0:?}: only letters, digits, '-', '_' and '.' are allowed")]
    InvalidRunId(String),

    #[error("Completion channel closed before the reduction converged")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("'{path}' already exists")]
    AlreadyExists { path: PathBuf },

    #[error("'{path}' not found")]
    NotFound { path: PathBuf },

    #[error("'{path}' does not hold an integer: {content:?}")]
    Parse { path: PathBuf, content: String },

    #[error("IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::AlreadyExists => StoreError::AlreadyExists { path },
            std::io::ErrorKind::NotFound => StoreError::NotFound { path },
            _ => StoreError::Io { path, source },
        }
    }
}

#[derive(Error, Debug)]
pub enum GateError {
    #[error("IO error on cancellation flag '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid cancellation id {0:?}: only letters, digits, '-', '_' and '.' are allowed")]
    InvalidId(String),
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Combined value of group {group:?} overflows")]
    Overflow { group: Vec<String> },

    #[error("Merge group is empty")]
    EmptyGroup,

    #[error("Job panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Only transient I/O is worth another attempt. A name collision means
    /// two producers target the same output and must be surfaced.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Store(StoreError::Io { .. }))
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,

    #[error("Batch {0} is sealed")]
    Sealed(String),
}

#[derive(Error, Debug)]
pub enum RoundError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Round {round} produced no output in '{output}'")]
    Stall { round: u32, output: PathBuf },

    #[error("Round {round} had {} failed task(s): {}", .failures.len(), .failures.join("; "))]
    TasksFailed { round: u32, failures: Vec<String> },
}
