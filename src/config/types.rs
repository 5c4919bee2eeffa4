use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults::*;

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Base location; round 1 output and the final result live here
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Round 1 input collection, defaults to `base_dir`
    #[serde(default)]
    pub input_dir: Option<PathBuf>,

    /// Cancellation flags and run records
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_launch_delay_ms")]
    pub launch_delay_ms: u64,

    /// Number of items merged by one task
    #[serde(default = "default_fan_in")]
    pub fan_in: usize,

    #[serde(default)]
    pub combine: Combine,

    #[serde(default = "default_cancel_ttl_sec")]
    pub cancel_ttl_sec: u64,

    #[serde(default = "default_seed_count")]
    pub seed_count: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    pub fn input_dir(&self) -> PathBuf {
        self.input_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.clone())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

/// Associative, commutative combinator applied to every merge group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Combine {
    #[default]
    Sum,
    Product,
    Min,
    Max,
}

impl Combine {
    /// Fold `values`, returning `None` on overflow or an empty input
    pub fn apply(self, values: &[i64]) -> Option<i64> {
        let (first, rest) = values.split_first()?;
        rest.iter().try_fold(*first, |acc, &v| match self {
            Combine::Sum => acc.checked_add(v),
            Combine::Product => acc.checked_mul(v),
            Combine::Min => Some(acc.min(v)),
            Combine::Max => Some(acc.max(v)),
        })
    }
}

impl std::fmt::Display for Combine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Combine::Sum => write!(f, "sum"),
            Combine::Product => write!(f, "product"),
            Combine::Min => write!(f, "min"),
            Combine::Max => write!(f, "max"),
        }
    }
}

impl std::str::FromStr for Combine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sum" | "add" => Ok(Combine::Sum),
            "product" | "mul" => Ok(Combine::Product),
            "min" => Ok(Combine::Min),
            "max" => Ok(Combine::Max),
            _ => Err(format!("Unknown combinator: {}", s)),
        }
    }
}
