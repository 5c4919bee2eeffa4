//! Advisory cancellation flags keyed by run, batch or job id.

use crate::error::GateError;
use crate::queue::is_valid_id;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const FLAG_DIR: &str = "cancelled";
const FLAG_PREFIX: &str = "cancelled-";
const MAX_TTL_SEC: u64 = 10 * 365 * 86_400;

pub trait CancellationGate: Send + Sync {
    fn is_cancelled(&self, id: &str) -> bool;

    fn cancel(&self, id: &str) -> Result<(), GateError>;

    /// True if any of `ids` carries a live flag
    fn any_cancelled(&self, ids: &[&str]) -> bool {
        ids.iter().any(|id| self.is_cancelled(id))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CancelFlag {
    id: String,
    cancelled_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Flags stored as JSON files under `<state_dir>/cancelled/`, so a flag set
/// from one process is seen by a reduction running in another.
#[derive(Debug, Clone)]
pub struct FileGate {
    dir: PathBuf,
    ttl: Duration,
}

impl FileGate {
    pub fn new(state_dir: &Path, ttl_sec: u64) -> Self {
        Self {
            dir: state_dir.join(FLAG_DIR),
            ttl: Duration::seconds(ttl_sec.min(MAX_TTL_SEC) as i64),
        }
    }

    fn flag_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}{}.json", FLAG_PREFIX, id))
    }

    fn read_flag(&self, path: &Path) -> Option<CancelFlag> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Unreadable cancellation flag {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(flag) => Some(flag),
            Err(e) => {
                warn!("Malformed cancellation flag {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Delete every expired flag, returning how many were removed
    pub fn prune(&self) -> Result<usize, GateError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(GateError::Io {
                    path: self.dir.clone(),
                    source: e,
                })
            }
        };

        let now = Utc::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if let Some(flag) = self.read_flag(&path) {
                if flag.expires_at <= now {
                    fs::remove_file(&path).map_err(|e| GateError::Io {
                        path: path.clone(),
                        source: e,
                    })?;
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            debug!("Pruned {} expired cancellation flags", removed);
        }
        Ok(removed)
    }
}

impl CancellationGate for FileGate {
    fn is_cancelled(&self, id: &str) -> bool {
        if !is_valid_id(id) {
            return false;
        }
        let path = self.flag_path(id);
        let Some(flag) = self.read_flag(&path) else {
            return false;
        };

        if flag.expires_at <= Utc::now() {
            // Expired flags behave as if never set
            let _ = fs::remove_file(&path);
            return false;
        }
        true
    }

    fn cancel(&self, id: &str) -> Result<(), GateError> {
        if !is_valid_id(id) {
            return Err(GateError::InvalidId(id.to_string()));
        }
        fs::create_dir_all(&self.dir).map_err(|e| GateError::Io {
            path: self.dir.clone(),
            source: e,
        })?;

        let now = Utc::now();
        let flag = CancelFlag {
            id: id.to_string(),
            cancelled_at: now,
            expires_at: now + self.ttl,
        };
        let path = self.flag_path(id);
        let json = serde_json::to_string_pretty(&flag)?;
        fs::write(&path, json).map_err(|e| GateError::Io { path, source: e })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unset_flag_is_not_cancelled() {
        let dir = TempDir::new().unwrap();
        let gate = FileGate::new(dir.path(), 60);
        assert!(!gate.is_cancelled("abc"));
    }

    #[test]
    fn test_cancel_sets_flag() {
        let dir = TempDir::new().unwrap();
        let gate = FileGate::new(dir.path(), 60);
        gate.cancel("abc").unwrap();

        assert!(gate.is_cancelled("abc"));
        assert!(!gate.is_cancelled("abd"));
        assert!(gate.any_cancelled(&["x", "abc"]));
        assert!(dir.path().join("cancelled/cancelled-abc.json").exists());
    }

    #[test]
    fn test_flag_visible_to_second_gate() {
        let dir = TempDir::new().unwrap();
        FileGate::new(dir.path(), 60).cancel("run1").unwrap();
        assert!(FileGate::new(dir.path(), 60).is_cancelled("run1"));
    }

    #[test]
    fn test_expired_flag_is_ignored_and_pruned() {
        let dir = TempDir::new().unwrap();
        let gate = FileGate::new(dir.path(), 0);
        gate.cancel("old").unwrap();
        gate.cancel("older").unwrap();

        assert!(!gate.is_cancelled("old"));
        assert_eq!(gate.prune().unwrap(), 1);
        assert!(!dir.path().join("cancelled/cancelled-older.json").exists());
    }

    #[test]
    fn test_path_like_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let gate = FileGate::new(&dir.path().join("state"), 60);

        let err = gate.cancel("../escape").unwrap_err();
        assert!(matches!(err, GateError::InvalidId(_)));
        assert!(!dir.path().join("state/escape.json").exists());
        assert!(!gate.is_cancelled("../escape"));
    }

    #[test]
    fn test_malformed_flag_is_not_cancelled() {
        let dir = TempDir::new().unwrap();
        let gate = FileGate::new(dir.path(), 60);
        fs::create_dir_all(dir.path().join("cancelled")).unwrap();
        fs::write(dir.path().join("cancelled/cancelled-bad.json"), "{").unwrap();
        assert!(!gate.is_cancelled("bad"));
    }
}
