use crate::config::Combine;
use crate::error::TaskError;
use crate::gate::CancellationGate;
use crate::queue::{Job, JobOutcome};
use crate::store::{Store, WorkItem};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

const NAME_SEPARATOR: &str = "+";
const MAX_NAME_LEN: usize = 255;

/// Output name for a group: member basenames joined by `+`. Names too long
/// for a filesystem entry fall back to a digest of the joined name, so the
/// same group always maps to the same output.
pub fn output_name(group: &[WorkItem]) -> String {
    let joined = group
        .iter()
        .map(|item| item.name.as_str())
        .collect::<Vec<_>>()
        .join(NAME_SEPARATOR);

    if joined.len() <= MAX_NAME_LEN {
        joined
    } else {
        let hash = Sha256::digest(joined.as_bytes());
        format!("sha256-{:x}", hash)
    }
}

/// Combines one merge group into a single new item in `output`
pub struct MergeTask {
    pub id: String,
    pub batch_id: String,
    pub run_id: String,
    pub group: Vec<WorkItem>,
    pub output: PathBuf,
    pub combine: Combine,
    pub store: Arc<dyn Store>,
    pub gate: Arc<dyn CancellationGate>,
}

#[async_trait]
impl Job for MergeTask {
    fn id(&self) -> &str {
        &self.id
    }

    async fn perform(&self) -> Result<JobOutcome, TaskError> {
        if self
            .gate
            .any_cancelled(&[self.id.as_str(), self.batch_id.as_str(), self.run_id.as_str()])
        {
            debug!("Merge task {} cancelled before start", self.id);
            return Ok(JobOutcome::Cancelled);
        }

        if self.group.is_empty() {
            return Err(TaskError::EmptyGroup);
        }

        let names: Vec<String> = self.group.iter().map(|i| i.name.clone()).collect();
        debug!("Merge task {} combining {:?}", self.id, names);

        let values = self
            .group
            .iter()
            .map(|item| self.store.read(item))
            .collect::<Result<Vec<_>, _>>()?;

        let value = self
            .combine
            .apply(&values)
            .ok_or(TaskError::Overflow { group: names })?;

        let name = output_name(&self.group);
        let item = self.store.write(&self.output, &name, value)?;

        info!("Merge task {} wrote {} = {}", self.id, item.path.display(), value);
        Ok(JobOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::gate::FileGate;
    use crate::store::FsStore;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        store: Arc<dyn Store>,
        gate: Arc<FileGate>,
    }

    impl Fixture {
        fn new(values: &[i64]) -> Self {
            let dir = TempDir::new().unwrap();
            let store: Arc<dyn Store> = Arc::new(FsStore::new());
            store.ensure(&dir.path().join("out")).unwrap();
            for (i, v) in values.iter().enumerate() {
                store
                    .write(dir.path(), &(i + 1).to_string(), *v)
                    .unwrap();
            }
            let gate = Arc::new(FileGate::new(&dir.path().join(".state"), 60));
            Self { dir, store, gate }
        }

        fn task(&self, id: &str, combine: Combine) -> MergeTask {
            MergeTask {
                id: id.to_string(),
                batch_id: "batch".to_string(),
                run_id: "run".to_string(),
                group: self.store.list(self.dir.path()).unwrap(),
                output: self.out(),
                combine,
                store: self.store.clone(),
                gate: self.gate.clone(),
            }
        }

        fn out(&self) -> PathBuf {
            self.dir.path().join("out")
        }
    }

    #[test]
    fn test_output_name_joins_basenames() {
        let group = vec![
            WorkItem::new(Path::new("a/b"), "1+2"),
            WorkItem::new(Path::new("a/b"), "3+4"),
        ];
        assert_eq!(output_name(&group), "1+2+3+4");
        assert_eq!(output_name(&group[..1]), "1+2");
    }

    #[test]
    fn test_output_name_hashes_long_names() {
        let group: Vec<_> = (0..100)
            .map(|i| WorkItem::new(Path::new("x"), &format!("item-{:04}", i)))
            .collect();
        let name = output_name(&group);
        assert!(name.starts_with("sha256-"));
        assert_eq!(name.len(), "sha256-".len() + 64);
        assert_eq!(name, output_name(&group));
    }

    #[tokio::test]
    async fn test_merge_sums_group() {
        let fx = Fixture::new(&[3, 4]);
        let outcome = fx.task("t1", Combine::Sum).perform().await.unwrap();
        assert_eq!(outcome, JobOutcome::Completed);

        let items = fx.store.list(&fx.out()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "1+2");
        assert_eq!(fx.store.read(&items[0]).unwrap(), 7);
        // inputs untouched
        assert_eq!(fx.store.list(fx.dir.path()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_single_member_group_carries_through() {
        let fx = Fixture::new(&[5]);
        fx.task("t1", Combine::Sum).perform().await.unwrap();

        let items = fx.store.list(&fx.out()).unwrap();
        assert_eq!(items[0].name, "1");
        assert_eq!(fx.store.read(&items[0]).unwrap(), 5);
    }

    #[tokio::test]
    async fn test_duplicate_execution_surfaces_already_exists() {
        let fx = Fixture::new(&[1, 2]);
        fx.task("t1", Combine::Sum).perform().await.unwrap();

        let err = fx.task("t2", Combine::Sum).perform().await.unwrap_err();
        assert!(matches!(
            err,
            TaskError::Store(StoreError::AlreadyExists { .. })
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_cancelled_task_has_no_side_effect() {
        let fx = Fixture::new(&[1, 2]);
        fx.gate.cancel("t1").unwrap();

        let outcome = fx.task("t1", Combine::Sum).perform().await.unwrap();
        assert_eq!(outcome, JobOutcome::Cancelled);
        assert!(fx.store.list(&fx.out()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_task() {
        let fx = Fixture::new(&[1, 2]);
        fx.gate.cancel("run").unwrap();

        let outcome = fx.task("t1", Combine::Sum).perform().await.unwrap();
        assert_eq!(outcome, JobOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_overflow_is_an_error() {
        let fx = Fixture::new(&[i64::MAX, 1]);
        let err = fx.task("t1", Combine::Sum).perform().await.unwrap_err();
        assert!(matches!(err, TaskError::Overflow { .. }));
        assert!(fx.store.list(&fx.out()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_combinators() {
        let fx = Fixture::new(&[3, 4]);
        fx.task("t1", Combine::Product).perform().await.unwrap();
        let items = fx.store.list(&fx.out()).unwrap();
        assert_eq!(fx.store.read(&items[0]).unwrap(), 12);
    }
}
