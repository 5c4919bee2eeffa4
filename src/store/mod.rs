//! Work item storage.
//!
//! A collection is a directory; a work item is a regular file inside it
//! holding one decimal integer. Items are write-once: a second write to the
//! same name is reported as [`StoreError::AlreadyExists`].

mod fs;

pub use fs::{tree_lines, FsStore};

use crate::error::StoreError;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Basename within its collection
    pub name: String,
    pub path: PathBuf,
}

impl WorkItem {
    pub fn new(collection: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: collection.join(name),
        }
    }
}

pub trait Store: Send + Sync {
    /// Regular items of `collection`, sorted by name
    fn list(&self, collection: &Path) -> Result<Vec<WorkItem>, StoreError>;

    fn read(&self, item: &WorkItem) -> Result<i64, StoreError>;

    /// Create a new item; fails with `AlreadyExists` rather than overwrite
    fn write(&self, collection: &Path, name: &str, value: i64) -> Result<WorkItem, StoreError>;

    /// Create `collection` (and parents) if absent
    fn ensure(&self, collection: &Path) -> Result<(), StoreError>;

    /// Delete a single item
    fn delete(&self, item: &WorkItem) -> Result<(), StoreError>;

    /// Delete `collection` and everything below it; absent is not an error
    fn remove(&self, collection: &Path) -> Result<(), StoreError>;

    /// Move `item` into `collection` under `name`, never overwriting
    fn promote(&self, item: &WorkItem, collection: &Path, name: &str)
        -> Result<WorkItem, StoreError>;

    fn exists(&self, collection: &Path) -> bool;
}
