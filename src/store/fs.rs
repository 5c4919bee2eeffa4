use crate::error::StoreError;
use ignore::WalkBuilder;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use super::{Store, WorkItem};

/// Filesystem-backed store
#[derive(Debug, Clone, Default)]
pub struct FsStore;

impl FsStore {
    pub fn new() -> Self {
        Self
    }
}

impl Store for FsStore {
    fn list(&self, collection: &Path) -> Result<Vec<WorkItem>, StoreError> {
        let entries = fs::read_dir(collection).map_err(|e| StoreError::io(collection, e))?;

        let mut items = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(collection, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| StoreError::io(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            // Hidden entries include temp files of writes still in flight
            if name.starts_with('.') {
                continue;
            }
            items.push(WorkItem {
                name,
                path: entry.path(),
            });
        }

        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    fn read(&self, item: &WorkItem) -> Result<i64, StoreError> {
        let content = fs::read_to_string(&item.path).map_err(|e| StoreError::io(&item.path, e))?;
        content
            .trim()
            .parse::<i64>()
            .map_err(|_| StoreError::Parse {
                path: item.path.clone(),
                content,
            })
    }

    fn write(&self, collection: &Path, name: &str, value: i64) -> Result<WorkItem, StoreError> {
        let item = WorkItem::new(collection, name);
        if item.path.exists() {
            return Err(StoreError::AlreadyExists { path: item.path });
        }

        let mut tmp = NamedTempFile::new_in(collection).map_err(|e| StoreError::io(collection, e))?;
        write!(tmp, "{}", value).map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist_noclobber(&item.path)
            .map_err(|e| StoreError::io(&item.path, e.error))?;

        Ok(item)
    }

    fn ensure(&self, collection: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(collection).map_err(|e| StoreError::io(collection, e))
    }

    fn delete(&self, item: &WorkItem) -> Result<(), StoreError> {
        fs::remove_file(&item.path).map_err(|e| StoreError::io(&item.path, e))
    }

    fn remove(&self, collection: &Path) -> Result<(), StoreError> {
        match fs::remove_dir_all(collection) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(collection, e)),
        }
    }

    fn promote(
        &self,
        item: &WorkItem,
        collection: &Path,
        name: &str,
    ) -> Result<WorkItem, StoreError> {
        let target = WorkItem::new(collection, name);
        if target.path.exists() {
            return Err(StoreError::AlreadyExists { path: target.path });
        }

        fs::rename(&item.path, &target.path).map_err(|e| StoreError::io(&item.path, e))?;
        Ok(target)
    }

    fn exists(&self, collection: &Path) -> bool {
        collection.is_dir()
    }
}

/// Indented listing of everything under `root`, for debug logging
pub fn tree_lines(root: &Path) -> Vec<String> {
    WalkBuilder::new(root)
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build()
        .filter_map(Result::ok)
        .map(|entry| {
            let name = entry.file_name().to_string_lossy();
            let indent = "  ".repeat(entry.depth());
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                format!("{}{}/", indent, name)
            } else {
                format!("{}{}", indent, name)
            }
        })
        .collect()
}
