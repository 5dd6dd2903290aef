use crate::catalog::WorkItem;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One engine invocation unit derived from a work item
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub item_id: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub size: u32,
}

impl Job {
    /// Create a job for an item, writing to a fresh unique path under `thumbnail_dir`
    pub fn for_item(item: &WorkItem, thumbnail_dir: &Path, extension: &str, size: u32) -> Self {
        Self {
            item_id: item.id.clone(),
            input: item.path.clone(),
            output: thumbnail_dir.join(format!("{}.{}", Uuid::new_v4(), extension)),
            size,
        }
    }

    /// Size of the input file, if it can be read
    pub fn input_size(&self) -> Option<u64> {
        std::fs::metadata(&self.input).ok().map(|m| m.len())
    }
}
