use super::{CatalogEntry, StatusStore};
use crate::catalog::WorkItem;
use crate::error::{AppError, Result};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Status store kept in memory
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<CatalogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = WorkItem>) -> Self {
        Self {
            entries: Mutex::new(items.into_iter().map(CatalogEntry::new).collect()),
        }
    }

    pub fn get(&self, id: &str) -> Option<CatalogEntry> {
        self.lock().iter().find(|e| e.item.id == id).cloned()
    }

    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CatalogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StatusStore for MemoryStore {
    fn pending_items(&self) -> Result<Vec<WorkItem>> {
        Ok(self
            .lock()
            .iter()
            .filter(|e| !e.item.thumbnail_generated)
            .map(|e| e.item.clone())
            .collect())
    }

    fn update_artifact_status(
        &self,
        id: &str,
        thumbnail: Option<&Path>,
        generated: bool,
    ) -> Result<()> {
        let mut entries = self.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.item.id == id)
            .ok_or_else(|| AppError::Store(format!("Unknown item: {}", id)))?;
        entry.apply(thumbnail, generated);
        Ok(())
    }
}
