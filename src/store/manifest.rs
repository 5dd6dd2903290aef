use super::{CatalogEntry, StatusStore};
use crate::catalog::WorkItem;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    #[serde(default)]
    entries: Vec<CatalogEntry>,
}

/// Status store persisted as a JSON manifest
///
/// Every update rewrites the manifest through a temporary file so a crash
/// never leaves a half-written catalog behind.
pub struct ManifestStore {
    path: PathBuf,
    manifest: Mutex<Manifest>,
}

impl ManifestStore {
    /// Open the manifest at `path`, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let manifest = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                AppError::Store(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let manifest: Manifest = serde_json::from_str(&content)?;
            debug!(
                path = %path.display(),
                entries = manifest.entries.len(),
                "Loaded catalog manifest"
            );
            manifest
        } else {
            Manifest::default()
        };

        Ok(Self {
            path,
            manifest: Mutex::new(manifest),
        })
    }

    /// Default manifest location under the user data directory
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("thumbnailer")
            .join("catalog.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a file to the catalog unless it is already tracked
    ///
    /// Returns the new item, or `None` when the path was known.
    pub fn register(&self, path: &Path) -> Result<Option<WorkItem>> {
        let mut manifest = self.lock();
        if manifest.entries.iter().any(|e| e.item.path == path) {
            return Ok(None);
        }

        let item = WorkItem::new(Uuid::new_v4().to_string(), path.to_path_buf());
        manifest.entries.push(CatalogEntry::new(item.clone()));
        if let Err(e) = self.persist(&manifest) {
            manifest.entries.pop();
            return Err(e);
        }
        Ok(Some(item))
    }

    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.lock().entries.clone()
    }

    fn persist(&self, manifest: &Manifest) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(manifest)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Manifest> {
        self.manifest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StatusStore for ManifestStore {
    fn pending_items(&self) -> Result<Vec<WorkItem>> {
        Ok(self
            .lock()
            .entries
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
        let mut manifest = self.lock();
        let index = manifest
            .entries
            .iter()
            .position(|e| e.item.id == id)
            .ok_or_else(|| AppError::Store(format!("Unknown item: {}", id)))?;

        // Memory only changes once the new state is on disk
        let previous = manifest.entries[index].clone();
        manifest.entries[index].apply(thumbnail, generated);
        if let Err(e) = self.persist(&manifest) {
            manifest.entries[index] = previous;
            return Err(e);
        }
        info!(
            id,
            thumbnail = ?thumbnail,
            generated,
            "Recorded thumbnail status"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn register_dedupes_by_path() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::open(dir.path().join("catalog.json")).unwrap();

        let first = store.register(Path::new("/m/cube.stl")).unwrap();
        assert!(first.is_some());
        assert!(store.register(Path::new("/m/cube.stl")).unwrap().is_none());
        assert_eq!(store.entries().len(), 1);
    }

    #[test]
    fn status_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("catalog.json");

        let store = ManifestStore::open(&path).unwrap();
        let cube = store.register(Path::new("/m/cube.stl")).unwrap().unwrap();
        store.register(Path::new("/m/part.3mf")).unwrap();
        store
            .update_artifact_status(&cube.id, Some(Path::new("/t/cube.png")), true)
            .unwrap();
        drop(store);

        let reopened = ManifestStore::open(&path).unwrap();
        let pending = reopened.pending_items().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, "part.3mf");

        let entry = reopened
            .entries()
            .into_iter()
            .find(|e| e.item.id == cube.id)
            .unwrap();
        assert_eq!(entry.thumbnail, Some(PathBuf::from("/t/cube.png")));
        assert!(entry.item.thumbnail_generated);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn failed_write_leaves_memory_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        let store = ManifestStore::open(&path).unwrap();
        let cube = store.register(Path::new("/m/cube.stl")).unwrap().unwrap();

        // A directory in place of the manifest makes the rename fail
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(
            store
                .update_artifact_status(&cube.id, Some(Path::new("/t/cube.png")), true)
                .is_err()
        );
        let entry = &store.entries()[0];
        assert!(!entry.item.thumbnail_generated);
        assert!(entry.thumbnail.is_none());
        assert_eq!(store.pending_items().unwrap().len(), 1);

        assert!(store.register(Path::new("/m/part.3mf")).is_err());
        assert_eq!(store.entries().len(), 1);
    }

    #[test]
    fn corrupt_manifest_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(ManifestStore::open(&path), Err(AppError::Json(_))));
    }
}
