//! Store Module
//!
//! Persistence of each catalog item's thumbnail status. The catalog proper
//! lives elsewhere; the pipeline only reads pending items and records
//! outcomes through [`StatusStore`].

pub mod manifest;
pub mod memory;

pub use manifest::ManifestStore;
pub use memory::MemoryStore;

use crate::catalog::WorkItem;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the pipeline reads pending work and records outcomes
pub trait StatusStore: Send + Sync + 'static {
    /// Items that still need a thumbnail
    fn pending_items(&self) -> Result<Vec<WorkItem>>;

    /// Record the final thumbnail path (if any) and generated flag of an item
    fn update_artifact_status(&self, id: &str, thumbnail: Option<&Path>, generated: bool)
    -> Result<()>;
}

/// A catalog item together with its recorded thumbnail status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub item: WorkItem,
    #[serde(default)]
    pub thumbnail: Option<PathBuf>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CatalogEntry {
    pub fn new(item: WorkItem) -> Self {
        Self {
            item,
            thumbnail: None,
            updated_at: None,
        }
    }

    fn apply(&mut self, thumbnail: Option<&Path>, generated: bool) {
        self.thumbnail = thumbnail.map(Path::to_path_buf);
        self.item.thumbnail_generated = generated;
        self.updated_at = Some(Utc::now());
    }
}
