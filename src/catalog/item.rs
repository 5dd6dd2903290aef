use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of catalog file, derived from its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Stereolithography mesh
    Stl,
    /// 3D Manufacturing Format archive
    #[serde(rename = "3mf")]
    ThreeMf,
    /// Sliced G-code (plain or binary)
    Gcode,
    /// Anything else the catalog tracks
    Other,
}

impl FileKind {
    const STL_EXTENSIONS: [&'static str; 1] = ["stl"];
    const THREE_MF_EXTENSIONS: [&'static str; 1] = ["3mf"];
    const GCODE_EXTENSIONS: [&'static str; 3] = ["gcode", "gco", "bgcode"];

    /// Detect the kind from a path's extension (case-insensitive)
    pub fn from_path(path: &Path) -> Self {
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(e) => e.to_lowercase(),
            None => return FileKind::Other,
        };

        if Self::STL_EXTENSIONS.contains(&ext.as_str()) {
            FileKind::Stl
        } else if Self::THREE_MF_EXTENSIONS.contains(&ext.as_str()) {
            FileKind::ThreeMf
        } else if Self::GCODE_EXTENSIONS.contains(&ext.as_str()) {
            FileKind::Gcode
        } else {
            FileKind::Other
        }
    }

    /// Whether the rendering engine can produce a thumbnail for this kind
    pub fn is_renderable(&self) -> bool {
        matches!(self, FileKind::Stl | FileKind::ThreeMf)
    }

    /// Whether the catalog tracks this kind at all
    pub fn is_catalog_file(&self) -> bool {
        !matches!(self, FileKind::Other)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileKind::Stl => "STL",
            FileKind::ThreeMf => "3MF",
            FileKind::Gcode => "G-code",
            FileKind::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// A catalog entry awaiting thumbnail generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub kind: FileKind,
    /// True once a thumbnail has been generated (or terminally given up on)
    #[serde(default)]
    pub thumbnail_generated: bool,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let kind = FileKind::from_path(&path);
        Self {
            id: id.into(),
            name,
            path,
            kind,
            thumbnail_generated: false,
        }
    }
}
