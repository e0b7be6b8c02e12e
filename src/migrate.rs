//! Data-root initialization and schema versioning.
//!
//! `harbor init` creates the directory skeleton and writes `schema.json`.
//! Imports call [`ensure_layout`], which does the same on a fresh root and
//! refuses a root written by a newer schema version.

use std::fs;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ImportError;
use crate::layout::DataLayout;
use crate::store::write_json_pretty_atomic;

/// Version of the on-disk layout and record schema.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMarker {
    pub schema_version: u32,
}

/// Create the layout and the schema marker when absent. Idempotent.
pub fn ensure_layout(layout: &DataLayout) -> Result<SchemaMarker, ImportError> {
    create_skeleton(layout)?;
    check_schema(layout)
}

/// Create the top-level directories of the layout.
pub fn create_skeleton(layout: &DataLayout) -> Result<(), ImportError> {
    for dir in layout.skeleton() {
        fs::create_dir_all(&dir).map_err(|e| ImportError::write(&dir, e))?;
    }
    Ok(())
}

/// Write the schema marker on a fresh root; refuse a root from a newer schema.
pub fn check_schema(layout: &DataLayout) -> Result<SchemaMarker, ImportError> {
    let path = layout.schema_marker();
    match read_marker(layout)? {
        Some(marker) if marker.schema_version > SCHEMA_VERSION => {
            Err(ImportError::Validation(format!(
                "data root {} uses schema version {}, this build supports up to {}",
                layout.root().display(),
                marker.schema_version,
                SCHEMA_VERSION
            )))
        }
        Some(marker) => Ok(marker),
        None => {
            let marker = SchemaMarker {
                schema_version: SCHEMA_VERSION,
            };
            write_json_pretty_atomic(&path, &marker)?;
            info!(root = %layout.root().display(), schema_version = SCHEMA_VERSION, "initialized data root");
            Ok(marker)
        }
    }
}

/// The schema marker, or `None` for an uninitialized root.
pub fn read_marker(layout: &DataLayout) -> Result<Option<SchemaMarker>, ImportError> {
    let path = layout.schema_marker();
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ImportError::Validation(format!(
                "cannot read {}: {}",
                path.display(),
                e
            )))
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| ImportError::Validation(format!("invalid {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path().join("data"));
        assert_eq!(ensure_layout(&layout).unwrap().schema_version, SCHEMA_VERSION);
        assert_eq!(ensure_layout(&layout).unwrap().schema_version, SCHEMA_VERSION);
        for dir in layout.skeleton() {
            assert!(dir.is_dir(), "{} missing", dir.display());
        }
        let raw = fs::read_to_string(layout.schema_marker()).unwrap();
        assert!(raw.contains("\"schema_version\": 1"));
    }

    #[test]
    fn newer_schema_is_refused() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path());
        fs::write(layout.schema_marker(), "{\"schema_version\": 99}").unwrap();
        let err = ensure_layout(&layout).unwrap_err();
        assert!(matches!(err, ImportError::Validation(_)));
        assert!(err.to_string().contains("schema version 99"));
    }

    #[test]
    fn skeleton_alone_leaves_marker_unwritten() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path().join("data"));
        create_skeleton(&layout).unwrap();
        assert!(layout.jobs_dir().is_dir());
        assert!(read_marker(&layout).unwrap().is_none());
    }
}
