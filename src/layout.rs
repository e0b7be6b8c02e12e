//! Paths inside a data root.
//!
//! ```text
//! raw/<provider>/<yyyy>/<mm>/<job_id>/extracted/
//! provider/<provider>/{conversations,messages,attachments}.ndjson
//! canonical/{conversations,messages,attachments}.ndjson
//! blobs/sha256/<aa>/<bb>/<hash>.<ext>
//! indexes/by-provider/<provider>/messages.ndjson
//! indexes/by-date/<yyyy>/<mm>/<dd>/messages.ndjson
//! jobs/<job_id>.json
//! errors/<job_id>.ndjson
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};

use crate::models::Provider;

pub const CONVERSATIONS_FILE: &str = "conversations.ndjson";
pub const MESSAGES_FILE: &str = "messages.ndjson";
pub const ATTACHMENTS_FILE: &str = "attachments.ndjson";
pub const SCHEMA_FILE: &str = "schema.json";
pub const LOCK_FILE: &str = ".harbor.lock";

/// The three NDJSON files of one dataset.
#[derive(Debug, Clone)]
pub struct DatasetPaths {
    pub dir: PathBuf,
}

impl DatasetPaths {
    pub fn conversations(&self) -> PathBuf {
        self.dir.join(CONVERSATIONS_FILE)
    }

    pub fn messages(&self) -> PathBuf {
        self.dir.join(MESSAGES_FILE)
    }

    pub fn attachments(&self) -> PathBuf {
        self.dir.join(ATTACHMENTS_FILE)
    }
}

/// Resolves every location of the on-disk layout from a data root.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn schema_marker(&self) -> PathBuf {
        self.root.join(SCHEMA_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// `raw/<provider>/<yyyy>/<mm>/<job_id>`
    pub fn raw_job_dir(&self, provider: Provider, started_at: DateTime<Utc>, job_id: &str) -> PathBuf {
        self.root
            .join("raw")
            .join(provider.as_str())
            .join(format!("{:04}", started_at.year()))
            .join(format!("{:02}", started_at.month()))
            .join(job_id)
    }

    pub fn canonical(&self) -> DatasetPaths {
        DatasetPaths {
            dir: self.root.join("canonical"),
        }
    }

    pub fn provider_dataset(&self, provider: Provider) -> DatasetPaths {
        DatasetPaths {
            dir: self.root.join("provider").join(provider.as_str()),
        }
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs").join("sha256")
    }

    /// Directory holding blobs whose hash starts with `aa` then `bb`.
    pub fn blob_dir_for(&self, hash: &str) -> PathBuf {
        let aa = hash.get(0..2).unwrap_or("00");
        let bb = hash.get(2..4).unwrap_or("00");
        self.blobs_dir().join(aa).join(bb)
    }

    pub fn indexes_dir(&self) -> PathBuf {
        self.root.join("indexes")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    pub fn job_file(&self, job_id: &str) -> PathBuf {
        self.jobs_dir().join(format!("{}.json", job_id))
    }

    pub fn errors_dir(&self) -> PathBuf {
        self.root.join("errors")
    }

    pub fn error_log(&self, job_id: &str) -> PathBuf {
        self.errors_dir().join(format!("{}.ndjson", job_id))
    }

    /// Top-level directories created by `init`.
    pub fn skeleton(&self) -> Vec<PathBuf> {
        vec![
            self.root.join("raw"),
            self.root.join("provider"),
            self.canonical().dir,
            self.blobs_dir(),
            self.indexes_dir(),
            self.jobs_dir(),
            self.errors_dir(),
        ]
    }

    /// Express `path` relative to the data root with forward slashes.
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}
