//! Fatal and non-fatal import failures.
//!
//! [`ImportError`] covers the failures that move a job to `FAILED`. Record
//! rejections and unresolved attachments never abort a run; they are
//! collected as [`JobWarning`](crate::models::JobWarning)s instead.

use std::path::PathBuf;

use thiserror::Error;

/// A failure that aborts an import job.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The package is unreadable, unsupported, or the data root is incompatible.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No usable payload was found for the provider.
    #[error("no usable {provider} payload found under {}", root.display())]
    Extraction { provider: String, root: PathBuf },

    /// A filesystem write failed.
    #[error("write failed at {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ImportError {
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ImportError::Write {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable kind, used in the per-job error log.
    pub fn kind(&self) -> &'static str {
        match self {
            ImportError::Validation(_) => "validation_error",
            ImportError::Extraction { .. } => "extraction_failure",
            ImportError::Write { .. } => "write_failure",
        }
    }
}
