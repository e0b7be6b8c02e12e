//! NDJSON dataset persistence.
//!
//! Every file is replaced by writing a temporary sibling and renaming it
//! over the target, so a concurrent reader sees either the old or the new
//! content and never a partial file.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ImportError;
use crate::layout::DatasetPaths;
use crate::models::{Attachment, Conversation, Message, RecordCounts};

/// The three entity collections of a dataset, in file order.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub conversations: Vec<Conversation>,
    pub messages: Vec<Message>,
    pub attachments: Vec<Attachment>,
}

impl Dataset {
    pub fn load(paths: &DatasetPaths) -> Result<Self, ImportError> {
        Ok(Self {
            conversations: read_ndjson(&paths.conversations())?,
            messages: read_ndjson(&paths.messages())?,
            attachments: read_ndjson(&paths.attachments())?,
        })
    }

    pub fn save(&self, paths: &DatasetPaths) -> Result<(), ImportError> {
        write_ndjson_atomic(&paths.conversations(), &self.conversations)?;
        write_ndjson_atomic(&paths.messages(), &self.messages)?;
        write_ndjson_atomic(&paths.attachments(), &self.attachments)?;
        Ok(())
    }

    pub fn counts(&self) -> RecordCounts {
        RecordCounts {
            conversations: self.conversations.len() as u64,
            messages: self.messages.len() as u64,
            attachments: self.attachments.len() as u64,
        }
    }
}

/// Read every record of an NDJSON file. A missing file is an empty dataset.
pub fn read_ndjson<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, ImportError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(ImportError::Validation(format!(
                "cannot read {}: {}",
                path.display(),
                e
            )))
        }
    };

    let mut rows = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| {
            ImportError::Validation(format!("cannot read {}: {}", path.display(), e))
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line).map_err(|e| {
            ImportError::Validation(format!(
                "{} line {} is not a valid record: {}",
                path.display(),
                lineno + 1,
                e
            ))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Serialize rows one per line, each terminated by `\n`.
pub fn encode_ndjson<T: Serialize>(rows: &[T]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row)?);
        out.push('\n');
    }
    Ok(out)
}

pub fn write_ndjson_atomic<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), ImportError> {
    let content = encode_ndjson(rows).map_err(|e| ImportError::write(path, std::io::Error::other(e)))?;
    write_atomic(path, content.as_bytes())
}

pub fn write_json_pretty_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ImportError> {
    let mut content = serde_json::to_string_pretty(value)
        .map_err(|e| ImportError::write(path, std::io::Error::other(e)))?;
    content.push('\n');
    write_atomic(path, content.as_bytes())
}

/// Write bytes through a temporary file in the same directory, then rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ImportError> {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| ImportError::write(parent, e))?;

    let temp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("dataset"),
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    );
    let temp_path = parent.join(temp_name);
    fs::write(&temp_path, bytes).map_err(|e| ImportError::write(&temp_path, e))?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(ImportError::write(path, e));
    }
    Ok(())
}

/// Append one JSON line to a log file, creating it when absent.
pub fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<(), ImportError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ImportError::write(parent, e))?;
    }
    let mut line =
        serde_json::to_string(value).map_err(|e| ImportError::write(path, std::io::Error::other(e)))?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ImportError::write(path, e))?;
    file.write_all(line.as_bytes())
        .map_err(|e| ImportError::write(path, e))
}
