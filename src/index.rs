//! Derived message indexes.
//!
//! ```text
//! indexes/by-provider/<provider>/messages.ndjson
//! indexes/by-date/<yyyy>/<mm>/<dd>/messages.ndjson   (or by-date/unknown/)
//! ```
//!
//! Indexes are rebuilt from the canonical message set on every call and
//! never read back. Each partition file is replaced atomically; partition
//! files that no longer have messages are removed afterwards.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;

use chrono::Datelike;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::ImportError;
use crate::layout::{DataLayout, MESSAGES_FILE};
use crate::models::Message;
use crate::store::write_ndjson_atomic;

/// Bucket for messages without a timestamp.
pub const UNKNOWN_DATE: &str = "unknown";

/// Partition counts of a rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexSummary {
    pub provider_partitions: usize,
    pub date_partitions: usize,
    pub messages: usize,
}

/// Rebuild every index partition from `messages`.
pub fn rebuild(layout: &DataLayout, messages: &[Message]) -> Result<IndexSummary, ImportError> {
    let root = layout.indexes_dir();

    let mut by_provider: BTreeMap<PathBuf, Vec<&Message>> = BTreeMap::new();
    let mut by_date: BTreeMap<PathBuf, Vec<&Message>> = BTreeMap::new();
    for message in messages {
        by_provider
            .entry(root.join("by-provider").join(message.provider.as_str()))
            .or_default()
            .push(message);
        by_date
            .entry(root.join("by-date").join(date_bucket(message)))
            .or_default()
            .push(message);
    }

    let mut written: HashSet<PathBuf> = HashSet::new();
    for (dir, rows) in by_provider.iter().chain(by_date.iter()) {
        let path = dir.join(MESSAGES_FILE);
        write_ndjson_atomic(&path, rows)?;
        written.insert(path);
    }
    remove_stale(&root, &written)?;

    debug!(
        providers = by_provider.len(),
        days = by_date.len(),
        messages = messages.len(),
        "indexes rebuilt"
    );
    Ok(IndexSummary {
        provider_partitions: by_provider.len(),
        date_partitions: by_date.len(),
        messages: messages.len(),
    })
}

/// `yyyy/mm/dd` of the message's UTC day, or `unknown`.
fn date_bucket(message: &Message) -> PathBuf {
    match message.created_at {
        Some(at) => PathBuf::from(format!("{:04}", at.year()))
            .join(format!("{:02}", at.month()))
            .join(format!("{:02}", at.day())),
        None => PathBuf::from(UNKNOWN_DATE),
    }
}

fn remove_stale(root: &std::path::Path, keep: &HashSet<PathBuf>) -> Result<(), ImportError> {
    if !root.exists() {
        return Ok(());
    }
    for entry in WalkDir::new(root).contents_first(true) {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if entry.file_type().is_file() {
            if !keep.contains(path) {
                fs::remove_file(path).map_err(|e| ImportError::write(path, e))?;
            }
        } else if entry.file_type().is_dir() && path != root {
            // Only succeeds for directories emptied above.
            let _ = fs::remove_dir(path);
        }
    }
    Ok(())
}
