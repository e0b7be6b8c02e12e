//! Dedupe/upsert engine.
//!
//! Merges the rows of one import run into an existing dataset. Each entity
//! kind is merged independently through the [`Mergeable`] rules; change
//! detection compares a stable signature (the serialized record minus its
//! provenance fields), so re-observing a record never counts as an update.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::models::{Attachment, AttachmentStatus, Conversation, EntityStats, Message, Provenance};

/// Field-level merge behaviour of a canonical record.
pub trait Mergeable: Clone + Serialize {
    fn id(&self) -> &str;

    /// Parent key that must be present (`None` when the entity has no parent).
    fn parent_id(&self) -> Option<&str> {
        None
    }

    fn provenance(&self) -> &Provenance;

    fn provenance_mut(&mut self) -> &mut Provenance;

    /// Combine a previously stored row with an incoming observation.
    fn merge(previous: &Self, incoming: &Self) -> Self;

    fn has_required_keys(&self) -> bool {
        !self.id().trim().is_empty()
            && self.parent_id().map_or(true, |p| !p.trim().is_empty())
    }
}

/// Result of one upsert pass.
#[derive(Debug, Clone)]
pub struct UpsertOutcome<T> {
    pub rows: Vec<T>,
    pub stats: EntityStats,
}

/// Insert-or-merge `incoming` into `existing`, keyed by canonical id.
///
/// Existing rows keep their order; new rows are appended in arrival order.
pub fn upsert<T: Mergeable>(existing: Vec<T>, incoming: Vec<T>, job_id: &str) -> UpsertOutcome<T> {
    let mut rows = existing;
    let mut index: HashMap<String, usize> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| (row.id().to_string(), i))
        .collect();
    let mut stats = EntityStats::default();

    for mut row in incoming {
        if !row.has_required_keys() {
            stats.failed += 1;
            continue;
        }

        match index.get(row.id()).copied() {
            None => {
                stamp(row.provenance_mut(), None, job_id, true);
                index.insert(row.id().to_string(), rows.len());
                rows.push(row);
                stats.new += 1;
            }
            Some(pos) => {
                let previous = &rows[pos];
                let mut merged = T::merge(previous, &row);
                let changed = stable_signature(previous) != stable_signature(&merged);
                merged
                    .provenance_mut()
                    .seen_in_jobs
                    .extend(row.provenance().seen_in_jobs.iter().cloned());
                stamp(
                    merged.provenance_mut(),
                    Some(previous.provenance()),
                    job_id,
                    changed,
                );
                if changed {
                    stats.updated += 1;
                } else {
                    stats.unchanged += 1;
                }
                rows[pos] = merged;
            }
        }
    }

    UpsertOutcome { rows, stats }
}

/// Merge duplicate rows within a single batch, keeping first-seen order.
///
/// Used by extractors when one payload carries the same record twice.
pub fn dedupe_local<T: Mergeable>(rows: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(rows.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for row in rows {
        match index.get(row.id()) {
            Some(&pos) => {
                let merged = T::merge(&out[pos], &row);
                out[pos] = merged;
            }
            None => {
                index.insert(row.id().to_string(), out.len());
                out.push(row);
            }
        }
    }
    out
}

/// The record's content with every provenance field removed.
pub fn stable_signature<T: Serialize>(row: &T) -> Value {
    let mut value = serde_json::to_value(row).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        for field in Provenance::FIELDS {
            map.remove(field);
        }
    }
    value
}

/// Update provenance for an observation by `job_id`.
///
/// `first_seen_job_id` is inherited from `previous` when present. The
/// `source_job_id` only moves to the current job when the content changed.
fn stamp(target: &mut Provenance, previous: Option<&Provenance>, job_id: &str, changed: bool) {
    let mut seen = target.seen_in_jobs.clone();
    if let Some(prev) = previous {
        seen.extend(prev.seen_in_jobs.iter().cloned());
    }
    seen.insert(job_id.to_string());

    let first_seen = previous
        .map(|p| p.first_seen_job_id.clone())
        .filter(|id| !id.is_empty())
        .or_else(|| Some(target.first_seen_job_id.clone()).filter(|id| !id.is_empty()))
        .unwrap_or_else(|| job_id.to_string());

    let source = match previous {
        Some(prev) if !changed && !prev.source_job_id.is_empty() => prev.source_job_id.clone(),
        _ => job_id.to_string(),
    };

    *target = Provenance {
        source_job_id: source,
        first_seen_job_id: first_seen,
        last_seen_job_id: job_id.to_string(),
        seen_in_jobs: seen,
    };
}

/// Non-empty wins; between two non-empty values the longer one wins.
pub fn prefer_longer(previous: &str, incoming: &str) -> String {
    if incoming.chars().count() > previous.chars().count() {
        incoming.to_string()
    } else {
        previous.to_string()
    }
}

fn prefer_longer_opt(previous: &Option<String>, incoming: &Option<String>) -> Option<String> {
    let prev = previous.as_deref().unwrap_or("");
    let inc = incoming.as_deref().unwrap_or("");
    Some(prefer_longer(prev, inc)).filter(|s| !s.is_empty())
}

/// Incoming replaces previous only when it is a non-empty string.
fn prefer_non_empty(previous: &Option<String>, incoming: &Option<String>) -> Option<String> {
    match incoming {
        Some(value) if !value.trim().is_empty() => Some(value.clone()),
        _ => previous.clone(),
    }
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    }
}

fn latest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    }
}

fn union_ordered(previous: &[String], incoming: &[String]) -> Vec<String> {
    let mut out = previous.to_vec();
    for id in incoming {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}

impl Mergeable for Conversation {
    fn id(&self) -> &str {
        &self.id
    }

    fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    fn provenance_mut(&mut self) -> &mut Provenance {
        &mut self.provenance
    }

    fn merge(previous: &Self, incoming: &Self) -> Self {
        let provider_conversation_id = if incoming.provider_conversation_id.trim().is_empty() {
            previous.provider_conversation_id.clone()
        } else {
            incoming.provider_conversation_id.clone()
        };
        Conversation {
            id: previous.id.clone(),
            provider: previous.provider,
            provider_conversation_id,
            title: prefer_longer_opt(&previous.title, &incoming.title),
            created_at: earliest(previous.created_at, incoming.created_at),
            updated_at: latest(previous.updated_at, incoming.updated_at),
            provenance: previous.provenance.clone(),
        }
    }
}

impl Mergeable for Message {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.conversation_id)
    }

    fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    fn provenance_mut(&mut self) -> &mut Provenance {
        &mut self.provenance
    }

    fn merge(previous: &Self, incoming: &Self) -> Self {
        let role = if incoming.role == crate::models::Role::Unknown {
            previous.role
        } else {
            incoming.role
        };
        Message {
            id: previous.id.clone(),
            conversation_id: previous.conversation_id.clone(),
            provider: previous.provider,
            provider_message_id: prefer_non_empty(
                &previous.provider_message_id,
                &incoming.provider_message_id,
            ),
            role,
            text: prefer_longer(&previous.text, &incoming.text),
            model: prefer_non_empty(&previous.model, &incoming.model),
            created_at: earliest(previous.created_at, incoming.created_at),
            attachment_ids: union_ordered(&previous.attachment_ids, &incoming.attachment_ids),
            provenance: previous.provenance.clone(),
        }
    }
}

impl Mergeable for Attachment {
    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.message_id)
    }

    fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    fn provenance_mut(&mut self) -> &mut Provenance {
        &mut self.provenance
    }

    fn merge(previous: &Self, incoming: &Self) -> Self {
        // A materialized blob is never downgraded by a later payload that
        // lost the local file reference.
        let regresses = previous.status == AttachmentStatus::Embedded
            && incoming.status != AttachmentStatus::Embedded;
        let (storage, status, sha256, blob_path) = if regresses {
            (
                previous.storage,
                previous.status,
                previous.sha256.clone(),
                previous.blob_path.clone(),
            )
        } else {
            (
                incoming.storage,
                incoming.status,
                incoming.sha256.clone().or_else(|| previous.sha256.clone()),
                incoming
                    .blob_path
                    .clone()
                    .or_else(|| previous.blob_path.clone()),
            )
        };

        Attachment {
            id: previous.id.clone(),
            message_id: previous.message_id.clone(),
            provider: previous.provider,
            kind: prefer_non_empty(&previous.kind, &incoming.kind),
            name: prefer_non_empty(&previous.name, &incoming.name),
            mime_type: prefer_non_empty(&previous.mime_type, &incoming.mime_type),
            size_bytes: incoming.size_bytes.or(previous.size_bytes),
            storage,
            status,
            sha256,
            blob_path,
            source_path: incoming
                .source_path
                .clone()
                .or_else(|| previous.source_path.clone()),
            url: incoming.url.clone().or_else(|| previous.url.clone()),
            provenance: previous.provenance.clone(),
        }
    }
}
