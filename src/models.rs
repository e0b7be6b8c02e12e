//! Canonical record types shared by the extractors, the merge engine, and
//! the on-disk datasets.
//!
//! Every record serializes to one NDJSON line. Provenance fields are
//! flattened into the record so a line reads as a single flat object.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A supported chat-export provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Chatgpt,
    Claude,
    Gemini,
    Grok,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::Chatgpt,
        Provider::Claude,
        Provider::Gemini,
        Provider::Grok,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Chatgpt => "chatgpt",
            Provider::Claude => "claude",
            Provider::Gemini => "gemini",
            Provider::Grok => "grok",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "chatgpt" | "openai" => Ok(Provider::Chatgpt),
            "claude" | "anthropic" => Ok(Provider::Claude),
            "gemini" | "bard" => Ok(Provider::Gemini),
            "grok" | "xai" => Ok(Provider::Grok),
            other => Err(format!(
                "unsupported provider '{}'; expected one of: chatgpt, claude, gemini, grok",
                other
            )),
        }
    }
}

/// Normalized message authorship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    #[default]
    Unknown,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Unknown => "unknown",
        }
    }
}

/// Where an attachment's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Blob,
    Url,
    Missing,
}

/// Resolution state of an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentStatus {
    Embedded,
    Linked,
    Missing,
}

/// Which import jobs produced a record.
///
/// `first_seen_job_id` is fixed once set and `seen_in_jobs` only grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default)]
    pub source_job_id: String,
    #[serde(default)]
    pub first_seen_job_id: String,
    #[serde(default)]
    pub last_seen_job_id: String,
    #[serde(default)]
    pub seen_in_jobs: BTreeSet<String>,
}

impl Provenance {
    /// Field names as they appear in a serialized record.
    pub const FIELDS: [&'static str; 4] = [
        "source_job_id",
        "first_seen_job_id",
        "last_seen_job_id",
        "seen_in_jobs",
    ];

    /// Provenance for a record produced by `job_id` for the first time.
    pub fn for_job(job_id: &str) -> Self {
        Self {
            source_job_id: job_id.to_string(),
            first_seen_job_id: job_id.to_string(),
            last_seen_job_id: job_id.to_string(),
            seen_in_jobs: BTreeSet::from([job_id.to_string()]),
        }
    }
}

/// One conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub provider: Provider,
    pub provider_conversation_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

/// One turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub provider: Provider,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachment_ids: Vec<String>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

/// A reference to binary or external content owned by a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub message_id: String,
    pub provider: Provider,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    pub storage: StorageMode,
    pub status: AttachmentStatus,
    /// Hex SHA-256 of the materialized bytes.
    #[serde(default)]
    pub sha256: Option<String>,
    /// Blob location relative to the data root.
    #[serde(default)]
    pub blob_path: Option<String>,
    /// Path of the referenced file relative to the extraction root.
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl Attachment {
    /// An attachment that has not been through the materializer yet.
    ///
    /// Local references start out as `missing` until the materializer finds
    /// the file; remote-only references are `linked`.
    pub fn unresolved(id: String, message_id: String, provider: Provider) -> Self {
        Self {
            id,
            message_id,
            provider,
            kind: None,
            name: None,
            mime_type: None,
            size_bytes: None,
            storage: StorageMode::Missing,
            status: AttachmentStatus::Missing,
            sha256: None,
            blob_path: None,
            source_path: None,
            url: None,
            provenance: Provenance::default(),
        }
    }

    /// Recompute storage/status from the references currently present.
    pub fn classify_references(&mut self) {
        if self.sha256.is_some() {
            self.storage = StorageMode::Blob;
            self.status = AttachmentStatus::Embedded;
        } else if self.source_path.is_none() && self.url.is_some() {
            self.storage = StorageMode::Url;
            self.status = AttachmentStatus::Linked;
        } else {
            self.storage = StorageMode::Missing;
            self.status = AttachmentStatus::Missing;
        }
    }
}

/// Kind of non-fatal condition recorded on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    NoConversations,
    NoMessages,
    RecordRejected,
    AttachmentUnresolved,
}

/// A non-fatal condition surfaced on the job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobWarning {
    pub kind: WarningKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl JobWarning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            entity_id: None,
            path: None,
        }
    }
}

/// Upsert counters for one entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStats {
    pub new: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed: u64,
}

/// Upsert counters for all three entity kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub conversations: EntityStats,
    pub messages: EntityStats,
    pub attachments: EntityStats,
}

/// Row counts of a dataset after a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub conversations: u64,
    pub messages: u64,
    pub attachments: u64,
}

/// Records produced by one extraction, before merging into the datasets.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub conversations: Vec<Conversation>,
    pub messages: Vec<Message>,
    pub attachments: Vec<Attachment>,
    pub warnings: Vec<JobWarning>,
}
