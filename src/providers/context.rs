//! Record assembly shared by every extractor.
//!
//! Extractors describe what they found as drafts; [`RecordSink`] assigns
//! canonical ids, message ordinals, and local attachment paths, then merges
//! duplicates by identity when the extraction finishes.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::ids;
use crate::merge::dedupe_local;
use crate::models::{
    Attachment, Conversation, Extraction, JobWarning, Message, Provenance, Provider, Role,
    WarningKind,
};

/// Relative paths of every file under an extraction root.
#[derive(Debug, Clone, Default)]
pub struct FileIndex {
    files: Vec<String>,
}

impl FileIndex {
    pub fn scan(root: &Path) -> Self {
        let mut files: Vec<String> = WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(root)
                    .ok()
                    .map(|rel| normalize_ref(&rel.to_string_lossy()))
            })
            .collect();
        files.sort();
        Self { files }
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Find the file an attachment reference points at.
    ///
    /// Tries the exact relative path first. A bare name (no directory part)
    /// then matches a file with that name anywhere, and an id-like bare hint
    /// matches a file whose name starts with it or a file stored under a
    /// directory named after it. A hint with a directory part only ever
    /// matches exactly.
    pub fn resolve(&self, hint: &str) -> Option<String> {
        let hint = normalize_ref(hint);
        if hint.is_empty() {
            return None;
        }
        if self.files.iter().any(|f| *f == hint) {
            return Some(hint);
        }
        if hint.contains('/') {
            return None;
        }
        let wanted = hint.as_str();
        if let Some(found) = self.files.iter().find(|f| file_name(f) == wanted) {
            return Some(found.clone());
        }
        if wanted.len() >= 6 && !wanted.contains('.') {
            return self
                .files
                .iter()
                .find(|f| file_name(f).starts_with(wanted))
                .or_else(|| {
                    self.files
                        .iter()
                        .find(|f| f.split('/').rev().skip(1).any(|dir| dir == wanted))
                })
                .cloned();
        }
        None
    }
}

fn normalize_ref(raw: &str) -> String {
    let unified = raw.trim().replace('\\', "/");
    unified
        .trim_start_matches("./")
        .trim_start_matches('/')
        .to_string()
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// A conversation as found in a payload.
#[derive(Debug, Clone, Default)]
pub struct ConversationDraft {
    pub raw_id: Option<String>,
    /// Content used for the id when `raw_id` is absent.
    pub fallback_seed: String,
    pub title: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A message as found in a payload.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub raw_id: Option<String>,
    pub role: Role,
    pub text: String,
    pub model: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// An attachment reference as found in a payload.
#[derive(Debug, Clone, Default)]
pub struct AttachmentDraft {
    pub raw_id: Option<String>,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<u64>,
    /// Candidate local references, most specific first.
    pub local_refs: Vec<String>,
    pub url: Option<String>,
}

/// Collects the records of one extraction.
pub struct RecordSink<'a> {
    provider: Provider,
    files: &'a FileIndex,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    attachments: Vec<Attachment>,
    next_ordinal: HashMap<String, usize>,
    attachment_count: HashMap<String, usize>,
}

impl<'a> RecordSink<'a> {
    pub fn new(provider: Provider, files: &'a FileIndex) -> Self {
        Self {
            provider,
            files,
            conversations: Vec::new(),
            messages: Vec::new(),
            attachments: Vec::new(),
            next_ordinal: HashMap::new(),
            attachment_count: HashMap::new(),
        }
    }

    /// Add a conversation and return its canonical id.
    pub fn conversation(&mut self, draft: ConversationDraft) -> String {
        let id = ids::make_id(
            ids::CONVERSATION,
            self.provider.as_str(),
            draft.raw_id.as_deref(),
            &draft.fallback_seed,
        );
        self.conversations.push(Conversation {
            id: id.clone(),
            provider: self.provider,
            provider_conversation_id: draft
                .raw_id
                .unwrap_or_else(|| id.rsplit(':').next().unwrap_or_default().to_string()),
            title: draft.title.filter(|t| !t.trim().is_empty()),
            created_at: draft.created_at,
            updated_at: draft.updated_at,
            provenance: Provenance::default(),
        });
        id
    }

    /// Add a message at the next ordinal of its conversation.
    pub fn message(&mut self, conversation_id: &str, draft: MessageDraft) -> String {
        let ordinal = self
            .next_ordinal
            .entry(conversation_id.to_string())
            .or_insert(0);
        let timestamp = draft.created_at.map(|t| t.to_rfc3339());
        let seed = ids::message_seed(
            conversation_id,
            *ordinal,
            draft.role.as_str(),
            &draft.text,
            timestamp.as_deref(),
        );
        *ordinal += 1;

        let id = ids::make_id(
            ids::MESSAGE,
            self.provider.as_str(),
            draft.raw_id.as_deref(),
            &seed,
        );
        self.messages.push(Message {
            id: id.clone(),
            conversation_id: conversation_id.to_string(),
            provider: self.provider,
            provider_message_id: draft.raw_id.filter(|r| !r.trim().is_empty()),
            role: draft.role,
            text: draft.text,
            model: draft.model.filter(|m| !m.trim().is_empty()),
            created_at: draft.created_at,
            attachment_ids: Vec::new(),
            provenance: Provenance::default(),
        });
        id
    }

    /// Add an attachment owned by `message_id` and link it from the message.
    pub fn attachment(&mut self, message_id: &str, draft: AttachmentDraft) -> String {
        let ordinal = self
            .attachment_count
            .entry(message_id.to_string())
            .or_insert(0);
        let reference = draft
            .name
            .clone()
            .or_else(|| draft.local_refs.first().cloned())
            .or_else(|| draft.url.clone())
            .unwrap_or_default();
        let seed = format!("{}\u{1f}{}\u{1f}{}", message_id, ordinal, reference);
        *ordinal += 1;

        let id = ids::make_id(
            ids::ATTACHMENT,
            self.provider.as_str(),
            draft.raw_id.as_deref(),
            &seed,
        );

        let source_path = draft
            .local_refs
            .iter()
            .find_map(|hint| self.files.resolve(hint))
            .or_else(|| {
                draft
                    .local_refs
                    .first()
                    .map(|hint| normalize_ref(hint))
                    .filter(|hint| !hint.is_empty())
            });

        let mut attachment = Attachment::unresolved(id.clone(), message_id.to_string(), self.provider);
        attachment.kind = draft.kind;
        attachment.name = draft.name;
        attachment.mime_type = draft.mime_type;
        attachment.size_bytes = draft.size_bytes;
        attachment.source_path = source_path;
        attachment.url = draft.url.filter(|u| !u.trim().is_empty());
        attachment.classify_references();
        self.attachments.push(attachment);

        if let Some(message) = self.messages.iter_mut().rev().find(|m| m.id == message_id) {
            if !message.attachment_ids.contains(&id) {
                message.attachment_ids.push(id.clone());
            }
        }
        id
    }

    /// Merge duplicates by identity and derive missing conversation times.
    pub fn finish(self) -> Extraction {
        let mut conversations = dedupe_local(self.conversations);
        let messages = dedupe_local(self.messages);
        let attachments = dedupe_local(self.attachments);

        let mut bounds: HashMap<&str, (DateTime<Utc>, DateTime<Utc>)> = HashMap::new();
        for message in &messages {
            if let Some(at) = message.created_at {
                bounds
                    .entry(message.conversation_id.as_str())
                    .and_modify(|(lo, hi)| {
                        *lo = (*lo).min(at);
                        *hi = (*hi).max(at);
                    })
                    .or_insert((at, at));
            }
        }
        for conversation in &mut conversations {
            if let Some((lo, hi)) = bounds.get(conversation.id.as_str()) {
                conversation.created_at.get_or_insert(*lo);
                conversation.updated_at.get_or_insert(*hi);
            }
        }

        let mut warnings = Vec::new();
        if conversations.is_empty() {
            warnings.push(JobWarning::new(
                WarningKind::NoConversations,
                format!("no {} conversations found in payload", self.provider),
            ));
        }
        if messages.is_empty() {
            warnings.push(JobWarning::new(
                WarningKind::NoMessages,
                format!("no {} messages found in payload", self.provider),
            ));
        }

        Extraction {
            conversations,
            messages,
            attachments,
            warnings,
        }
    }
}
