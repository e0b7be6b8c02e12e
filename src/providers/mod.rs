//! Provider extractors.
//!
//! Every provider implements [`Extractor`]. Extraction is the same for all
//! of them: discover payload files under the extraction root, load each
//! one as a [`Document`], ask the provider to recognize its shape (trying a
//! fixed priority list of recognizers), and map the recognized
//! [`PayloadShape`] into records through a [`RecordSink`].
//!
//! ```text
//! extracted/ ──▶ discover ──▶ Document ──▶ recognize ──▶ PayloadShape ──▶ map ──▶ Extraction
//!                (globset)    json|text    (ordered)     nested|flat|md    (sink)
//! ```

pub mod chatgpt;
pub mod claude;
pub mod context;
pub mod gemini;
pub mod grok;
pub mod markdown;
pub mod values;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::Value;
use tracing::debug;

use crate::error::ImportError;
use crate::models::{Extraction, Provider, Role};

use context::{ConversationDraft, FileIndex, MessageDraft, RecordSink};
use markdown::Transcript;

/// JSON payload files.
pub const JSON_GLOBS: &[&str] = &["**/*.json"];
/// Transcript payload files.
pub const TEXT_GLOBS: &[&str] = &["**/*.md", "**/*.markdown", "**/*.txt"];

/// Keys under which payloads wrap their conversation arrays.
const WRAPPER_KEYS: &[&str] = &["conversations", "chats", "data", "items"];

/// Keys carrying a conversation reference on a flat message.
pub const CONVERSATION_REF_KEYS: &[&str] = &[
    "conversation_id",
    "conversationId",
    "conversation_uuid",
    "chat_id",
    "thread_id",
];

/// One loaded payload file.
#[derive(Debug, Clone)]
pub enum Document {
    Json { path: String, value: Value },
    Text { path: String, content: String },
}

impl Document {
    /// Path relative to the extraction root.
    pub fn path(&self) -> &str {
        match self {
            Document::Json { path, .. } | Document::Text { path, .. } => path,
        }
    }
}

/// A recognized payload shape.
#[derive(Debug, Clone)]
pub enum PayloadShape {
    /// Message objects each carrying a conversation reference.
    FlatMessageList(Vec<Value>),
    /// Conversation objects with nested messages or a message graph.
    NestedConversationGraph(Vec<Value>),
    /// A role-header transcript.
    MarkdownTranscript(Transcript),
}

/// The per-provider extraction contract.
pub trait Extractor: Send + Sync {
    fn provider(&self) -> Provider;

    /// Map a raw author label to the normalized role vocabulary.
    fn classify_role(&self, raw: &str) -> Role {
        markdown::generic_role(raw)
    }

    /// Try the provider's recognizers in priority order.
    fn recognize(&self, doc: &Document) -> Option<PayloadShape>;

    /// Map the conversation objects of a nested payload.
    fn map_nested(&self, conversations: &[Value], sink: &mut RecordSink<'_>);

    /// Map a flat list of messages, grouped by conversation reference.
    fn map_flat(&self, messages: &[Value], sink: &mut RecordSink<'_>) {
        map_flat_messages(self, messages, sink);
    }

    fn map_transcript(&self, transcript: &Transcript, sink: &mut RecordSink<'_>) {
        map_transcript(transcript, sink);
    }

    /// Extract every record found under `root`.
    ///
    /// Fails only when no candidate payload file exists at all; malformed
    /// documents are skipped and an empty result carries warnings instead.
    fn extract(&self, root: &Path, job_id: &str) -> Result<Extraction, ImportError> {
        run_extraction(self, root, job_id)
    }
}

/// Extractor for `provider`.
pub fn extractor_for(provider: Provider) -> Box<dyn Extractor> {
    match provider {
        Provider::Chatgpt => Box::new(chatgpt::ChatgptExtractor),
        Provider::Claude => Box::new(claude::ClaudeExtractor),
        Provider::Gemini => Box::new(gemini::GeminiExtractor),
        Provider::Grok => Box::new(grok::GrokExtractor),
    }
}

fn run_extraction<E: Extractor + ?Sized>(
    extractor: &E,
    root: &Path,
    job_id: &str,
) -> Result<Extraction, ImportError> {
    let provider = extractor.provider();
    let files = FileIndex::scan(root);
    let json_set = build_globset(JSON_GLOBS)?;
    let text_set = build_globset(TEXT_GLOBS)?;

    let candidates: Vec<&String> = files
        .files()
        .iter()
        .filter(|f| json_set.is_match(f.as_str()) || text_set.is_match(f.as_str()))
        .collect();
    if candidates.is_empty() {
        return Err(ImportError::Extraction {
            provider: provider.to_string(),
            root: root.to_path_buf(),
        });
    }

    let documents: Vec<Document> = candidates
        .into_iter()
        .filter_map(|rel| {
            let doc = load_document(root, rel, json_set.is_match(rel.as_str()));
            if doc.is_none() {
                debug!(job_id, provider = %provider, path = %rel, "skipping unreadable payload file");
            }
            doc
        })
        .collect();

    // Files that a payload references as attachments are content, not payloads.
    let mut scout = RecordSink::new(provider, &files);
    for doc in &documents {
        map_document(extractor, doc, &mut scout, job_id);
    }
    let referenced: HashSet<String> = scout
        .finish()
        .attachments
        .into_iter()
        .filter_map(|a| a.source_path)
        .filter(|path| files.files().contains(path))
        .collect();

    let mut sink = RecordSink::new(provider, &files);
    for doc in &documents {
        if referenced.contains(doc.path()) {
            debug!(job_id, provider = %provider, path = %doc.path(), "payload file is an attachment");
            continue;
        }
        map_document(extractor, doc, &mut sink, job_id);
    }
    Ok(sink.finish())
}

fn map_document<E: Extractor + ?Sized>(
    extractor: &E,
    doc: &Document,
    sink: &mut RecordSink<'_>,
    job_id: &str,
) {
    match extractor.recognize(doc) {
        Some(PayloadShape::NestedConversationGraph(items)) => extractor.map_nested(&items, sink),
        Some(PayloadShape::FlatMessageList(items)) => extractor.map_flat(&items, sink),
        Some(PayloadShape::MarkdownTranscript(t)) => extractor.map_transcript(&t, sink),
        None => debug!(job_id, provider = %extractor.provider(), path = %doc.path(), "no recognizable shape"),
    }
}

fn load_document(root: &Path, rel: &str, is_json: bool) -> Option<Document> {
    let bytes = std::fs::read(root.join(rel)).ok()?;
    if is_json {
        let value = serde_json::from_slice(&bytes).ok()?;
        Some(Document::Json {
            path: rel.to_string(),
            value,
        })
    } else {
        Some(Document::Text {
            path: rel.to_string(),
            content: String::from_utf8(bytes).ok()?,
        })
    }
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet, ImportError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| ImportError::Validation(format!("bad payload glob {}: {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| ImportError::Validation(format!("bad payload globs: {}", e)))
}

/// Object items of a JSON document: the array itself, an array under a
/// wrapper key, or the single object.
pub fn items_of(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.iter().filter(|v| v.is_object()).cloned().collect(),
        Value::Object(_) => {
            for key in WRAPPER_KEYS {
                if let Some(Value::Array(items)) = value.get(*key) {
                    return items.iter().filter(|v| v.is_object()).cloned().collect();
                }
            }
            vec![value.clone()]
        }
        _ => Vec::new(),
    }
}

/// True when any item has at least one of `keys`.
pub fn any_has(items: &[Value], keys: &[&str]) -> bool {
    items
        .iter()
        .any(|item| keys.iter().any(|key| item.get(*key).is_some()))
}

/// Recognize a transcript in a text document.
pub fn recognize_transcript<E: Extractor + ?Sized>(extractor: &E, doc: &Document) -> Option<PayloadShape> {
    match doc {
        Document::Text { path, content } => {
            markdown::parse_transcript(path, content, &|label: &str| extractor.classify_role(label))
                .map(PayloadShape::MarkdownTranscript)
        }
        Document::Json { .. } => None,
    }
}

/// Recognize a flat message list: items with a conversation reference and
/// an author field.
pub fn recognize_flat(items: &[Value], author_keys: &[&str]) -> Option<PayloadShape> {
    let flat = !items.is_empty()
        && items.iter().all(|item| {
            CONVERSATION_REF_KEYS.iter().any(|k| item.get(*k).is_some())
                && author_keys.iter().any(|k| item.get(*k).is_some())
        });
    flat.then(|| PayloadShape::FlatMessageList(items.to_vec()))
}

/// Default flat mapping shared by the providers.
///
/// Messages are grouped by conversation reference, keeping first-seen
/// order of conversations and of messages within each conversation.
pub fn map_flat_messages<E: Extractor + ?Sized>(
    extractor: &E,
    messages: &[Value],
    sink: &mut RecordSink<'_>,
) {
    let mut order: Vec<String> = Vec::new();
    let mut groups: BTreeMap<String, Vec<&Value>> = BTreeMap::new();
    for message in messages {
        let Some(conv_ref) = values::str_field(message, CONVERSATION_REF_KEYS) else {
            continue;
        };
        if !groups.contains_key(&conv_ref) {
            order.push(conv_ref.clone());
        }
        groups.entry(conv_ref).or_default().push(message);
    }

    for conv_ref in order {
        let group = &groups[&conv_ref];
        let title = group
            .iter()
            .find_map(|m| values::str_field(m, &["conversation_title", "conversation_name", "title"]));
        let conversation_id = sink.conversation(ConversationDraft {
            raw_id: Some(conv_ref.clone()),
            fallback_seed: conv_ref.clone(),
            title,
            ..Default::default()
        });
        for message in group {
            let role = values::str_field(message, &["role", "sender", "author", "from"])
                .or_else(|| message.get("author").and_then(|a| values::str_field(a, &["role"])))
                .map(|r| extractor.classify_role(&r))
                .unwrap_or_default();
            let text = ["content", "text", "message", "body"]
                .iter()
                .find_map(|k| message.get(*k).map(values::text_of))
                .unwrap_or_default();
            sink.message(
                &conversation_id,
                MessageDraft {
                    raw_id: values::str_field(message, &["id", "message_id", "uuid"]),
                    role,
                    text,
                    model: values::str_field(message, &["model", "model_slug"]),
                    created_at: values::time_field(
                        message,
                        &["created_at", "create_time", "timestamp", "time"],
                    ),
                },
            );
        }
    }
}

/// Default transcript mapping: one conversation per file, keyed by its path.
pub fn map_transcript(transcript: &Transcript, sink: &mut RecordSink<'_>) {
    let conversation_id = sink.conversation(ConversationDraft {
        raw_id: Some(transcript.path.clone()),
        fallback_seed: transcript.path.clone(),
        title: transcript.title.clone(),
        ..Default::default()
    });
    for turn in &transcript.turns {
        sink.message(
            &conversation_id,
            MessageDraft {
                role: turn.role,
                text: turn.text.clone(),
                ..Default::default()
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn items_of_unwraps_arrays_and_wrappers() {
        assert_eq!(items_of(&json!([{"a": 1}, 2])).len(), 1);
        assert_eq!(items_of(&json!({"conversations": [{"a": 1}, {"b": 2}]})).len(), 2);
        assert_eq!(items_of(&json!({"a": 1})).len(), 1);
        assert!(items_of(&json!("x")).is_empty());
    }

    #[test]
    fn no_payload_files_is_an_extraction_failure() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("image.png"), b"\x89PNG").unwrap();
        let err = extractor_for(Provider::Claude)
            .extract(tmp.path(), "job_x")
            .unwrap_err();
        assert!(matches!(err, ImportError::Extraction { .. }));
    }

    #[test]
    fn malformed_json_is_skipped_with_zero_record_warnings() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("conversations.json"), b"{ not json").unwrap();
        let out = extractor_for(Provider::Chatgpt)
            .extract(tmp.path(), "job_x")
            .unwrap();
        assert!(out.conversations.is_empty());
        assert_eq!(out.warnings.len(), 2);
    }

    #[test]
    fn flat_messages_group_by_conversation() {
        let tmp = TempDir::new().unwrap();
        let payload = json!([
            {"conversation_id": "c1", "role": "user", "content": "hi", "id": "m1"},
            {"conversation_id": "c2", "role": "user", "content": "yo", "id": "m2"},
            {"conversation_id": "c1", "role": "assistant", "content": "hello", "id": "m3"}
        ]);
        fs::write(tmp.path().join("messages.json"), payload.to_string()).unwrap();
        let out = extractor_for(Provider::Grok).extract(tmp.path(), "job_x").unwrap();
        assert_eq!(out.conversations.len(), 2);
        assert_eq!(out.conversations[0].id, "grok:conv:c1");
        let c1: Vec<_> = out
            .messages
            .iter()
            .filter(|m| m.conversation_id == "grok:conv:c1")
            .collect();
        assert_eq!(c1.len(), 2);
        assert_eq!(c1[1].role, Role::Assistant);
    }

    #[test]
    fn extraction_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("chat.md"),
            "## User\nhello\n## Assistant\nhi there\n",
        )
        .unwrap();
        let a = extractor_for(Provider::Gemini).extract(tmp.path(), "job_1").unwrap();
        let b = extractor_for(Provider::Gemini).extract(tmp.path(), "job_2").unwrap();
        assert_eq!(a.messages, b.messages);
        assert_eq!(a.conversations, b.conversations);
    }

    #[test]
    fn json_attachment_is_not_read_as_a_payload() {
        let tmp = TempDir::new().unwrap();
        let payload = json!([{
            "id": "conv-1",
            "mapping": {
                "n1": {"id": "n1", "parent": null, "children": [], "message": {
                    "id": "m1", "author": {"role": "user"}, "create_time": 1704164646.0,
                    "content": {"content_type": "text", "parts": ["Tune on this"]},
                    "metadata": {"attachments": [{"id": "file-ABC", "name": "train.json"}]}
                }}
            }
        }]);
        fs::write(tmp.path().join("conversations.json"), payload.to_string()).unwrap();
        let training = json!([{"messages": [
            {"role": "user", "content": "q"},
            {"role": "assistant", "content": "a"}
        ]}]);
        fs::write(tmp.path().join("file-ABC-train.json"), training.to_string()).unwrap();

        let out = extractor_for(Provider::Chatgpt)
            .extract(tmp.path(), "job_x")
            .unwrap();
        assert_eq!(out.conversations.len(), 1);
        assert_eq!(out.conversations[0].id, "chatgpt:conv:conv-1");
        assert_eq!(out.messages.len(), 1);
        assert_eq!(
            out.attachments[0].source_path.as_deref(),
            Some("file-ABC-train.json")
        );
    }
}
