//! Claude export extractor.
//!
//! Recognizers, in priority order:
//! 1. Conversation objects with `chat_messages` (or `messages`) arrays.
//! 2. Flat message objects carrying a conversation reference.
//! 3. Role-header transcripts.
//!
//! Claude attachments carry their extracted text inline rather than as a
//! file in the archive; that text is materialized through a `data:` URI.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

use super::context::{AttachmentDraft, ConversationDraft, MessageDraft, RecordSink};
use super::values::{array_field, raw_str_field, str_field, text_of, time_field, u64_field};
use super::{any_has, items_of, recognize_flat, recognize_transcript, Document, Extractor, PayloadShape};
use crate::merge::prefer_longer;
use crate::models::{Provider, Role};

pub struct ClaudeExtractor;

impl Extractor for ClaudeExtractor {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    fn classify_role(&self, raw: &str) -> Role {
        match raw.trim().to_ascii_lowercase().as_str() {
            "claude" => Role::Assistant,
            other => super::markdown::generic_role(other),
        }
    }

    fn recognize(&self, doc: &Document) -> Option<PayloadShape> {
        let Document::Json { value, .. } = doc else {
            return recognize_transcript(self, doc);
        };
        let items = items_of(value);
        if any_has(&items, &["chat_messages", "messages"]) {
            return Some(PayloadShape::NestedConversationGraph(items));
        }
        recognize_flat(&items, &["sender", "role"])
    }

    fn map_nested(&self, conversations: &[Value], sink: &mut RecordSink<'_>) {
        for conv in conversations {
            let title = str_field(conv, &["name", "title"]);
            let created_at = time_field(conv, &["created_at", "create_time"]);
            let conversation_id = sink.conversation(ConversationDraft {
                raw_id: str_field(conv, &["uuid", "id"]),
                fallback_seed: format!(
                    "{}|{}",
                    title.as_deref().unwrap_or(""),
                    created_at.map(|t| t.to_rfc3339()).unwrap_or_default()
                ),
                title,
                created_at,
                updated_at: time_field(conv, &["updated_at", "update_time"]),
            });

            let Some(messages) = array_field(conv, &["chat_messages", "messages"]) else {
                continue;
            };
            for message in messages {
                self.map_message(message, &conversation_id, sink);
            }
        }
    }
}

impl ClaudeExtractor {
    fn map_message(&self, message: &Value, conversation_id: &str, sink: &mut RecordSink<'_>) {
        if !message.is_object() {
            return;
        }
        let blocks = message.get("content").map(text_of).unwrap_or_default();
        let plain = raw_str_field(message, &["text"]).unwrap_or_default();
        let text = prefer_longer(&plain, &blocks);
        let attachments = attachment_drafts(message);
        if text.is_empty() && attachments.is_empty() {
            return;
        }

        let role = str_field(message, &["sender", "role"])
            .map(|r| self.classify_role(&r))
            .unwrap_or_default();
        let message_id = sink.message(
            conversation_id,
            MessageDraft {
                raw_id: str_field(message, &["uuid", "id"]),
                role,
                text,
                model: str_field(message, &["model"]),
                created_at: time_field(message, &["created_at", "create_time"]),
            },
        );
        for draft in attachments {
            sink.attachment(&message_id, draft);
        }
    }
}

fn attachment_drafts(message: &Value) -> Vec<AttachmentDraft> {
    let mut drafts = Vec::new();

    for att in array_field(message, &["attachments"]).into_iter().flatten() {
        let name = str_field(att, &["file_name", "name"]);
        let file_type = str_field(att, &["file_type"]);
        let (mime_type, kind) = match file_type {
            Some(t) if t.contains('/') => (Some(t), Some("attachment".to_string())),
            other => (None, other.or_else(|| Some("attachment".to_string()))),
        };
        let inline = raw_str_field(att, &["extracted_content"]);
        let url = inline.map(|content| {
            format!("data:text/plain;base64,{}", STANDARD.encode(content.as_bytes()))
        });
        drafts.push(AttachmentDraft {
            raw_id: str_field(att, &["id", "uuid"]),
            kind,
            name: name.clone(),
            mime_type,
            size_bytes: u64_field(att, &["file_size", "size"]),
            local_refs: if url.is_some() {
                Vec::new()
            } else {
                name.into_iter().collect()
            },
            url,
        });
    }

    for file in array_field(message, &["files"]).into_iter().flatten() {
        let id = str_field(file, &["file_uuid", "uuid", "id"]);
        let name = str_field(file, &["file_name", "name"]);
        let mut local_refs: Vec<String> = id.iter().cloned().collect();
        local_refs.extend(name.iter().cloned());
        drafts.push(AttachmentDraft {
            raw_id: id,
            kind: Some(str_field(file, &["file_kind"]).unwrap_or_else(|| "file".to_string())),
            name,
            mime_type: None,
            size_bytes: None,
            local_refs,
            url: str_field(file, &["preview_url", "url"]),
        });
    }
    drafts
}
