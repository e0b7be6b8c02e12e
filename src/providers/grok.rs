//! Grok export extractor.
//!
//! Grok backend exports wrap each conversation as
//! `{"conversation": {...}, "responses": [{"response": {...}}]}` with
//! MongoDB-style `{"$date": ...}` timestamps. Uploaded files live in the
//! archive under a directory named after the asset id.

use serde_json::Value;

use super::context::{AttachmentDraft, ConversationDraft, MessageDraft, RecordSink};
use super::values::{array_field, str_field, text_of, time_field};
use super::{any_has, items_of, recognize_flat, recognize_transcript, Document, Extractor, PayloadShape};
use crate::models::{Provider, Role};

pub struct GrokExtractor;

impl Extractor for GrokExtractor {
    fn provider(&self) -> Provider {
        Provider::Grok
    }

    fn classify_role(&self, raw: &str) -> Role {
        match raw.trim().to_ascii_lowercase().as_str() {
            "grok" | "xai" => Role::Assistant,
            other => super::markdown::generic_role(other),
        }
    }

    fn recognize(&self, doc: &Document) -> Option<PayloadShape> {
        let Document::Json { value, .. } = doc else {
            return recognize_transcript(self, doc);
        };
        let items = items_of(value);
        if any_has(&items, &["responses", "messages"]) {
            return Some(PayloadShape::NestedConversationGraph(items));
        }
        recognize_flat(&items, &["sender", "role"])
    }

    fn map_nested(&self, conversations: &[Value], sink: &mut RecordSink<'_>) {
        for item in conversations {
            let conv = item.get("conversation").unwrap_or(item);
            let title = str_field(conv, &["title", "name"]);
            let created_at = time_field(conv, &["create_time", "created_at"]);
            let conversation_id = sink.conversation(ConversationDraft {
                raw_id: str_field(conv, &["id", "_id", "conversation_id"]),
                fallback_seed: format!(
                    "{}|{}",
                    title.as_deref().unwrap_or(""),
                    created_at.map(|t| t.to_rfc3339()).unwrap_or_default()
                ),
                title,
                created_at,
                updated_at: time_field(conv, &["modify_time", "update_time", "updated_at"]),
            });

            for entry in array_field(item, &["responses", "messages"]).into_iter().flatten() {
                let response = entry.get("response").unwrap_or(entry);
                self.map_response(response, &conversation_id, sink);
            }
        }
    }
}

impl GrokExtractor {
    fn map_response(&self, response: &Value, conversation_id: &str, sink: &mut RecordSink<'_>) {
        let text = ["message", "content", "text"]
            .iter()
            .find_map(|k| response.get(*k).map(text_of))
            .unwrap_or_default();
        let assets: Vec<String> = array_field(response, &["file_attachments", "attachments"])
            .into_iter()
            .flatten()
            .filter_map(|a| str_field(a, &["id", "file_id"]).or_else(|| a.as_str().map(str::to_string)))
            .collect();
        if text.is_empty() && assets.is_empty() {
            return;
        }

        let role = str_field(response, &["sender", "role"])
            .map(|r| self.classify_role(&r))
            .unwrap_or_default();
        let message_id = sink.message(
            conversation_id,
            MessageDraft {
                raw_id: str_field(response, &["_id", "id"]),
                role,
                text,
                model: str_field(response, &["model"]),
                created_at: time_field(response, &["create_time", "created_at"]),
            },
        );
        for asset in assets {
            sink.attachment(
                &message_id,
                AttachmentDraft {
                    raw_id: Some(asset.clone()),
                    kind: Some("file".to_string()),
                    local_refs: vec![asset],
                    ..Default::default()
                },
            );
        }
    }
}
