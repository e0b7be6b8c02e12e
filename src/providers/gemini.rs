//! Gemini export extractor.
//!
//! Recognizers, in priority order:
//! 1. Conversation objects with `turns` or `messages` arrays.
//! 2. Google Takeout activity records (`MyActivity.json`), one conversation
//!    per activity holding the prompt and the response.
//! 3. Flat message objects carrying a conversation reference.
//! 4. Role-header transcripts.

use serde_json::Value;

use super::context::{AttachmentDraft, ConversationDraft, MessageDraft, RecordSink};
use super::values::{array_field, str_field, strip_html, text_of, time_field};
use super::{
    any_has, items_of, map_flat_messages, recognize_flat, recognize_transcript, Document,
    Extractor, PayloadShape,
};
use crate::models::{Provider, Role};

const PROMPT_PREFIXES: &[&str] = &["Prompted ", "Asked "];

pub struct GeminiExtractor;

impl Extractor for GeminiExtractor {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn classify_role(&self, raw: &str) -> Role {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" | "bard" => Role::Assistant,
            other => super::markdown::generic_role(other),
        }
    }

    fn recognize(&self, doc: &Document) -> Option<PayloadShape> {
        let Document::Json { value, .. } = doc else {
            return recognize_transcript(self, doc);
        };
        let items = items_of(value);
        if any_has(&items, &["turns", "messages"]) {
            return Some(PayloadShape::NestedConversationGraph(items));
        }
        if !items.is_empty() && items.iter().all(is_activity) {
            return Some(PayloadShape::FlatMessageList(items));
        }
        recognize_flat(&items, &["role", "author"])
    }

    fn map_nested(&self, conversations: &[Value], sink: &mut RecordSink<'_>) {
        for conv in conversations {
            let title = str_field(conv, &["title", "name"]);
            let created_at = time_field(conv, &["createTime", "created_at", "create_time"]);
            let conversation_id = sink.conversation(ConversationDraft {
                raw_id: str_field(conv, &["conversationId", "id", "conversation_id"]),
                fallback_seed: format!(
                    "{}|{}",
                    title.as_deref().unwrap_or(""),
                    created_at.map(|t| t.to_rfc3339()).unwrap_or_default()
                ),
                title,
                created_at,
                updated_at: time_field(conv, &["updateTime", "updated_at", "update_time"]),
            });

            for turn in array_field(conv, &["turns", "messages"]).into_iter().flatten() {
                let text = ["text", "content", "parts"]
                    .iter()
                    .find_map(|k| turn.get(*k).map(text_of))
                    .unwrap_or_default();
                if text.is_empty() {
                    continue;
                }
                let role = str_field(turn, &["role", "author"])
                    .map(|r| self.classify_role(&r))
                    .unwrap_or_default();
                sink.message(
                    &conversation_id,
                    MessageDraft {
                        raw_id: str_field(turn, &["id", "turnId"]),
                        role,
                        text,
                        model: str_field(turn, &["model", "modelVersion"]),
                        created_at: time_field(turn, &["createTime", "created_at", "time"]),
                    },
                );
            }
        }
    }

    fn map_flat(&self, messages: &[Value], sink: &mut RecordSink<'_>) {
        if messages.iter().all(is_activity) {
            for activity in messages {
                map_activity(activity, sink);
            }
        } else {
            map_flat_messages(self, messages, sink);
        }
    }
}

fn is_activity(item: &Value) -> bool {
    let has_shape = item.get("header").is_some() && item.get("time").is_some();
    let product = str_field(item, &["header"]).unwrap_or_default();
    let products = item
        .get("products")
        .map(|p| p.to_string())
        .unwrap_or_default();
    has_shape
        && ["Gemini", "Bard"]
            .iter()
            .any(|name| product.contains(name) || products.contains(name))
}

fn map_activity(activity: &Value, sink: &mut RecordSink<'_>) {
    let raw_title = str_field(activity, &["title"]).unwrap_or_default();
    let prompt = PROMPT_PREFIXES
        .iter()
        .find_map(|p| raw_title.strip_prefix(p))
        .unwrap_or(&raw_title)
        .trim()
        .to_string();
    let response = array_field(activity, &["safeHtmlItem"])
        .into_iter()
        .flatten()
        .filter_map(|item| str_field(item, &["html"]))
        .map(|html| strip_html(&html))
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if prompt.is_empty() && response.is_empty() {
        return;
    }
    let at = time_field(activity, &["time"]);
    let stamp = at.map(|t| t.to_rfc3339()).unwrap_or_default();

    let conversation_id = sink.conversation(ConversationDraft {
        raw_id: None,
        fallback_seed: format!("{}|{}", stamp, prompt),
        title: Some(prompt.chars().take(80).collect()),
        created_at: at,
        updated_at: at,
    });
    let prompt_id = sink.message(
        &conversation_id,
        MessageDraft {
            role: Role::User,
            text: prompt,
            created_at: at,
            ..Default::default()
        },
    );
    for name in array_field(activity, &["attachedFiles"])
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
    {
        sink.attachment(
            &prompt_id,
            AttachmentDraft {
                kind: Some("file".to_string()),
                name: Some(name.to_string()),
                local_refs: vec![name.to_string()],
                ..Default::default()
            },
        );
    }
    if !response.is_empty() {
        sink.message(
            &conversation_id,
            MessageDraft {
                role: Role::Assistant,
                text: response,
                created_at: at,
                ..Default::default()
            },
        );
    }
}
