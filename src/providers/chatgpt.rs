//! ChatGPT export extractor.
//!
//! Recognizers, in priority order:
//! 1. `conversations.json` conversation objects with a `mapping` node graph.
//! 2. Conversation objects with a nested `messages` array.
//! 3. Flat message objects carrying a conversation reference.
//! 4. Role-header transcripts.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::context::{AttachmentDraft, ConversationDraft, MessageDraft, RecordSink};
use super::values::{array_field, str_field, text_of, time_field, u64_field};
use super::{any_has, items_of, recognize_flat, recognize_transcript, Document, Extractor, PayloadShape};
use crate::models::{Provider, Role};

pub struct ChatgptExtractor;

impl Extractor for ChatgptExtractor {
    fn provider(&self) -> Provider {
        Provider::Chatgpt
    }

    fn classify_role(&self, raw: &str) -> Role {
        match raw.trim().to_ascii_lowercase().as_str() {
            "chatgpt" | "gpt" | "openai" => Role::Assistant,
            "tool" => Role::Unknown,
            other => super::markdown::generic_role(other),
        }
    }

    fn recognize(&self, doc: &Document) -> Option<PayloadShape> {
        let Document::Json { value, .. } = doc else {
            return recognize_transcript(self, doc);
        };
        let items = items_of(value);
        if any_has(&items, &["mapping"]) || any_has(&items, &["messages"]) {
            return Some(PayloadShape::NestedConversationGraph(items));
        }
        recognize_flat(&items, &["role", "author"])
    }

    fn map_nested(&self, conversations: &[Value], sink: &mut RecordSink<'_>) {
        for conv in conversations {
            let title = str_field(conv, &["title"]);
            let created_at = time_field(conv, &["create_time", "created_at"]);
            let conversation_id = sink.conversation(ConversationDraft {
                raw_id: str_field(conv, &["conversation_id", "id"]),
                fallback_seed: format!(
                    "{}|{}",
                    title.as_deref().unwrap_or(""),
                    created_at.map(|t| t.to_rfc3339()).unwrap_or_default()
                ),
                title,
                created_at,
                updated_at: time_field(conv, &["update_time", "updated_at"]),
            });

            if let Some(mapping) = conv.get("mapping").and_then(Value::as_object) {
                for node_id in graph_order(mapping) {
                    if let Some(message) = mapping[&node_id].get("message") {
                        self.map_message(message, Some(&node_id), &conversation_id, sink);
                    }
                }
            } else if let Some(messages) = array_field(conv, &["messages"]) {
                for message in messages {
                    self.map_message(message, None, &conversation_id, sink);
                }
            }
        }
    }
}

impl ChatgptExtractor {
    fn map_message(
        &self,
        message: &Value,
        node_id: Option<&str>,
        conversation_id: &str,
        sink: &mut RecordSink<'_>,
    ) {
        if !message.is_object() {
            return;
        }
        let role = message
            .get("author")
            .and_then(|a| str_field(a, &["role"]))
            .or_else(|| str_field(message, &["role"]))
            .map(|r| self.classify_role(&r))
            .unwrap_or_default();
        let content = message.get("content").unwrap_or(&Value::Null);
        let text = text_of(content);
        let attachments = attachment_drafts(message, content);
        if text.is_empty() && attachments.is_empty() {
            return;
        }

        let metadata = message.get("metadata").unwrap_or(&Value::Null);
        let message_id = sink.message(
            conversation_id,
            MessageDraft {
                raw_id: str_field(message, &["id"]).or_else(|| node_id.map(str::to_string)),
                role,
                text,
                model: str_field(metadata, &["model_slug", "default_model_slug"])
                    .or_else(|| str_field(message, &["model"])),
                created_at: time_field(message, &["create_time", "created_at"]),
            },
        );
        for draft in attachments {
            sink.attachment(&message_id, draft);
        }
    }
}

/// Node ids in depth-first order from the roots, children in listed order.
///
/// Covers every branch of the graph, including regenerated replies.
fn graph_order(mapping: &Map<String, Value>) -> Vec<String> {
    let mut roots: Vec<&String> = mapping
        .iter()
        .filter(|(_, node)| {
            node.get("parent")
                .and_then(Value::as_str)
                .map_or(true, |parent| !mapping.contains_key(parent))
        })
        .map(|(id, _)| id)
        .collect();
    roots.sort();

    let mut order = Vec::with_capacity(mapping.len());
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = roots.into_iter().rev().cloned().collect();
    while let Some(id) = stack.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        if let Some(children) = mapping.get(&id).and_then(|n| n.get("children")).and_then(Value::as_array) {
            for child in children.iter().rev().filter_map(Value::as_str) {
                if mapping.contains_key(child) && !visited.contains(child) {
                    stack.push(child.to_string());
                }
            }
        }
        order.push(id);
    }
    order
}

fn attachment_drafts(message: &Value, content: &Value) -> Vec<AttachmentDraft> {
    let mut drafts = Vec::new();

    if let Some(files) = message
        .get("metadata")
        .and_then(|m| array_field(m, &["attachments"]))
    {
        for file in files {
            let id = str_field(file, &["id"]);
            let name = str_field(file, &["name", "file_name"]);
            let mut local_refs: Vec<String> = Vec::new();
            if let (Some(id), Some(name)) = (&id, &name) {
                local_refs.push(format!("{}-{}", id, name));
            }
            local_refs.extend(id.iter().cloned());
            local_refs.extend(name.iter().cloned());
            drafts.push(AttachmentDraft {
                raw_id: id,
                kind: Some("file".to_string()),
                name,
                mime_type: str_field(file, &["mime_type", "mimeType"]),
                size_bytes: u64_field(file, &["size", "size_bytes"]),
                local_refs,
                url: str_field(file, &["url"]),
            });
        }
    }

    if let Some(parts) = content.get("parts").and_then(Value::as_array) {
        for part in parts {
            let Some(pointer) = str_field(part, &["asset_pointer"]) else {
                continue;
            };
            let file_id = pointer
                .split_once("://")
                .map(|(_, rest)| rest.to_string())
                .unwrap_or_else(|| pointer.clone());
            drafts.push(AttachmentDraft {
                raw_id: Some(file_id.clone()),
                kind: Some(
                    str_field(part, &["content_type"])
                        .unwrap_or_else(|| "image_asset_pointer".to_string()),
                ),
                name: None,
                mime_type: None,
                size_bytes: u64_field(part, &["size_bytes"]),
                local_refs: vec![file_id],
                url: None,
            });
        }
    }
    drafts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttachmentStatus, StorageMode};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn export() -> Value {
        json!([{
            "id": "conv-1",
            "title": "Rust questions",
            "create_time": 1704164645.5,
            "update_time": 1704168245.0,
            "mapping": {
                "root": {"id": "root", "message": null, "parent": null, "children": ["sys"]},
                "sys": {"id": "sys", "parent": "root", "children": ["u1"], "message": {
                    "id": "sys", "author": {"role": "system"}, "content": {"content_type": "text", "parts": [""]}
                }},
                "u1": {"id": "u1", "parent": "sys", "children": ["a1", "a2"], "message": {
                    "id": "u1", "author": {"role": "user"}, "create_time": 1704164646.0,
                    "content": {"content_type": "multimodal_text", "parts": [
                        {"content_type": "image_asset_pointer", "asset_pointer": "file-service://file-IMG001", "size_bytes": 3},
                        "What is this?"
                    ]},
                    "metadata": {"attachments": [{"id": "file-DOC9", "name": "notes.txt", "size": 5, "mime_type": "text/plain"}]}
                }},
                "a1": {"id": "a1", "parent": "u1", "children": [], "message": {
                    "id": "a1", "author": {"role": "assistant"}, "create_time": 1704164650.0,
                    "content": {"content_type": "text", "parts": ["A crab."]},
                    "metadata": {"model_slug": "gpt-4o"}
                }},
                "a2": {"id": "a2", "parent": "u1", "children": [], "message": {
                    "id": "a2", "author": {"role": "assistant"}, "create_time": 1704164660.0,
                    "content": {"content_type": "text", "parts": ["A crab, regenerated."]}
                }}
            }
        }])
    }

    #[test]
    fn maps_graph_with_branches_and_attachments() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("conversations.json"), export().to_string()).unwrap();
        fs::write(tmp.path().join("file-IMG001-photo.png"), b"png").unwrap();

        let out = ChatgptExtractor.extract(tmp.path(), "job_1").unwrap();
        assert_eq!(out.conversations.len(), 1);
        let conv = &out.conversations[0];
        assert_eq!(conv.id, "chatgpt:conv:conv-1");
        assert_eq!(conv.title.as_deref(), Some("Rust questions"));

        let ids: Vec<_> = out.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["chatgpt:msg:u1", "chatgpt:msg:a1", "chatgpt:msg:a2"]);
        assert_eq!(out.messages[0].role, Role::User);
        assert_eq!(out.messages[0].text, "What is this?");
        assert_eq!(out.messages[1].model.as_deref(), Some("gpt-4o"));
        assert_eq!(out.messages[0].attachment_ids.len(), 2);

        let image = out
            .attachments
            .iter()
            .find(|a| a.id == "chatgpt:att:file-IMG001")
            .unwrap();
        assert_eq!(image.source_path.as_deref(), Some("file-IMG001-photo.png"));

        let doc = out
            .attachments
            .iter()
            .find(|a| a.id == "chatgpt:att:file-DOC9")
            .unwrap();
        assert_eq!(doc.source_path.as_deref(), Some("file-DOC9-notes.txt"));
        assert_eq!(doc.storage, StorageMode::Missing);
        assert_eq!(doc.status, AttachmentStatus::Missing);
        assert_eq!(doc.mime_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn duplicate_nested_and_flat_records_merge() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("conversations.json"), export().to_string()).unwrap();
        let flat = json!([
            {"conversation_id": "conv-1", "id": "a1", "role": "assistant",
             "content": "A crab. Specifically a hermit crab."}
        ]);
        fs::write(tmp.path().join("messages.json"), flat.to_string()).unwrap();

        let out = ChatgptExtractor.extract(tmp.path(), "job_1").unwrap();
        assert_eq!(out.conversations.len(), 1);
        let a1 = out.messages.iter().find(|m| m.id == "chatgpt:msg:a1").unwrap();
        assert_eq!(a1.text, "A crab. Specifically a hermit crab.");
        assert_eq!(a1.model.as_deref(), Some("gpt-4o"));
        assert_eq!(out.conversations[0].title.as_deref(), Some("Rust questions"));
    }

    #[test]
    fn graph_order_visits_every_branch_once() {
        let mapping = json!({
            "b": {"parent": "a", "children": ["c"]},
            "a": {"parent": null, "children": ["b", "d"]},
            "c": {"parent": "b", "children": ["a"]},
            "d": {"parent": "a", "children": []}
        });
        let order = graph_order(mapping.as_object().unwrap());
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }
}
