//! End-to-end import scenarios driven through the library API.

use std::fs;
use std::path::{Path, PathBuf};

use chat_harbor::config::Config;
use chat_harbor::ingest::{run_import, ImportRequest};
use chat_harbor::job::{load_job, JobStatus};
use chat_harbor::layout::DataLayout;
use chat_harbor::models::{Attachment, AttachmentStatus, Message, Provider, StorageMode, WarningKind};
use chat_harbor::progress::NoProgress;
use chat_harbor::store::read_ndjson;
use serde_json::json;
use tempfile::TempDir;
use walkdir::WalkDir;

fn chatgpt_export(answer: &str) -> serde_json::Value {
    json!([{
        "id": "conv-a",
        "title": "Trip",
        "create_time": 1704164645.0,
        "mapping": {
            "n1": {"id": "n1", "parent": null, "children": ["n2"], "message": {
                "id": "m1", "author": {"role": "user"}, "create_time": 1704164646.0,
                "content": {"content_type": "text", "parts": ["Where to?"]}
            }},
            "n2": {"id": "n2", "parent": "n1", "children": [], "message": {
                "id": "m2", "author": {"role": "assistant"}, "create_time": 1704164650.0,
                "content": {"content_type": "text", "parts": [answer]}
            }}
        }
    }])
}

fn write_package(dir: &Path, name: &str, payload: &serde_json::Value) -> PathBuf {
    let package = dir.join(name);
    fs::create_dir_all(&package).unwrap();
    fs::write(package.join("conversations.json"), payload.to_string()).unwrap();
    package
}

fn request(provider: Provider, package: &Path, job_id: &str) -> ImportRequest {
    let mut req = ImportRequest::new(provider, package);
    req.job_id = Some(job_id.to_string());
    req
}

fn canonical_messages(root: &Path) -> Vec<Message> {
    read_ndjson(&root.join("canonical/messages.ndjson")).unwrap()
}

#[tokio::test]
async fn reimport_is_idempotent_and_longer_text_updates() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let config = Config::for_root(&data);

    let a = write_package(tmp.path(), "a", &chatgpt_export("Lisbon"));
    let job = run_import(&config, request(Provider::Chatgpt, &a, "job_a1"), &NoProgress)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Normalized);
    assert_eq!(job.stats.conversations.new, 1);
    assert_eq!(job.stats.messages.new, 2);
    assert_eq!(job.canonical_records.messages, 2);

    let again = run_import(&config, request(Provider::Chatgpt, &a, "job_a2"), &NoProgress)
        .await
        .unwrap();
    assert_eq!(again.stats.conversations.new, 0);
    assert_eq!(again.stats.conversations.unchanged, 1);
    assert_eq!(again.stats.messages.new, 0);
    assert_eq!(again.stats.messages.unchanged, 2);
    assert_eq!(again.provider_stats.messages.unchanged, 2);

    let b = write_package(tmp.path(), "b", &chatgpt_export("Lisbon, in spring"));
    let extended = run_import(&config, request(Provider::Chatgpt, &b, "job_b"), &NoProgress)
        .await
        .unwrap();
    assert_eq!(extended.stats.messages.updated, 1);
    assert_eq!(extended.stats.messages.unchanged, 1);

    let messages = canonical_messages(&data);
    assert_eq!(messages.len(), 2);
    let m2 = messages.iter().find(|m| m.id == "chatgpt:msg:m2").unwrap();
    assert_eq!(m2.text, "Lisbon, in spring");
    assert_eq!(m2.provenance.first_seen_job_id, "job_a1");
    assert_eq!(m2.provenance.source_job_id, "job_b");
    assert_eq!(m2.provenance.last_seen_job_id, "job_b");
    assert_eq!(m2.provenance.seen_in_jobs.len(), 3);

    let m1 = messages.iter().find(|m| m.id == "chatgpt:msg:m1").unwrap();
    assert_eq!(m1.provenance.source_job_id, "job_a1");
    assert_eq!(m1.provenance.last_seen_job_id, "job_b");

    // A shorter re-export never truncates stored text.
    let shorter = run_import(&config, request(Provider::Chatgpt, &a, "job_a3"), &NoProgress)
        .await
        .unwrap();
    assert_eq!(shorter.stats.messages.updated, 0);
    let m2 = canonical_messages(&data)
        .into_iter()
        .find(|m| m.id == "chatgpt:msg:m2")
        .unwrap();
    assert_eq!(m2.text, "Lisbon, in spring");
}

#[tokio::test]
async fn identical_attachments_share_one_blob_and_missing_ones_warn() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let config = Config::for_root(&data);

    let package = tmp.path().join("claude-export");
    fs::create_dir_all(package.join("files")).unwrap();
    fs::write(package.join("files/chart-one.png"), b"identical").unwrap();
    fs::write(package.join("files/chart-two.png"), b"identical").unwrap();
    fs::write(
        package.join("conversations.json"),
        json!([{
            "uuid": "c-1",
            "name": "Charts",
            "chat_messages": [
                {"uuid": "u-1", "sender": "human", "text": "first",
                 "files": [{"file_uuid": "f-1", "file_name": "chart-one.png"}]},
                {"uuid": "u-2", "sender": "human", "text": "second",
                 "files": [{"file_uuid": "f-2", "file_name": "chart-two.png"}]},
                {"uuid": "u-3", "sender": "human", "text": "third",
                 "files": [{"file_uuid": "f-3", "file_name": "never-exported.pdf"}]}
            ]
        }])
        .to_string(),
    )
    .unwrap();

    let job = run_import(&config, request(Provider::Claude, &package, "job_att"), &NoProgress)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Normalized);

    let attachments: Vec<Attachment> =
        read_ndjson(&data.join("canonical/attachments.ndjson")).unwrap();
    assert_eq!(attachments.len(), 3);
    let one = attachments.iter().find(|a| a.id == "claude:att:f-1").unwrap();
    let two = attachments.iter().find(|a| a.id == "claude:att:f-2").unwrap();
    assert_eq!(one.status, AttachmentStatus::Embedded);
    assert_eq!(one.sha256, two.sha256);
    assert_eq!(one.blob_path, two.blob_path);

    let blobs: Vec<_> = WalkDir::new(data.join("blobs"))
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .collect();
    assert_eq!(blobs.len(), 1);

    let missing = attachments.iter().find(|a| a.id == "claude:att:f-3").unwrap();
    assert_eq!(missing.storage, StorageMode::Missing);
    assert_eq!(missing.status, AttachmentStatus::Missing);
    let unresolved: Vec<_> = job
        .warnings
        .iter()
        .filter(|w| w.kind == WarningKind::AttachmentUnresolved)
        .collect();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].entity_id.as_deref(), Some("claude:att:f-3"));
}

#[tokio::test]
async fn embedded_attachment_does_not_regress_when_file_disappears() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let config = Config::for_root(&data);
    let payload = json!([{
        "uuid": "c-9",
        "chat_messages": [{"uuid": "u-9", "sender": "human", "text": "see file",
                           "files": [{"file_uuid": "f-9", "file_name": "notes.txt"}]}]
    }]);

    let with_file = write_package(tmp.path(), "full", &payload);
    fs::write(with_file.join("notes.txt"), b"notes").unwrap();
    run_import(&config, request(Provider::Claude, &with_file, "job_full"), &NoProgress)
        .await
        .unwrap();

    let without_file = write_package(tmp.path(), "partial", &payload);
    let job = run_import(&config, request(Provider::Claude, &without_file, "job_partial"), &NoProgress)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Normalized);

    let attachments: Vec<Attachment> =
        read_ndjson(&data.join("canonical/attachments.ndjson")).unwrap();
    assert_eq!(attachments[0].status, AttachmentStatus::Embedded);
    assert_eq!(attachments[0].storage, StorageMode::Blob);
    assert!(attachments[0].sha256.is_some());
}

#[tokio::test]
async fn failure_while_parsing_is_absorbing_and_logged() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let config = Config::for_root(&data);
    let package = tmp.path().join("no-payload");
    fs::create_dir_all(&package).unwrap();
    fs::write(package.join("readme.pdf"), b"%PDF").unwrap();

    let job = run_import(&config, request(Provider::Gemini, &package, "job_fail"), &NoProgress)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failed_stage, Some(JobStatus::ParsedProviderRecords));
    assert!(!job.errors.is_empty());

    let layout = DataLayout::new(&data);
    let persisted = load_job(&layout, "job_fail").unwrap();
    assert_eq!(persisted.status, JobStatus::Failed);
    assert_eq!(persisted.status_history.last().unwrap().status, JobStatus::Failed);
    assert!(!persisted
        .status_history
        .iter()
        .any(|c| c.status == JobStatus::ParsedProviderRecords));

    let raw = data.join(persisted.raw_path.unwrap()).join("extracted/readme.pdf");
    assert!(raw.exists());
    let log = fs::read_to_string(layout.error_log("job_fail")).unwrap();
    assert_eq!(log.lines().count(), 1);
    assert!(log.contains("extraction_failure"));
}

#[tokio::test]
async fn unsupported_package_fails_validation() {
    let tmp = TempDir::new().unwrap();
    let config = Config::for_root(tmp.path().join("data"));
    let package = tmp.path().join("export.rar");
    fs::write(&package, b"rar").unwrap();

    let job = run_import(&config, request(Provider::Grok, &package, "job_rar"), &NoProgress)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failed_stage, Some(JobStatus::PackageValidated));
    assert!(job.errors[0].starts_with("validation failed"));
    assert!(job.raw_path.is_none());
}

#[tokio::test]
async fn concurrent_import_is_rejected_while_locked() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let config = Config::for_root(&data);
    let layout = DataLayout::new(&data);
    let package = write_package(tmp.path(), "a", &chatgpt_export("Lisbon"));

    let _held = chat_harbor::lock::acquire(
        &layout.lock_file(),
        std::time::Duration::ZERO,
        std::time::Duration::ZERO,
    )
    .await
    .unwrap();
    let err = run_import(&config, request(Provider::Chatgpt, &package, "job_locked"), &NoProgress)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("another import is running"));
    assert!(!layout.job_file("job_locked").exists());
}

#[tokio::test]
async fn providers_share_canonical_but_not_provider_datasets() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let config = Config::for_root(&data);

    let chatgpt = write_package(tmp.path(), "gpt", &chatgpt_export("Lisbon"));
    run_import(&config, request(Provider::Chatgpt, &chatgpt, "job_gpt"), &NoProgress)
        .await
        .unwrap();

    let grok = tmp.path().join("grok-export");
    fs::create_dir_all(&grok).unwrap();
    fs::write(
        grok.join("prod-grok-backend.json"),
        json!({"conversations": [{
            "conversation": {"id": "g1", "title": "Stars"},
            "responses": [
                {"response": {"_id": "r1", "message": "How far is Vega?", "sender": "human",
                              "create_time": {"$date": {"$numberLong": "1709294400000"}}}},
                {"response": {"_id": "r2", "message": "About 25 light years.", "sender": "assistant",
                              "create_time": {"$date": {"$numberLong": "1709294405000"}}}}
            ]
        }]})
        .to_string(),
    )
    .unwrap();
    let job = run_import(&config, request(Provider::Grok, &grok, "job_grok"), &NoProgress)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Normalized);
    assert_eq!(job.canonical_records.messages, 4);

    let grok_only: Vec<Message> = read_ndjson(&data.join("provider/grok/messages.ndjson")).unwrap();
    assert_eq!(grok_only.len(), 2);
    let by_day: Vec<Message> =
        read_ndjson(&data.join("indexes/by-date/2024/03/01/messages.ndjson")).unwrap();
    assert_eq!(by_day.len(), 2);
    assert!(data.join("indexes/by-provider/chatgpt/messages.ndjson").exists());
}

#[tokio::test]
async fn newer_schema_root_fails_the_job_at_validation() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir_all(&data).unwrap();
    fs::write(data.join("schema.json"), "{\"schema_version\": 99}").unwrap();
    let config = Config::for_root(&data);
    let package = write_package(tmp.path(), "a", &chatgpt_export("Lisbon"));

    let job = run_import(&config, request(Provider::Chatgpt, &package, "job_future"), &NoProgress)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failed_stage, Some(JobStatus::PackageValidated));
    assert!(job.errors[0].contains("schema version 99"));
    assert!(job.raw_path.is_none());

    let layout = DataLayout::new(&data);
    assert_eq!(load_job(&layout, "job_future").unwrap().status, JobStatus::Failed);
    let log = fs::read_to_string(layout.error_log("job_future")).unwrap();
    assert!(log.contains("validation_error"));
    assert!(!data.join("canonical/messages.ndjson").exists());
}
