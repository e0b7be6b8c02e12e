//! Attachment materialization into the content-addressed blob store.
//!
//! Each attachment with a local reference is read from the extraction root,
//! hashed with SHA-256, and stored once under
//! `blobs/sha256/<aa>/<bb>/<hash>.<ext>`. Inline `data:` URIs are decoded
//! and stored the same way. Remote-only references stay `url`/`linked`;
//! references to files that do not exist become `missing`/`missing` with a
//! warning. Hashing runs on the blocking pool, at most `max_parallel` files
//! at a time; blob writes are serialized so a hash maps to exactly one file.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::ImportError;
use crate::layout::DataLayout;
use crate::models::{Attachment, AttachmentStatus, JobWarning, StorageMode, WarningKind};
use crate::progress::{ImportProgressEvent, ImportProgressReporter};
use crate::store::write_atomic;

/// What happened to one attachment.
#[derive(Debug)]
enum Resolution {
    Stored { sha256: String, blob_path: String, size: u64 },
    Linked,
    Missing { path: Option<String> },
}

/// Materialize every attachment in place.
///
/// Returns one `AttachmentUnresolved` warning per missing attachment. Only
/// blob write failures are fatal.
pub async fn materialize(
    attachments: &mut [Attachment],
    extracted_root: &Path,
    layout: &DataLayout,
    max_parallel: usize,
    job_id: &str,
    reporter: &dyn ImportProgressReporter,
) -> Result<Vec<JobWarning>, ImportError> {
    let total = attachments.len() as u64;
    let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
    let write_lock = Arc::new(Mutex::new(()));
    let mut tasks = JoinSet::new();

    for (index, attachment) in attachments.iter().enumerate() {
        if attachment.status == AttachmentStatus::Embedded {
            continue;
        }
        let source = LocalSource::of(attachment, extracted_root);
        let blobs = layout.clone();
        let blobs_root = layout.blobs_dir();
        let semaphore = Arc::clone(&semaphore);
        let write_lock = Arc::clone(&write_lock);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let resolved = tokio::task::spawn_blocking(move || resolve(source, &blobs, &write_lock))
                .await
                .map_err(|e| ImportError::write(blobs_root, std::io::Error::other(e.to_string())))?;
            resolved.map(|resolution| (index, resolution))
        });
    }

    let mut outcomes: Vec<(usize, Resolution)> = Vec::with_capacity(attachments.len());
    let mut done = 0u64;
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(|e| {
            ImportError::write(layout.blobs_dir(), std::io::Error::other(e.to_string()))
        })??;
        outcomes.push(outcome);
        done += 1;
        reporter.report(ImportProgressEvent::Materializing {
            job_id: job_id.to_string(),
            n: done,
            total,
        });
    }
    outcomes.sort_by_key(|(index, _)| *index);

    let mut warnings = Vec::new();
    for (index, resolution) in outcomes {
        let attachment = &mut attachments[index];
        match resolution {
            Resolution::Stored {
                sha256,
                blob_path,
                size,
            } => {
                attachment.sha256 = Some(sha256);
                attachment.blob_path = Some(blob_path);
                attachment.size_bytes.get_or_insert(size);
                attachment.storage = StorageMode::Blob;
                attachment.status = AttachmentStatus::Embedded;
            }
            Resolution::Linked => {
                attachment.storage = StorageMode::Url;
                attachment.status = AttachmentStatus::Linked;
            }
            Resolution::Missing { path } => {
                attachment.storage = StorageMode::Missing;
                attachment.status = AttachmentStatus::Missing;
                warn!(
                    job_id,
                    attachment_id = %attachment.id,
                    path = path.as_deref().unwrap_or("-"),
                    "attachment unresolved"
                );
                let mut warning = JobWarning::new(
                    WarningKind::AttachmentUnresolved,
                    match &path {
                        Some(p) => format!("attachment {} references missing file {}", attachment.id, p),
                        None => format!("attachment {} has no usable reference", attachment.id),
                    },
                );
                warning.entity_id = Some(attachment.id.clone());
                warning.path = path;
                warnings.push(warning);
            }
        }
    }
    Ok(warnings)
}

/// Everything a hashing task needs, detached from the attachment.
#[derive(Debug)]
struct LocalSource {
    name_hint: Option<String>,
    mime_type: Option<String>,
    /// `(relative reference, absolute path)` when the reference is safe.
    file: Option<(String, Option<PathBuf>)>,
    url: Option<String>,
}

impl LocalSource {
    fn of(attachment: &Attachment, root: &Path) -> Self {
        let file = attachment
            .source_path
            .as_ref()
            .map(|rel| (rel.clone(), safe_join(root, rel)));
        Self {
            name_hint: attachment.name.clone().or_else(|| attachment.source_path.clone()),
            mime_type: attachment.mime_type.clone(),
            file,
            url: attachment.url.clone(),
        }
    }
}

/// Join a relative reference onto `root`, refusing anything that escapes it.
fn safe_join(root: &Path, rel: &str) -> Option<PathBuf> {
    let rel = Path::new(rel);
    let safe = rel
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    safe.then(|| root.join(rel))
}

fn resolve(
    source: LocalSource,
    layout: &DataLayout,
    write_lock: &Mutex<()>,
) -> Result<Resolution, ImportError> {
    if let Some((rel, path)) = &source.file {
        let bytes = match path.as_deref().filter(|p| p.is_file()) {
            Some(p) => std::fs::read(p).ok(),
            None => None,
        };
        return match bytes {
            Some(bytes) => {
                let ext = extension_for(source.name_hint.as_deref(), source.mime_type.as_deref());
                store_blob(layout, &bytes, ext.as_deref(), write_lock)
            }
            None => Ok(Resolution::Missing {
                path: Some(rel.clone()),
            }),
        };
    }

    match source.url.as_deref() {
        Some(url) if url.starts_with("data:") => match decode_data_uri(url) {
            Some((mime, bytes)) => {
                let ext = extension_for(
                    source.name_hint.as_deref(),
                    source.mime_type.as_deref().or(mime.as_deref()),
                );
                store_blob(layout, &bytes, ext.as_deref(), write_lock)
            }
            None => {
                debug!("undecodable data URI left as link");
                Ok(Resolution::Linked)
            }
        },
        Some(_) => Ok(Resolution::Linked),
        None => Ok(Resolution::Missing { path: None }),
    }
}

/// Store `bytes` under their hash unless a blob with that hash exists.
fn store_blob(
    layout: &DataLayout,
    bytes: &[u8],
    ext: Option<&str>,
    write_lock: &Mutex<()>,
) -> Result<Resolution, ImportError> {
    let sha256 = hex::encode(Sha256::digest(bytes));
    let dir = layout.blob_dir_for(&sha256);

    let _guard = write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let path = match existing_blob(&dir, &sha256) {
        Some(path) => path,
        None => {
            let name = match ext {
                Some(ext) => format!("{}.{}", sha256, ext),
                None => sha256.clone(),
            };
            let path = dir.join(name);
            write_atomic(&path, bytes)?;
            path
        }
    };
    Ok(Resolution::Stored {
        blob_path: layout.relative(&path),
        sha256,
        size: bytes.len() as u64,
    })
}

/// A blob already stored for `sha256`, whatever its extension.
fn existing_blob(dir: &Path, sha256: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let dotted = format!("{}.", sha256);
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n == sha256 || n.starts_with(&dotted))
        })
}

/// Decode `data:[<mime>][;base64],<payload>`.
fn decode_data_uri(uri: &str) -> Option<(Option<String>, Vec<u8>)> {
    let rest = uri.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mut parts = meta.split(';');
    let mime = parts
        .next()
        .filter(|m| !m.is_empty())
        .map(str::to_string);
    let is_base64 = parts.any(|p| p.eq_ignore_ascii_case("base64"));
    let bytes = if is_base64 {
        STANDARD.decode(payload.trim()).ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((mime, bytes))
}

/// File extension for a blob, from the name first and the mime type second.
fn extension_for(name: Option<&str>, mime: Option<&str>) -> Option<String> {
    let from_name = name
        .and_then(|n| n.rsplit('/').next())
        .and_then(|n| n.rsplit_once('.'))
        .map(|(stem, ext)| (stem, ext.to_ascii_lowercase()))
        .filter(|(stem, ext)| {
            !stem.is_empty() && !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|(_, ext)| ext);
    from_name.or_else(|| {
        let ext = match mime?.split(';').next()?.trim() {
            "image/png" => "png",
            "image/jpeg" => "jpg",
            "image/gif" => "gif",
            "image/webp" => "webp",
            "application/pdf" => "pdf",
            "application/json" => "json",
            "text/plain" => "txt",
            "text/csv" => "csv",
            "text/markdown" => "md",
            "text/html" => "html",
            "audio/mpeg" => "mp3",
            "audio/wav" => "wav",
            _ => return None,
        };
        Some(ext.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provider;
    use crate::progress::NoProgress;
    use std::fs;
    use tempfile::TempDir;
    use walkdir::WalkDir;

    fn att(id: &str, source: Option<&str>, url: Option<&str>) -> Attachment {
        let mut a = Attachment::unresolved(id.into(), "chatgpt:msg:m".into(), Provider::Chatgpt);
        a.source_path = source.map(str::to_string);
        a.url = url.map(str::to_string);
        a.classify_references();
        a
    }

    fn blob_files(root: &Path) -> Vec<PathBuf> {
        WalkDir::new(root.join("blobs"))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    }

    #[tokio::test]
    async fn identical_bytes_share_one_blob() {
        let extracted = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        fs::write(extracted.path().join("a.png"), b"same bytes").unwrap();
        fs::create_dir_all(extracted.path().join("sub")).unwrap();
        fs::write(extracted.path().join("sub/b.png"), b"same bytes").unwrap();
        let layout = DataLayout::new(data.path());

        let mut atts = vec![
            att("chatgpt:att:a", Some("a.png"), None),
            att("chatgpt:att:b", Some("sub/b.png"), None),
        ];
        let warnings = materialize(&mut atts, extracted.path(), &layout, 4, "job_1", &NoProgress)
            .await
            .unwrap();

        assert!(warnings.is_empty());
        assert_eq!(blob_files(data.path()).len(), 1);
        assert_eq!(atts[0].sha256, atts[1].sha256);
        assert_eq!(atts[0].blob_path, atts[1].blob_path);
        assert_eq!(atts[0].status, AttachmentStatus::Embedded);
        assert_eq!(atts[0].storage, StorageMode::Blob);
        assert_eq!(atts[0].size_bytes, Some(10));
        let hash = atts[0].sha256.clone().unwrap();
        assert_eq!(
            atts[0].blob_path.as_deref().unwrap(),
            format!("blobs/sha256/{}/{}/{}.png", &hash[..2], &hash[2..4], hash)
        );
    }

    #[tokio::test]
    async fn rerun_is_a_no_op() {
        let extracted = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        fs::write(extracted.path().join("a.txt"), b"hello").unwrap();
        let layout = DataLayout::new(data.path());

        let mut first = vec![att("claude:att:a", Some("a.txt"), None)];
        materialize(&mut first, extracted.path(), &layout, 1, "job_1", &NoProgress)
            .await
            .unwrap();
        let mut second = vec![att("claude:att:a", Some("a.txt"), None)];
        materialize(&mut second, extracted.path(), &layout, 1, "job_2", &NoProgress)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(blob_files(data.path()).len(), 1);
    }

    #[tokio::test]
    async fn missing_file_warns_with_id_and_path() {
        let extracted = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let layout = DataLayout::new(data.path());
        let mut atts = vec![att("grok:att:gone", Some("files/gone.pdf"), None)];

        let warnings = materialize(&mut atts, extracted.path(), &layout, 2, "job_1", &NoProgress)
            .await
            .unwrap();
        assert_eq!(atts[0].storage, StorageMode::Missing);
        assert_eq!(atts[0].status, AttachmentStatus::Missing);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::AttachmentUnresolved);
        assert_eq!(warnings[0].entity_id.as_deref(), Some("grok:att:gone"));
        assert_eq!(warnings[0].path.as_deref(), Some("files/gone.pdf"));
    }

    #[tokio::test]
    async fn escaping_reference_is_missing() {
        let extracted = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let layout = DataLayout::new(data.path());
        let mut atts = vec![att("grok:att:up", Some("../secret"), None)];
        let warnings = materialize(&mut atts, extracted.path(), &layout, 2, "job_1", &NoProgress)
            .await
            .unwrap();
        assert_eq!(atts[0].status, AttachmentStatus::Missing);
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test]
    async fn remote_links_stay_linked_and_data_uris_embed() {
        let extracted = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let layout = DataLayout::new(data.path());
        let inline = format!("data:text/plain;base64,{}", STANDARD.encode(b"a,b\n1,2"));
        let mut atts = vec![
            att("claude:att:remote", None, Some("https://example.com/x.png")),
            att("claude:att:inline", None, Some(&inline)),
        ];
        let warnings = materialize(&mut atts, extracted.path(), &layout, 2, "job_1", &NoProgress)
            .await
            .unwrap();
        assert!(warnings.is_empty());
        assert_eq!(atts[0].status, AttachmentStatus::Linked);
        assert_eq!(atts[0].storage, StorageMode::Url);
        assert_eq!(atts[1].status, AttachmentStatus::Embedded);
        assert!(atts[1].blob_path.as_deref().unwrap().ends_with(".txt"));
    }

    #[test]
    fn extension_prefers_name_then_mime() {
        assert_eq!(extension_for(Some("photo.JPG"), None).as_deref(), Some("jpg"));
        assert_eq!(extension_for(Some("file-abc"), Some("image/png")).as_deref(), Some("png"));
        assert_eq!(extension_for(Some(".hidden"), None), None);
        assert_eq!(extension_for(None, Some("application/x-unknown")), None);
    }
}
