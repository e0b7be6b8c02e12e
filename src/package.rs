//! Export package validation and raw extraction.
//!
//! A package is a directory, a `.zip` archive, or a single `.json`,
//! `.md`, `.markdown`, or `.txt` payload file. Extraction copies or
//! decompresses the package into `raw/.../<job_id>/extracted/`, which is
//! never modified afterwards. The caller's package is only read.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::ImportError;

/// Maximum decompressed bytes of a single archive entry (zip-bomb protection).
const MAX_ENTRY_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// Payload extensions accepted as single-file packages.
const FILE_EXTENSIONS: &[&str] = &["json", "md", "markdown", "txt"];

/// A validated package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Package {
    Directory(PathBuf),
    Zip(PathBuf),
    File(PathBuf),
}

/// Check that `path` is a readable package of a supported kind.
pub fn validate(path: &Path) -> Result<Package, ImportError> {
    let meta = fs::metadata(path).map_err(|e| {
        ImportError::Validation(format!("cannot read package {}: {}", path.display(), e))
    })?;
    if meta.is_dir() {
        return Ok(Package::Directory(path.to_path_buf()));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if ext == "zip" {
        let file = File::open(path).map_err(|e| {
            ImportError::Validation(format!("cannot open archive {}: {}", path.display(), e))
        })?;
        zip::ZipArchive::new(file).map_err(|e| {
            ImportError::Validation(format!("{} is not a readable zip archive: {}", path.display(), e))
        })?;
        return Ok(Package::Zip(path.to_path_buf()));
    }
    if FILE_EXTENSIONS.contains(&ext.as_str()) {
        return Ok(Package::File(path.to_path_buf()));
    }
    Err(ImportError::Validation(format!(
        "unsupported package {}: expected a directory, a .zip archive, or a {} file",
        path.display(),
        FILE_EXTENSIONS
            .iter()
            .map(|e| format!(".{}", e))
            .collect::<Vec<_>>()
            .join("/")
    )))
}

/// Extract `package` into `dest`. Returns the number of files written.
pub fn extract(package: &Package, dest: &Path) -> Result<u64, ImportError> {
    fs::create_dir_all(dest).map_err(|e| ImportError::write(dest, e))?;
    match package {
        Package::Directory(src) => copy_tree(src, dest),
        Package::Zip(src) => unzip(src, dest),
        Package::File(src) => {
            let name = src.file_name().ok_or_else(|| {
                ImportError::Validation(format!("package {} has no file name", src.display()))
            })?;
            copy_file(src, &dest.join(name))?;
            Ok(1)
        }
    }
}

/// Copy the original package into `dest` for retention.
///
/// Directory packages are already fully copied by [`extract`], so only
/// file packages are copied here. Returns the retained path.
pub fn retain(package: &Package, dest: &Path) -> Result<Option<PathBuf>, ImportError> {
    match package {
        Package::Directory(_) => Ok(None),
        Package::Zip(src) | Package::File(src) => {
            let name = src.file_name().ok_or_else(|| {
                ImportError::Validation(format!("package {} has no file name", src.display()))
            })?;
            let target = dest.join(name);
            fs::create_dir_all(dest).map_err(|e| ImportError::write(dest, e))?;
            copy_file(src, &target)?;
            Ok(Some(target))
        }
    }
}

fn copy_tree(src: &Path, dest: &Path) -> Result<u64, ImportError> {
    let mut count = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            ImportError::Validation(format!("cannot walk package {}: {}", src.display(), e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(src).map_err(|e| {
            ImportError::Validation(format!("bad package entry {}: {}", entry.path().display(), e))
        })?;
        copy_file(entry.path(), &dest.join(rel))?;
        count += 1;
    }
    Ok(count)
}

fn copy_file(src: &Path, target: &Path) -> Result<(), ImportError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| ImportError::write(parent, e))?;
    }
    let mut reader = File::open(src)
        .map_err(|e| ImportError::Validation(format!("cannot read {}: {}", src.display(), e)))?;
    let mut writer = File::create(target).map_err(|e| ImportError::write(target, e))?;
    io::copy(&mut reader, &mut writer).map_err(|e| ImportError::write(target, e))?;
    Ok(())
}

fn unzip(src: &Path, dest: &Path) -> Result<u64, ImportError> {
    let file = File::open(src)
        .map_err(|e| ImportError::Validation(format!("cannot open archive {}: {}", src.display(), e)))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| {
        ImportError::Validation(format!("{} is not a readable zip archive: {}", src.display(), e))
    })?;

    let mut count = 0;
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|e| {
            ImportError::Validation(format!("corrupt entry {} in {}: {}", i, src.display(), e))
        })?;
        let Some(rel) = entry.enclosed_name() else {
            return Err(ImportError::Validation(format!(
                "archive {} contains an unsafe path: {}",
                src.display(),
                entry.name()
            )));
        };
        if entry.is_dir() {
            continue;
        }
        let target = dest.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| ImportError::write(parent, e))?;
        }
        let mut writer = File::create(&target).map_err(|e| ImportError::write(&target, e))?;
        let copied = io::copy(&mut entry.take(MAX_ENTRY_BYTES), &mut writer)
            .map_err(|e| ImportError::write(&target, e))?;
        if copied >= MAX_ENTRY_BYTES {
            return Err(ImportError::Validation(format!(
                "archive entry {} exceeds size limit ({} bytes)",
                target.display(),
                MAX_ENTRY_BYTES
            )));
        }
        count += 1;
    }
    debug!(archive = %src.display(), files = count, "archive extracted");
    Ok(count)
}
