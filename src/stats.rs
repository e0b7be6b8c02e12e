//! Data-root statistics.
//!
//! Provides a quick summary of what's been imported: row counts of the
//! canonical and provider-scoped datasets, blob store size, and jobs by
//! status. Used by `harbor stats` to give confidence that imports are
//! landing where expected.

use std::collections::BTreeMap;

use anyhow::Result;
use walkdir::WalkDir;

use crate::config::Config;
use crate::job::list_jobs;
use crate::layout::DataLayout;
use crate::lock;
use crate::models::{Provider, RecordCounts};
use crate::store::Dataset;

/// Everything `harbor stats` prints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataStats {
    pub canonical: RecordCounts,
    pub by_provider: Vec<(Provider, RecordCounts)>,
    pub blob_count: u64,
    pub blob_bytes: u64,
    pub jobs_by_status: BTreeMap<String, u64>,
}

pub fn collect_stats(layout: &DataLayout) -> Result<DataStats> {
    let canonical = Dataset::load(&layout.canonical())?.counts();

    let mut by_provider = Vec::new();
    for provider in Provider::ALL {
        let paths = layout.provider_dataset(provider);
        if !paths.dir.exists() {
            continue;
        }
        by_provider.push((provider, Dataset::load(&paths)?.counts()));
    }

    let (mut blob_count, mut blob_bytes) = (0u64, 0u64);
    for entry in WalkDir::new(layout.blobs_dir()).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() && !is_temp(entry.file_name()) {
            blob_count += 1;
            blob_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }

    let lock_held = lock::is_held(&layout.lock_file());
    let mut jobs_by_status = BTreeMap::new();
    for job in list_jobs(layout)? {
        let label = if job.is_abandoned(lock_held) {
            "abandoned".to_string()
        } else {
            job.status.to_string()
        };
        *jobs_by_status.entry(label).or_insert(0) += 1;
    }

    Ok(DataStats {
        canonical,
        by_provider,
        blob_count,
        blob_bytes,
        jobs_by_status,
    })
}

fn is_temp(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

/// Run the stats command: scan the data root and print a summary.
pub fn run_stats(config: &Config) -> Result<()> {
    let layout = DataLayout::new(&config.data.root);
    let stats = collect_stats(&layout)?;

    println!("Chat Harbor — Data Root Stats");
    println!("=============================");
    println!();
    println!("  Data root:      {}", layout.root().display());
    println!();
    println!("  Conversations:  {}", stats.canonical.conversations);
    println!("  Messages:       {}", stats.canonical.messages);
    println!("  Attachments:    {}", stats.canonical.attachments);
    println!(
        "  Blobs:          {} ({})",
        stats.blob_count,
        format_bytes(stats.blob_bytes)
    );

    if !stats.by_provider.is_empty() {
        println!();
        println!("  By provider:");
        println!(
            "  {:<12} {:>14} {:>10} {:>12}",
            "PROVIDER", "CONVERSATIONS", "MESSAGES", "ATTACHMENTS"
        );
        println!("  {}", "-".repeat(51));
        for (provider, counts) in &stats.by_provider {
            println!(
                "  {:<12} {:>14} {:>10} {:>12}",
                provider.as_str(),
                counts.conversations,
                counts.messages,
                counts.attachments
            );
        }
    }

    if !stats.jobs_by_status.is_empty() {
        println!();
        println!("  Jobs:");
        for (status, count) in &stats.jobs_by_status {
            println!("  {:<26} {:>6}", status, count);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_root_has_zero_counts() {
        let tmp = TempDir::new().unwrap();
        let stats = collect_stats(&DataLayout::new(tmp.path())).unwrap();
        assert_eq!(stats, DataStats::default());
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
