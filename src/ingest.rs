//! Import pipeline orchestration.
//!
//! Drives one import job through its lifecycle:
//!
//! ```text
//! validate package → extract to raw → parse provider records
//!   → materialize attachments → upsert canonical + provider datasets
//!   → rebuild indexes → NORMALIZED
//! ```
//!
//! The job record is persisted after every transition. A failing stage moves
//! the job to `FAILED`, records the error on the job and in
//! `errors/<job_id>.ndjson`, and leaves whatever was already written in
//! place. The whole run holds the data-root lock.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::attachments;
use crate::config::Config;
use crate::error::ImportError;
use crate::index;
use crate::job::{self, Job, JobStatus};
use crate::layout::{DataLayout, DatasetPaths};
use crate::lock::{self, DataRootLock};
use crate::merge::upsert;
use crate::migrate;
use crate::models::{EntityStats, Extraction, JobWarning, MergeStats, Provider, WarningKind};
use crate::package::{self, Package};
use crate::progress::{ImportProgressEvent, ImportProgressReporter};
use crate::providers::extractor_for;
use crate::store::Dataset;

/// One import request.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub provider: Provider,
    pub package: PathBuf,
    /// Caller-supplied job id; generated when absent.
    pub job_id: Option<String>,
    /// Overrides `import.keep_package` when set.
    pub keep_package: Option<bool>,
}

impl ImportRequest {
    pub fn new(provider: Provider, package: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            package: package.into(),
            job_id: None,
            keep_package: None,
        }
    }
}

/// Run one import job to a terminal state.
///
/// Returns the final job record, `FAILED` jobs included. An `Err` means the
/// job could not be started or its record could not be persisted.
pub async fn run_import(
    config: &Config,
    request: ImportRequest,
    reporter: &dyn ImportProgressReporter,
) -> Result<Job> {
    let layout = DataLayout::new(&config.data.root);
    let started_at = Utc::now();
    let job_id = match request.job_id {
        Some(id) => id,
        None => job::new_job_id(started_at),
    };
    job::validate_job_id(&job_id)?;

    let lock = lock::acquire(
        &layout.lock_file(),
        config.import.lock_timeout(),
        config.import.stale_lock_after(),
    )
    .await?;

    migrate::create_skeleton(&layout)
        .with_context(|| format!("cannot prepare data root {}", layout.root().display()))?;
    if layout.job_file(&job_id).exists() {
        bail!("job {} already exists", job_id);
    }

    let keep_package = request.keep_package.unwrap_or(config.import.keep_package);
    let job = Job::new(
        job_id,
        request.provider,
        request.package.display().to_string(),
        keep_package,
        started_at,
    );
    job::save_job(&layout, &job)?;
    info!(job_id = %job.job_id, provider = %job.provider, status = %job.status, "import job created");
    reporter.report(ImportProgressEvent::Stage {
        job_id: job.job_id.clone(),
        status: job.status,
    });

    let mut run = ImportRun {
        config,
        layout,
        job,
        reporter,
        lock: &lock,
    };
    match run.execute(&request.package).await {
        Ok(()) => Ok(run.job),
        Err(err) => run.fail(err),
    }
}

struct ImportRun<'a> {
    config: &'a Config,
    layout: DataLayout,
    job: Job,
    reporter: &'a dyn ImportProgressReporter,
    lock: &'a DataRootLock,
}

impl ImportRun<'_> {
    async fn execute(&mut self, package_path: &Path) -> Result<(), ImportError> {
        migrate::check_schema(&self.layout)?;
        let package = package::validate(package_path)?;
        self.advance(JobStatus::PackageValidated)?;

        let extracted = self.extract_to_raw(&package)?;
        self.advance(JobStatus::ExtractedToRaw)?;

        let mut extraction = extractor_for(self.job.provider).extract(&extracted, &self.job.job_id)?;
        info!(
            job_id = %self.job.job_id,
            conversations = extraction.conversations.len(),
            messages = extraction.messages.len(),
            attachments = extraction.attachments.len(),
            "provider records parsed"
        );
        self.job.warnings.append(&mut extraction.warnings);
        self.advance(JobStatus::ParsedProviderRecords)?;

        let unresolved = attachments::materialize(
            &mut extraction.attachments,
            &extracted,
            &self.layout,
            self.config.attachments.max_parallel,
            &self.job.job_id,
            self.reporter,
        )
        .await?;
        self.job.warnings.extend(unresolved);
        self.advance(JobStatus::MappedCanonicalRecords)?;

        let canonical = self.layout.canonical();
        let provider_paths = self.layout.provider_dataset(self.job.provider);
        let (stats, merged) = self.upsert_into(&canonical, &extraction)?;
        self.job.stats = stats;
        self.job.canonical_records = merged.counts();
        let (provider_stats, _) = self.upsert_into(&provider_paths, &extraction)?;
        self.job.provider_stats = provider_stats;
        self.record_rejections();
        self.advance(JobStatus::DedupedUpserted)?;

        index::rebuild(&self.layout, &merged.messages)?;
        self.advance(JobStatus::Normalized)?;
        info!(
            job_id = %self.job.job_id,
            new_messages = self.job.stats.messages.new,
            updated_messages = self.job.stats.messages.updated,
            warnings = self.job.warnings.len(),
            "import job normalized"
        );
        Ok(())
    }

    fn extract_to_raw(&mut self, package: &Package) -> Result<PathBuf, ImportError> {
        let raw_dir = self
            .layout
            .raw_job_dir(self.job.provider, self.job.started_at, &self.job.job_id);
        let extracted = raw_dir.join("extracted");
        self.job.raw_path = Some(self.layout.relative(&raw_dir));

        if self.job.keep_package {
            if let Some(kept) = package::retain(package, &raw_dir.join("package"))? {
                self.job.retained_package = Some(self.layout.relative(&kept));
            }
        }
        let files = package::extract(package, &extracted)?;
        info!(job_id = %self.job.job_id, files, path = %extracted.display(), "package extracted");
        Ok(extracted)
    }

    /// Upsert the extracted records into one dataset and save it.
    fn upsert_into(
        &self,
        paths: &DatasetPaths,
        extraction: &Extraction,
    ) -> Result<(MergeStats, Dataset), ImportError> {
        let existing = Dataset::load(paths)?;
        let job_id = self.job.job_id.as_str();

        let conversations = upsert(existing.conversations, extraction.conversations.clone(), job_id);
        let messages = upsert(existing.messages, extraction.messages.clone(), job_id);
        let attachments = upsert(existing.attachments, extraction.attachments.clone(), job_id);

        let dataset = Dataset {
            conversations: conversations.rows,
            messages: messages.rows,
            attachments: attachments.rows,
        };
        dataset.save(paths)?;
        Ok((
            MergeStats {
                conversations: conversations.stats,
                messages: messages.stats,
                attachments: attachments.stats,
            },
            dataset,
        ))
    }

    fn record_rejections(&mut self) {
        let stats = self.job.stats;
        for (kind, entity) in [
            ("conversation", stats.conversations),
            ("message", stats.messages),
            ("attachment", stats.attachments),
        ] {
            if entity.failed > 0 {
                warn!(job_id = %self.job.job_id, kind, failed = entity.failed, "records rejected");
                self.job.warnings.push(JobWarning::new(
                    WarningKind::RecordRejected,
                    rejection_message(kind, &entity),
                ));
            }
        }
    }

    /// Persist the next status, then adopt it. A failed save leaves the
    /// in-memory job at the last persisted status.
    fn advance(&mut self, to: JobStatus) -> Result<(), ImportError> {
        let mut next = self.job.clone();
        next.advance(to, Utc::now())
            .map_err(|e| ImportError::Validation(e.to_string()))?;
        job::save_job(&self.layout, &next)?;
        self.job = next;
        if let Err(e) = self.lock.refresh() {
            warn!(job_id = %self.job.job_id, error = %e, "could not refresh data-root lock");
        }
        info!(job_id = %self.job.job_id, status = %to, "job stage complete");
        self.reporter.report(ImportProgressEvent::Stage {
            job_id: self.job.job_id.clone(),
            status: to,
        });
        Ok(())
    }

    fn fail(mut self, err: ImportError) -> Result<Job> {
        error!(
            job_id = %self.job.job_id,
            stage = %self.job.status.next().unwrap_or(self.job.status),
            kind = err.kind(),
            "import job failed: {}",
            err
        );
        self.job.fail(&err, Utc::now())?;
        job::save_job(&self.layout, &self.job)
            .with_context(|| format!("cannot persist failed job {}", self.job.job_id))?;
        job::append_error(&self.layout, &self.job, &err)
            .with_context(|| format!("cannot append to error log of {}", self.job.job_id))?;
        self.reporter.report(ImportProgressEvent::Stage {
            job_id: self.job.job_id.clone(),
            status: self.job.status,
        });
        Ok(self.job)
    }
}

fn rejection_message(kind: &str, stats: &EntityStats) -> String {
    format!(
        "{} {} record(s) rejected for missing key fields",
        stats.failed, kind
    )
}

/// Rebuild every index from the canonical message set.
pub async fn run_reindex(config: &Config) -> Result<index::IndexSummary> {
    let layout = DataLayout::new(&config.data.root);
    let _lock = lock::acquire(
        &layout.lock_file(),
        config.import.lock_timeout(),
        config.import.stale_lock_after(),
    )
    .await?;
    let dataset = Dataset::load(&layout.canonical())?;
    Ok(index::rebuild(&layout, &dataset.messages)?)
}
