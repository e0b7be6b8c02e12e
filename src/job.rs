//! Import job records and their lifecycle.
//!
//! A job moves through a fixed sequence of states, one step at a time:
//!
//! ```text
//! PACKAGE_SELECTED → PACKAGE_VALIDATED → EXTRACTED_TO_RAW → PARSED_PROVIDER_RECORDS
//!   → MAPPED_CANONICAL_RECORDS → DEDUPED_UPSERTED → NORMALIZED
//! ```
//!
//! `FAILED` is reachable from every non-terminal state. `NORMALIZED` and
//! `FAILED` are terminal; a terminal job accepts no further transition.
//! Job records are persisted as pretty JSON under `jobs/<job_id>.json` after
//! every transition, and failures are appended to `errors/<job_id>.ndjson`.

use std::fmt;
use std::fs;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ImportError;
use crate::layout::DataLayout;
use crate::models::{JobWarning, MergeStats, Provider, RecordCounts};
use crate::store::{append_json_line, write_json_pretty_atomic};

/// Lifecycle state of an import job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    PackageSelected,
    PackageValidated,
    ExtractedToRaw,
    ParsedProviderRecords,
    MappedCanonicalRecords,
    DedupedUpserted,
    Normalized,
    Failed,
}

impl JobStatus {
    /// The successful path, in order.
    pub const PIPELINE: [JobStatus; 7] = [
        JobStatus::PackageSelected,
        JobStatus::PackageValidated,
        JobStatus::ExtractedToRaw,
        JobStatus::ParsedProviderRecords,
        JobStatus::MappedCanonicalRecords,
        JobStatus::DedupedUpserted,
        JobStatus::Normalized,
    ];

    /// The state that follows this one on the successful path.
    pub fn next(self) -> Option<JobStatus> {
        let pos = Self::PIPELINE.iter().position(|s| *s == self)?;
        Self::PIPELINE.get(pos + 1).copied()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Normalized | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::PackageSelected => "PACKAGE_SELECTED",
            JobStatus::PackageValidated => "PACKAGE_VALIDATED",
            JobStatus::ExtractedToRaw => "EXTRACTED_TO_RAW",
            JobStatus::ParsedProviderRecords => "PARSED_PROVIDER_RECORDS",
            JobStatus::MappedCanonicalRecords => "MAPPED_CANONICAL_RECORDS",
            JobStatus::DedupedUpserted => "DEDUPED_UPSERTED",
            JobStatus::Normalized => "NORMALIZED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition the state machine does not allow.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("job {job_id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub job_id: String,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One entry of a job's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: JobStatus,
    pub at: DateTime<Utc>,
}

/// The persisted record of one import run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub provider: Provider,
    pub status: JobStatus,
    #[serde(default)]
    pub status_history: Vec<StatusChange>,
    /// The state being attempted when the job failed.
    #[serde(default)]
    pub failed_stage: Option<JobStatus>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// The package path as given by the caller.
    pub package_path: String,
    /// Raw extraction directory relative to the data root.
    #[serde(default)]
    pub raw_path: Option<String>,
    pub keep_package: bool,
    /// Retained copy of the package relative to the data root.
    #[serde(default)]
    pub retained_package: Option<String>,
    #[serde(default)]
    pub stats: MergeStats,
    #[serde(default)]
    pub provider_stats: MergeStats,
    #[serde(default)]
    pub canonical_records: RecordCounts,
    #[serde(default)]
    pub warnings: Vec<JobWarning>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl Job {
    /// A new job in `PACKAGE_SELECTED`.
    pub fn new(
        job_id: impl Into<String>,
        provider: Provider,
        package_path: impl Into<String>,
        keep_package: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            provider,
            status: JobStatus::PackageSelected,
            status_history: vec![StatusChange {
                status: JobStatus::PackageSelected,
                at: now,
            }],
            failed_stage: None,
            started_at: now,
            ended_at: None,
            package_path: package_path.into(),
            raw_path: None,
            keep_package,
            retained_package: None,
            stats: MergeStats::default(),
            provider_stats: MergeStats::default(),
            canonical_records: RecordCounts::default(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Move to `to`, which must be the next state on the successful path.
    pub fn advance(&mut self, to: JobStatus, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status.next() != Some(to) {
            return Err(self.illegal(to));
        }
        self.status = to;
        self.status_history.push(StatusChange { status: to, at: now });
        if to.is_terminal() {
            self.ended_at = Some(now);
        }
        Ok(())
    }

    /// Enter `FAILED`, recording the error message verbatim.
    pub fn fail(&mut self, error: &ImportError, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(self.illegal(JobStatus::Failed));
        }
        self.failed_stage = self.status.next();
        self.errors.push(error.to_string());
        self.status = JobStatus::Failed;
        self.status_history.push(StatusChange {
            status: JobStatus::Failed,
            at: now,
        });
        self.ended_at = Some(now);
        Ok(())
    }

    /// A non-terminal job nobody is working on.
    pub fn is_abandoned(&self, lock_held: bool) -> bool {
        !self.status.is_terminal() && !lock_held
    }

    /// Status label for listings.
    pub fn display_status(&self, lock_held: bool) -> String {
        if self.is_abandoned(lock_held) {
            format!("abandoned ({})", self.status)
        } else {
            self.status.to_string()
        }
    }

    fn illegal(&self, to: JobStatus) -> TransitionError {
        TransitionError {
            job_id: self.job_id.clone(),
            from: self.status,
            to,
        }
    }
}

/// A fresh time-ordered job id: `job_20240102T030405123Z_1a2b3c4d`.
pub fn new_job_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("job_{}_{}", now.format("%Y%m%dT%H%M%S%3fZ"), &suffix[..8])
}

/// A job id is used as a file name, so it is restricted to `[A-Za-z0-9_.-]`.
pub fn validate_job_id(job_id: &str) -> Result<(), ImportError> {
    let valid = !job_id.is_empty()
        && !job_id.starts_with('.')
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ImportError::Validation(format!(
            "job id {:?} may only contain letters, digits, '_', '-' and '.'",
            job_id
        )))
    }
}

/// One line of `errors/<job_id>.ndjson`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub job_id: String,
    pub at: DateTime<Utc>,
    pub stage: Option<JobStatus>,
    pub kind: String,
    pub message: String,
}

pub fn save_job(layout: &DataLayout, job: &Job) -> Result<(), ImportError> {
    write_json_pretty_atomic(&layout.job_file(&job.job_id), job)
}

pub fn append_error(layout: &DataLayout, job: &Job, error: &ImportError) -> Result<(), ImportError> {
    let entry = ErrorLogEntry {
        job_id: job.job_id.clone(),
        at: job.ended_at.unwrap_or_else(Utc::now),
        stage: job.failed_stage,
        kind: error.kind().to_string(),
        message: error.to_string(),
    };
    append_json_line(&layout.error_log(&job.job_id), &entry)
}

pub fn load_job(layout: &DataLayout, job_id: &str) -> Result<Job> {
    let path = layout.job_file(job_id);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("job {} not found at {}", job_id, path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid job record {}", path.display()))
}

/// Every persisted job, oldest first.
pub fn list_jobs(layout: &DataLayout) -> Result<Vec<Job>> {
    let dir = layout.jobs_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut jobs = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("cannot list {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let job: Job = serde_json::from_str(&content)
            .with_context(|| format!("invalid job record {}", path.display()))?;
        jobs.push(job);
    }
    jobs.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then_with(|| a.job_id.cmp(&b.job_id))
    });
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn job() -> Job {
        Job::new("job_t", Provider::Chatgpt, "export.zip", false, Utc::now())
    }

    #[test]
    fn advances_one_step_at_a_time() {
        let mut j = job();
        for status in &JobStatus::PIPELINE[1..] {
            j.advance(*status, Utc::now()).unwrap();
        }
        assert_eq!(j.status, JobStatus::Normalized);
        assert!(j.ended_at.is_some());
        assert_eq!(j.status_history.len(), JobStatus::PIPELINE.len());
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let mut j = job();
        let err = j.advance(JobStatus::ExtractedToRaw, Utc::now()).unwrap_err();
        assert_eq!(err.from, JobStatus::PackageSelected);
        assert_eq!(j.status, JobStatus::PackageSelected);
    }

    #[test]
    fn failed_is_absorbing() {
        let mut j = job();
        j.advance(JobStatus::PackageValidated, Utc::now()).unwrap();
        j.advance(JobStatus::ExtractedToRaw, Utc::now()).unwrap();
        let err = ImportError::Validation("boom".into());
        j.fail(&err, Utc::now()).unwrap();
        assert_eq!(j.status, JobStatus::Failed);
        assert_eq!(j.failed_stage, Some(JobStatus::ParsedProviderRecords));
        assert_eq!(j.errors, vec!["validation failed: boom".to_string()]);

        assert!(j.fail(&err, Utc::now()).is_err());
        assert!(j.advance(JobStatus::ParsedProviderRecords, Utc::now()).is_err());
        assert_eq!(j.status, JobStatus::Failed);
    }

    #[test]
    fn normalized_cannot_fail() {
        let mut j = job();
        for status in &JobStatus::PIPELINE[1..] {
            j.advance(*status, Utc::now()).unwrap();
        }
        assert!(j.fail(&ImportError::Validation("late".into()), Utc::now()).is_err());
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let s = serde_json::to_string(&JobStatus::ParsedProviderRecords).unwrap();
        assert_eq!(s, "\"PARSED_PROVIDER_RECORDS\"");
    }

    #[test]
    fn job_ids_sort_by_time_and_validate() {
        let a = new_job_id("2024-01-02T03:04:05.006Z".parse().unwrap());
        assert!(a.starts_with("job_20240102T030405006Z_"));
        assert_eq!(a.len(), "job_20240102T030405006Z_".len() + 8);
        assert!(validate_job_id(&a).is_ok());
        assert!(validate_job_id("../etc").is_err());
        assert!(validate_job_id("").is_err());
    }

    #[test]
    fn persists_and_lists_jobs() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path());
        let mut j = job();
        save_job(&layout, &j).unwrap();
        let err = ImportError::Extraction {
            provider: "chatgpt".into(),
            root: tmp.path().to_path_buf(),
        };
        j.fail(&err, Utc::now()).unwrap();
        save_job(&layout, &j).unwrap();
        append_error(&layout, &j, &err).unwrap();

        let loaded = load_job(&layout, "job_t").unwrap();
        assert_eq!(loaded, j);
        assert_eq!(list_jobs(&layout).unwrap().len(), 1);

        let log = fs::read_to_string(layout.error_log("job_t")).unwrap();
        let entry: ErrorLogEntry = serde_json::from_str(log.trim()).unwrap();
        assert_eq!(entry.kind, "extraction_failure");
        assert_eq!(entry.stage, Some(JobStatus::PackageValidated));
    }

    #[test]
    fn abandoned_only_without_lock() {
        let j = job();
        assert!(j.is_abandoned(false));
        assert!(!j.is_abandoned(true));
        assert!(j.display_status(false).starts_with("abandoned"));
    }
}
