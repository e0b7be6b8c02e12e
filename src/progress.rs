//! Import progress reporting.
//!
//! Reports observable progress during `harbor import` so users see which
//! stage a job is in and how many attachments are left to materialize.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.
//! It is separate from `tracing` logs, which are filtered by `RUST_LOG`.

use std::io::Write;

use crate::job::JobStatus;

/// A single progress event for an import job.
#[derive(Clone, Debug)]
pub enum ImportProgressEvent {
    /// The job entered a new lifecycle state.
    Stage { job_id: String, status: JobStatus },
    /// Attachment materialization: n attachments processed out of total.
    Materializing { job_id: String, n: u64, total: u64 },
}

/// Reports import progress. Implementations write to stderr (human or JSON).
pub trait ImportProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the import pipeline.
    fn report(&self, event: ImportProgressEvent);
}

/// Human-friendly progress on stderr: "import job_…  attachments  12 / 1,500".
pub struct StderrProgress;

impl ImportProgressReporter for StderrProgress {
    fn report(&self, event: ImportProgressEvent) {
        let line = match &event {
            ImportProgressEvent::Stage { job_id, status } => {
                format!("import {}  {}\n", job_id, status)
            }
            ImportProgressEvent::Materializing { job_id, n, total } => format!(
                "import {}  attachments  {} / {}\n",
                job_id,
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ImportProgressReporter for JsonProgress {
    fn report(&self, event: ImportProgressEvent) {
        let obj = match &event {
            ImportProgressEvent::Stage { job_id, status } => serde_json::json!({
                "event": "progress",
                "job_id": job_id,
                "phase": "stage",
                "status": status,
            }),
            ImportProgressEvent::Materializing { job_id, n, total } => serde_json::json!({
                "event": "progress",
                "job_id": job_id,
                "phase": "attachments",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ImportProgressReporter for NoProgress {
    fn report(&self, _event: ImportProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ImportProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
