//! # Chat Harbor CLI (`harbor`)
//!
//! The `harbor` binary imports AI assistant chat exports into a local,
//! deduplicated NDJSON dataset and inspects the result.
//!
//! ## Usage
//!
//! ```bash
//! harbor --config ./config/harbor.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harbor init` | Create the data-root layout and schema marker |
//! | `harbor import <provider> <package>` | Import one export package |
//! | `harbor reindex` | Rebuild indexes from the canonical messages |
//! | `harbor jobs list` | List import jobs and their status |
//! | `harbor jobs show <job_id>` | Print one job record |
//! | `harbor stats` | Row counts, blob store size, jobs by status |
//!
//! ## Examples
//!
//! ```bash
//! # Import a ChatGPT data export
//! harbor import chatgpt ~/Downloads/chatgpt-export.zip
//!
//! # Import a Claude export and keep a copy of the archive
//! harbor import claude ./claude.zip --keep-package
//!
//! # Watch progress as JSON lines on stderr
//! harbor import gemini ./takeout.zip --progress json
//! ```

use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use chat_harbor::config;
use chat_harbor::ingest::{self, ImportRequest};
use chat_harbor::job::{self, JobStatus};
use chat_harbor::layout::DataLayout;
use chat_harbor::lock;
use chat_harbor::migrate;
use chat_harbor::models::Provider;
use chat_harbor::progress::ProgressMode;
use chat_harbor::stats;

/// Chat Harbor, a local-first import and normalization engine for AI
/// assistant chat exports.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/harbor.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "harbor",
    about = "Chat Harbor — import AI assistant chat exports into a local NDJSON dataset",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/harbor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the data-root layout and schema marker.
    ///
    /// This command is idempotent; running it multiple times is safe.
    Init,

    /// Import one export package.
    ///
    /// The package is a directory, a `.zip` archive, or a single
    /// `.json`/`.md` payload file. Re-importing a full export is safe:
    /// records already present are merged, never duplicated.
    Import {
        /// Provider: `chatgpt`, `claude`, `gemini`, or `grok`.
        provider: Provider,

        /// Path to the export package.
        package: PathBuf,

        /// Use this job id instead of a generated one.
        #[arg(long)]
        job_id: Option<String>,

        /// Copy the original package into the raw area of the job.
        #[arg(long)]
        keep_package: bool,

        /// Progress on stderr: `off`, `human`, or `json`.
        /// Defaults to human when stderr is a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Rebuild all indexes from the canonical message set.
    Reindex,

    /// Inspect import jobs.
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Show data-root statistics.
    Stats,
}

/// Job subcommands.
#[derive(Subcommand)]
enum JobsAction {
    /// List jobs, oldest first.
    List,
    /// Print one job record as JSON.
    Show {
        /// Job id.
        job_id: String,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;
    let layout = DataLayout::new(&cfg.data.root);

    match cli.command {
        Commands::Init => {
            let marker = migrate::ensure_layout(&layout)?;
            println!(
                "Data root initialized at {} (schema version {}).",
                layout.root().display(),
                marker.schema_version
            );
        }
        Commands::Import {
            provider,
            package,
            job_id,
            keep_package,
            progress,
        } => {
            let reporter = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            let request = ImportRequest {
                provider,
                package,
                job_id,
                keep_package: keep_package.then_some(true),
            };
            let job = ingest::run_import(&cfg, request, reporter.as_ref()).await?;

            println!("import {} {}", job.provider, job.job_id);
            println!("  status: {}", job.status);
            if let Some(raw) = &job.raw_path {
                println!("  raw: {}", raw);
            }
            for (kind, s) in [
                ("conversations", job.stats.conversations),
                ("messages", job.stats.messages),
                ("attachments", job.stats.attachments),
            ] {
                println!(
                    "  {}: new {}, updated {}, unchanged {}, failed {}",
                    kind, s.new, s.updated, s.unchanged, s.failed
                );
            }
            println!("  warnings: {}", job.warnings.len());
            if job.status == JobStatus::Failed {
                bail!(
                    "import job {} failed: {}",
                    job.job_id,
                    job.errors.join("; ")
                );
            }
            println!("ok");
        }
        Commands::Reindex => {
            let summary = ingest::run_reindex(&cfg).await?;
            println!(
                "reindexed {} messages into {} provider and {} date partitions",
                summary.messages, summary.provider_partitions, summary.date_partitions
            );
        }
        Commands::Jobs { action } => match action {
            JobsAction::List => {
                let lock_held = lock::is_held(&layout.lock_file());
                let jobs = job::list_jobs(&layout)?;
                if jobs.is_empty() {
                    println!("No jobs.");
                }
                for j in jobs {
                    println!(
                        "{:<40} {:<8} {:<34} {}",
                        j.job_id,
                        j.provider,
                        j.display_status(lock_held),
                        j.started_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
            JobsAction::Show { job_id } => {
                let j = job::load_job(&layout, &job_id)?;
                println!("{}", serde_json::to_string_pretty(&j)?);
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
    }

    Ok(())
}
