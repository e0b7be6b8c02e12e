//! # Chat Harbor
//!
//! A local-first import and normalization engine for AI assistant chat
//! exports.
//!
//! Chat Harbor takes the export archives of several providers (ChatGPT,
//! Claude, Gemini, Grok), maps their provider-specific payloads into one
//! canonical schema, and merges every run into a deduplicated NDJSON
//! dataset with content-addressed attachments. Re-importing a full export
//! is safe: records are keyed by deterministic ids and merged field by
//! field, and every record carries the ids of the jobs that produced it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ package  │──▶│ providers  │──▶│ attachments │──▶│ merge/upsert │
//! │ zip/dir  │   │ extractors │   │ blob store  │   │ canonical +  │
//! └──────────┘   └────────────┘   └─────────────┘   │ provider     │
//!                                                   └──────┬───────┘
//!                                                          ▼
//!                                                   ┌──────────────┐
//!                                                   │   indexes    │
//!                                                   └──────────────┘
//! ```
//!
//! The [`ingest`] orchestrator drives each run through the [`job`] state
//! machine and persists the job record after every stage.
//!
//! ## Quick Start
//!
//! ```bash
//! harbor init
//! harbor import chatgpt ./chatgpt-export.zip
//! harbor jobs list
//! harbor stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Canonical record types |
//! | [`ids`] | Deterministic canonical ids |
//! | [`providers`] | Per-provider payload extractors |
//! | [`attachments`] | Content-addressed attachment storage |
//! | [`merge`] | Dedupe/upsert engine |
//! | [`index`] | By-provider and by-date message indexes |
//! | [`job`] | Job records and lifecycle |
//! | [`ingest`] | Import orchestration |
//! | [`store`] | NDJSON persistence |
//! | [`layout`] | Data-root paths |
//! | [`migrate`] | Layout initialization and schema marker |

pub mod attachments;
pub mod config;
pub mod error;
pub mod ids;
pub mod index;
pub mod ingest;
pub mod job;
pub mod layout;
pub mod lock;
pub mod merge;
pub mod migrate;
pub mod models;
pub mod package;
pub mod progress;
pub mod providers;
pub mod stats;
pub mod store;
