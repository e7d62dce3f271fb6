//! # ModSecurity Audit Tools
//!
//! Crash-safe ingestion of ModSecurity audit logs written in the
//! *concurrent* layout: an index file with one line per request, and one
//! detail file per transaction below a storage directory.
//!
//! ## Overview
//!
//! The `modsecparser` binary is meant to run periodically (cron, systemd
//! timer). Each run picks up the index file where the previous one stopped,
//! parses the detail file of every new line, stores the result in a request
//! log and finally deletes what it consumed. The order of operations
//! guarantees at-least-once delivery: detail files are only deleted and the
//! index offset is only advanced after the request log was made durable.
//!
//! ## Architecture
//!
//! - [`audit`] - Index line and transaction grammars, the [`audit::Transaction`] model
//! - [`tailer`] - Seekable index handle, resume records, pruning and the tailer state machine
//! - [`sink`] - Request log destinations
//! - [`config`] - TOML configuration with command-line overrides
//! - [`commands`] - `ingest`, `prune` and `inspect`
//! - [`utils`] - Logging setup, progress display, formatting and time helpers
//! - [`error`] - The library error type
//!
//! ## Example Usage
//!
//! ```bash
//! # Regular ingestion with the settings from /etc/modsecparser.toml
//! modsecparser ingest
//!
//! # Verbose dry run: parse everything, commit and delete nothing
//! modsecparser ingest -n --stats
//!
//! # Look at a single transaction
//! modsecparser inspect /opt/modsecurity/var/audit/20200101/20200101-0000/20200101-000000-XXXXXXXXXXXXXXXXXXXXXXXX
//! ```
//!
//! ## Library use
//!
//! ```no_run
//! use modsec_audit_tools::tailer::{create_tailer, ResumeStore, Tailer, TailerOptions};
//! use std::path::Path;
//!
//! let mut tailer = create_tailer(
//!     Path::new("/var/log/modsec_audit.log"),
//!     Path::new("/opt/modsecurity/var/audit/"),
//!     ResumeStore::default(),
//!     true,
//!     TailerOptions::default(),
//! )?;
//! while let Some(tx) = tailer.process_next()? {
//!     println!("{:?} {:?}", tx.transaction_id(), tx.request_uri());
//! }
//! tailer.close()?;
//! # Ok::<(), modsec_audit_tools::error::ModsecError>(())
//! ```

pub mod audit;
pub mod commands;
pub mod config;
pub mod error;
pub mod sink;
pub mod tailer;
pub mod utils;
