//! Ingestion of the concurrent audit log.
//!
//! Reads new index lines since the last run, stores every complete
//! transaction in the request log and then, unless told to keep them,
//! deletes the consumed detail files and prunes stale ones.
//!
//! # Usage
//!
//! ```bash
//! # Regular run, e.g. from cron
//! modsecparser ingest
//!
//! # See what would be stored without touching anything
//! modsecparser ingest --dry-run --stats
//!
//! # Re-read the whole index into a JSON lines file, keeping detail files
//! modsecparser ingest --no-resume --keep-tx --format jsonl --output /tmp/requests.jsonl
//! ```
//!
//! The request log is committed before the tailer checkpoints, so a crash
//! at any point leads to transactions being stored twice rather than lost.

use crate::config::Config;
use crate::sink::{FileSink, Sink};
use crate::tailer::{create_tailer, PruneStats, ResumeStore, Tailer, TailerStats};
use crate::utils::format::{format_number, format_percentage};
use crate::utils::progress::ProgressBar;
use anyhow::{Context, Result};
use tracing::{debug, info};

/// What a run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    /// Transactions handed to the sink
    pub written: usize,
    /// Transactions skipped for lacking an id or timestamp
    pub incomplete: usize,
    /// Intermediate and final checkpoints taken
    pub checkpoints: usize,
    /// Rows the sink could not encode
    pub rejected: usize,
    pub tailer: TailerStats,
    /// `None` when pruning did not run
    pub prune: Option<PruneStats>,
    pub dry_run: bool,
}

impl IngestSummary {
    pub fn report(&self) {
        println!("\n{}", "=".repeat(60));
        println!("Ingestion Summary{}", if self.dry_run { " (dry run)" } else { "" });
        println!("{}", "=".repeat(60));
        println!("{:<30} {:>15}", "Index lines read", format_number(self.tailer.lines_read));
        println!(
            "{:<30} {:>15}",
            "Transactions parsed",
            format_number(self.tailer.transactions)
        );
        println!(
            "{:<30} {:>15} {:>10}",
            "Transactions stored",
            format_number(self.written),
            format_percentage(self.written, self.tailer.transactions)
        );
        println!("{:<30} {:>15}", "Incomplete (skipped)", format_number(self.incomplete));
        println!("{:<30} {:>15}", "Rejected by sink", format_number(self.rejected));
        println!(
            "{:<30} {:>15}",
            "Unparsable index lines",
            format_number(self.tailer.unparsable_lines)
        );
        println!(
            "{:<30} {:>15}",
            "Missing detail files",
            format_number(self.tailer.missing_files)
        );
        println!(
            "{:<30} {:>15}",
            "Malformed detail files",
            format_number(self.tailer.malformed_files)
        );
        println!(
            "{:<30} {:>15}",
            "Detail files removed",
            format_number(self.tailer.removed_files)
        );
        println!("{:<30} {:>15}", "Checkpoints", format_number(self.checkpoints));
        if let Some(prune) = &self.prune {
            println!(
                "{:<30} {:>15}",
                "Stale files pruned",
                format_number(prune.files_removed)
            );
            println!(
                "{:<30} {:>15}",
                "Empty directories pruned",
                format_number(prune.dirs_removed)
            );
        }
        println!("{}", "=".repeat(60));
    }
}

/// Runs one ingestion pass with the file sink described by `config`.
pub fn run(config: &Config, show_progress: bool) -> Result<IngestSummary> {
    let rewriter = config.uri_rewriter()?;
    let mut tailer = create_tailer(
        &config.concurrent_auditlog,
        &config.concurrent_auditlogdir,
        ResumeStore::new(&config.state_dir),
        config.resume,
        config.tailer_options(),
    )
    .with_context(|| {
        format!(
            "Failed to open audit log {}",
            config.concurrent_auditlog.display()
        )
    })?;
    let mut sink = FileSink::new(&config.output, config.output_format, rewriter);

    let progress = if show_progress {
        ProgressBar::new_spinner("Ingesting transactions")
    } else {
        ProgressBar::hidden()
    };

    let mut summary = ingest(&mut tailer, &mut sink, config, &progress)?;
    summary.rejected = sink.rejected();
    progress.finish_with_message(&format!(
        "Stored {} transactions",
        format_number(summary.written)
    ));
    Ok(summary)
}

/// Drives `tailer` into `sink` until the index is exhausted.
///
/// With `keep_tx` or `dry_run` no intermediate checkpoint is taken and
/// nothing is pruned. A dry run also skips closing, so the sink discards its
/// staged rows and the resume offset stays where it was.
pub fn ingest<T: Tailer, S: Sink>(
    tailer: &mut T,
    sink: &mut S,
    config: &Config,
    progress: &ProgressBar,
) -> Result<IngestSummary> {
    let commits = config.commits();
    let mut summary = IngestSummary {
        dry_run: config.dry_run,
        ..Default::default()
    };

    while let Some(tx) = tailer.process_next().context("Failed to read transaction")? {
        if !tx.is_complete() {
            info!(
                "Skipping transaction {:?} without id or timestamp",
                tx.transaction_id()
            );
            summary.incomplete += 1;
            continue;
        }

        sink.write(&tx).context("Failed to store transaction")?;
        summary.written += 1;
        progress.inc();

        if commits && config.batch_size > 0 && summary.written % config.batch_size == 0 {
            debug!("Batch of {} transactions done, checkpointing", config.batch_size);
            sink.checkpoint().context("Failed to commit request log")?;
            tailer.checkpoint().context("Failed to checkpoint tailer")?;
            summary.checkpoints += 1;
        }
    }

    if commits {
        sink.checkpoint().context("Failed to commit request log")?;
        tailer.checkpoint().context("Failed to checkpoint tailer")?;
        summary.checkpoints += 1;
        summary.prune = Some(tailer.prune().context("Failed to prune detail directory")?);
    }

    info!("processed {} tx", summary.written);
    summary.tailer = tailer.stats().clone();

    if config.dry_run {
        info!("Dry run, not committing anything");
        return Ok(summary);
    }

    sink.close().context("Failed to close request log")?;
    tailer.close().context("Failed to close tailer")?;
    summary.tailer = tailer.stats().clone();

    Ok(summary)
}
