//! Standalone cleanup of the detail directory.
//!
//! Runs the same pass `ingest` runs at the end, without touching the index
//! file. Useful when ingestion is paused but the server keeps writing.
//!
//! ```bash
//! modsecparser prune --dry-run
//! ```

use crate::tailer::prune::prune_tx_dir;
use crate::tailer::PruneStats;
use crate::utils::format::format_number;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::SystemTime;

pub fn run(tx_log_dir: &Path, dry_run: bool) -> Result<PruneStats> {
    let stats = prune_tx_dir(tx_log_dir, SystemTime::now(), dry_run)
        .with_context(|| format!("Failed to prune {}", tx_log_dir.display()))?;

    let verb = if dry_run { "Would remove" } else { "Removed" };
    eprintln!(
        "{} {} stale TX files and {} empty directories from {} ({} failures)",
        verb,
        format_number(stats.files_removed),
        format_number(stats.dirs_removed),
        tx_log_dir.display(),
        format_number(stats.failures)
    );

    Ok(stats)
}
