//! Removal of stale detail files and empty directories from the audit log
//! storage directory.
//!
//! Detail files are normally deleted at checkpoint once they were stored.
//! Pruning catches the ones that never made it into the index (or whose
//! index line could not be parsed) and the date/time directories the server
//! leaves behind.

use crate::error::{ModsecError, Result};
use crate::utils::time::{age, duration_human};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Component, Path};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Detail files older than this are removed.
pub const MAX_TX_PRUNE_AGE: Duration = Duration::from_secs(24 * 3600);

/// Empty directories older than this are removed. Kept short, but long
/// enough not to race the server writing into a directory it just created.
pub const MAX_EMPTY_TXDIR_PRUNE_AGE: Duration = Duration::from_secs(10 * 60);

/// `YYYYMMDD-HHMMSS-<unique id>`
static TX_FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{8}-[0-9]{6}-[[:ascii:]]{24}$").unwrap_or_else(|_| unreachable!())
});

/// Outcome of one prune pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneStats {
    pub files_removed: usize,
    pub dirs_removed: usize,
    /// Entries that could not be inspected or removed
    pub failures: usize,
}

/// Whether `name` looks like a detail file written by the server.
pub fn is_tx_file_name(name: &str) -> bool {
    TX_FILE_RE.is_match(name)
}

/// Refuses directories whose pruning would amount to wiping the filesystem.
pub fn check_prune_target(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty()
        || (dir.has_root() && dir.parent().is_none())
        || dir.components().any(|c| c == Component::ParentDir)
    {
        error!(
            "txlogdir {:?} looks strange, not going to prune",
            dir.display().to_string()
        );
        return Err(ModsecError::Config(format!(
            "refusing to prune unsafe txlogdir {:?}",
            dir.display().to_string()
        )));
    }
    Ok(())
}

/// Walks `dir` bottom-up and removes stale detail files and empty directories.
///
/// Ages are measured against `now`. With `dry_run` nothing is deleted, the
/// stats count what would have been. Per-entry failures are logged and
/// counted; the server may remove or create entries while we walk.
pub fn prune_tx_dir(dir: &Path, now: SystemTime, dry_run: bool) -> Result<PruneStats> {
    check_prune_target(dir)?;

    let mut stats = PruneStats::default();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .contents_first(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry during prune: {}", e);
                stats.failures += 1;
                continue;
            }
        };
        let path = entry.path();

        let modified = match entry.metadata().map(|m| m.modified()) {
            Ok(Ok(modified)) => modified,
            Ok(Err(e)) => {
                warn!("Can't read mtime of {}: {}", path.display(), e);
                stats.failures += 1;
                continue;
            }
            Err(e) => {
                warn!("Can't stat {}: {}", path.display(), e);
                stats.failures += 1;
                continue;
            }
        };
        let entry_age = age(modified, now);

        if entry.file_type().is_file() {
            let name = entry.file_name().to_string_lossy();
            if entry_age > MAX_TX_PRUNE_AGE && is_tx_file_name(&name) {
                info!(
                    "Pruning stale TX file {} ({} old)",
                    path.display(),
                    duration_human(entry_age)
                );
                if dry_run {
                    stats.files_removed += 1;
                } else {
                    match fs::remove_file(path) {
                        Ok(()) => stats.files_removed += 1,
                        Err(e) => {
                            warn!("Failed to prune {}: {}", path.display(), e);
                            stats.failures += 1;
                        }
                    }
                }
            }
        } else if entry.file_type().is_dir() && entry_age > MAX_EMPTY_TXDIR_PRUNE_AGE {
            let empty = match fs::read_dir(path) {
                Ok(mut entries) => entries.next().is_none(),
                Err(e) => {
                    warn!("Can't list {}: {}", path.display(), e);
                    stats.failures += 1;
                    continue;
                }
            };
            if empty {
                debug!("Pruning empty directory {}", path.display());
                if dry_run {
                    stats.dirs_removed += 1;
                } else {
                    match fs::remove_dir(path) {
                        Ok(()) => stats.dirs_removed += 1,
                        Err(e) => {
                            warn!("Failed to prune {}: {}", path.display(), e);
                            stats.failures += 1;
                        }
                    }
                }
            }
        }
    }

    Ok(stats)
}
