//! Tailing of audit logs with crash-safe resume.
//!
//! A tailer reads the index file from the last checkpointed offset, turns each
//! index line into a [`Transaction`] and remembers which detail files it
//! consumed. Nothing is deleted and no offset is persisted before
//! [`Tailer::checkpoint`], which callers run only after the sink committed
//! the transactions handed out so far. A crash in between means the same
//! transactions are read again on the next run (at-least-once).
//!
//! - [`concurrent`] - the concurrent format (index file + one file per transaction)
//! - [`logfile`] - seekable index file handle
//! - [`resume`] - persisted offsets
//! - [`prune`] - cleanup of stale detail files

pub mod concurrent;
pub mod logfile;
pub mod prune;
pub mod resume;

pub use concurrent::ConcurrentTailer;
pub use logfile::LogFile;
pub use prune::PruneStats;
pub use resume::ResumeStore;

use crate::audit::Transaction;
use crate::error::{ModsecError, Result};
use std::path::Path;
use tracing::warn;

/// Behaviour switches of a tailer.
#[derive(Debug, Clone)]
pub struct TailerOptions {
    /// Delete consumed detail files at checkpoint
    pub remove_parsed_tx: bool,
    /// Allow [`Tailer::prune`] to delete anything
    pub prune_old_tx: bool,
    /// Treat a malformed detail file as fatal instead of skipping it
    pub strict: bool,
}

impl Default for TailerOptions {
    fn default() -> Self {
        Self {
            remove_parsed_tx: true,
            prune_old_tx: true,
            strict: false,
        }
    }
}

/// Counters kept over the lifetime of a tailer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TailerStats {
    /// Index lines read
    pub lines_read: usize,
    /// Transactions handed out
    pub transactions: usize,
    /// Index lines that did not match the format
    pub unparsable_lines: usize,
    /// Detail files that were missing or unreadable
    pub missing_files: usize,
    /// Detail files with a broken envelope
    pub malformed_files: usize,
    /// Detail files deleted at checkpoint
    pub removed_files: usize,
}

/// Common interface of audit log tailers.
pub trait Tailer {
    /// Next transaction in index order, `None` once the index is exhausted.
    ///
    /// Unparsable lines and missing detail files are logged and skipped.
    fn process_next(&mut self) -> Result<Option<Transaction>>;

    /// Deletes consumed detail files and persists the current offset.
    fn checkpoint(&mut self) -> Result<()>;

    /// Removes stale files from the detail directory.
    fn prune(&mut self) -> Result<PruneStats>;

    /// Checkpoints and releases the index file.
    fn close(&mut self) -> Result<()>;

    fn stats(&self) -> &TailerStats;
}

/// Opens the index file at `log_path` and builds a concurrent tailer on it.
///
/// With `resume`, reading continues at the offset stored in `resume_store`
/// when it is still valid for the file, otherwise at 0.
pub fn create_tailer(
    log_path: &Path,
    tx_log_dir: &Path,
    resume_store: ResumeStore,
    resume: bool,
    options: TailerOptions,
) -> Result<ConcurrentTailer> {
    let seek = if resume {
        Some(resume_store.read(log_path)?)
    } else {
        None
    };

    let logfile = match LogFile::open(log_path, seek) {
        Err(ModsecError::Range { requested, size }) => {
            warn!(
                "Resume offset {} is beyond the end of {} ({} bytes), starting over",
                requested,
                log_path.display(),
                size
            );
            LogFile::open(log_path, None)?
        }
        other => other?,
    };

    Ok(ConcurrentTailer::new(
        logfile,
        tx_log_dir,
        resume_store,
        options,
    ))
}
