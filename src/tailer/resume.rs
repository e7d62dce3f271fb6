//! Durable `(file identity, offset)` records so a restarted run continues
//! where the last checkpoint left off.
//!
//! One record per index file, stored under the state directory in a file
//! named after the index file's path with separators replaced by `_`. The
//! record is a single line: `"<identity> <offset>"`.

use super::logfile::file_identity;
use crate::error::{ModsecError, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_STATE_DIR: &str = "/var/lib/modsecparser";

/// Position in an index file as persisted by a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeState {
    pub identity: u64,
    pub offset: u64,
}

impl ResumeState {
    /// Parses the first line of a resume record.
    pub fn parse(content: &str) -> Result<Self> {
        let line = content.lines().next().unwrap_or("");
        let mut fields = line.split_whitespace().map(str::parse::<u64>);

        match (fields.next(), fields.next()) {
            (Some(Ok(identity)), Some(Ok(offset))) => Ok(Self { identity, offset }),
            _ => Err(ModsecError::parse(format!(
                "invalid resume record {:?}, expected \"<identity> <offset>\"",
                line
            ))),
        }
    }
}

impl fmt::Display for ResumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.identity, self.offset)
    }
}

/// Location of resume records.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    state_dir: PathBuf,
}

impl Default for ResumeStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_DIR)
    }
}

impl ResumeStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Path of the record belonging to `log_path`.
    pub fn record_path(&self, log_path: &Path) -> PathBuf {
        let name = log_path.to_string_lossy().replace(['/', '\\'], "_");
        self.state_dir.join(name)
    }

    /// Loads the stored record as is, `None` when there is none yet.
    pub fn load(&self, log_path: &Path) -> Result<Option<ResumeState>> {
        let record = self.record_path(log_path);
        match fs::read_to_string(&record) {
            Ok(content) => ResumeState::parse(&content).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ModsecError::io(record, e)),
        }
    }

    /// Offset to resume `log_path` from.
    ///
    /// The stored offset is only trusted while the index file still has the
    /// recorded identity and is at least that long; otherwise reading
    /// restarts at 0. A damaged record also means 0.
    pub fn read(&self, log_path: &Path) -> Result<u64> {
        debug!("Reading resume file for {}", log_path.display());

        let state = match self.load(log_path) {
            Ok(Some(state)) => state,
            Ok(None) => return Ok(0),
            Err(ModsecError::Parse(reason)) => {
                warn!("Ignoring resume file for {}: {}", log_path.display(), reason);
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let meta = fs::metadata(log_path).map_err(|e| ModsecError::io(log_path, e))?;
        let identity = file_identity(&meta);
        debug!(
            "Resume file states identity: {}, offset: {}, logfile has identity {}, size: {}",
            state.identity,
            state.offset,
            identity,
            meta.len()
        );

        if state.identity != identity {
            warn!("Identity of log file doesn't match, dropping offset");
            return Ok(0);
        }

        if meta.len() < state.offset {
            warn!("Log file is smaller than offset, dropping offset");
            return Ok(0);
        }

        Ok(state.offset)
    }

    /// Replaces the record for `log_path`.
    pub fn write(&self, log_path: &Path, identity: u64, offset: u64) -> Result<()> {
        let record = self.record_path(log_path);
        let state = ResumeState { identity, offset };
        debug!("Writing resume file {}, state: {}", record.display(), state);

        fs::create_dir_all(&self.state_dir).map_err(|e| ModsecError::io(&self.state_dir, e))?;
        fs::write(&record, state.to_string()).map_err(|e| ModsecError::io(&record, e))
    }
}
