//! Error types shared by the parsers, the tailer and the sinks.
//!
//! Per-record failures (`Parse`, `Io` on a detail file) are turned into
//! "skip this record" outcomes inside the tailer. `Range` is recovered by
//! falling back to offset 0. `Config` is fatal by design of the callers.

use std::path::{Path, PathBuf};

/// Convenience alias used throughout the library.
pub type Result<T, E = ModsecError> = std::result::Result<T, E>;

/// Errors raised by the ingestion pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ModsecError {
    /// Malformed index line, transaction envelope or resume record
    #[error("parse error: {0}")]
    Parse(String),

    /// I/O failure on a specific file
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Seek target beyond the end of the file
    #[error("seek position ({requested}) is larger than logfile ({size})")]
    Range { requested: u64, size: u64 },

    /// Unsafe or invalid configuration
    #[error("config error: {0}")]
    Config(String),

    /// Operation attempted after `close()`
    #[error("{0} is closed")]
    Closed(&'static str),

    /// A record could not be handed to the sink
    #[error("sink error: {0}")]
    Sink(String),
}

impl ModsecError {
    /// Wraps an `std::io::Error` together with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse(reason.into())
    }
}
