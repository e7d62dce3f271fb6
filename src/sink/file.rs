//! Append-only request log on disk.
//!
//! Rows are staged in memory and appended in one go at checkpoint, followed
//! by an fsync. Rows still staged when the sink is dropped without a
//! checkpoint are discarded, which is what a dry run relies on.

use super::{RequestRecord, Sink, UriRewriter};
use crate::audit::Transaction;
use crate::error::{ModsecError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// On-disk layout of the request log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Comma separated, header row written when the file is created
    #[default]
    Csv,
    /// One JSON object per line
    Jsonl,
}

pub struct FileSink {
    path: PathBuf,
    format: OutputFormat,
    rewriter: UriRewriter,
    staged: Vec<RequestRecord>,
    committed: usize,
    rejected: usize,
    closed: bool,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, format: OutputFormat, rewriter: UriRewriter) -> Self {
        Self {
            path: path.into(),
            format,
            rewriter,
            staged: Vec::new(),
            committed: 0,
            rejected: 0,
            closed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows waiting for the next checkpoint.
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    /// Rows made durable so far.
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// Rows dropped because they could not be encoded.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    fn encode_staged(&mut self, with_header: bool) -> Result<(Vec<u8>, usize)> {
        let records = std::mem::take(&mut self.staged);
        let mut encoded = 0;

        let buf = match self.format {
            OutputFormat::Csv => {
                let mut wtr = csv::WriterBuilder::new()
                    .has_headers(with_header)
                    .from_writer(Vec::new());
                for record in &records {
                    match wtr.serialize(record) {
                        Ok(()) => encoded += 1,
                        Err(e) => {
                            warn!("Error while writing {:?}: {}, skipping transaction", record.transaction_id, e);
                            self.rejected += 1;
                        }
                    }
                }
                wtr.into_inner()
                    .map_err(|e| ModsecError::Sink(e.to_string()))?
            }
            OutputFormat::Jsonl => {
                let mut buf = Vec::new();
                for record in &records {
                    match serde_json::to_string(record) {
                        Ok(line) => {
                            buf.extend_from_slice(line.as_bytes());
                            buf.push(b'\n');
                            encoded += 1;
                        }
                        Err(e) => {
                            warn!("Error while writing {:?}: {}, skipping transaction", record.transaction_id, e);
                            self.rejected += 1;
                        }
                    }
                }
                buf
            }
        };

        Ok((buf, encoded))
    }
}

impl Sink for FileSink {
    fn write(&mut self, tx: &Transaction) -> Result<()> {
        if self.closed {
            return Err(ModsecError::Closed("sink"));
        }
        self.staged
            .push(RequestRecord::from_transaction(tx, &self.rewriter));
        Ok(())
    }

    fn checkpoint(&mut self) -> Result<()> {
        if self.closed {
            return Err(ModsecError::Closed("sink"));
        }
        if self.staged.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ModsecError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ModsecError::io(&self.path, e))?;
        let is_new = file
            .metadata()
            .map_err(|e| ModsecError::io(&self.path, e))?
            .len()
            == 0;

        let (buf, encoded) = self.encode_staged(is_new)?;
        debug!("Committing {} rows to {}", encoded, self.path.display());

        file.write_all(&buf)
            .and_then(|()| file.sync_all())
            .map_err(|e| ModsecError::io(&self.path, e))?;
        self.committed += encoded;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.checkpoint()?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            debug!(
                "Discarding {} uncommitted rows for {}",
                self.staged.len(),
                self.path.display()
            );
        }
    }
}
