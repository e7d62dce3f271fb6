//! Destinations for parsed transactions.
//!
//! A sink stages what it is given and only makes it durable on
//! [`Sink::checkpoint`]. The run loop checkpoints the sink before the
//! tailer so detail files are never deleted (and the index offset never
//! advanced) ahead of what was actually stored.
//!
//! - [`file`] - CSV / JSON lines request log

pub mod file;

pub use file::{FileSink, OutputFormat};

use crate::audit::Transaction;
use crate::error::{ModsecError, Result};
use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

/// Request URIs are cut to this many characters before storage.
pub const MAX_URI_LENGTH: usize = 2048;

/// Storage for transactions.
pub trait Sink {
    /// Stages one transaction. A record the sink cannot store is logged and
    /// dropped at checkpoint; it does not poison the rest of the batch.
    fn write(&mut self, tx: &Transaction) -> Result<()>;

    /// Durably commits everything written since the last checkpoint.
    fn checkpoint(&mut self) -> Result<()>;

    /// Checkpoints and releases the destination.
    fn close(&mut self) -> Result<()>;
}

/// Ordered URI rewrite rules, e.g. to collapse session ids out of paths.
#[derive(Debug, Clone, Default)]
pub struct UriRewriter {
    rules: Vec<(Regex, String)>,
}

impl UriRewriter {
    /// Compiles `(pattern, replacement)` pairs; replacements may use `$1` style groups.
    pub fn new(rules: &[(String, String)]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|(pattern, replacement)| {
                Regex::new(pattern)
                    .map(|re| (re, replacement.clone()))
                    .map_err(|e| {
                        ModsecError::Config(format!("invalid uri_rewrite regex {:?}: {}", pattern, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Applies the first matching rule to every match in `uri`, then truncates
    /// the result to [`MAX_URI_LENGTH`] characters.
    pub fn transform(&self, uri: &str) -> String {
        let mut transformed = uri.to_string();

        for (search, replace) in &self.rules {
            if search.is_match(uri) {
                transformed = search.replace_all(uri, replace.as_str()).into_owned();
                debug!("Rewrote URI '{}' to '{}' ({})", uri, transformed, search);
                break;
            }
        }

        match transformed.char_indices().nth(MAX_URI_LENGTH) {
            Some((cut, _)) => transformed[..cut].to_string(),
            None => transformed,
        }
    }
}

/// The stored projection of a transaction, one row of the request log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestRecord {
    pub transaction_id: Option<String>,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub request_host: Option<String>,
    pub request_method: Option<String>,
    pub request_uri: Option<String>,
    pub response_code: Option<u16>,
    pub source_ip: Option<String>,
    pub source_port: Option<u16>,
    pub destination_ip: Option<String>,
    pub destination_port: Option<u16>,
    pub request_headers: Option<String>,
    pub request_body: Option<String>,
    pub response_headers: Option<String>,
    pub response_body: Option<String>,
}

impl RequestRecord {
    pub fn from_transaction(tx: &Transaction, rewriter: &UriRewriter) -> Self {
        let owned = |s: Option<&str>| s.map(str::to_string);
        Self {
            transaction_id: owned(tx.transaction_id()),
            timestamp: tx.timestamp(),
            request_host: owned(tx.request_host()),
            request_method: owned(tx.request_method()),
            request_uri: tx.request_uri().map(|uri| rewriter.transform(uri)),
            response_code: tx.response_code(),
            source_ip: owned(tx.source_ip()),
            source_port: tx.source_port(),
            destination_ip: owned(tx.destination_ip()),
            destination_port: tx.destination_port(),
            request_headers: owned(tx.request_headers()),
            request_body: owned(tx.request_body()),
            response_headers: owned(tx.response_headers()),
            response_body: owned(tx.response_body()),
        }
    }
}

/// Keeps committed records in memory; used by tests and embedders.
#[derive(Debug, Default)]
pub struct MemorySink {
    rewriter: UriRewriter,
    staged: Vec<RequestRecord>,
    committed: Vec<RequestRecord>,
    closed: bool,
}

impl MemorySink {
    pub fn new(rewriter: UriRewriter) -> Self {
        Self {
            rewriter,
            ..Default::default()
        }
    }

    pub fn staged(&self) -> &[RequestRecord] {
        &self.staged
    }

    pub fn committed(&self) -> &[RequestRecord] {
        &self.committed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Sink for MemorySink {
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
        self.committed.append(&mut self.staged);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.checkpoint()?;
            self.closed = true;
        }
        Ok(())
    }
}
