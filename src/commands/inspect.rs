//! Dump one detail file as JSON.
//!
//! ```bash
//! modsecparser inspect /opt/modsecurity/var/audit/20200101/20200101-0000/20200101-000000-XXXXXXXXXXXXXXXXXXXXXXXX
//! ```
//!
//! With `--index-line` the response code of that index line is applied the
//! same way ingestion does it.

use crate::audit::{parse_sections, parse_transaction, IndexEntry, Transaction};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;

/// Reads and parses `path`, optionally taking the response code from `index_line`.
pub fn load_transaction(path: &Path, index_line: Option<&str>) -> Result<Transaction> {
    let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    match index_line {
        None => parse_transaction(&raw).with_context(|| format!("Failed to parse {}", path.display())),
        Some(line) => {
            let entry = IndexEntry::parse(line)
                .ok_or_else(|| anyhow!("Couldn't parse index line: '{}'", line.trim_end()))?;
            let sections = parse_sections(&raw)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(Transaction::build(sections, Some(entry.response_code)))
        }
    }
}

pub fn run(path: &Path, index_line: Option<&str>) -> Result<()> {
    let tx = load_transaction(path, index_line)?;
    let json = serde_json::to_string_pretty(&tx).context("Failed to serialize transaction")?;
    println!("{}", json);

    if !tx.is_complete() {
        eprintln!("Warning: transaction lacks an id or timestamp and would be skipped on ingest");
    }
    Ok(())
}
