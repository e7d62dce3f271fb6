//! Parser for lines of the concurrent audit log index file.
//!
//! Each flushed request appends one line to the index file (`SecAuditLog`)
//! pointing at the detail file holding the full transaction:
//!
//! ```text
//! host remote_ip remote_user ident [timestamp] "request" status size "referer" "user-agent" txid "session" file offset size checksum [L]
//! ```
//!
//! The nginx connector leaves `host` and `ident` out. Only `request` may
//! contain backslash-escaped quotes; quoted fields are kept verbatim.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static CONCURRENT_LOG_ENTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?x)
        ^
        (?P<request_host>\S+)?             # absent on nginx
        \s
        (?P<remote_ip>\S+)
        \s
        (?P<remote_user>\S+)
        \s+
        (?:
            (?P<ident>[^\[]+)              # absent on nginx
            \s
        )?
        \[(?P<timestamp>[^\]]+)\]
        \s
        "(?P<request>(?:[^"\\]|\\.)+)"
        \s
        (?P<response_code>\d+)
        \s
        (?P<response_body_size>\d+)
        \s
        "(?P<referer>[^"]+)"
        \s
        "(?P<user_agent>[^"]+)"
        \s
        (?P<transaction_id>\S+)
        \s
        "(?P<session_id>[^"]+)"
        \s
        (?P<transaction_file>\S+)
        \s
        (?P<transaction_file_offset>\d+)
        \s
        (?P<transaction_size>\d+)
        \s
        (?P<transaction_checksum>\S+)
        \s*
        (?P<reduced>L)?
        $
        "#,
    )
    .unwrap_or_else(|_| unreachable!())
});

/// One parsed index line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    /// Empty when the producer does not log it
    pub request_host: String,
    pub remote_ip: String,
    pub remote_user: String,
    /// Empty when the producer does not log it
    pub ident: String,
    pub timestamp_raw: String,
    /// Request line as logged, escapes included
    pub request_line: String,
    pub response_code: u16,
    pub response_body_size: u64,
    pub referer: String,
    pub user_agent: String,
    pub transaction_id: String,
    pub session_id: String,
    /// Detail file path relative to the audit log storage directory
    pub transaction_file: String,
    pub transaction_file_offset: u64,
    pub transaction_size: u64,
    pub transaction_checksum: String,
    /// Trailing `L` marker (reduced logging)
    pub reduced: bool,
}

impl IndexEntry {
    /// Parses one index line, returning `None` when it does not match the format.
    ///
    /// A trailing line terminator is ignored.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\n', '\r']);
        let caps = CONCURRENT_LOG_ENTRY_RE.captures(line)?;

        let text = |name: &str| caps.name(name).map_or("", |m| m.as_str()).to_string();

        Some(Self {
            request_host: text("request_host"),
            remote_ip: text("remote_ip"),
            remote_user: text("remote_user"),
            ident: text("ident"),
            timestamp_raw: text("timestamp"),
            request_line: text("request"),
            response_code: caps["response_code"].parse().ok()?,
            response_body_size: caps["response_body_size"].parse().ok()?,
            referer: text("referer"),
            user_agent: text("user_agent"),
            transaction_id: text("transaction_id"),
            session_id: text("session_id"),
            transaction_file: text("transaction_file"),
            transaction_file_offset: caps["transaction_file_offset"].parse().ok()?,
            transaction_size: caps["transaction_size"].parse().ok()?,
            transaction_checksum: text("transaction_checksum"),
            reduced: caps.name("reduced").is_some(),
        })
    }
}
