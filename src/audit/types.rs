//! Data structures representing ModSecurity audit log transactions.
//!
//! A transaction is made of lettered sections. The letter-to-section mapping
//! follows the ModSecurity 2 data format (`SecAuditLogParts`); the default
//! Apache configuration logs `ABIJDEFHZ`, nginx logs `ABEFHZ`.

use crate::utils::time::parse_modsec_timestamp;
use chrono::{DateTime, FixedOffset};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// `[timestamp] txid source_ip source_port destination_ip destination_port`
static AUDIT_LOG_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\[([^\]]+)\]\s(\S+)\s(\S+)\s(\d+)\s(\S+)\s(\d+)$")
        .unwrap_or_else(|_| unreachable!())
});

static HOST_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Host:[ \t]+(.*)$").unwrap_or_else(|_| unreachable!()));

/// The closed set of sections a transaction may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    AuditLogHeader,
    RequestHeaders,
    RequestBody,
    ReservedD,
    ResponseBody,
    ResponseHeaders,
    ReservedG,
    AuditLogTrailer,
    ReducedMultipartRequestBody,
    UploadedFileInformation,
    MatchedRulesInformation,
    AuditLogFooter,
}

impl SectionKind {
    pub const ALL: [SectionKind; 12] = [
        Self::AuditLogHeader,
        Self::RequestHeaders,
        Self::RequestBody,
        Self::ReservedD,
        Self::ResponseBody,
        Self::ResponseHeaders,
        Self::ReservedG,
        Self::AuditLogTrailer,
        Self::ReducedMultipartRequestBody,
        Self::UploadedFileInformation,
        Self::MatchedRulesInformation,
        Self::AuditLogFooter,
    ];

    /// Maps a section letter to its kind, `None` for letters outside the format.
    pub fn from_letter(letter: char) -> Option<Self> {
        let kind = match letter {
            'A' => Self::AuditLogHeader,
            'B' => Self::RequestHeaders,
            'C' => Self::RequestBody,
            'D' => Self::ReservedD,
            'E' => Self::ResponseBody,
            'F' => Self::ResponseHeaders,
            'G' => Self::ReservedG,
            'H' => Self::AuditLogTrailer,
            'I' => Self::ReducedMultipartRequestBody,
            'J' => Self::UploadedFileInformation,
            'K' => Self::MatchedRulesInformation,
            'Z' => Self::AuditLogFooter,
            _ => return None,
        };
        Some(kind)
    }

    pub fn letter(self) -> char {
        match self {
            Self::AuditLogHeader => 'A',
            Self::RequestHeaders => 'B',
            Self::RequestBody => 'C',
            Self::ReservedD => 'D',
            Self::ResponseBody => 'E',
            Self::ResponseHeaders => 'F',
            Self::ReservedG => 'G',
            Self::AuditLogTrailer => 'H',
            Self::ReducedMultipartRequestBody => 'I',
            Self::UploadedFileInformation => 'J',
            Self::MatchedRulesInformation => 'K',
            Self::AuditLogFooter => 'Z',
        }
    }
}

/// One lettered part of a transaction with its raw content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    pub content: String,
}

impl Section {
    pub fn new(kind: SectionKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }
}

/// A transaction reconstructed from one detail file.
///
/// Derived fields are only populated when the section they come from is
/// present. The response code is not read from the detail file at all: some
/// server integrations do not log it there, so it is supplied by whoever
/// builds the transaction (the tailer passes the index line's value).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Transaction {
    sections: BTreeMap<SectionKind, String>,
    timestamp: Option<DateTime<FixedOffset>>,
    transaction_id: Option<String>,
    source_ip: Option<String>,
    source_port: Option<u16>,
    destination_ip: Option<String>,
    destination_port: Option<u16>,
    request_method: Option<String>,
    request_uri: Option<String>,
    request_host: Option<String>,
    response_code: Option<u16>,
}

impl Transaction {
    /// Assembles a transaction from parsed sections.
    ///
    /// A section appearing twice keeps its last content.
    pub fn build(sections: impl IntoIterator<Item = Section>, response_code: Option<u16>) -> Self {
        let mut tx = Transaction {
            response_code,
            ..Default::default()
        };

        for section in sections {
            tx.sections.insert(section.kind, section.content);
        }

        if let Some(header) = tx.sections.get(&SectionKind::AuditLogHeader) {
            if let Some(caps) = AUDIT_LOG_HEADER_RE.captures(header) {
                match parse_modsec_timestamp(&caps[1]) {
                    Ok(ts) => tx.timestamp = Some(ts),
                    Err(e) => debug!("Unparsable audit log header timestamp {:?}: {}", &caps[1], e),
                }
                tx.transaction_id = Some(caps[2].to_string());
                tx.source_ip = Some(caps[3].to_string());
                tx.source_port = caps[4].parse().ok();
                tx.destination_ip = Some(caps[5].to_string());
                tx.destination_port = caps[6].parse().ok();
            }
        }

        if let Some(headers) = tx.sections.get(&SectionKind::RequestHeaders) {
            let mut request_line = headers.lines().next().unwrap_or("").split_whitespace();
            tx.request_method = request_line.next().map(str::to_string);
            tx.request_uri = request_line.next().map(str::to_string);
            tx.request_host = HOST_HEADER_RE
                .captures(headers)
                .map(|caps| caps[1].trim_end_matches('\r').to_string());
        }

        tx
    }

    /// Whether the transaction carries what downstream storage needs.
    pub fn is_complete(&self) -> bool {
        self.transaction_id.is_some() && self.timestamp.is_some()
    }

    pub fn section(&self, kind: SectionKind) -> Option<&str> {
        self.sections.get(&kind).map(String::as_str)
    }

    pub fn has_section(&self, kind: SectionKind) -> bool {
        self.sections.contains_key(&kind)
    }

    /// Letters of the logged sections, in format order.
    pub fn section_letters(&self) -> String {
        self.sections.keys().map(|k| k.letter()).collect()
    }

    pub fn audit_log_header(&self) -> Option<&str> {
        self.section(SectionKind::AuditLogHeader)
    }

    pub fn request_headers(&self) -> Option<&str> {
        self.section(SectionKind::RequestHeaders)
    }

    pub fn request_body(&self) -> Option<&str> {
        self.section(SectionKind::RequestBody)
    }

    pub fn response_headers(&self) -> Option<&str> {
        self.section(SectionKind::ResponseHeaders)
    }

    pub fn response_body(&self) -> Option<&str> {
        self.section(SectionKind::ResponseBody)
    }

    pub fn matched_rules(&self) -> Option<&str> {
        self.section(SectionKind::MatchedRulesInformation)
    }

    pub fn timestamp(&self) -> Option<DateTime<FixedOffset>> {
        self.timestamp
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn source_ip(&self) -> Option<&str> {
        self.source_ip.as_deref()
    }

    pub fn source_port(&self) -> Option<u16> {
        self.source_port
    }

    pub fn destination_ip(&self) -> Option<&str> {
        self.destination_ip.as_deref()
    }

    pub fn destination_port(&self) -> Option<u16> {
        self.destination_port
    }

    pub fn request_method(&self) -> Option<&str> {
        self.request_method.as_deref()
    }

    pub fn request_uri(&self) -> Option<&str> {
        self.request_uri.as_deref()
    }

    pub fn request_host(&self) -> Option<&str> {
        self.request_host.as_deref()
    }

    pub fn response_code(&self) -> Option<u16> {
        self.response_code
    }
}
