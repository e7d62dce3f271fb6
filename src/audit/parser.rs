//! Parser for concurrent audit log detail files.
//!
//! A detail file holds exactly one transaction. Every section starts with a
//! header line `--<boundary>-<LETTER>--` where the boundary is a random token
//! shared by all sections of the transaction:
//!
//! ```text
//! --a1b2c3d4-A--
//! [15/Nov/2016:13:59:26 +0100] WCsGvn8AAQEAAEpNQ28AAAAA 192.168.1.10 52944 10.0.0.5 443
//!
//! --a1b2c3d4-B--
//! GET /index.html HTTP/1.1
//! Host: www.example.com
//!
//! --a1b2c3d4-Z--
//! ```
//!
//! The envelope (first section `A`, last section `Z`, same boundary) is
//! validated before the sections are extracted, so a truncated or
//! concatenated file fails with a precise error.

use super::types::{Section, SectionKind, Transaction};
use crate::error::{ModsecError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static SECTION_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--([a-zA-Z0-9]+)-([A-Z])--").unwrap_or_else(|_| unreachable!()));

/// Parses the raw bytes of a detail file into a transaction.
///
/// The response code is left unset; see [`Transaction::build`].
pub fn parse_transaction(raw: &[u8]) -> Result<Transaction> {
    Ok(Transaction::build(parse_sections(raw)?, None))
}

/// Validates the envelope of a detail file and extracts its sections in file order.
///
/// Invalid UTF-8 is replaced, bodies are not guaranteed to be text.
pub fn parse_sections(raw: &[u8]) -> Result<Vec<Section>> {
    let text = String::from_utf8_lossy(raw);

    let first_line = text.split('\n').next().unwrap_or("");
    let last_line = text.split('\n').rev().find(|l| !l.is_empty()).unwrap_or("");

    let (start_boundary, start_section) = extract_section_header(first_line)
        .ok_or_else(|| ModsecError::parse("Couldn't find header in first line of TX"))?;

    if start_section != 'A' {
        return Err(ModsecError::parse(format!(
            "First section was {}, expected A",
            start_section
        )));
    }

    let (end_boundary, end_section) = extract_section_header(last_line)
        .ok_or_else(|| ModsecError::parse("Couldn't find header in last line of TX"))?;

    if end_section != 'Z' {
        return Err(ModsecError::parse(format!(
            "Last section was {}, expected Z",
            end_section
        )));
    }

    if start_boundary != end_boundary {
        return Err(ModsecError::parse(format!(
            "Boundary mismatch: start {}, end: {}",
            start_boundary, end_boundary
        )));
    }

    let sections = extract_sections(&text, start_boundary);
    if sections.is_empty() {
        return Err(ModsecError::parse("Couldn't find sections"));
    }

    Ok(sections)
}

/// Finds the boundary and section letter of a header token anywhere in `line`.
fn extract_section_header(line: &str) -> Option<(&str, char)> {
    let caps = SECTION_HEADER_RE.captures(line)?;
    let boundary = caps.get(1)?.as_str();
    let letter = caps.get(2)?.as_str().chars().next()?;
    Some((boundary, letter))
}

/// Returns the section letter when `line` is exactly a header for `boundary`.
fn header_letter(line: &str, boundary: &str) -> Option<char> {
    let rest = line.strip_prefix("--")?.strip_prefix(boundary)?.strip_prefix('-')?;
    let mut chars = rest.chars();
    let letter = chars.next()?;
    (letter.is_ascii_uppercase() && chars.as_str() == "--").then_some(letter)
}

/// Splits the transaction on its header lines.
///
/// A header only opens a section when a newline follows it. A header on the
/// unterminated last line still ends the previous section but opens none.
/// Content keeps blank lines and excludes the header lines; lines are joined
/// back with `\n`.
fn extract_sections(text: &str, boundary: &str) -> Vec<Section> {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut sections = Vec::new();
    let mut current: Option<(char, Vec<&str>)> = None;

    for (i, line) in lines.iter().enumerate() {
        let newline_terminated = i + 1 < lines.len();
        if let Some(letter) = header_letter(line, boundary) {
            if let Some((letter, content)) = current.take() {
                push_section(&mut sections, letter, &content);
            }
            if newline_terminated {
                current = Some((letter, Vec::new()));
            }
            continue;
        }
        if let Some((_, content)) = current.as_mut() {
            content.push(line);
        }
    }

    if let Some((letter, content)) = current {
        push_section(&mut sections, letter, &content);
    }

    sections
}

fn push_section(sections: &mut Vec<Section>, letter: char, content: &[&str]) {
    match SectionKind::from_letter(letter) {
        Some(kind) => sections.push(Section::new(kind, content.join("\n"))),
        None => debug!("Ignoring unknown section {}", letter),
    }
}
