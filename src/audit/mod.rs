//! Parsing of ModSecurity concurrent audit logs.
//!
//! - [`index`] - lines of the index file (`SecAuditLog`)
//! - [`parser`] - multi-section detail files (`SecAuditLogStorageDir`)
//! - [`types`] - the transaction model built from those sections

pub mod index;
pub mod parser;
pub mod types;

pub use index::IndexEntry;
pub use parser::{parse_sections, parse_transaction};
pub use types::{Section, SectionKind, Transaction};
