//! Command implementations behind the `modsecparser` binary.
//!
//! - [`ingest`] - Tail the index file, store transactions, checkpoint and prune
//! - [`prune`] - Only clean stale detail files out of the storage directory
//! - [`inspect`] - Parse a single detail file and dump it as JSON

pub mod ingest;
pub mod inspect;
pub mod prune;
