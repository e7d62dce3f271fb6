//! Utility functions and helpers.
//!
//! This module provides common functionality used across commands:
//!
//! - [`logging`] - Tracing subscriber setup
//! - [`progress`] - Progress tracking and display utilities
//! - [`format`] - Number formatting for summaries
//! - [`time`] - ModSecurity timestamp parsing and age helpers
//!
//! # Examples
//!
//! ## Parsing timestamps
//!
//! ```no_run
//! use modsec_audit_tools::utils::time::parse_modsec_timestamp;
//!
//! let timestamp = parse_modsec_timestamp("15/Nov/2016:13:59:26 +0100").unwrap();
//! println!("Parsed: {}", timestamp);
//! ```

pub mod format;
pub mod logging;
pub mod progress;
pub mod time;
