use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use std::time::{Duration, SystemTime};

/// Timestamp layout used in index lines and the audit log header section,
/// e.g. `15/Nov/2016:13:59:26 +0100`. Fractional seconds are accepted.
pub const MODSEC_TIMESTAMP_FORMAT: &str = "%d/%b/%Y:%H:%M:%S%.f %z";

/// Parse a ModSecurity timestamp, keeping its UTC offset
pub fn parse_modsec_timestamp(ts: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_str(ts.trim(), MODSEC_TIMESTAMP_FORMAT)
        .with_context(|| format!("Failed to parse timestamp: {}", ts))
}

/// Age of a modification time relative to `now`; times in the future count as zero
pub fn age(modified: SystemTime, now: SystemTime) -> Duration {
    now.duration_since(modified).unwrap_or(Duration::ZERO)
}

/// Format a duration for log output
pub fn duration_human(duration: Duration) -> String {
    let seconds = duration.as_secs();

    if seconds < 60 {
        format!("{} seconds", seconds)
    } else if seconds < 3600 {
        format!("{} minutes", seconds / 60)
    } else if seconds < 86400 {
        format!("{:.1} hours", seconds as f64 / 3600.0)
    } else {
        format!("{:.1} days", seconds as f64 / 86400.0)
    }
}
