//! Wall clock collaborator.

use crate::error::ClockError;
use chrono::{DateTime, Utc};

pub trait Clock: Send {
    /// Unix time in milliseconds.
    fn now_ms(&self) -> i64;

    /// One time synchronization attempt (SNTP on hardware).
    fn synchronize(&mut self) -> Result<(), ClockError>;
}

/// Format a Unix millisecond timestamp as `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn format_timestamp(timestamp_ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(timestamp_ms) {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("<invalid time {}>", timestamp_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(1_700_000_000_123), "2023-11-14 22:13:20");
    }
}
