//! Timestamp type and clock abstraction.
//!
//! Timestamps are Unix epoch seconds (UTC). The ephemeral store keeps
//! deadlines as ISO-8601 strings, so conversions to and from RFC 3339 live
//! here as well.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::InputError;

/// A Unix timestamp in seconds since epoch (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch (time zero).
    pub const EPOCH: Self = Self(0);

    pub fn new(secs: u64) -> Self {
        Self(secs)
    }

    /// Get the current system time as a `Timestamp`.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Seconds elapsed since this timestamp (relative to `now`).
    pub fn elapsed_since(&self, now: Timestamp) -> u64 {
        now.0.saturating_sub(self.0)
    }

    /// Seconds from `now` until this timestamp, zero if already passed.
    pub fn secs_until(&self, now: Timestamp) -> u64 {
        self.0.saturating_sub(now.0)
    }

    /// Whether this timestamp + duration has passed relative to `now`.
    pub fn has_expired(&self, duration_secs: u64, now: Timestamp) -> bool {
        now.0 >= self.0.saturating_add(duration_secs)
    }

    pub fn plus_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    /// Render as an RFC 3339 / ISO-8601 string in UTC with millisecond precision.
    pub fn to_iso8601(&self) -> String {
        let secs = i64::try_from(self.0).unwrap_or(i64::MAX);
        DateTime::<Utc>::from_timestamp(secs, 0)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Parse an RFC 3339 / ISO-8601 string. Sub-second precision is truncated.
    pub fn parse_iso8601(s: &str) -> Result<Self, InputError> {
        let dt = DateTime::parse_from_rfc3339(s.trim())
            .map_err(|e| InputError::InvalidTimestamp(format!("{s:?}: {e}")))?;
        u64::try_from(dt.timestamp())
            .map(Self)
            .map_err(|_| InputError::InvalidTimestamp(format!("{s:?}: before the Unix epoch")))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Source of "now" for everything time-driven (scheduler, cooldowns, snapshots).
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_roundtrip_at_second_precision() {
        let ts = Timestamp::new(1_700_000_000);
        let s = ts.to_iso8601();
        assert_eq!(s, "2023-11-14T22:13:20.000Z");
        assert_eq!(Timestamp::parse_iso8601(&s).unwrap(), ts);
    }

    #[test]
    fn parse_accepts_offsets_and_truncates_millis() {
        let ts = Timestamp::parse_iso8601("2023-11-14T23:13:20.999+01:00").unwrap();
        assert_eq!(ts.as_secs(), 1_700_000_000);
    }

    #[test]
    fn parse_rejects_garbage_and_pre_epoch() {
        assert!(Timestamp::parse_iso8601("tomorrow").is_err());
        assert!(Timestamp::parse_iso8601("1969-12-31T23:59:59Z").is_err());
    }

    #[test]
    fn secs_until_saturates() {
        let deadline = Timestamp::new(100);
        assert_eq!(deadline.secs_until(Timestamp::new(40)), 60);
        assert_eq!(deadline.secs_until(Timestamp::new(140)), 0);
    }
}
