//! UTC timestamps with microsecond resolution.
//!
//! Every ordering decision in the server (topic monotonicity, vlob
//! causality, ballpark checks) is made on these values, so they are
//! truncated to whole microseconds at construction: two timestamps
//! that compare equal serialize identically.

use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A UTC instant, microsecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch, used as the default `last_timestamp` of a topic
    /// that has never been written.
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Build from whole microseconds since the Unix epoch.
    pub fn from_us(us: i64) -> Self {
        Self(us)
    }

    /// Microseconds since the Unix epoch.
    pub fn as_us(&self) -> i64 {
        self.0
    }

    /// Build from a chrono instant, truncating to microseconds.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_micros())
    }

    /// Convert back to a chrono instant.
    pub fn as_datetime(&self) -> DateTime<Utc> {
        // timestamp_micros is always in range for timestamps we produce
        Utc.timestamp_micros(self.0).single().unwrap_or_default()
    }

    /// Parse an RFC 3339 string.
    pub fn from_rfc3339(s: &str) -> Result<Self, chrono::ParseError> {
        Ok(Self::from_datetime(
            DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc),
        ))
    }

    /// RFC 3339 rendering with microsecond precision.
    pub fn to_rfc3339(&self) -> String {
        self.as_datetime()
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
    }

    /// Signed difference `self - other` in microseconds.
    pub fn us_since(&self, other: Timestamp) -> i64 {
        self.0 - other.0
    }

    /// The smallest timestamp strictly greater than `self`.
    pub fn next_us(&self) -> Timestamp {
        Timestamp(self.0 + 1)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 + rhs.as_micros() as i64)
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 - rhs.as_micros() as i64)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_round_trip() {
        let t = Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-01-01T00:00:00.000000Z");
        assert_eq!(Timestamp::from_rfc3339(&t.to_rfc3339()).unwrap(), t);
    }

    #[test]
    fn microsecond_arithmetic() {
        let t = Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap();
        let later = t + Duration::from_micros(1);
        assert!(later > t);
        assert_eq!(later.us_since(t), 1);
        assert_eq!(t.next_us(), later);
    }

    #[test]
    fn epoch_is_lowest_practical_bound() {
        assert!(Timestamp::EPOCH < Timestamp::now());
    }
}
