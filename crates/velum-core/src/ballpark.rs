//! Clock drift tolerance ("timestamps in the ballpark").
//!
//! A client declares the timestamp of every certificate and vlob it
//! produces. The server accepts it only when it falls inside a window
//! around its own clock: at most [`BALLPARK_CLIENT_EARLY_OFFSET`]
//! seconds in the future and [`BALLPARK_CLIENT_LATE_OFFSET`] seconds
//! in the past. The failure value carries both clocks and both
//! offsets so the client can self-correct.

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// Tolerated client clock advance, in seconds.
pub const BALLPARK_CLIENT_EARLY_OFFSET: f64 = 300.0;

/// Tolerated client clock lag, in seconds.
pub const BALLPARK_CLIENT_LATE_OFFSET: f64 = 320.0;

/// Outcome of a failed ballpark check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimestampOutOfBallpark {
    /// The server clock at check time.
    pub server_timestamp: Timestamp,
    /// The timestamp the client declared.
    pub client_timestamp: Timestamp,
    /// Tolerated advance, seconds.
    pub ballpark_client_early_offset: f64,
    /// Tolerated lag, seconds.
    pub ballpark_client_late_offset: f64,
}

/// Signal that a certificate-producing operation must be retried with
/// a timestamp strictly greater than the one carried here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequireGreaterTimestamp {
    /// Lower bound (exclusive) for the retry timestamp.
    pub strictly_greater_than: Timestamp,
}

/// Check a client-declared timestamp against the server clock.
///
/// Boundary values are accepted; one microsecond beyond either offset
/// is rejected.
pub fn timestamps_in_the_ballpark(
    client: Timestamp,
    now: Timestamp,
) -> Result<(), TimestampOutOfBallpark> {
    let early_us = (BALLPARK_CLIENT_EARLY_OFFSET * 1e6) as i64;
    let late_us = (BALLPARK_CLIENT_LATE_OFFSET * 1e6) as i64;
    let drift_us = client.us_since(now);
    if drift_us > early_us || -drift_us > late_us {
        Err(TimestampOutOfBallpark {
            server_timestamp: now,
            client_timestamp: client,
            ballpark_client_early_offset: BALLPARK_CLIENT_EARLY_OFFSET,
            ballpark_client_late_offset: BALLPARK_CLIENT_LATE_OFFSET,
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn boundary_is_accepted_one_microsecond_beyond_is_not() {
        let now = Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap();

        let at_early_bound = now + Duration::from_secs_f64(BALLPARK_CLIENT_EARLY_OFFSET);
        assert!(timestamps_in_the_ballpark(at_early_bound, now).is_ok());
        assert!(timestamps_in_the_ballpark(at_early_bound + Duration::from_micros(1), now).is_err());

        let at_late_bound = now - Duration::from_secs_f64(BALLPARK_CLIENT_LATE_OFFSET);
        assert!(timestamps_in_the_ballpark(at_late_bound, now).is_ok());
        assert!(timestamps_in_the_ballpark(at_late_bound - Duration::from_micros(1), now).is_err());
    }

    #[test]
    fn failure_carries_both_clocks() {
        let now = Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap();
        let client = now + Duration::from_secs(3600);
        let err = timestamps_in_the_ballpark(client, now).unwrap_err();
        assert_eq!(err.server_timestamp, now);
        assert_eq!(err.client_timestamp, client);
        assert_eq!(err.ballpark_client_early_offset, BALLPARK_CLIENT_EARLY_OFFSET);
        assert_eq!(err.ballpark_client_late_offset, BALLPARK_CLIENT_LATE_OFFSET);
    }

    proptest! {
        #[test]
        fn accepted_iff_within_window(drift_us in -400_000_000i64..400_000_000i64) {
            let now = Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap();
            let client = Timestamp::from_us(now.as_us() + drift_us);
            let accepted = timestamps_in_the_ballpark(client, now).is_ok();
            let expected = drift_us <= (BALLPARK_CLIENT_EARLY_OFFSET * 1e6) as i64
                && -drift_us <= (BALLPARK_CLIENT_LATE_OFFSET * 1e6) as i64;
            prop_assert_eq!(accepted, expected);
        }
    }
}
