//! The server's operation handlers, one component per concern.
//!
//! Components are thin: they own no state beyond shared handles to the
//! store, bus, config and blockstore. Every mutating operation follows
//! the same shape — acquire topic locks, validate under the state
//! mutex, mutate, release, publish.

pub mod account;
pub mod block;
pub mod enrollment;
pub mod export;
pub mod invite;
pub mod organization;
pub mod realm;
pub mod shamir;
pub mod totp;
pub mod user;
pub mod vlob;

use velum_core::ballpark::{
    timestamps_in_the_ballpark, RequireGreaterTimestamp, TimestampOutOfBallpark,
};
use velum_core::time::Timestamp;

/// A client-declared timestamp failed its admission checks.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum TimestampError {
    /// Too far from the server clock.
    #[error("timestamp out of ballpark")]
    OutOfBallpark(TimestampOutOfBallpark),
    /// Not strictly greater than a topic watermark already written.
    #[error("timestamp must be strictly greater than {}", .0.strictly_greater_than)]
    RequireGreater(RequireGreaterTimestamp),
}

/// Admission check for every certificate or vlob write: in the
/// ballpark of `now`, and strictly greater than every watermark the
/// operation's topics carry.
pub(crate) fn check_timestamp(
    timestamp: Timestamp,
    now: Timestamp,
    watermarks: &[Timestamp],
) -> Result<(), TimestampError> {
    timestamps_in_the_ballpark(timestamp, now).map_err(TimestampError::OutOfBallpark)?;
    if let Some(max) = watermarks.iter().copied().max() {
        if timestamp <= max {
            return Err(TimestampError::RequireGreater(RequireGreaterTimestamp {
                strictly_greater_than: max,
            }));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn rejects_watermark_collision_with_the_max_seen() {
        let now = Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap();
        let early = Timestamp::from_rfc3339("2023-12-31T23:59:00Z").unwrap();
        let late = Timestamp::from_rfc3339("2023-12-31T23:59:30Z").unwrap();

        assert!(check_timestamp(now, now, &[early, late]).is_ok());
        assert_matches!(
            check_timestamp(late, now, &[early, late]),
            Err(TimestampError::RequireGreater(RequireGreaterTimestamp {
                strictly_greater_than,
            })) if strictly_greater_than == late
        );
    }

    #[test]
    fn ballpark_is_checked_first() {
        let now = Timestamp::from_rfc3339("2024-01-01T00:00:00Z").unwrap();
        let far_future = now + std::time::Duration::from_secs(3600);
        assert_matches!(
            check_timestamp(far_future, now, &[]),
            Err(TimestampError::OutOfBallpark(_))
        );
    }
}
