//! # Week Derivation
//!
//! The current learning week is derived from wall-clock time: a fixed
//! epoch plus elapsed whole weeks. The session state machine consumes this
//! as a pure input; it drives rollover and snapshot-validity decisions.

use chrono::{DateTime, TimeZone, Utc};

const SECONDS_PER_WEEK: i64 = 7 * 24 * 60 * 60;

/// Compute the week number for `now` relative to `epoch`
///
/// `ceil((now - epoch) / 7 days)`, clamped to at least 1 so the week is
/// always a positive integer even at (or before) the epoch itself.
pub fn week_number(epoch: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let elapsed = (now - epoch).num_seconds();
    if elapsed <= 0 {
        return 1;
    }
    let weeks = (elapsed + SECONDS_PER_WEEK - 1) / SECONDS_PER_WEEK;
    weeks.max(1) as u32
}

/// Default program epoch: January 1st 2024, UTC
pub fn default_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_week_one_at_epoch() {
        let epoch = default_epoch();
        assert_eq!(week_number(epoch, epoch), 1);
        assert_eq!(week_number(epoch, epoch + Duration::seconds(1)), 1);
        assert_eq!(week_number(epoch, epoch - Duration::days(3)), 1);
    }

    #[test]
    fn test_week_boundary_is_exclusive() {
        let epoch = default_epoch();
        // Exactly 7 days in is still week 1 (ceil); one second later is week 2
        assert_eq!(week_number(epoch, epoch + Duration::days(7)), 1);
        assert_eq!(
            week_number(epoch, epoch + Duration::days(7) + Duration::seconds(1)),
            2
        );
    }

    #[test]
    fn test_week_progression() {
        let epoch = default_epoch();
        assert_eq!(week_number(epoch, epoch + Duration::days(10)), 2);
        assert_eq!(week_number(epoch, epoch + Duration::days(29)), 5);
        assert_eq!(week_number(epoch, epoch + Duration::days(36)), 6);
    }
}
