//! Seeding policy
//!
//! Pure functions turning a download duration into a seeding budget. The
//! multiplier is validated once in [`crate::SeedingConfig::validate`]; these
//! functions trust it.

use chrono::{DateTime, Duration, Utc};

/// Seeding budget for a download that took `download_duration`
///
/// `multiplier * download_duration`, rounded to the millisecond. Never
/// negative.
pub fn seeding_budget(download_duration: Duration, multiplier: f64) -> Duration {
    let millis = (download_duration.num_milliseconds() as f64 * multiplier)
        .round()
        .clamp(0.0, i64::MAX as f64);
    Duration::milliseconds(millis as i64)
}

/// Absolute instant after which seeding should stop
///
/// Saturates at the latest representable instant instead of overflowing.
pub fn compute_stop_time(
    completed_at: DateTime<Utc>,
    download_duration: Duration,
    multiplier: f64,
) -> DateTime<Utc> {
    completed_at
        .checked_add_signed(seeding_budget(download_duration, multiplier))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whether `now` is strictly past `stop_time`
pub fn is_overdue(now: DateTime<Utc>, stop_time: DateTime<Utc>) -> bool {
    now > stop_time
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-09T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn ten_minutes_times_ten() {
        let completed = t0() + Duration::minutes(10);
        let stop = compute_stop_time(completed, Duration::minutes(10), 10.0);
        assert_eq!(stop, t0() + Duration::minutes(110));
    }

    #[test]
    fn fractional_multiplier() {
        let budget = seeding_budget(Duration::seconds(90), 1.5);
        assert_eq!(budget, Duration::seconds(135));
    }

    #[test]
    fn zero_download_gives_zero_budget() {
        let stop = compute_stop_time(t0(), Duration::zero(), 10.0);
        assert_eq!(stop, t0());
        assert!(!is_overdue(t0(), stop));
        assert!(is_overdue(t0() + Duration::milliseconds(1), stop));
    }

    #[test]
    fn overdue_is_strict() {
        let stop = t0();
        assert!(!is_overdue(stop - Duration::seconds(1), stop));
        assert!(!is_overdue(stop, stop));
        assert!(is_overdue(stop + Duration::seconds(1), stop));
    }

    #[test]
    fn huge_budget_saturates() {
        let stop = compute_stop_time(t0(), Duration::days(365 * 1000), 1e12);
        assert_eq!(stop, DateTime::<Utc>::MAX_UTC);
    }
}
