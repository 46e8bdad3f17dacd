//! Seeding records
//!
//! One [`SeedingRecord`] per tracked torrent. The three completion fields
//! (completion time, download duration, stop time) are set together by
//! [`SeedingRecord::mark_completed`] and live in a single `Option`, so a
//! half-completed record cannot be represented.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::policy;

/// The full record table, keyed by torrent id
pub type RecordMap = HashMap<String, SeedingRecord>;

/// Where a record sits in its lifecycle
///
/// `Downloading -> Seeding -> AutoStopped`. Removal is represented by the
/// record no longer existing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedingPhase {
    /// Backend has not reported completion yet
    Downloading,
    /// Completed, budget set, still allowed to seed
    Seeding,
    /// Paused by the engine or by a force-stop (terminal)
    AutoStopped,
}

/// Completion data, fixed once the backend reports the download finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// When completion was first observed
    pub completed_at: DateTime<Utc>,
    /// `completed_at - download_start_time`, in milliseconds
    pub download_duration_ms: i64,
    /// `completed_at + multiplier * download_duration`
    pub seeding_stop_time: DateTime<Utc>,
}

impl Completion {
    /// How long the download took
    ///
    /// An out-of-range stored value (hand-edited file) reads as zero.
    pub fn download_duration(&self) -> Duration {
        Duration::try_milliseconds(self.download_duration_ms).unwrap_or_default()
    }

    /// Total time this torrent is allowed to seed
    pub fn seeding_budget(&self) -> Duration {
        self.seeding_stop_time - self.completed_at
    }
}

/// Lifecycle record for one tracked torrent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedingRecord {
    /// Torrent info hash
    pub id: String,
    /// Display name
    pub name: String,
    /// When tracking started
    pub download_start_time: DateTime<Utc>,
    /// Set once, when the backend first reports completion
    #[serde(default)]
    pub completion: Option<Completion>,
    /// Seeding was stopped by the engine or a force-stop; never resets
    #[serde(default)]
    pub auto_stopped: bool,
    /// When `auto_stopped` became true
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
    /// Record creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl SeedingRecord {
    /// Create a record for a torrent whose download starts now
    ///
    /// # Visibility
    ///
    /// This is `pub(crate)`: records are created only through the record
    /// store so the one-record-per-id rule holds.
    pub(crate) fn new(id: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            download_start_time: now,
            completion: None,
            auto_stopped: false,
            stopped_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> SeedingPhase {
        if self.auto_stopped {
            SeedingPhase::AutoStopped
        } else if self.completion.is_some() {
            SeedingPhase::Seeding
        } else {
            SeedingPhase::Downloading
        }
    }

    /// Whether completion has been recorded
    pub fn is_completed(&self) -> bool {
        self.completion.is_some()
    }

    /// Completed, not stopped, and past its stop time
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match &self.completion {
            Some(c) => !self.auto_stopped && policy::is_overdue(now, c.seeding_stop_time),
            None => false,
        }
    }

    /// Record completion at `now` and fix the seeding budget
    ///
    /// Returns `false` (and changes nothing) if completion was already set.
    pub(crate) fn mark_completed(&mut self, now: DateTime<Utc>, multiplier: f64) -> bool {
        if self.completion.is_some() {
            return false;
        }

        // A clock step backwards must not yield a negative duration
        let elapsed = (now - self.download_start_time).max(Duration::zero());
        let download_duration = Duration::milliseconds(elapsed.num_milliseconds());

        self.completion = Some(Completion {
            completed_at: now,
            download_duration_ms: download_duration.num_milliseconds(),
            seeding_stop_time: policy::compute_stop_time(now, download_duration, multiplier),
        });
        self.updated_at = now;
        true
    }

    /// Flag seeding as stopped
    ///
    /// Returns `false` if it was already stopped. There is no inverse.
    pub(crate) fn mark_auto_stopped(&mut self, now: DateTime<Utc>) -> bool {
        if self.auto_stopped {
            return false;
        }

        self.auto_stopped = true;
        self.stopped_at = Some(now);
        self.updated_at = now;
        true
    }
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
    fn out_of_range_stored_duration_reads_as_zero() {
        let completion = Completion {
            completed_at: t0(),
            download_duration_ms: i64::MIN,
            seeding_stop_time: t0(),
        };
        assert_eq!(completion.download_duration(), Duration::zero());
    }

    #[test]
    fn new_record_is_downloading() {
        let record = SeedingRecord::new("abc123", "Foo", t0());
        assert_eq!(record.phase(), SeedingPhase::Downloading);
        assert!(!record.is_completed());
        assert!(!record.is_overdue(t0() + Duration::days(365)));
    }

    #[test]
    fn completion_sets_all_fields_once() {
        let mut record = SeedingRecord::new("abc123", "Foo", t0());
        assert!(record.mark_completed(t0() + Duration::minutes(10), 10.0));

        let completion = record.completion.clone().unwrap();
        assert_eq!(completion.download_duration(), Duration::minutes(10));
        assert_eq!(completion.seeding_stop_time, t0() + Duration::minutes(110));
        assert_eq!(completion.seeding_budget(), Duration::minutes(100));
        assert_eq!(record.phase(), SeedingPhase::Seeding);

        // Second completion is ignored
        assert!(!record.mark_completed(t0() + Duration::minutes(50), 10.0));
        assert_eq!(record.completion, Some(completion));
    }

    #[test]
    fn backwards_clock_clamps_duration() {
        let mut record = SeedingRecord::new("abc123", "Foo", t0());
        record.mark_completed(t0() - Duration::minutes(5), 10.0);

        let completion = record.completion.unwrap();
        assert_eq!(completion.download_duration_ms, 0);
        assert_eq!(completion.seeding_stop_time, completion.completed_at);
    }

    #[test]
    fn auto_stop_is_monotonic() {
        let mut record = SeedingRecord::new("abc123", "Foo", t0());
        assert!(record.mark_auto_stopped(t0() + Duration::minutes(1)));
        assert!(!record.mark_auto_stopped(t0() + Duration::minutes(2)));
        assert!(record.auto_stopped);
        assert_eq!(record.stopped_at, Some(t0() + Duration::minutes(1)));
        assert_eq!(record.phase(), SeedingPhase::AutoStopped);
    }

    #[test]
    fn overdue_excludes_stopped_records() {
        let mut record = SeedingRecord::new("abc123", "Foo", t0());
        record.mark_completed(t0() + Duration::minutes(10), 10.0);

        let late = t0() + Duration::minutes(111);
        assert!(record.is_overdue(late));

        record.mark_auto_stopped(late);
        assert!(!record.is_overdue(late));
    }

    #[test]
    fn json_round_trip() {
        let mut record = SeedingRecord::new("abc123", "Foo", t0());
        record.mark_completed(t0() + Duration::minutes(10), 10.0);

        let json = serde_json::to_string(&record).unwrap();
        let back: SeedingRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
