//! Lifecycle events
//!
//! The service reports what it did on a bounded channel so dashboards and
//! chat front-ends can react without polling. Emission never blocks the
//! engine: when the receiver falls behind, events are dropped.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tracing::warn;

/// Events emitted by the seeding service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedingEvent {
    /// Service started
    Started {
        tracked: usize,
    },

    /// A torrent is now tracked
    TrackingStarted {
        id: String,
        name: String,
    },

    /// A torrent was explicitly untracked
    TrackingStopped {
        id: String,
    },

    /// Backend reported completion; seeding budget fixed
    DownloadCompleted {
        id: String,
        download_duration: Duration,
        seeding_stop_time: DateTime<Utc>,
    },

    /// Seeding stopped (budget spent, external pause, or force-stop)
    SeedingStopped {
        id: String,
        forced: bool,
    },

    /// Pausing an overdue torrent failed; retried next tick
    StopFailed {
        id: String,
        error: String,
    },

    /// A reconciliation tick could not fetch live torrents
    ReconcileFailed {
        error: String,
    },

    /// A record whose torrent stayed absent was removed
    RecordPruned {
        id: String,
        missing_ticks: u32,
    },

    /// Service stopped
    Stopped {
        reason: String,
    },
}

/// Non-blocking sender half shared by the engine and the service
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<SeedingEvent>,
}

impl EventSink {
    /// Create a sink and its receiver
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<SeedingEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Emit an event, dropping it if the channel is full or closed
    pub(crate) fn emit(&self, event: SeedingEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "Event channel full, dropping event. Consider increasing event_channel_capacity."
                );
            }
            // Nobody is listening; that is allowed
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (sink, mut rx) = EventSink::channel(1);

        sink.emit(SeedingEvent::Started { tracked: 1 });
        sink.emit(SeedingEvent::Started { tracked: 2 });

        assert_eq!(rx.recv().await, Some(SeedingEvent::Started { tracked: 1 }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_channel_is_ignored() {
        let (sink, rx) = EventSink::channel(4);
        drop(rx);
        sink.emit(SeedingEvent::Stopped {
            reason: "test".to_string(),
        });
    }
}
