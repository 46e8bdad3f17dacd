//! Reconciliation engine
//!
//! The engine is responsible for:
//! - Fetching a snapshot of live torrents from the TorrentProvider
//! - Detecting completed downloads and fixing their seeding budget
//! - Pausing torrents whose budget is spent via the TorrentController
//! - Persisting the record table once per tick when something changed
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     snapshot     ┌──────────────────────┐
//! │ TorrentProvider  │ ───────────────▶ │ ReconciliationEngine │
//! └──────────────────┘                  └──────────────────────┘
//!                                                  │
//!         ┌────────────────────────┬───────────────┴────────┐
//!         ▼                        ▼                        ▼
//! ┌──────────────┐       ┌───────────────────┐       ┌─────────────┐
//! │ RecordStore  │       │ TorrentController │       │   Events    │
//! │ (commit)     │       │ (pause)           │       │  (notify)   │
//! └──────────────┘       └───────────────────┘       └─────────────┘
//! ```
//!
//! ## Tick Flow
//!
//! 1. Fetch live torrents (failure aborts the tick; retried next tick)
//! 2. Snapshot records and plan transitions without holding the lock
//! 3. Pause overdue torrents one at a time; failures stay pending
//! 4. Re-acquire the lock briefly and commit every transition whose record
//!    is unchanged since step 2
//! 5. Save the table once if anything changed

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::events::{EventSink, SeedingEvent};
use crate::record::{RecordMap, SeedingRecord};
use crate::store::RecordStore;
use crate::traits::{Clock, LiveTorrent, TorrentController, TorrentProvider};
use crate::policy;

/// The last live snapshot a tick fetched successfully
#[derive(Debug, Clone)]
pub struct LiveSnapshot {
    /// When the snapshot was fetched
    pub taken_at: DateTime<Utc>,
    /// Live torrents keyed by id
    pub torrents: HashMap<String, LiveTorrent>,
}

/// What one reconciliation tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Torrents in the live snapshot
    pub fetched: usize,
    /// Records examined
    pub checked: usize,
    /// Records that completed this tick
    pub completed: usize,
    /// Records paused by the controller this tick
    pub stopped: usize,
    /// Pause calls that failed (retried next tick)
    pub stop_failures: usize,
    /// Overdue records found already paused by someone else
    pub adopted: usize,
    /// Records removed after staying absent
    pub pruned: usize,
    /// Records whose torrent was absent from the snapshot
    pub missing: usize,
    /// Whether the table was saved at the end of the tick
    pub persisted: bool,
}

impl TickReport {
    /// Number of record transitions committed
    pub fn changes(&self) -> usize {
        self.completed + self.stopped + self.adopted + self.pruned
    }
}

/// Transitions decided from a snapshot, before any I/O
///
/// Each entry keeps the record copy it was planned from. A record that was
/// modified, or untracked and tracked again, while the tick was out on the
/// network no longer matches and is left for the next tick.
#[derive(Debug, Default)]
struct TickPlan {
    complete: Vec<SeedingRecord>,
    pause: Vec<SeedingRecord>,
    adopt: Vec<SeedingRecord>,
    prune: Vec<(SeedingRecord, u32)>,
    missing: usize,
}

/// Engine settings taken from [`crate::SeedingConfig`]
#[derive(Debug, Clone, Copy)]
pub(crate) struct EngineSettings {
    pub time_multiplier: f64,
    pub check_interval: Duration,
    pub backend_timeout: Duration,
    pub prune_after_missing_ticks: u32,
}

/// Periodic state-advancement loop
///
/// One tick runs at a time; [`ReconciliationEngine::reconcile_once`] may be
/// called concurrently with the background loop and simply waits its turn.
/// The record lock is never held across a provider or controller call.
pub struct ReconciliationEngine {
    store: RecordStore,
    provider: Arc<dyn TorrentProvider>,
    controller: Arc<dyn TorrentController>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    events: EventSink,

    /// Consecutive snapshots each record's torrent was absent from
    missing_ticks: Mutex<HashMap<String, u32>>,

    /// Latest successful snapshot, read by status reports
    latest: RwLock<Option<Arc<LiveSnapshot>>>,

    /// Serializes ticks
    tick_lock: tokio::sync::Mutex<()>,
}

impl ReconciliationEngine {
    pub(crate) fn new(
        store: RecordStore,
        provider: Arc<dyn TorrentProvider>,
        controller: Arc<dyn TorrentController>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
        events: EventSink,
    ) -> Self {
        Self {
            store,
            provider,
            controller,
            clock,
            settings,
            events,
            missing_ticks: Mutex::new(HashMap::new()),
            latest: RwLock::new(None),
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run ticks on the configured interval until `shutdown` is cancelled
    ///
    /// The first tick runs immediately. Cancellation is observed between
    /// ticks: a tick in progress always finishes.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(interval);

        info!(
            check_interval = ?self.settings.check_interval,
            time_multiplier = self.settings.time_multiplier,
            "Background seeding processor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }

                Some(_) = ticks.next() => {
                    if let Err(e) = self.reconcile_once().await {
                        // Already logged; next tick retries
                        debug!("Reconciliation tick aborted: {}", e);
                    }
                }
            }
        }

        info!("Background seeding processor stopped");
    }

    /// Run one reconciliation tick
    ///
    /// # Returns
    ///
    /// - `Ok(TickReport)`: Tick completed (individual pause failures are
    ///   counted, not returned)
    /// - `Err(Error::BackendUnavailable)`: Live snapshot could not be fetched;
    ///   nothing was changed
    pub async fn reconcile_once(&self) -> Result<TickReport> {
        let _tick = self.tick_lock.lock().await;

        let torrents = match self.fetch_live().await {
            Ok(torrents) => torrents,
            Err(e) => {
                warn!("Failed to get torrents for seeding limit check: {}", e);
                self.events.emit(SeedingEvent::ReconcileFailed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let now = self.clock.now();
        let live: HashMap<String, LiveTorrent> =
            torrents.into_iter().map(|t| (t.id.clone(), t)).collect();
        let snapshot = Arc::new(LiveSnapshot {
            taken_at: now,
            torrents: live,
        });
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&snapshot));

        let records = self.store.snapshot().await;
        let plan = self.plan(&records, &snapshot.torrents, now);

        let mut report = TickReport {
            fetched: snapshot.torrents.len(),
            checked: records.len(),
            missing: plan.missing,
            ..TickReport::default()
        };

        // Network calls happen here, with no lock held
        let mut paused = Vec::with_capacity(plan.pause.len());
        for planned in &plan.pause {
            match self.pause(std::slice::from_ref(&planned.id)).await {
                Ok(()) => paused.push(planned.clone()),
                Err(e) => {
                    report.stop_failures += 1;
                    error!(hash = %planned.id, "Failed to pause torrent for seeding limit: {}", e);
                    self.events.emit(SeedingEvent::StopFailed {
                        id: planned.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.commit(&plan, &paused, now, &mut report).await;

        if report.changes() > 0 {
            match self.store.save().await {
                Ok(()) => report.persisted = true,
                Err(e) => error!("Failed to save tracking data after seeding limit check: {}", e),
            }
        }

        debug!(
            checked_count = report.checked,
            completed_count = report.completed,
            stopped_count = report.stopped,
            failed_count = report.stop_failures,
            missing_count = report.missing,
            "Seeding limit check completed"
        );

        Ok(report)
    }

    /// Latest live snapshot, if any tick has succeeded
    pub fn latest_snapshot(&self) -> Option<Arc<LiveSnapshot>> {
        self.latest.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Drop absence bookkeeping for an untracked id
    pub(crate) fn forget(&self, id: &str) {
        self.missing_ticks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    /// Fetch live torrents within the backend deadline
    async fn fetch_live(&self) -> Result<Vec<LiveTorrent>> {
        let timeout = self.settings.backend_timeout;
        match tokio::time::timeout(timeout, self.provider.list_torrents()).await {
            Ok(Ok(torrents)) => Ok(torrents),
            Ok(Err(e)) => Err(as_backend_error(self.provider.provider_name(), e)),
            Err(_) => Err(Error::backend(format!(
                "{} torrent list timed out after {:?}",
                self.provider.provider_name(),
                timeout
            ))),
        }
    }

    /// Pause torrents within the backend deadline
    pub(crate) async fn pause(&self, ids: &[String]) -> Result<()> {
        let timeout = self.settings.backend_timeout;
        match tokio::time::timeout(timeout, self.controller.pause(ids)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(as_backend_error("controller", e)),
            Err(_) => Err(Error::backend(format!("pause timed out after {:?}", timeout))),
        }
    }

    /// Decide every transition for this tick from copies of the records
    fn plan(
        &self,
        records: &[SeedingRecord],
        live: &HashMap<String, LiveTorrent>,
        now: DateTime<Utc>,
    ) -> TickPlan {
        let mut plan = TickPlan::default();
        let mut missing_ticks = self.missing_ticks.lock().unwrap_or_else(|e| e.into_inner());

        // Forget ids that are no longer tracked
        missing_ticks.retain(|id, _| records.iter().any(|r| &r.id == id));

        for record in records {
            let Some(torrent) = live.get(&record.id) else {
                // Possibly just temporarily unlisted: leave the record alone
                plan.missing += 1;
                let count = missing_ticks.entry(record.id.clone()).or_insert(0);
                *count += 1;
                debug!(hash = %record.id, missing_ticks = *count, "Tracked torrent not found in current torrent list");

                let limit = self.settings.prune_after_missing_ticks;
                if limit > 0 && *count >= limit {
                    plan.prune.push((record.clone(), *count));
                }
                continue;
            };
            missing_ticks.remove(&record.id);

            if record.auto_stopped {
                continue;
            }

            match &record.completion {
                None => {
                    if torrent.is_completed {
                        plan.complete.push(record.clone());
                    }
                }
                Some(completion) => {
                    if !policy::is_overdue(now, completion.seeding_stop_time) {
                        continue;
                    }
                    if torrent.is_seeding() {
                        plan.pause.push(record.clone());
                    } else if torrent.is_paused() {
                        plan.adopt.push(record.clone());
                    }
                }
            }
        }

        plan
    }

    /// Apply the plan under the store lock and report what changed
    async fn commit(
        &self,
        plan: &TickPlan,
        paused: &[SeedingRecord],
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let multiplier = self.settings.time_multiplier;

        let (completed, stopped, adopted, pruned) = self
            .store
            .update(|records| {
                let completed: Vec<SeedingRecord> = plan
                    .complete
                    .iter()
                    .filter_map(|planned| {
                        let record = unchanged(records, planned)?;
                        record
                            .mark_completed(now, multiplier)
                            .then(|| record.clone())
                    })
                    .collect();

                let mut mark = |planned: &[SeedingRecord]| -> Vec<SeedingRecord> {
                    planned
                        .iter()
                        .filter_map(|planned| {
                            let record = unchanged(records, planned)?;
                            record.mark_auto_stopped(now).then(|| record.clone())
                        })
                        .collect()
                };
                let stopped = mark(paused);
                let adopted = mark(&plan.adopt);

                let pruned: Vec<(SeedingRecord, u32)> = plan
                    .prune
                    .iter()
                    .filter_map(|(planned, count)| {
                        unchanged(records, planned)?;
                        records.remove(&planned.id).map(|r| (r, *count))
                    })
                    .collect();

                (completed, stopped, adopted, pruned)
            })
            .await;

        for record in &completed {
            if let Some(completion) = &record.completion {
                info!(
                    hash = %record.id,
                    name = %record.name,
                    download_duration = ?completion.download_duration(),
                    seeding_duration = ?completion.seeding_budget(),
                    seeding_stop_time = %completion.seeding_stop_time,
                    "Torrent download completed, seeding time limit calculated"
                );
                self.events.emit(SeedingEvent::DownloadCompleted {
                    id: record.id.clone(),
                    download_duration: completion.download_duration(),
                    seeding_stop_time: completion.seeding_stop_time,
                });
            }
        }

        for record in &stopped {
            let seeded = record
                .completion
                .as_ref()
                .map(|c| now - c.completed_at)
                .unwrap_or_default();
            info!(
                hash = %record.id,
                name = %record.name,
                seeding_duration = ?seeded,
                "Automatically stopped seeding due to time limit"
            );
            self.events.emit(SeedingEvent::SeedingStopped {
                id: record.id.clone(),
                forced: false,
            });
        }

        for record in &adopted {
            info!(
                hash = %record.id,
                name = %record.name,
                "Overdue torrent already paused externally, marking as stopped"
            );
            self.events.emit(SeedingEvent::SeedingStopped {
                id: record.id.clone(),
                forced: false,
            });
        }

        if !pruned.is_empty() {
            let mut missing_ticks = self.missing_ticks.lock().unwrap_or_else(|e| e.into_inner());
            for (record, count) in &pruned {
                missing_ticks.remove(&record.id);
                info!(
                    hash = %record.id,
                    name = %record.name,
                    missing_ticks = count,
                    "Pruned record for torrent absent from backend"
                );
                self.events.emit(SeedingEvent::RecordPruned {
                    id: record.id.clone(),
                    missing_ticks: *count,
                });
            }
        }

        report.completed = completed.len();
        report.stopped = stopped.len();
        report.adopted = adopted.len();
        report.pruned = pruned.len();
    }
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("provider", &self.provider.provider_name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// The live record for `planned`, if it still equals the planned copy
fn unchanged<'a>(
    records: &'a mut RecordMap,
    planned: &SeedingRecord,
) -> Option<&'a mut SeedingRecord> {
    let record = records.get_mut(&planned.id)?;
    if *record == *planned {
        Some(record)
    } else {
        debug!(hash = %planned.id, "Record changed during tick, deferring transition");
        None
    }
}

/// Collaborator failures are all treated as transient backend trouble
fn as_backend_error(source: &str, e: Error) -> Error {
    match e {
        Error::BackendUnavailable(_) => e,
        other => Error::backend(format!("{}: {}", source, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryPersistence;
    use crate::traits::{ManualClock, TorrentState};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        torrents: Mutex<Vec<LiveTorrent>>,
    }

    #[async_trait]
    impl TorrentProvider for FixedProvider {
        async fn list_torrents(&self) -> Result<Vec<LiveTorrent>> {
            Ok(self.torrents.lock().unwrap().clone())
        }

        fn provider_name(&self) -> &'static str {
            "fixed"
        }
    }

    #[derive(Default)]
    struct CountingController {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TorrentController for CountingController {
        async fn pause(&self, _ids: &[String]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn torrent(id: &str, state: TorrentState, completed: bool) -> LiveTorrent {
        LiveTorrent {
            id: id.to_string(),
            name: id.to_string(),
            progress: if completed { 1.0 } else { 0.5 },
            is_completed: completed,
            state,
        }
    }

    fn engine(
        torrents: Vec<LiveTorrent>,
        prune_after: u32,
    ) -> (
        ReconciliationEngine,
        Arc<FixedProvider>,
        Arc<CountingController>,
        ManualClock,
    ) {
        let clock = ManualClock::new(Utc::now());
        let store = RecordStore::new(
            Arc::new(MemoryPersistence::new()),
            Arc::new(clock.clone()),
        );
        let provider = Arc::new(FixedProvider {
            torrents: Mutex::new(torrents),
        });
        let controller = Arc::new(CountingController::default());
        let (events, _rx) = EventSink::channel(64);
        let engine = ReconciliationEngine::new(
            store,
            provider.clone(),
            controller.clone(),
            Arc::new(clock.clone()),
            EngineSettings {
                time_multiplier: 10.0,
                check_interval: Duration::from_secs(60),
                backend_timeout: Duration::from_secs(5),
                prune_after_missing_ticks: prune_after,
            },
            events,
        );
        (engine, provider, controller, clock)
    }

    #[tokio::test]
    async fn externally_paused_overdue_torrent_is_adopted() {
        let (engine, _provider, controller, clock) =
            engine(vec![torrent("abc123", TorrentState::Paused, true)], 0);
        engine.store.add("abc123", "Foo").await;

        clock.advance(chrono::Duration::minutes(10));
        let report = engine.reconcile_once().await.unwrap();
        assert_eq!(report.completed, 1);

        clock.advance(chrono::Duration::minutes(101));
        let report = engine.reconcile_once().await.unwrap();
        assert_eq!(report.adopted, 1);
        assert_eq!(report.stopped, 0);
        assert_eq!(controller.calls.load(Ordering::SeqCst), 0);
        assert!(engine.store.get("abc123").await.unwrap().auto_stopped);
    }

    #[tokio::test]
    async fn missing_torrent_is_left_alone_without_pruning() {
        let (engine, _provider, _controller, _clock) = engine(Vec::new(), 0);
        engine.store.add("abc123", "Foo").await;

        for _ in 0..5 {
            let report = engine.reconcile_once().await.unwrap();
            assert_eq!(report.missing, 1);
            assert_eq!(report.pruned, 0);
        }
        assert!(engine.store.get("abc123").await.is_some());
    }

    #[tokio::test]
    async fn missing_torrent_is_pruned_after_limit() {
        let (engine, _provider, _controller, _clock) = engine(Vec::new(), 3);
        engine.store.add("abc123", "Foo").await;

        assert_eq!(engine.reconcile_once().await.unwrap().pruned, 0);
        assert_eq!(engine.reconcile_once().await.unwrap().pruned, 0);

        let report = engine.reconcile_once().await.unwrap();
        assert_eq!(report.pruned, 1);
        assert!(report.persisted);
        assert!(engine.store.get("abc123").await.is_none());
    }

    #[tokio::test]
    async fn reappearing_torrent_resets_missing_count() {
        let (engine, provider, _controller, _clock) = engine(Vec::new(), 2);
        engine.store.add("abc123", "Foo").await;

        engine.reconcile_once().await.unwrap();

        // Torrent shows up again, then vanishes once more
        *provider.torrents.lock().unwrap() = vec![torrent("abc123", TorrentState::Downloading, false)];
        engine.reconcile_once().await.unwrap();
        provider.torrents.lock().unwrap().clear();

        let report = engine.reconcile_once().await.unwrap();
        assert_eq!(report.pruned, 0);
        assert!(engine.store.get("abc123").await.is_some());
    }

    #[tokio::test]
    async fn snapshot_is_cached_for_status() {
        let (engine, _provider, _controller, _clock) =
            engine(vec![torrent("abc123", TorrentState::Seeding, true)], 0);
        assert!(engine.latest_snapshot().is_none());

        engine.reconcile_once().await.unwrap();

        let snapshot = engine.latest_snapshot().unwrap();
        assert_eq!(
            snapshot.torrents.get("abc123").map(|t| t.state),
            Some(TorrentState::Seeding)
        );
    }
}
