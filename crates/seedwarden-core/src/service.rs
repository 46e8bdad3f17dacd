//! Lifecycle API
//!
//! [`SeedingService`] is the surface chat commands, CLI invocations and
//! dashboards call into. It owns the record store and the reconciliation
//! engine, and ties the background loop to an explicit `start`/`stop`.
//!
//! Every method takes `&self` and is safe to call concurrently; share the
//! service behind an `Arc`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SeedingConfig;
use crate::engine::{EngineSettings, LiveSnapshot, ReconciliationEngine, TickReport};
use crate::error::{Error, Result};
use crate::events::{EventSink, SeedingEvent};
use crate::record::{SeedingPhase, SeedingRecord};
use crate::store::RecordStore;
use crate::traits::{Clock, PersistenceBackend, TorrentController, TorrentProvider, TorrentState};

/// Aggregate seeding report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeedingStatus {
    /// Number of tracked torrents
    pub tracked_torrents: usize,
    /// Completed torrents still seeding (not yet stopped)
    pub active_seeding: usize,
    /// Torrents whose seeding was stopped
    pub completed_seeding: usize,
    /// Torrents past their stop time but not yet stopped
    pub overdue_seeding: usize,
    /// Sum of download durations
    pub total_download_time: Duration,
    /// Sum of time spent seeding
    pub total_seeding_time: Duration,
    /// Per-torrent details keyed by id
    pub details: BTreeMap<String, SeedingTorrentStatus>,
    /// When the report was generated
    pub last_checked: DateTime<Utc>,
    /// When the live data joined into the report was fetched
    pub snapshot_taken_at: Option<DateTime<Utc>>,
}

/// Seeding report for one torrent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeedingTorrentStatus {
    pub id: String,
    pub name: String,
    pub phase: SeedingPhase,
    pub download_duration: Duration,
    /// Time seeded so far, or until the stop for stopped torrents
    pub seeding_elapsed: Duration,
    /// Seeding budget; zero until the download completes
    pub seeding_limit: Duration,
    /// Time left before the stop time; zero once overdue
    pub time_remaining: Duration,
    pub is_overdue: bool,
    pub auto_stopped: bool,
    /// State reported by the backend; `None` when absent from the last snapshot
    pub current_state: Option<TorrentState>,
    pub seeding_stop_time: Option<DateTime<Utc>>,
}

/// Background loop handle while the service runs
struct Running {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Seeding lifecycle manager
pub struct SeedingService {
    config: SeedingConfig,
    store: RecordStore,
    engine: Arc<ReconciliationEngine>,
    clock: Arc<dyn Clock>,
    events: EventSink,
    running: Mutex<Option<Running>>,
    /// Set once the persisted table has been merged in
    restored: OnceCell<()>,
}

impl SeedingService {
    /// Create a service and its event receiver
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if `config` fails validation. Nothing is
    /// started; persisted records are loaded on first use, and
    /// [`SeedingService::start`] begins reconciling.
    pub fn new(
        config: SeedingConfig,
        provider: Arc<dyn TorrentProvider>,
        controller: Arc<dyn TorrentController>,
        persistence: Arc<dyn PersistenceBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, mpsc::Receiver<SeedingEvent>)> {
        config.validate()?;

        let (events, rx) = EventSink::channel(config.event_channel_capacity);
        let store = RecordStore::new(persistence, Arc::clone(&clock));
        let settings = EngineSettings {
            time_multiplier: config.time_multiplier,
            check_interval: config.check_interval(),
            backend_timeout: config.backend_timeout(),
            prune_after_missing_ticks: config.prune_after_missing_ticks,
        };
        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            provider,
            controller,
            Arc::clone(&clock),
            settings,
            events.clone(),
        ));

        let service = Self {
            config,
            store,
            engine,
            clock,
            events,
            running: Mutex::new(None),
            restored: OnceCell::new(),
        };
        Ok((service, rx))
    }

    /// Load persisted records and start the background loop
    ///
    /// Records tracked before `start` are kept alongside the persisted ones.
    /// # Errors
    ///
    /// Returns an error if the service is already running.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(Error::Other("seeding service is already running".to_string()));
        }

        info!("Starting seeding management service");
        self.ensure_restored().await;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.engine).run(shutdown.clone()));
        *running = Some(Running { shutdown, handle });

        let tracked = self.store.len().await;
        info!(
            check_interval = ?self.config.check_interval(),
            time_multiplier = self.config.time_multiplier,
            tracked_torrents = tracked,
            "Seeding management service started"
        );
        self.events.emit(SeedingEvent::Started { tracked });

        Ok(())
    }

    /// Stop the background loop and save the table one last time
    ///
    /// Waits for an in-flight tick to finish. Calling this when the service
    /// is not running does nothing.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the final save fails; the loop is stopped
    /// regardless.
    pub async fn stop(&self) -> Result<()> {
        let Some(Running { shutdown, handle }) = self.running.lock().await.take() else {
            return Ok(());
        };

        info!("Stopping seeding management service");
        shutdown.cancel();

        if let Err(e) = handle.await {
            error!("Background seeding processor ended abnormally: {}", e);
        }

        let saved = self.store.save().await;
        if let Err(e) = &saved {
            error!("Failed to save tracking data during shutdown: {}", e);
        }

        info!("Seeding management service stopped");
        self.events.emit(SeedingEvent::Stopped {
            reason: "shutdown requested".to_string(),
        });

        saved
    }

    /// Whether the background loop is running
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Begin tracking a torrent
    ///
    /// # Returns
    ///
    /// `true` if tracking started, `false` if the torrent was already tracked.
    pub async fn start_tracking(&self, id: &str, name: &str) -> Result<bool> {
        if id.trim().is_empty() {
            return Err(Error::invalid_input("torrent id must not be empty"));
        }

        self.ensure_restored().await;
        let created = self.store.add(id, name).await;
        if created {
            info!(hash = %id, name = %name, "Started tracking torrent for seeding management");
            self.events.emit(SeedingEvent::TrackingStarted {
                id: id.to_string(),
                name: name.to_string(),
            });
        }
        Ok(created)
    }

    /// Stop tracking a torrent (e.g. when it is deleted)
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the torrent is not tracked.
    pub async fn stop_tracking(&self, id: &str) -> Result<()> {
        self.ensure_restored().await;
        let removed = self.store.remove(id).await?;
        self.engine.forget(id);

        info!(hash = %id, name = %removed.name, "Stopped tracking torrent");
        self.events.emit(SeedingEvent::TrackingStopped { id: id.to_string() });
        Ok(())
    }

    /// Pause torrents now, regardless of their seeding budget
    ///
    /// Every id is sent to the controller; tracked ones are then marked as
    /// stopped. Untracked ids are paused but otherwise ignored.
    ///
    /// # Returns
    ///
    /// The number of tracked records that were marked as stopped.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if `ids` is empty
    /// - `BackendUnavailable` if the pause failed; no record is changed
    pub async fn force_stop_seeding(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Err(Error::invalid_input("no torrent ids provided"));
        }

        self.ensure_restored().await;
        info!(hashes = ?ids, "Force stopping seeding for torrents");

        if let Err(e) = self.engine.pause(ids).await {
            error!("Failed to force stop seeding: {}", e);
            return Err(e);
        }

        let stopped = self.store.mark_auto_stopped(ids).await;
        for id in &stopped {
            self.events.emit(SeedingEvent::SeedingStopped {
                id: id.clone(),
                forced: true,
            });
        }

        info!(
            requested = ids.len(),
            count = stopped.len(),
            "Force stopped seeding for torrents"
        );
        Ok(stopped.len())
    }

    /// Build a status report from the records and the last live snapshot
    ///
    /// Never calls the backend, never mutates state.
    pub async fn get_status(&self) -> SeedingStatus {
        self.ensure_restored().await;
        let now = self.clock.now();
        let records = self.store.snapshot().await;
        let snapshot = self.engine.latest_snapshot();

        let mut status = SeedingStatus {
            tracked_torrents: records.len(),
            active_seeding: 0,
            completed_seeding: 0,
            overdue_seeding: 0,
            total_download_time: Duration::ZERO,
            total_seeding_time: Duration::ZERO,
            details: BTreeMap::new(),
            last_checked: now,
            snapshot_taken_at: snapshot.as_ref().map(|s| s.taken_at),
        };

        for record in records {
            let detail = torrent_status(&record, snapshot.as_deref(), now);

            match detail.phase {
                SeedingPhase::Seeding => status.active_seeding += 1,
                SeedingPhase::AutoStopped => status.completed_seeding += 1,
                SeedingPhase::Downloading => {}
            }
            if detail.is_overdue {
                status.overdue_seeding += 1;
            }
            status.total_download_time += detail.download_duration;
            status.total_seeding_time += detail.seeding_elapsed;

            status.details.insert(record.id, detail);
        }

        debug!(
            tracked_torrents = status.tracked_torrents,
            active_seeding = status.active_seeding,
            completed_seeding = status.completed_seeding,
            overdue_seeding = status.overdue_seeding,
            "Seeding status report generated"
        );

        status
    }

    /// Number of tracked torrents
    pub async fn tracked_count(&self) -> usize {
        self.ensure_restored().await;
        self.store.len().await
    }

    /// Copies of every record, ordered by id
    pub async fn tracked_records(&self) -> Vec<SeedingRecord> {
        self.ensure_restored().await;
        let mut records = self.store.snapshot().await;
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Run one reconciliation tick now instead of waiting for the interval
    pub async fn reconcile_now(&self) -> Result<TickReport> {
        self.ensure_restored().await;
        self.engine.reconcile_once().await
    }

    /// Service configuration
    pub fn config(&self) -> &SeedingConfig {
        &self.config
    }

    /// Merge persisted records into the table before first use
    ///
    /// Runs once, ahead of any mutation or save, so a save can never write
    /// a table that is missing the persisted records. A failed load is
    /// logged and not retried.
    async fn ensure_restored(&self) {
        self.restored
            .get_or_init(|| async {
                if let Err(e) = self.store.restore().await {
                    warn!("Failed to load tracking data, keeping in-memory records: {}", e);
                }
            })
            .await;
    }
}

impl std::fmt::Debug for SeedingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedingService")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

/// Negative spans (clock skew) report as zero
fn to_std(d: chrono::Duration) -> Duration {
    d.to_std().unwrap_or(Duration::ZERO)
}

fn torrent_status(
    record: &SeedingRecord,
    snapshot: Option<&LiveSnapshot>,
    now: DateTime<Utc>,
) -> SeedingTorrentStatus {
    let current_state = snapshot
        .and_then(|s| s.torrents.get(&record.id))
        .map(|t| t.state);

    let mut detail = SeedingTorrentStatus {
        id: record.id.clone(),
        name: record.name.clone(),
        phase: record.phase(),
        download_duration: Duration::ZERO,
        seeding_elapsed: Duration::ZERO,
        seeding_limit: Duration::ZERO,
        time_remaining: Duration::ZERO,
        is_overdue: record.is_overdue(now),
        auto_stopped: record.auto_stopped,
        current_state,
        seeding_stop_time: None,
    };

    if let Some(completion) = &record.completion {
        let seeded_until = match record.stopped_at {
            Some(stopped_at) if record.auto_stopped => stopped_at,
            _ => now,
        };
        detail.download_duration = to_std(completion.download_duration());
        detail.seeding_elapsed = to_std(seeded_until - completion.completed_at);
        detail.seeding_limit = to_std(completion.seeding_budget());
        detail.time_remaining = to_std(completion.seeding_stop_time - now);
        detail.seeding_stop_time = Some(completion.seeding_stop_time);
    }

    detail
}
