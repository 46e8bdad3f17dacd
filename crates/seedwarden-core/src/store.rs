//! Seeding record store
//!
//! The store owns every [`SeedingRecord`]. All access goes through a single
//! exclusive lock that is only ever held for in-memory work; persistence I/O
//! happens on a snapshot taken under the lock and written after releasing it.
//!
//! Saves are serialized by a separate write guard, and the snapshot is taken
//! *after* that guard is acquired. An older snapshot therefore can never be
//! written over a newer one, however the background saves interleave.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::{RecordMap, SeedingRecord};
use crate::traits::{Clock, PersistenceBackend};

/// Thread-safe table of seeding records with whole-table persistence
///
/// Cloning is cheap; clones share the same table.
#[derive(Clone)]
pub struct RecordStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    records: Mutex<RecordMap>,
    write_guard: Mutex<()>,
    backend: Arc<dyn PersistenceBackend>,
    clock: Arc<dyn Clock>,
}

impl RecordStore {
    /// Create an empty store backed by `backend`
    pub fn new(backend: Arc<dyn PersistenceBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                records: Mutex::new(RecordMap::new()),
                write_guard: Mutex::new(()),
                backend,
                clock,
            }),
        }
    }

    /// Start tracking `id` unless it already is
    ///
    /// # Returns
    ///
    /// `true` if a record was created, `false` if `id` was already tracked.
    pub async fn add(&self, id: &str, name: &str) -> bool {
        {
            let mut records = self.inner.records.lock().await;
            if records.contains_key(id) {
                debug!(hash = %id, "Torrent already being tracked");
                return false;
            }

            let now = self.inner.clock.now();
            records.insert(id.to_string(), SeedingRecord::new(id, name, now));
        }

        self.request_save();
        true
    }

    /// Stop tracking `id`
    ///
    /// # Returns
    ///
    /// - `Ok(SeedingRecord)`: The removed record
    /// - `Err(Error::NotFound)`: `id` was not tracked; table unchanged
    pub async fn remove(&self, id: &str) -> Result<SeedingRecord> {
        let removed = {
            let mut records = self.inner.records.lock().await;
            records
                .remove(id)
                .ok_or_else(|| Error::not_found(format!("torrent {} is not being tracked", id)))?
        };

        self.request_save();
        Ok(removed)
    }

    /// Copy of the record for `id`
    pub async fn get(&self, id: &str) -> Option<SeedingRecord> {
        self.inner.records.lock().await.get(id).cloned()
    }

    /// Copy of every record
    pub async fn snapshot(&self) -> Vec<SeedingRecord> {
        self.inner.records.lock().await.values().cloned().collect()
    }

    /// Number of tracked torrents
    pub async fn len(&self) -> usize {
        self.inner.records.lock().await.len()
    }

    /// Whether nothing is tracked
    pub async fn is_empty(&self) -> bool {
        self.inner.records.lock().await.is_empty()
    }

    /// Run `f` with exclusive access to the table
    ///
    /// `f` must not block or await; it runs while every other caller waits.
    pub(crate) async fn update<R>(&self, f: impl FnOnce(&mut RecordMap) -> R) -> R {
        let mut records = self.inner.records.lock().await;
        f(&mut records)
    }

    /// Flag every tracked id in `ids` as stopped
    ///
    /// Untracked ids are ignored. Returns the ids that changed state.
    pub(crate) async fn mark_auto_stopped(&self, ids: &[String]) -> Vec<String> {
        let now = self.inner.clock.now();
        let changed: Vec<String> = self
            .update(|records| {
                ids.iter()
                    .filter(|id| {
                        records
                            .get_mut(id.as_str())
                            .is_some_and(|record| record.mark_auto_stopped(now))
                    })
                    .cloned()
                    .collect()
            })
            .await;

        if !changed.is_empty() {
            self.request_save();
        }
        changed
    }

    /// Write the whole table to the backend
    ///
    /// The table lock is held only while cloning it.
    pub async fn save(&self) -> Result<()> {
        let _write = self.inner.write_guard.lock().await;
        let records = self.inner.records.lock().await.clone();

        self.inner.backend.save(&records).await.map_err(|e| match e {
            Error::Persistence(_) => e,
            other => Error::persistence(other.to_string()),
        })?;

        debug!(
            tracked_torrents = records.len(),
            backend = self.inner.backend.backend_name(),
            "Tracking data saved"
        );
        Ok(())
    }

    /// Replace the in-memory table with the backend's contents
    ///
    /// A backend with nothing stored yields an empty table.
    ///
    /// # Returns
    ///
    /// The number of records loaded.
    pub async fn load(&self) -> Result<usize> {
        let loaded = self.inner.backend.load().await.map_err(|e| match e {
            Error::Persistence(_) => e,
            other => Error::persistence(other.to_string()),
        })?;
        let count = loaded.len();

        *self.inner.records.lock().await = loaded;

        info!(
            tracked_torrents = count,
            backend = self.inner.backend.backend_name(),
            "Tracking data loaded"
        );
        Ok(count)
    }

    /// Merge the backend's contents into the in-memory table
    ///
    /// Loaded records overwrite in-memory ones with the same id; in-memory
    /// records with no persisted counterpart are kept.
    ///
    /// # Returns
    ///
    /// The number of records loaded.
    pub async fn restore(&self) -> Result<usize> {
        let loaded = self.inner.backend.load().await.map_err(|e| match e {
            Error::Persistence(_) => e,
            other => Error::persistence(other.to_string()),
        })?;
        let count = loaded.len();

        let tracked = {
            let mut records = self.inner.records.lock().await;
            records.extend(loaded);
            records.len()
        };

        info!(
            loaded = count,
            tracked_torrents = tracked,
            backend = self.inner.backend.backend_name(),
            "Tracking data restored"
        );
        Ok(count)
    }

    /// Save in the background
    ///
    /// Failures are logged; the in-memory table stays authoritative.
    pub(crate) fn request_save(&self) {
        let store = self.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save().await {
                warn!("Failed to save tracking data: {}", e);
            }
        });
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("backend", &self.inner.backend.backend_name())
            .finish_non_exhaustive()
    }
}
