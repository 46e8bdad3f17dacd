//! Test doubles and common utilities for architecture contract tests
//!
//! This module provides minimal test doubles that verify architectural
//! constraints without talking to a real torrent client.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use seedwarden_core::error::{Error, Result};
use seedwarden_core::traits::{
    LiveTorrent, ManualClock, PersistenceBackend, TorrentController, TorrentProvider, TorrentState,
};
use seedwarden_core::{MemoryPersistence, SeedingConfig, SeedingEvent, SeedingService, StoreConfig};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// A provider whose torrent list the test sets directly
#[derive(Default)]
pub struct ScriptedProvider {
    torrents: Mutex<Vec<LiveTorrent>>,
    fail: AtomicBool,
    delay: Mutex<Duration>,
    list_call_count: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole torrent list
    pub fn set(&self, torrents: Vec<LiveTorrent>) {
        *self.torrents.lock().unwrap() = torrents;
    }

    /// Make `list_torrents` fail until reset
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make `list_torrents` take `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Get the number of times list_torrents() was called
    pub fn list_call_count(&self) -> usize {
        self.list_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TorrentProvider for ScriptedProvider {
    async fn list_torrents(&self) -> Result<Vec<LiveTorrent>> {
        self.list_call_count.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::backend("connection refused"));
        }
        Ok(self.torrents.lock().unwrap().clone())
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/// A controller that records pause calls and can be told to fail
#[derive(Default)]
pub struct CountingController {
    fail: AtomicBool,
    delay: Mutex<Duration>,
    pause_calls: Mutex<Vec<Vec<String>>>,
}

impl CountingController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `pause` fail until reset
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make `pause` take `delay` before answering; the call is recorded first
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Get the number of times pause() was called (failed calls included)
    pub fn pause_call_count(&self) -> usize {
        self.pause_calls.lock().unwrap().len()
    }

    /// Get the id lists pause() was called with
    pub fn pause_calls(&self) -> Vec<Vec<String>> {
        self.pause_calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TorrentController for CountingController {
    async fn pause(&self, ids: &[String]) -> Result<()> {
        self.pause_calls.lock().unwrap().push(ids.to_vec());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::backend("pause rejected"));
        }
        Ok(())
    }
}

/// A service wired to test doubles, plus handles to each double
pub struct Harness {
    pub service: Arc<SeedingService>,
    pub events: mpsc::Receiver<SeedingEvent>,
    pub provider: Arc<ScriptedProvider>,
    pub controller: Arc<CountingController>,
    pub clock: ManualClock,
}

impl Harness {
    /// Harness over an in-memory backend the test can inspect
    pub fn new(config: SeedingConfig) -> (Self, MemoryPersistence) {
        let persistence = MemoryPersistence::new();
        let harness = Self::with_persistence(config, Arc::new(persistence.clone()));
        (harness, persistence)
    }

    /// Harness over any persistence backend
    pub fn with_persistence(config: SeedingConfig, persistence: Arc<dyn PersistenceBackend>) -> Self {
        let provider = Arc::new(ScriptedProvider::new());
        let controller = Arc::new(CountingController::new());
        let clock = ManualClock::new(t0());

        let (service, events) = SeedingService::new(
            config,
            provider.clone(),
            controller.clone(),
            persistence,
            Arc::new(clock.clone()),
        )
        .expect("service construction succeeds");

        Self {
            service: Arc::new(service),
            events,
            provider,
            controller,
            clock,
        }
    }

    /// Move the clock to `t0 + minutes`
    pub fn at_minute(&self, minutes: i64) {
        self.clock.set(t0() + chrono::Duration::minutes(minutes));
    }

    /// Collect every event emitted so far
    pub fn drain_events(&mut self) -> Vec<SeedingEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Fixed start time shared by every scenario
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// Helper to create a minimal SeedingConfig for testing
///
/// The tick interval is long so that only the first, immediate tick runs
/// during a test; everything else is driven through `reconcile_now`.
pub fn minimal_config() -> SeedingConfig {
    let mut config = SeedingConfig::new()
        .with_time_multiplier(10.0)
        .with_check_interval_secs(3600)
        .with_store(StoreConfig::Memory);
    config.backend_timeout_secs = 1;
    config
}

pub fn downloading(id: &str) -> LiveTorrent {
    LiveTorrent {
        id: id.to_string(),
        name: id.to_string(),
        progress: 0.4,
        is_completed: false,
        state: TorrentState::Downloading,
    }
}

pub fn seeding(id: &str) -> LiveTorrent {
    LiveTorrent {
        id: id.to_string(),
        name: id.to_string(),
        progress: 1.0,
        is_completed: true,
        state: TorrentState::Seeding,
    }
}

pub fn paused(id: &str) -> LiveTorrent {
    LiveTorrent {
        state: TorrentState::Paused,
        ..seeding(id)
    }
}

/// Let spawned background saves run to completion
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
