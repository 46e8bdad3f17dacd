//! Configuration types for the seeding lifecycle manager
//!
//! All fields carry serde defaults so a partial document (or none at all)
//! produces a usable configuration. [`SeedingConfig::validate`] is the single
//! gate: the service refuses to construct with a configuration it rejects.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main seeding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedingConfig {
    /// Seeding budget as a multiple of the download duration
    ///
    /// A torrent that took 10 minutes to download seeds for
    /// `time_multiplier * 10` minutes after completion.
    #[serde(default = "default_time_multiplier")]
    pub time_multiplier: f64,

    /// Interval between reconciliation ticks (in seconds)
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Deadline for every provider/controller call (in seconds)
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,

    /// Remove records whose torrent is absent from this many consecutive
    /// snapshots
    ///
    /// Set to 0 to keep such records forever.
    #[serde(default)]
    pub prune_after_missing_ticks: u32,

    /// Capacity of the lifecycle event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Where tracking records are persisted
    #[serde(default)]
    pub store: StoreConfig,
}

impl SeedingConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            time_multiplier: default_time_multiplier(),
            check_interval_secs: default_check_interval_secs(),
            backend_timeout_secs: default_backend_timeout_secs(),
            prune_after_missing_ticks: 0,
            event_channel_capacity: default_event_channel_capacity(),
            store: StoreConfig::default(),
        }
    }

    /// Set the seeding multiplier
    pub fn with_time_multiplier(mut self, multiplier: f64) -> Self {
        self.time_multiplier = multiplier;
        self
    }

    /// Set the tick interval
    pub fn with_check_interval_secs(mut self, secs: u64) -> Self {
        self.check_interval_secs = secs;
        self
    }

    /// Set the store configuration
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !self.time_multiplier.is_finite() || self.time_multiplier <= 0.0 {
            return Err(crate::Error::config(format!(
                "seeding time multiplier must be greater than 0, got: {}",
                self.time_multiplier
            )));
        }

        if self.check_interval_secs == 0 {
            return Err(crate::Error::config("check interval must be > 0"));
        }

        if self.backend_timeout_secs == 0 {
            return Err(crate::Error::config("backend timeout must be > 0"));
        }

        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event channel capacity must be > 0"));
        }

        self.store.validate()?;

        Ok(())
    }

    /// Tick interval as a [`Duration`]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Backend deadline as a [`Duration`]
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }
}

impl Default for SeedingConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Record store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// JSON file on disk
    File {
        /// Path to the tracking data file
        path: String,
    },

    /// In-memory only (lost on restart)
    Memory,
}

impl StoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::File { path } if path.is_empty() => Err(crate::Error::config(
                "tracking data file path cannot be empty",
            )),
            _ => Ok(()),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::File {
            path: default_tracking_data_file(),
        }
    }
}

fn default_time_multiplier() -> f64 {
    10.0
}

fn default_check_interval_secs() -> u64 {
    300
}

fn default_backend_timeout_secs() -> u64 {
    30
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_tracking_data_file() -> String {
    "seeding_tracking.json".to_string()
}
