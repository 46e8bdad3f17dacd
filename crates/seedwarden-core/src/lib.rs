// # seedwarden-core
//
// Core library for the seeding lifecycle manager.
//
// Once a torrent finishes downloading it keeps seeding for a multiple of its
// download time, then gets paused automatically.
//
// ## Architecture Overview
//
// - **RecordStore**: Lock-protected table of per-torrent seeding records
// - **policy**: Pure seeding budget and stop time arithmetic
// - **ReconciliationEngine**: Periodic loop advancing records against live backend state
// - **SeedingService**: Public lifecycle API (track, untrack, force-stop, status)
// - **TorrentProvider / TorrentController**: Traits implemented by backend adapters
// - **PersistenceBackend**: Trait for whole-table save/load (file, memory)
//
// ## Design Principles
//
// 1. **Compute under lock, I/O outside it**: No backend or disk call holds the record lock
// 2. **Retry by ticking**: Backend failures are logged and retried on the next tick
// 3. **Library-First**: The daemon is a thin wrapper over `SeedingService`
// 4. **Injectable time**: All timestamps come from a `Clock`

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod policy;
pub mod record;
pub mod service;
pub mod state;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use config::{SeedingConfig, StoreConfig};
pub use engine::{LiveSnapshot, ReconciliationEngine, TickReport};
pub use error::{Error, Result};
pub use events::SeedingEvent;
pub use record::{Completion, RecordMap, SeedingPhase, SeedingRecord};
pub use service::{SeedingService, SeedingStatus, SeedingTorrentStatus};
pub use state::{FilePersistence, MemoryPersistence};
pub use store::RecordStore;
pub use traits::{
    Clock, LiveTorrent, ManualClock, PersistenceBackend, SystemClock, TorrentController,
    TorrentProvider, TorrentState,
};
