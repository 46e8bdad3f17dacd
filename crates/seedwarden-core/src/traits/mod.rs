//! Collaborator traits for the seeding lifecycle manager
//!
//! The core never talks to a torrent client, a disk or the wall clock
//! directly; it goes through these seams.
//!
//! - [`TorrentProvider`]: Snapshot of live torrents
//! - [`TorrentController`]: Pause torrents
//! - [`PersistenceBackend`]: Whole-table save/load of tracking records
//! - [`Clock`]: Source of "now"

pub mod clock;
pub mod persistence;
pub mod torrent_controller;
pub mod torrent_provider;

pub use clock::{Clock, ManualClock, SystemClock};
pub use persistence::PersistenceBackend;
pub use torrent_controller::TorrentController;
pub use torrent_provider::{LiveTorrent, TorrentProvider, TorrentState};
