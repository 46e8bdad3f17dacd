// # Torrent Controller Trait
//
// Defines the single write operation the seeding manager needs from the
// backend: pausing torrents whose seeding budget is spent.

use async_trait::async_trait;

/// Trait for torrent backends that can pause torrents
///
/// # Contract
///
/// - `pause` is all-or-nothing from the caller's point of view: `Ok(())`
///   means every id in the batch was accepted
/// - Pausing an already-paused torrent must not fail
/// - No retry logic: the engine retries failed pauses on its next tick
#[async_trait]
pub trait TorrentController: Send + Sync {
    /// Pause the given torrents
    ///
    /// # Parameters
    ///
    /// - `ids`: Torrent identifiers (info hashes)
    async fn pause(&self, ids: &[String]) -> Result<(), crate::Error>;
}
