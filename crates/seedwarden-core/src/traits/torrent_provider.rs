// # Torrent Provider Trait
//
// Defines the interface for reading live torrent state from the backend.
//
// ## Implementations
//
// - qBittorrent WebUI: `seedwarden-qbittorrent` crate
// - Test doubles: scripted snapshots in `tests/common`
//
// ## Usage
//
// ```rust,ignore
// use seedwarden_core::TorrentProvider;
//
// let torrents = provider.list_torrents().await?;
// for torrent in torrents.iter().filter(|t| t.is_seeding()) {
//     println!("{} is seeding", torrent.name);
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Coarse state of a torrent as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    /// Fetching data (including queued/stalled/metadata)
    Downloading,
    /// Complete and uploading (including queued/stalled/forced)
    Seeding,
    /// Stopped by the user or by us
    Paused,
    /// Verifying pieces
    Checking,
    /// Backend reports an error or missing files
    Errored,
    /// Anything the provider could not classify
    Unknown,
}

impl TorrentState {
    /// Human-readable label for reports
    pub fn display_name(&self) -> &'static str {
        match self {
            TorrentState::Downloading => "Downloading",
            TorrentState::Seeding => "Seeding",
            TorrentState::Paused => "Paused",
            TorrentState::Checking => "Checking",
            TorrentState::Errored => "Error",
            TorrentState::Unknown => "Unknown",
        }
    }
}

/// One torrent in a provider snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveTorrent {
    /// Stable identifier (info hash)
    pub id: String,
    /// Display name
    pub name: String,
    /// Download progress in `0.0..=1.0`
    pub progress: f64,
    /// Whether the payload is fully downloaded
    pub is_completed: bool,
    /// Current transfer state
    pub state: TorrentState,
}

impl LiveTorrent {
    /// Whether the torrent is currently uploading to peers
    pub fn is_seeding(&self) -> bool {
        self.state == TorrentState::Seeding
    }

    /// Whether the torrent is stopped
    pub fn is_paused(&self) -> bool {
        self.state == TorrentState::Paused
    }
}

/// Trait for torrent backends that can list their torrents
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Contract
///
/// - One snapshot per call; no caching between calls
/// - No retry logic: the reconciliation engine retries on its next tick
/// - No deadline handling: callers wrap calls in their own timeout
///
/// Any error is treated as transient by the engine.
#[async_trait]
pub trait TorrentProvider: Send + Sync {
    /// List every torrent the backend currently knows about
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<LiveTorrent>)`: Current snapshot
    /// - `Err(Error)`: Backend unreachable or response unusable
    async fn list_torrents(&self) -> Result<Vec<LiveTorrent>, crate::Error>;

    /// Name used in log lines
    fn provider_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_and_paused_helpers() {
        let mut torrent = LiveTorrent {
            id: "abc123".to_string(),
            name: "Foo".to_string(),
            progress: 1.0,
            is_completed: true,
            state: TorrentState::Seeding,
        };
        assert!(torrent.is_seeding());
        assert!(!torrent.is_paused());

        torrent.state = TorrentState::Paused;
        assert!(!torrent.is_seeding());
        assert!(torrent.is_paused());
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&TorrentState::Errored).unwrap();
        assert_eq!(json, "\"errored\"");
    }
}
