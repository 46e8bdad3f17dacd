// # qBittorrent Adapter
//
// This crate connects the seeding lifecycle manager to a qBittorrent WebUI.
// `QbittorrentClient` implements both `TorrentProvider` (list torrents) and
// `TorrentController` (pause torrents) over the WebUI API v2.
//
// ## Behavior
//
// - Logs in lazily on first use; the session cookie lives in reqwest's jar
// - A `403` on any call drops the session and surfaces `BackendUnavailable`;
//   the next reconciliation tick logs in again
// - One HTTP request per operation: no retries, no backoff (the engine's
//   tick interval is the retry policy)
// - Every request carries the configured timeout
//
// ## Security Requirements
//
// - The password NEVER appears in logs, errors or `Debug` output
// - Credentials come from the environment, never from files on disk
//
// ## API Reference
//
// - Login: POST `/api/v2/auth/login` (form `username`, `password`)
// - List: GET `/api/v2/torrents/info`
// - Pause: POST `/api/v2/torrents/pause` (form `hashes=h1|h2`); qBittorrent
//   5.x renamed this to `/api/v2/torrents/stop`, which is used when `pause`
//   answers `404`

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use seedwarden_core::traits::{LiveTorrent, TorrentController, TorrentProvider, TorrentState};
use seedwarden_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for a qBittorrent WebUI
#[derive(Clone, Serialize, Deserialize)]
pub struct QbittorrentConfig {
    /// WebUI base URL, e.g. `http://localhost:8080`
    pub url: String,

    pub username: String,

    /// ⚠️ NEVER log this value
    pub password: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT.as_secs()
}

impl std::fmt::Debug for QbittorrentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QbittorrentConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// One entry of `/api/v2/torrents/info`
#[derive(Debug, Deserialize)]
struct TorrentInfo {
    hash: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    state: String,
}

impl From<TorrentInfo> for LiveTorrent {
    fn from(info: TorrentInfo) -> Self {
        LiveTorrent {
            is_completed: info.progress >= 1.0,
            state: map_state(&info.state),
            id: info.hash,
            name: info.name,
            progress: info.progress,
        }
    }
}

/// Collapse qBittorrent's state strings into [`TorrentState`]
pub fn map_state(state: &str) -> TorrentState {
    match state {
        "downloading" | "metaDL" | "forcedMetaDL" | "stalledDL" | "queuedDL" | "forcedDL"
        | "allocating" => TorrentState::Downloading,
        // A completed torrent being re-checked still seeds afterwards
        "uploading" | "stalledUP" | "queuedUP" | "forcedUP" | "checkingUP" => {
            TorrentState::Seeding
        }
        "pausedUP" | "pausedDL" | "stoppedUP" | "stoppedDL" => TorrentState::Paused,
        "checkingDL" | "checkingResumeData" | "moving" => TorrentState::Checking,
        "error" | "missingFiles" => TorrentState::Errored,
        _ => TorrentState::Unknown,
    }
}

/// qBittorrent WebUI client
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the password.
pub struct QbittorrentClient {
    base_url: Url,
    username: String,

    /// ⚠️ NEVER log this value
    password: String,

    client: reqwest::Client,

    /// Whether the cookie jar holds a live session
    logged_in: AtomicBool,
}

impl std::fmt::Debug for QbittorrentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QbittorrentClient")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("logged_in", &self.logged_in.load(Ordering::Relaxed))
            .finish()
    }
}

impl QbittorrentClient {
    /// Create a client; no request is made until first use
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if `base_url` is not an http(s) URL or
    /// the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = parse_base_url(base_url)?;

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            username: username.into(),
            password: password.into(),
            client,
            logged_in: AtomicBool::new(false),
        })
    }

    /// Create a client from [`QbittorrentConfig`]
    pub fn from_config(config: &QbittorrentConfig) -> Result<Self> {
        if config.timeout_secs == 0 {
            return Err(Error::config("qBittorrent timeout must be greater than 0"));
        }
        Self::new(
            &config.url,
            config.username.clone(),
            config.password.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Base URL requests are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::config(format!("invalid endpoint {}: {}", path, e)))
    }

    /// Log in unless a session is already open
    async fn ensure_session(&self) -> Result<()> {
        if self.logged_in.load(Ordering::Acquire) {
            return Ok(());
        }

        tracing::info!("Authenticating with qBittorrent");

        let url = self.endpoint("api/v2/auth/login")?;
        let response = self
            .client
            .post(url)
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::backend(format!("login request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        // qBittorrent answers 200 "Fails." for bad credentials
        if !status.is_success() || body.trim() == "Fails." {
            tracing::error!(status = %status, "qBittorrent authentication failed");
            return Err(Error::backend(format!(
                "qBittorrent login rejected (status {})",
                status
            )));
        }

        self.logged_in.store(true, Ordering::Release);
        tracing::info!("Authentication successful");
        Ok(())
    }

    /// Map a non-success status to an error, dropping the session on 403
    async fn check_status(&self, what: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::FORBIDDEN {
            // Session expired; the next call logs in again
            self.logged_in.store(false, Ordering::Release);
            return Err(Error::backend(format!(
                "{}: session rejected by qBittorrent (403)",
                what
            )));
        }

        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());
        Err(Error::backend(format!("{} failed: {} - {}", what, status, text)))
    }

    async fn post_hashes(&self, path: &str, hashes: &str) -> Result<reqwest::Response> {
        let url = self.endpoint(path)?;
        self.client
            .post(url)
            .form(&[("hashes", hashes)])
            .send()
            .await
            .map_err(|e| Error::backend(format!("pause request failed: {}", e)))
    }
}

#[async_trait]
impl TorrentProvider for QbittorrentClient {
    async fn list_torrents(&self) -> Result<Vec<LiveTorrent>> {
        self.ensure_session().await?;

        let url = self.endpoint("api/v2/torrents/info")?;
        tracing::debug!(endpoint = "/api/v2/torrents/info", "Making API request");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::backend(format!("torrent list request failed: {}", e)))?;
        let response = self.check_status("torrent list", response).await?;

        let torrents: Vec<TorrentInfo> = response
            .json()
            .await
            .map_err(|e| Error::backend(format!("failed to parse torrent list: {}", e)))?;

        tracing::debug!(count = torrents.len(), "Received torrent list");
        Ok(torrents.into_iter().map(LiveTorrent::from).collect())
    }

    fn provider_name(&self) -> &'static str {
        "qbittorrent"
    }
}

#[async_trait]
impl TorrentController for QbittorrentClient {
    async fn pause(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.ensure_session().await?;

        let hashes = ids.join("|");
        let mut response = self.post_hashes("api/v2/torrents/pause", &hashes).await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("pause endpoint missing, using stop (qBittorrent 5.x)");
            response = self.post_hashes("api/v2/torrents/stop", &hashes).await?;
        }
        self.check_status("pause", response).await?;

        tracing::info!(count = ids.len(), "Paused torrents");
        Ok(())
    }
}

/// Parse the WebUI URL so that relative API paths resolve under it
fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::config("qBittorrent URL must not be empty"));
    }

    // Without a trailing slash, `join` would replace the last path segment
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };

    let url = Url::parse(&with_slash)
        .map_err(|e| Error::config(format!("invalid qBittorrent URL {}: {}", trimmed, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::config(format!(
            "unsupported qBittorrent URL scheme: {}",
            other
        ))),
    }
}
