// # seedwardend - Seeding Lifecycle Daemon
//
// This is a thin integration layer: all seeding logic lives in
// seedwarden-core, all backend I/O in seedwarden-qbittorrent.
//
// The seedwardend daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Wiring the qBittorrent client and persistence into a SeedingService
// 4. Starting the service and stopping it cleanly on SIGTERM/SIGINT
//
// The daemon has no command surface of its own: it never starts or stops
// tracking, force-stops, or reports status. It reconciles the records found
// in the tracking file at startup. That file is written by an application
// embedding seedwarden-core (chat bot, CLI, dashboard), and only while the
// daemon is down: the daemon reads it once and then overwrites it. With an
// in-memory store there is nothing to reconcile.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Seeding
// - `SEEDING_TIME_MULTIPLIER`: Seeding budget = multiplier × download time (default 10)
// - `SEEDING_CHECK_INTERVAL_SECS`: Reconciliation interval (default 300)
// - `SEEDING_BACKEND_TIMEOUT_SECS`: Deadline for each backend call (default 30)
// - `SEEDING_PRUNE_AFTER_MISSING_TICKS`: Drop records absent this many ticks (default 0, off)
// - `SEEDING_TRACKING_DATA_FILE`: Tracking file path; empty keeps records in memory
//
// ### qBittorrent
// - `QBITTORRENT_URL`: WebUI URL (default http://localhost:8080)
// - `QBITTORRENT_USERNAME`: WebUI user (default admin)
// - `QBITTORRENT_PASSWORD`: WebUI password (required)
//
// ### Logging
// - `SEEDWARDEN_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export QBITTORRENT_URL=http://nas.local:8080
// export QBITTORRENT_PASSWORD=your_password
// export SEEDING_TIME_MULTIPLIER=5
// export SEEDING_TRACKING_DATA_FILE=/var/lib/seedwarden/tracking.json
//
// seedwardend
// ```

use anyhow::{Context, Result};
use seedwarden_core::{SeedingConfig, SeedingEvent, SeedingService, StoreConfig, SystemClock};
use seedwarden_qbittorrent::{QbittorrentClient, QbittorrentConfig};
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// How long a clean stop (last tick + final save) may take
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum SeedwardenExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<SeedwardenExitCode> for ExitCode {
    fn from(code: SeedwardenExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    seeding: SeedingConfig,
    qbittorrent: QbittorrentConfig,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `get`, which returns a variable's value
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut seeding = SeedingConfig::new();

        if let Some(multiplier) = parse_var(&get, "SEEDING_TIME_MULTIPLIER")? {
            seeding.time_multiplier = multiplier;
        }
        if let Some(secs) = parse_var(&get, "SEEDING_CHECK_INTERVAL_SECS")? {
            seeding.check_interval_secs = secs;
        }
        if let Some(secs) = parse_var(&get, "SEEDING_BACKEND_TIMEOUT_SECS")? {
            seeding.backend_timeout_secs = secs;
        }
        if let Some(ticks) = parse_var(&get, "SEEDING_PRUNE_AFTER_MISSING_TICKS")? {
            seeding.prune_after_missing_ticks = ticks;
        }
        if let Some(path) = get("SEEDING_TRACKING_DATA_FILE") {
            seeding.store = if path.trim().is_empty() {
                StoreConfig::Memory
            } else {
                StoreConfig::File { path }
            };
        }

        let password = get("QBITTORRENT_PASSWORD").context(
            "QBITTORRENT_PASSWORD is required. \
            Set it via: export QBITTORRENT_PASSWORD=your_password",
        )?;

        let qbittorrent = QbittorrentConfig {
            url: get("QBITTORRENT_URL").unwrap_or_else(|| "http://localhost:8080".to_string()),
            username: get("QBITTORRENT_USERNAME").unwrap_or_else(|| "admin".to_string()),
            password,
            timeout_secs: seeding.backend_timeout_secs,
        };

        Ok(Self {
            seeding,
            qbittorrent,
            log_level: get("SEEDWARDEN_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.seeding
            .validate()
            .context("Invalid seeding configuration")?;

        if self.qbittorrent.username.is_empty() {
            anyhow::bail!("QBITTORRENT_USERNAME cannot be empty");
        }

        let url = self.qbittorrent.url.as_str();
        if !url.starts_with("https://") && !url.starts_with("http://") {
            anyhow::bail!("QBITTORRENT_URL must use HTTP or HTTPS scheme. Got: {}", url);
        }

        if let StoreConfig::File { path } = &self.seeding.store
            && let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && parent.is_file()
        {
            anyhow::bail!(
                "SEEDING_TRACKING_DATA_FILE parent is a file, not a directory: {}",
                parent.display()
            );
        }

        parse_log_level(&self.log_level)?;
        Ok(())
    }
}

/// Parse `key` if set; a malformed value is an error, not a default
fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e)),
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "SEEDWARDEN_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            level
        ),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return SeedwardenExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return SeedwardenExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = parse_log_level(&config.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return SeedwardenExitCode::ConfigError.into();
    }

    info!("Starting seedwardend daemon");
    info!(
        qbittorrent = %config.qbittorrent.url,
        time_multiplier = config.seeding.time_multiplier,
        check_interval_secs = config.seeding.check_interval_secs,
        "Configuration loaded"
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return SeedwardenExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            SeedwardenExitCode::RuntimeError
        } else {
            SeedwardenExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon until a shutdown signal arrives
async fn run_daemon(config: Config) -> Result<()> {
    let client = Arc::new(
        QbittorrentClient::from_config(&config.qbittorrent)
            .context("Failed to create qBittorrent client")?,
    );
    let persistence = seedwarden_core::state::from_config(&config.seeding.store)
        .await
        .context("Failed to open tracking data store")?;

    let (service, events) = SeedingService::new(
        config.seeding,
        client.clone(),
        client,
        persistence,
        Arc::new(SystemClock),
    )?;
    let service = Arc::new(service);

    let event_logger = tokio::spawn(log_events(events));

    service.start().await?;
    info!("Daemon initialized successfully");

    let signal = wait_for_shutdown().await?;
    info!("Received shutdown signal: {}", signal);
    info!("Shutting down daemon");

    let stopped = tokio::time::timeout(SHUTDOWN_TIMEOUT, service.stop())
        .await
        .map_err(|_| anyhow::anyhow!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT))?;

    // The service owns the only sender; dropping it ends the logger
    drop(service);
    if let Err(e) = event_logger.await {
        warn!("Event logger ended abnormally: {}", e);
    }

    stopped?;
    Ok(())
}

/// Log lifecycle events until the service is dropped
async fn log_events(mut events: mpsc::Receiver<SeedingEvent>) {
    while let Some(event) = events.recv().await {
        debug!(?event, "Seeding event");
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(signal)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
