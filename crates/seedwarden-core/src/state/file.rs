// # File Persistence
//
// File-based implementation of PersistenceBackend with crash recovery.
//
// ## Purpose
//
// Keeps tracking records across daemon restarts and crashes, so a torrent
// that finished downloading yesterday still gets stopped on time today.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "records": {
//     "abc123": {
//       "id": "abc123",
//       "name": "Foo",
//       "download_start_time": "2025-01-09T12:00:00Z",
//       "completion": {
//         "completed_at": "2025-01-09T12:10:00Z",
//         "download_duration_ms": 600000,
//         "seeding_stop_time": "2025-01-09T13:50:00Z"
//       },
//       "auto_stopped": false,
//       "stopped_at": null,
//       "created_at": "2025-01-09T12:00:00Z",
//       "updated_at": "2025-01-09T12:10:00Z"
//     }
//   }
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;
use crate::record::RecordMap;
use crate::traits::persistence::PersistenceBackend;

/// Tracking file format version
/// Used for future migration if format changes
const TRACKING_FILE_VERSION: &str = "1.0";

/// File-based persistence with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use seedwarden_core::state::FilePersistence;
/// use seedwarden_core::traits::PersistenceBackend;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = FilePersistence::new("/var/lib/seedwarden/tracking.json").await?;
///     let records = backend.load().await?;
///     backend.save(&records).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FilePersistence {
    path: PathBuf,
}

/// Serializable tracking file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct TrackingFileFormat {
    version: String,
    records: RecordMap,
}

impl FilePersistence {
    /// Create a file backend, creating parent directories if needed
    ///
    /// Nothing is read here; [`PersistenceBackend::load`] does that.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create tracking directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(Self { path })
    }

    /// Path of the main tracking file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load records with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load main tracking file
    /// 2. If it does not parse, try loading backup
    /// 3. If backup also fails, start with empty table
    async fn load_with_recovery(path: &Path) -> Result<RecordMap, Error> {
        let err = match Self::load_file(path).await {
            Ok(records) => {
                tracing::debug!(records = records.len(), "Loaded tracking file");
                return Ok(records);
            }
            Err(err) => err,
        };

        // Read errors other than corruption are reported as-is
        if !matches!(err, Error::Json(_)) {
            return Err(err);
        }

        tracing::warn!(
            "Tracking file appears corrupted: {}. Attempting recovery from backup.",
            err
        );

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No backup file found. Starting with empty tracking table.");
            return Ok(RecordMap::new());
        }

        match Self::load_file(&backup_path).await {
            Ok(records) => {
                tracing::info!(records = records.len(), "Recovered tracking table from backup");

                if let Err(restore_err) = Self::restore_from_backup(path, &backup_path).await {
                    tracing::error!(
                        "Failed to restore tracking file from backup: {}",
                        restore_err
                    );
                }

                Ok(records)
            }
            Err(backup_err) => {
                tracing::error!(
                    "Backup also unreadable: {}. Starting with empty tracking table.",
                    backup_err
                );
                Ok(RecordMap::new())
            }
        }
    }

    /// Load records from one file
    ///
    /// A missing file is an empty table. Parse failures come back as
    /// [`Error::Json`] so the caller can tell corruption from I/O trouble.
    async fn load_file(path: &Path) -> Result<RecordMap, Error> {
        if !path.exists() {
            tracing::debug!("Tracking file does not exist: {}", path.display());
            return Ok(RecordMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::persistence(format!(
                "Failed to read tracking file {}: {}",
                path.display(),
                e
            ))
        })?;

        let tracking_file: TrackingFileFormat = serde_json::from_str(&content)?;

        if tracking_file.version != TRACKING_FILE_VERSION {
            tracing::warn!(
                "Tracking file version mismatch: expected {}, got {}. \
                Attempting to load anyway.",
                TRACKING_FILE_VERSION,
                tracking_file.version
            );
        }

        Ok(tracking_file.records)
    }

    /// Write records to file atomically
    async fn write_file(&self, records: &RecordMap) -> Result<(), Error> {
        let tracking_file = TrackingFileFormat {
            version: TRACKING_FILE_VERSION.to_string(),
            records: records.clone(),
        };

        let json = serde_json::to_string_pretty(&tracking_file)
            .map_err(|e| Error::persistence(format!("Failed to serialize records: {}", e)))?;

        // Write to temporary file first
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        // Create backup of current file (if it exists)
        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        // Atomic rename (temp -> actual)
        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::persistence(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!(
            records = records.len(),
            "Tracking table written to {}",
            self.path.display()
        );
        Ok(())
    }

    /// Restore tracking file from backup
    async fn restore_from_backup(path: &Path, backup_path: &Path) -> Result<(), Error> {
        fs::copy(backup_path, path).await.map_err(|e| {
            Error::persistence(format!(
                "Failed to restore from backup {} to {}: {}",
                backup_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!("Restored tracking file from backup");
        Ok(())
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    /// Get path to backup file
    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl PersistenceBackend for FilePersistence {
    async fn save(&self, records: &RecordMap) -> Result<(), Error> {
        self.write_file(records).await
    }

    async fn load(&self) -> Result<RecordMap, Error> {
        Self::load_with_recovery(&self.path).await
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SeedingRecord;
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    fn sample(id: &str, name: &str) -> SeedingRecord {
        let mut record = SeedingRecord::new(id, name, Utc::now() - Duration::minutes(30));
        record.mark_completed(Utc::now() - Duration::minutes(20), 10.0);
        record
    }

    fn table(records: &[SeedingRecord]) -> RecordMap {
        records.iter().map(|r| (r.id.clone(), r.clone())).collect()
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_table() {
        let dir = tempdir().unwrap();
        let backend = FilePersistence::new(dir.path().join("tracking.json"))
            .await
            .unwrap();

        let records = backend.load().await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tracking.json");
        let backend = FilePersistence::new(&path).await.unwrap();

        let records = table(&[sample("abc123", "Foo"), sample("def456", "Bar")]);
        backend.save(&records).await.unwrap();
        assert!(path.exists());

        // Fresh instance, as after a restart
        let reopened = FilePersistence::new(&path).await.unwrap();
        assert_eq!(reopened.load().await.unwrap(), records);
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("tracking.json");

        let backend = FilePersistence::new(&path).await.unwrap();
        backend.save(&RecordMap::new()).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_corruption_recovery() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tracking.json");
        let backend = FilePersistence::new(&path).await.unwrap();

        let first = table(&[sample("abc123", "Foo")]);
        backend.save(&first).await.unwrap();

        // Second write copies the first into the backup
        let second = table(&[sample("abc123", "Foo"), sample("def456", "Bar")]);
        backend.save(&second).await.unwrap();

        let backup_path = FilePersistence::backup_path(&path);
        assert!(backup_path.exists(), "Backup file should exist after write");

        fs::write(&path, b"corrupted json data").await.unwrap();

        let recovered = backend.load().await.unwrap();
        assert_eq!(
            recovered, first,
            "Backup should contain previous table, not latest"
        );

        // Main file was restored from the backup
        let again = backend.load().await.unwrap();
        assert_eq!(again, first);
    }

    #[tokio::test]
    async fn test_corruption_without_backup_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tracking.json");
        fs::write(&path, b"{ not json").await.unwrap();

        let backend = FilePersistence::new(&path).await.unwrap();
        assert!(backend.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_writes_keep_latest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tracking.json");
        let backend = FilePersistence::new(&path).await.unwrap();

        let mut records = RecordMap::new();
        for i in 0..10 {
            let record = sample(&format!("hash{}", i), &format!("Torrent {}", i));
            records.insert(record.id.clone(), record);
            backend.save(&records).await.unwrap();
        }

        let loaded = backend.load().await.unwrap();
        assert_eq!(loaded.len(), 10);
        assert_eq!(loaded, records);
    }
}
