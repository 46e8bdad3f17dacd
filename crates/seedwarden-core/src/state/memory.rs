// # Memory Persistence
//
// In-memory implementation of PersistenceBackend.
//
// ## Purpose
//
// Holds the last saved table in process memory. Useful for tests and for
// deployments where losing tracking data on restart is acceptable.
//
// ## Crash Behavior
//
// - All records are lost on restart/crash
// - Torrents tracked before the restart are no longer auto-stopped

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::Error;
use crate::record::RecordMap;
use crate::traits::persistence::PersistenceBackend;

/// In-memory persistence backend
///
/// Clones share the same storage, so a test can keep a handle and inspect
/// what the service saved.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    inner: Arc<RwLock<RecordMap>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryPersistence {
    /// Create a new empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-seeded with `records`, as if saved earlier
    pub fn with_records(records: RecordMap) -> Self {
        Self {
            inner: Arc::new(RwLock::new(records)),
            saves: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of completed `save` calls
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Copy of the last saved table
    pub async fn saved(&self) -> RecordMap {
        self.inner.read().await.clone()
    }
}

#[async_trait]
impl PersistenceBackend for MemoryPersistence {
    async fn save(&self, records: &RecordMap) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        *guard = records.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self) -> Result<RecordMap, Error> {
        Ok(self.inner.read().await.clone())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SeedingRecord;
    use chrono::Utc;

    #[tokio::test]
    async fn test_memory_backend_round_trip() {
        let backend = MemoryPersistence::new();
        assert!(backend.load().await.unwrap().is_empty());

        let mut records = RecordMap::new();
        records.insert(
            "abc123".to_string(),
            SeedingRecord::new("abc123", "Foo", Utc::now()),
        );
        backend.save(&records).await.unwrap();

        assert_eq!(backend.save_count(), 1);
        assert_eq!(backend.load().await.unwrap(), records);
    }

    #[tokio::test]
    async fn test_clones_share_storage() {
        let backend = MemoryPersistence::new();
        let observer = backend.clone();

        let mut records = RecordMap::new();
        records.insert(
            "abc123".to_string(),
            SeedingRecord::new("abc123", "Foo", Utc::now()),
        );
        backend.save(&records).await.unwrap();

        assert_eq!(observer.saved().await.len(), 1);
        assert_eq!(observer.save_count(), 1);
    }
}
