// # Persistence Backend Trait
//
// Defines where tracking records live between process restarts.
//
// The contract is deliberately coarse: `save` overwrites the whole table,
// `load` replaces the whole table. The record store decides when to call
// either; backends only move bytes.
//
// ## Implementations
//
// - File-based: `FilePersistence` (atomic JSON writes with backup)
// - In-memory: `MemoryPersistence` (tests, ephemeral deployments)

use async_trait::async_trait;

use crate::record::RecordMap;

/// Trait for persistence backends
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks. The
/// record store serializes its own saves, so backends need not order
/// concurrent writes themselves.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Overwrite the stored table with `records`
    async fn save(&self, records: &RecordMap) -> Result<(), crate::Error>;

    /// Read the stored table
    ///
    /// # Returns
    ///
    /// - `Ok(RecordMap)`: Stored records (empty if nothing was ever saved)
    /// - `Err(Error)`: Storage unreadable
    async fn load(&self) -> Result<RecordMap, crate::Error>;

    /// Name used in log lines
    fn backend_name(&self) -> &'static str;
}
