// # Persistence Backends
//
// This module provides implementations of the PersistenceBackend trait for
// different persistence strategies, plus a helper that picks one from
// configuration.

pub mod file;
pub mod memory;

pub use file::FilePersistence;
pub use memory::MemoryPersistence;

use std::sync::Arc;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::traits::PersistenceBackend;

/// Build the persistence backend described by `config`
pub async fn from_config(config: &StoreConfig) -> Result<Arc<dyn PersistenceBackend>> {
    config.validate()?;

    match config {
        StoreConfig::File { path } => Ok(Arc::new(FilePersistence::new(path).await?)),
        StoreConfig::Memory => Ok(Arc::new(MemoryPersistence::new())),
    }
}
