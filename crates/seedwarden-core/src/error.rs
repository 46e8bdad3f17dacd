//! Error types for the seeding lifecycle manager
//!
//! Every fallible operation in the crate returns [`Result`]. The variants
//! follow the failure classes the service distinguishes at runtime: a
//! missing record, an unreachable backend, a persistence problem, and a
//! configuration rejected before anything starts.

use thiserror::Error;

/// Result type alias for seeding operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the seeding lifecycle manager
#[derive(Error, Debug)]
pub enum Error {
    /// The referenced torrent is not tracked
    #[error("Not tracked: {0}")]
    NotFound(String),

    /// Torrent provider or controller call failed (network, auth, timeout)
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Saving or loading the record table failed
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Configuration rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Caller supplied unusable arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a "not tracked" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the reconciliation loop should simply try again next tick
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::Persistence(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
