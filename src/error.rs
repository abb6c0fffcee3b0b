//! Error types for the store, configuration and the streaming provider.

use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// A concurrent writer already stored a version at or above the attempted one.
    #[error("Entity conflict on {id}: attempted version {attempted}, stored version {stored}")]
    EntityConflict {
        id: String,
        attempted: u64,
        stored: u64,
    },

    #[error("Invalid entity: {0}")]
    InvalidEntity(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Collection is locked by another process")]
    Locked,
}

impl StoreError {
    /// True for the three outcomes of the optimistic write protocol.
    pub fn is_write_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::DuplicateKey(_)
                | StoreError::EntityNotFound(_)
                | StoreError::EntityConflict { .. }
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Configuration problems. These are fatal: they are reported once, when the
/// ingestion manager is constructed, and never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("Invalid backoff: {0}")]
    InvalidBackoff(String),

    #[error("Invalid queue settings: {0}")]
    InvalidQueue(String),

    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures reported by a streaming provider. The ingestion manager recovers
/// from all of them through its backoff loop.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Failed to open stream: {0}")]
    Open(String),

    #[error("Stream rejected by provider: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors starting or running the ingestion manager.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Ingestion is already running")]
    AlreadyRunning,
}

/// An inbound event that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("Event has no provider id")]
    MissingProviderId,
}
