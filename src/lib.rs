//! # termwatch
//!
//! Watches a live stream of public posts for a set of keywords and stores
//! every matching post.
//!
//! ## Core Concepts
//!
//! - **Watched terms**: keywords that can be created and toggled at runtime
//! - **Ingestion**: one filtered subscription kept in sync with the enabled terms
//! - **Captured events**: matching posts, stored and paged newest first
//! - **Repositories**: typed storage with optimistic, version-checked updates
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use termwatch::{
//!     CapturedEventStore, IngestConfig, IngestionManager, KeywordAdmin, KeywordStore,
//!     ProviderCredentials,
//! };
//!
//! let keywords = Arc::new(KeywordStore::in_memory());
//! let events = CapturedEventStore::in_memory();
//! let config = IngestConfig::with_credentials(ProviderCredentials::from_env());
//!
//! let manager = IngestionManager::new(config, provider, keywords.clone(), events.clone())?;
//! manager.start()?;
//!
//! let admin = KeywordAdmin::new(keywords, manager.trigger());
//! admin.create("flood", true)?;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod ingest;
pub mod keywords;
pub mod repository;
pub mod storage;
pub mod types;

// Re-exports
pub use config::{BackoffConfig, IngestConfig, ProviderCredentials, QueueConfig};
pub use error::{ConfigError, IngestError, MappingError, ProviderError, Result, StoreError};
pub use events::{CapturedEventStore, PageQuery, MAX_PAGE_SIZE};
pub use ingest::{
    IngestState, IngestStats, IngestionManager, InboundEvent, OpenRequest, QueueStats,
    ResubscribeTrigger, SignalSink, StreamHandle, StreamProvider, StreamSignal, TermSource,
};
pub use keywords::{KeywordAdmin, KeywordFilter, KeywordStore};
pub use repository::Repository;
pub use storage::{
    DocumentCollection, FileCollection, MemoryCollection, ReplaceOutcome, StoredDocument,
};
pub use types::*;
