//! Document storage engines.
//!
//! The optimistic-concurrency repository delegates all write correctness to
//! the primitives defined here. Each engine must execute
//! [`DocumentCollection::insert_document`] and
//! [`DocumentCollection::replace_if_newer`] as single atomic steps; the
//! repository never holds a lock of its own across them.
//!
//! Two engines are provided:
//! - [`MemoryCollection`]: a map behind one `RwLock`
//! - [`FileCollection`]: the same map, made durable by an append-only journal

mod file;
mod journal;
mod memory;

pub use file::FileCollection;
pub use memory::MemoryCollection;

use crate::error::Result;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An encoded entity as the engine sees it.
///
/// The engine only inspects `id` and `version`; `body` is opaque.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub version: u64,
    pub updated: Timestamp,
    pub body: Vec<u8>,
}

/// Result of a conditional replace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The stored version was older; the document was replaced.
    Replaced,
    /// No document with that id exists.
    NotFound,
    /// A document exists but its version is already at or above the
    /// attempted one.
    Stale { stored_version: u64 },
}

/// A named collection of documents keyed by id.
pub trait DocumentCollection: Send + Sync {
    /// Collection name, used in logs.
    fn name(&self) -> &str;

    /// Insert a new document. Fails with `DuplicateKey` if the id exists.
    fn insert_document(&self, doc: StoredDocument) -> Result<()>;

    /// Replace the document with the same id if and only if its stored
    /// version is strictly lower than `doc.version`.
    fn replace_if_newer(&self, doc: StoredDocument) -> Result<ReplaceOutcome>;

    fn find_by_id(&self, id: &str) -> Result<Option<StoredDocument>>;

    /// All documents, ordered by id.
    fn find_all(&self) -> Result<Vec<StoredDocument>>;

    /// Remove a document, returning it if it existed.
    fn delete_by_id(&self, id: &str) -> Result<Option<StoredDocument>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The compare-and-swap decision shared by every engine. Callers must hold
/// the engine's write guard while deciding and applying.
pub(crate) fn decide_replace(
    documents: &BTreeMap<String, StoredDocument>,
    doc: &StoredDocument,
) -> ReplaceOutcome {
    match documents.get(&doc.id) {
        None => ReplaceOutcome::NotFound,
        Some(stored) if stored.version < doc.version => ReplaceOutcome::Replaced,
        Some(stored) => ReplaceOutcome::Stale {
            stored_version: stored.version,
        },
    }
}
