//! Optimistic-concurrency repository over a document collection.
//!
//! Writes never take a lock in this layer. `update` bumps the entity's
//! version and hands the engine a single conditional replace: the write
//! lands only if the stored version is still lower. Whoever loses a race
//! gets [`StoreError::EntityConflict`] and must re-read before retrying;
//! the repository itself never retries.

use crate::error::{Result, StoreError};
use crate::storage::{DocumentCollection, MemoryCollection, ReplaceOutcome, StoredDocument};
use crate::types::{Entity, Timestamp};
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed access to one collection.
pub struct Repository<E: Entity> {
    collection: Arc<dyn DocumentCollection>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            collection: Arc::clone(&self.collection),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Repository<E> {
    pub fn new(collection: Arc<dyn DocumentCollection>) -> Self {
        Self {
            collection,
            _entity: PhantomData,
        }
    }

    /// Repository backed by a fresh [`MemoryCollection`].
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryCollection::new(name)))
    }

    /// The underlying collection.
    pub fn collection(&self) -> &Arc<dyn DocumentCollection> {
        &self.collection
    }

    /// Insert a new entity.
    ///
    /// Sets `created` and `updated` to now and `version` to 0. Fails with
    /// `DuplicateKey` if the id is taken, in which case the stored document
    /// is untouched and the entity's fields are restored.
    pub fn insert(&self, entity: &mut E) -> Result<()> {
        if entity.id().trim().is_empty() {
            return Err(StoreError::InvalidEntity("id must not be empty".into()));
        }

        let before = entity.record().clone();
        let now = Timestamp::now();
        {
            let record = entity.record_mut();
            record.created = now;
            record.updated = now;
            record.version = 0;
        }

        let result = Self::encode(entity).and_then(|doc| self.collection.insert_document(doc));
        match result {
            Ok(()) => {
                tracing::debug!(collection = self.collection.name(), id = entity.id(), "inserted");
                Ok(())
            }
            Err(e) => {
                *entity.record_mut() = before;
                if let StoreError::DuplicateKey(_) = e {
                    tracing::warn!(
                        collection = self.collection.name(),
                        id = entity.id(),
                        "insert rejected: duplicate key"
                    );
                }
                Err(e)
            }
        }
    }

    /// Write back a modified entity.
    ///
    /// On success the entity's version has grown by one and `updated` is now.
    /// On any failure both are rolled back to their values before the call.
    pub fn update(&self, entity: &mut E) -> Result<()> {
        if entity.id().trim().is_empty() {
            return Err(StoreError::InvalidEntity("id must not be empty".into()));
        }

        let prev_version = entity.record().version;
        let prev_updated = entity.record().updated;

        let attempted = prev_version + 1;
        {
            let record = entity.record_mut();
            record.version = attempted;
            record.updated = Timestamp::now();
        }

        let outcome =
            Self::encode(entity).and_then(|doc| self.collection.replace_if_newer(doc));

        let error = match outcome {
            Ok(ReplaceOutcome::Replaced) => {
                tracing::debug!(
                    collection = self.collection.name(),
                    id = entity.id(),
                    version = attempted,
                    "updated"
                );
                return Ok(());
            }
            Ok(ReplaceOutcome::NotFound) => StoreError::EntityNotFound(entity.id().to_string()),
            Ok(ReplaceOutcome::Stale { stored_version }) => {
                tracing::debug!(
                    collection = self.collection.name(),
                    id = entity.id(),
                    attempted,
                    stored = stored_version,
                    "update lost version race"
                );
                StoreError::EntityConflict {
                    id: entity.id().to_string(),
                    attempted,
                    stored: stored_version,
                }
            }
            Err(e) => e,
        };

        let record = entity.record_mut();
        record.version = prev_version;
        record.updated = prev_updated;
        Err(error)
    }

    /// Fetch an entity by id.
    pub fn get(&self, id: &str) -> Result<E> {
        match self.collection.find_by_id(id)? {
            Some(doc) => Self::decode(&doc),
            None => Err(StoreError::EntityNotFound(id.to_string())),
        }
    }

    /// Delete an entity by id, returning what was stored.
    pub fn delete(&self, id: &str) -> Result<E> {
        match self.collection.delete_by_id(id)? {
            Some(doc) => {
                tracing::debug!(collection = self.collection.name(), id, "deleted");
                Self::decode(&doc)
            }
            None => Err(StoreError::EntityNotFound(id.to_string())),
        }
    }

    /// Delete the stored copy of `entity`.
    pub fn delete_entity(&self, entity: &E) -> Result<E> {
        self.delete(entity.id())
    }

    /// All entities matching `predicate`, in id order.
    pub fn find<F>(&self, predicate: F) -> Result<Vec<E>>
    where
        F: Fn(&E) -> bool,
    {
        let mut matches = Vec::new();
        for doc in self.collection.find_all()? {
            let entity = Self::decode(&doc)?;
            if predicate(&entity) {
                matches.push(entity);
            }
        }
        Ok(matches)
    }

    /// Every entity in the collection, in id order.
    pub fn all(&self) -> Result<Vec<E>> {
        self.find(|_| true)
    }

    pub fn count(&self) -> usize {
        self.collection.len()
    }

    fn encode(entity: &E) -> Result<StoredDocument> {
        let record = entity.record();
        Ok(StoredDocument {
            id: record.id.clone(),
            version: record.version,
            updated: record.updated,
            body: serde_json::to_vec(entity)?,
        })
    }

    fn decode(doc: &StoredDocument) -> Result<E> {
        serde_json::from_slice(&doc.body).map_err(|e| StoreError::Deserialization(e.to_string()))
    }
}
