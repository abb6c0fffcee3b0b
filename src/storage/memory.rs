//! In-memory document collection.

use super::{decide_replace, DocumentCollection, ReplaceOutcome, StoredDocument};
use crate::error::{Result, StoreError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Documents held in a map behind one lock. Every primitive takes the write
/// guard once, which is what makes it atomic.
pub struct MemoryCollection {
    name: String,
    documents: RwLock<BTreeMap<String, StoredDocument>>,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: RwLock::new(BTreeMap::new()),
        }
    }
}

impl DocumentCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn insert_document(&self, doc: StoredDocument) -> Result<()> {
        let mut documents = self.documents.write();
        if documents.contains_key(&doc.id) {
            return Err(StoreError::DuplicateKey(doc.id));
        }
        documents.insert(doc.id.clone(), doc);
        Ok(())
    }

    fn replace_if_newer(&self, doc: StoredDocument) -> Result<ReplaceOutcome> {
        let mut documents = self.documents.write();
        let outcome = decide_replace(&documents, &doc);
        if outcome == ReplaceOutcome::Replaced {
            documents.insert(doc.id.clone(), doc);
        }
        Ok(outcome)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<StoredDocument>> {
        Ok(self.documents.read().get(id).cloned())
    }

    fn find_all(&self) -> Result<Vec<StoredDocument>> {
        Ok(self.documents.read().values().cloned().collect())
    }

    fn delete_by_id(&self, id: &str) -> Result<Option<StoredDocument>> {
        Ok(self.documents.write().remove(id))
    }

    fn len(&self) -> usize {
        self.documents.read().len()
    }
}
