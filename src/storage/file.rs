//! Durable document collection: an in-memory map rebuilt from a journal.

use super::journal::{Journal, JournalEntry};
use super::{decide_replace, DocumentCollection, ReplaceOutcome, StoredDocument};
use crate::error::{Result, StoreError};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// A collection stored in its own directory.
///
/// Directory layout:
/// - `collection.journal`: every mutation, replayed on open
/// - `LOCK`: exclusive lock held for the lifetime of the collection
///
/// Mutations append to the journal while holding the map's write guard, so
/// a conditional replace is decided, journaled and applied as one step.
pub struct FileCollection {
    name: String,
    path: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: File,

    documents: RwLock<BTreeMap<String, StoredDocument>>,

    /// Always locked after `documents`.
    journal: Mutex<Journal>,
}

impl FileCollection {
    /// Default sync interval: fsync every 100 journal writes.
    const DEFAULT_SYNC_INTERVAL: u64 = 100;

    /// Open or create a collection at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_sync_interval(path, Self::DEFAULT_SYNC_INTERVAL)
    }

    /// Open or create a collection with a custom sync interval.
    /// - sync_interval = 1: fsync every write (safest, slowest)
    /// - sync_interval = 100: fsync every 100 writes
    pub fn open_with_sync_interval(path: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let lock_file = Self::acquire_lock(&path)?;

        let (journal, entries) = Journal::open(path.join("collection.journal"), sync_interval)?;

        let mut documents = BTreeMap::new();
        let replayed = entries.len();
        for entry in entries {
            match entry {
                JournalEntry::Put(doc) => {
                    documents.insert(doc.id.clone(), doc);
                }
                JournalEntry::Delete { id } => {
                    documents.remove(&id);
                }
            }
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "collection".to_string());

        tracing::debug!(
            collection = %name,
            entries = replayed,
            documents = documents.len(),
            "opened file collection"
        );

        Ok(Self {
            name,
            path,
            _lock_file: lock_file,
            documents: RwLock::new(documents),
            journal: Mutex::new(journal),
        })
    }

    /// Base path of the collection.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Force all journal writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.journal.lock().sync()
    }

    /// Rewrite the journal so it holds one entry per live document.
    pub fn compact(&self) -> Result<()> {
        let documents = self.documents.write();
        let mut journal = self.journal.lock();
        journal.rewrite(documents.values())?;
        tracing::debug!(collection = %self.name, documents = documents.len(), "compacted journal");
        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl DocumentCollection for FileCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn insert_document(&self, doc: StoredDocument) -> Result<()> {
        let mut documents = self.documents.write();
        if documents.contains_key(&doc.id) {
            return Err(StoreError::DuplicateKey(doc.id));
        }

        self.journal.lock().append(&JournalEntry::Put(doc.clone()))?;
        documents.insert(doc.id.clone(), doc);
        Ok(())
    }

    fn replace_if_newer(&self, doc: StoredDocument) -> Result<ReplaceOutcome> {
        let mut documents = self.documents.write();
        let outcome = decide_replace(&documents, &doc);
        if outcome == ReplaceOutcome::Replaced {
            self.journal.lock().append(&JournalEntry::Put(doc.clone()))?;
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
        let mut documents = self.documents.write();
        if !documents.contains_key(id) {
            return Ok(None);
        }

        self.journal.lock().append(&JournalEntry::Delete { id: id.to_string() })?;
        Ok(documents.remove(id))
    }

    fn len(&self) -> usize {
        self.documents.read().len()
    }
}

impl Drop for FileCollection {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.journal.get_mut().sync();
    }
}
