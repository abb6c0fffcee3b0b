//! Watched terms: storage and administration.

use crate::error::{Result, StoreError};
use crate::ingest::{ResubscribeTrigger, TermSource};
use crate::repository::Repository;
use crate::types::WatchedTerm;
use std::sync::Arc;

/// Which terms to list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeywordFilter {
    /// Every term, enabled or not (administration view).
    All,
    /// Only enabled terms (ingestion view).
    EnabledOnly,
}

/// The watched-term collection.
///
/// Terms are stored trimmed and lowercased; the normalized term is the
/// record id.
#[derive(Clone)]
pub struct KeywordStore {
    repo: Repository<WatchedTerm>,
}

impl KeywordStore {
    pub fn new(repo: Repository<WatchedTerm>) -> Self {
        Self { repo }
    }

    pub fn in_memory() -> Self {
        Self::new(Repository::in_memory("watched_terms"))
    }

    pub fn repository(&self) -> &Repository<WatchedTerm> {
        &self.repo
    }

    /// Add a term. Fails with `DuplicateKey` if it already exists.
    pub fn create(&self, term: &str, enabled: bool) -> Result<WatchedTerm> {
        let term = normalize(term)?;
        let mut keyword = WatchedTerm::new(term, enabled);
        self.repo.insert(&mut keyword)?;
        Ok(keyword)
    }

    pub fn get(&self, term: &str) -> Result<WatchedTerm> {
        self.repo.get(&normalize(term)?)
    }

    /// Terms sorted alphabetically.
    pub fn list(&self, filter: KeywordFilter) -> Result<Vec<WatchedTerm>> {
        match filter {
            KeywordFilter::All => self.repo.all(),
            KeywordFilter::EnabledOnly => self.repo.find(|k| k.enabled),
        }
    }

    /// Flip `enabled` through the optimistic update path.
    ///
    /// A concurrent toggle surfaces as `EntityConflict`; re-read and retry
    /// if that is the desired behaviour.
    pub fn toggle(&self, term: &str) -> Result<WatchedTerm> {
        let mut keyword = self.get(term)?;
        keyword.enabled = !keyword.enabled;
        self.repo.update(&mut keyword)?;
        tracing::info!(term = %keyword.term, enabled = keyword.enabled, "toggled watched term");
        Ok(keyword)
    }
}

impl TermSource for KeywordStore {
    fn enabled_terms(&self) -> Result<Vec<String>> {
        Ok(self
            .list(KeywordFilter::EnabledOnly)?
            .into_iter()
            .map(|k| k.term)
            .collect())
    }
}

fn normalize(term: &str) -> Result<String> {
    let term = term.trim();
    if term.is_empty() {
        return Err(StoreError::InvalidEntity("term must not be empty".into()));
    }
    Ok(term.to_lowercase())
}

/// Keyword administration for outer surfaces.
///
/// Every successful mutation asks the ingestion manager to re-subscribe so
/// the stream follows the new term set. Failed mutations change nothing and
/// trigger nothing.
#[derive(Clone)]
pub struct KeywordAdmin {
    store: Arc<KeywordStore>,
    trigger: ResubscribeTrigger,
}

impl KeywordAdmin {
    pub fn new(store: Arc<KeywordStore>, trigger: ResubscribeTrigger) -> Self {
        Self { store, trigger }
    }

    pub fn create(&self, term: &str, enabled: bool) -> Result<WatchedTerm> {
        let keyword = self.store.create(term, enabled)?;
        tracing::info!(term = %keyword.term, enabled, "created watched term");
        self.trigger.fire();
        Ok(keyword)
    }

    pub fn list(&self, filter: KeywordFilter) -> Result<Vec<WatchedTerm>> {
        self.store.list(filter)
    }

    pub fn toggle(&self, term: &str) -> Result<WatchedTerm> {
        let keyword = self.store.toggle(term)?;
        self.trigger.fire();
        Ok(keyword)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_list() {
        let store = KeywordStore::in_memory();
        store.create("Storm", true).unwrap();
        store.create("flood", true).unwrap();
        store.create("quake", false).unwrap();

        let all: Vec<String> = store
            .list(KeywordFilter::All)
            .unwrap()
            .into_iter()
            .map(|k| k.term)
            .collect();
        assert_eq!(all, vec!["flood", "quake", "storm"]);

        assert_eq!(store.enabled_terms().unwrap(), vec!["flood", "storm"]);
    }

    #[test]
    fn test_create_duplicate() {
        let store = KeywordStore::in_memory();
        store.create("storm", true).unwrap();

        let result = store.create(" STORM ", false);
        assert!(matches!(result, Err(StoreError::DuplicateKey(id)) if id == "storm"));
        assert!(store.get("storm").unwrap().enabled);
    }

    #[test]
    fn test_create_blank() {
        let store = KeywordStore::in_memory();
        assert!(matches!(store.create("   ", true), Err(StoreError::InvalidEntity(_))));
    }

    #[test]
    fn test_toggle() {
        let store = KeywordStore::in_memory();
        store.create("storm", true).unwrap();

        let toggled = store.toggle("storm").unwrap();
        assert!(!toggled.enabled);
        assert_eq!(toggled.record.version, 1);

        let toggled = store.toggle("storm").unwrap();
        assert!(toggled.enabled);
        assert_eq!(toggled.record.version, 2);
    }

    #[test]
    fn test_toggle_missing() {
        let store = KeywordStore::in_memory();
        assert!(matches!(store.toggle("storm"), Err(StoreError::EntityNotFound(_))));
    }

    #[test]
    fn test_admin_fires_trigger_only_on_success() {
        let (trigger, receiver) = ResubscribeTrigger::detached();
        let admin = KeywordAdmin::new(Arc::new(KeywordStore::in_memory()), trigger);

        admin.create("storm", true).unwrap();
        assert_eq!(receiver.try_iter().count(), 1);

        assert!(admin.create("storm", true).is_err());
        assert!(admin.toggle("flood").is_err());
        assert_eq!(receiver.try_iter().count(), 0);

        admin.toggle("storm").unwrap();
        assert_eq!(receiver.try_iter().count(), 1);
        assert!(admin.list(KeywordFilter::EnabledOnly).unwrap().is_empty());
    }
}
