//! Captured event storage and the record query surface.

use crate::error::{Result, StoreError};
use crate::repository::Repository;
use crate::types::{CapturedEvent, Timestamp};

/// Largest page the query surface will return.
pub const MAX_PAGE_SIZE: usize = 1000;

/// A page request over captured events, newest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageQuery {
    /// Zero-based page number.
    pub page: usize,
    /// Records per page (1..=MAX_PAGE_SIZE).
    pub page_size: usize,
    /// Only records updated at or after this instant.
    pub after: Option<Timestamp>,
    /// Only records updated at or before this instant.
    pub before: Option<Timestamp>,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: 0,
            page_size: 100,
            after: None,
            before: None,
        }
    }
}

impl PageQuery {
    pub fn page(page: usize, page_size: usize) -> Self {
        Self {
            page,
            page_size,
            ..Default::default()
        }
    }

    pub fn with_after(mut self, after: Timestamp) -> Self {
        self.after = Some(after);
        self
    }

    pub fn with_before(mut self, before: Timestamp) -> Self {
        self.before = Some(before);
        self
    }

    /// Reject empty or oversized pages, bounds in the future, and inverted
    /// ranges.
    pub fn validate(&self, now: Timestamp) -> Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(StoreError::InvalidQuery(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        if self.after.is_some_and(|t| t > now) {
            return Err(StoreError::InvalidQuery("after cannot be in the future".into()));
        }
        if self.before.is_some_and(|t| t > now) {
            return Err(StoreError::InvalidQuery("before cannot be in the future".into()));
        }
        if let (Some(after), Some(before)) = (self.after, self.before) {
            if after > before {
                return Err(StoreError::InvalidQuery("after must not be later than before".into()));
            }
        }
        Ok(())
    }

    fn contains(&self, updated: Timestamp) -> bool {
        self.after.map_or(true, |after| updated >= after)
            && self.before.map_or(true, |before| updated <= before)
    }
}

/// Captured events collection: the ingestion write path plus read queries
/// for external collaborators.
#[derive(Clone)]
pub struct CapturedEventStore {
    repo: Repository<CapturedEvent>,
}

impl CapturedEventStore {
    pub fn new(repo: Repository<CapturedEvent>) -> Self {
        Self { repo }
    }

    pub fn in_memory() -> Self {
        Self::new(Repository::in_memory("captured_events"))
    }

    pub fn repository(&self) -> &Repository<CapturedEvent> {
        &self.repo
    }

    /// Store a freshly captured event.
    pub fn insert(&self, event: &mut CapturedEvent) -> Result<()> {
        self.repo.insert(event)
    }

    pub fn get(&self, id: &str) -> Result<CapturedEvent> {
        self.repo.get(id)
    }

    pub fn count(&self) -> usize {
        self.repo.count()
    }

    /// One page of events, most recently updated first.
    pub fn page(&self, query: &PageQuery) -> Result<Vec<CapturedEvent>> {
        query.validate(Timestamp::now())?;

        let mut events = self.repo.find(|e| query.contains(e.record.updated))?;
        sort_newest_first(&mut events);

        Ok(events
            .into_iter()
            .skip(query.page.saturating_mul(query.page_size))
            .take(query.page_size)
            .collect())
    }

    /// Every event whose matched-term set contains `term`, newest first.
    pub fn with_term(&self, term: &str) -> Result<Vec<CapturedEvent>> {
        let mut events = self.repo.find(|e| e.matches_term(term))?;
        sort_newest_first(&mut events);
        Ok(events)
    }
}

fn sort_newest_first(events: &mut [CapturedEvent]) {
    events.sort_by(|a, b| {
        b.record
            .updated
            .cmp(&a.record.updated)
            .then_with(|| b.record.id.cmp(&a.record.id))
    });
}
