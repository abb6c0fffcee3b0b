//! Core types: the versioned record base and the two persisted entities.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since Unix epoch (UTC).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }

    pub fn from_secs(secs: i64) -> Self {
        Timestamp(secs.saturating_mul(1_000_000))
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Free-form metadata attached to a record.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Base fields shared by every persisted entity.
///
/// `version` starts at 0 on insert and grows by exactly one per successful
/// update. The store uses it as the compare-and-swap token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Opaque identifier, immutable after creation.
    pub id: String,
    pub created: Timestamp,
    pub updated: Timestamp,
    pub version: u64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl RecordMeta {
    /// A fresh record with a generated id.
    pub fn new() -> Self {
        Self::with_id(ulid::Ulid::new().to_string())
    }

    /// A fresh record with a caller-chosen id.
    pub fn with_id(id: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id: id.into(),
            created: now,
            updated: now,
            version: 0,
            metadata: Metadata::new(),
        }
    }
}

impl Default for RecordMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything the optimistic-concurrency store can persist.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn record(&self) -> &RecordMeta;

    fn record_mut(&mut self) -> &mut RecordMeta;

    fn id(&self) -> &str {
        &self.record().id
    }
}

/// A keyword the stream is filtered on.
///
/// The term doubles as the record id, so inserting the same term twice is
/// rejected by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WatchedTerm {
    pub record: RecordMeta,
    pub term: String,
    pub enabled: bool,
}

impl WatchedTerm {
    pub fn new(term: impl Into<String>, enabled: bool) -> Self {
        let term = term.into();
        Self {
            record: RecordMeta::with_id(term.clone()),
            term,
            enabled,
        }
    }
}

impl Entity for WatchedTerm {
    fn record(&self) -> &RecordMeta {
        &self.record
    }

    fn record_mut(&mut self) -> &mut RecordMeta {
        &mut self.record
    }
}

/// Who posted a captured event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub screen_name: String,
    pub name: String,
}

/// A point in WGS84 coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Where a captured event was posted from, when the provider knows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Geo {
    pub point: Option<GeoPoint>,
    pub place: Option<String>,
}

/// Engagement counters as reported at capture time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub reposts: u64,
    pub favorites: u64,
    pub replies: u64,
    pub quotes: u64,
}

/// An inbound stream event persisted by the ingestion manager.
///
/// Written once on arrival and never updated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapturedEvent {
    pub record: RecordMeta,
    /// Identifier assigned by the upstream provider.
    pub provider_id: String,
    pub text: String,
    pub full_text: Option<String>,
    /// Watched terms that caused the capture.
    pub matched_terms: BTreeSet<String>,
    pub author: Author,
    pub geo: Geo,
    pub lang: Option<String>,
    pub source_created_at: Option<Timestamp>,
    pub engagement: Engagement,
    /// Raw serialized payload as received.
    pub raw: String,
    /// SHA-256 of `raw`, hex encoded.
    pub raw_digest: String,
}

impl CapturedEvent {
    /// Longest available text.
    pub fn best_text(&self) -> &str {
        match self.full_text.as_deref() {
            Some(full) if !full.is_empty() => full,
            _ => &self.text,
        }
    }

    pub fn matches_term(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        self.matched_terms.contains(&term)
    }
}

impl Entity for CapturedEvent {
    fn record(&self) -> &RecordMeta {
        &self.record
    }

    fn record_mut(&mut self) -> &mut RecordMeta {
        &mut self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_meta_defaults() {
        let meta = RecordMeta::new();
        assert!(!meta.id.is_empty());
        assert_eq!(meta.version, 0);
        assert_eq!(meta.created, meta.updated);
        assert!(meta.metadata.is_empty());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = RecordMeta::new();
        let b = RecordMeta::new();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_watched_term_uses_term_as_id() {
        let term = WatchedTerm::new("storm", true);
        assert_eq!(term.id(), "storm");
        assert!(term.enabled);
    }

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp::from_secs(1) < Timestamp::from_secs(2));
        assert_eq!(Timestamp::from_secs(3).as_micros(), 3_000_000);
    }

    #[test]
    fn test_record_meta_json_shape() {
        let mut meta = RecordMeta::with_id("abc");
        meta.metadata.insert("source".into(), serde_json::json!("test"));
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["id"], "abc");
        assert_eq!(value["version"], 0);
        assert_eq!(value["metadata"]["source"], "test");
    }

    #[test]
    fn test_matches_term_normalizes_query() {
        let event = CapturedEvent {
            record: RecordMeta::new(),
            provider_id: "1".into(),
            text: "flooding".into(),
            full_text: None,
            matched_terms: ["flood".to_string()].into_iter().collect(),
            author: Author::default(),
            geo: Geo::default(),
            lang: None,
            source_created_at: None,
            engagement: Engagement::default(),
            raw: String::new(),
            raw_digest: String::new(),
        };
        assert!(event.matches_term("flood"));
        assert!(event.matches_term(" Flood "));
        assert!(!event.matches_term("storm"));
    }
}
