//! Inbound event to captured record mapping.

use super::provider::InboundEvent;
use crate::error::MappingError;
use crate::types::{CapturedEvent, RecordMeta};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Build the record for an inbound event.
///
/// Matched terms are the union of the primary and quoted match sets,
/// trimmed and lowercased.
pub fn map_event(event: InboundEvent) -> Result<CapturedEvent, MappingError> {
    if event.provider_id.trim().is_empty() {
        return Err(MappingError::MissingProviderId);
    }

    let matched_terms: BTreeSet<String> = event
        .matched_terms
        .iter()
        .chain(event.quoted_matched_terms.iter())
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    let raw_digest = hex::encode(Sha256::digest(event.raw.as_bytes()));

    Ok(CapturedEvent {
        record: RecordMeta::new(),
        provider_id: event.provider_id,
        text: event.text,
        full_text: event.full_text,
        matched_terms,
        author: event.author,
        geo: event.geo,
        lang: event.lang,
        source_created_at: event.created_at,
        engagement: event.engagement,
        raw: event.raw,
        raw_digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Author, GeoPoint};

    fn inbound(terms: &[&str], quoted: &[&str]) -> InboundEvent {
        InboundEvent {
            provider_id: "1001".into(),
            text: "river flooding downtown".into(),
            matched_terms: terms.iter().map(|t| t.to_string()).collect(),
            quoted_matched_terms: quoted.iter().map(|t| t.to_string()).collect(),
            raw: r#"{"id":1001}"#.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_match() {
        let captured = map_event(inbound(&["flood"], &[])).unwrap();
        let expected: BTreeSet<String> = ["flood".to_string()].into_iter().collect();
        assert_eq!(captured.matched_terms, expected);
        assert_eq!(captured.provider_id, "1001");
        assert_eq!(captured.record.version, 0);
    }

    #[test]
    fn test_union_of_primary_and_quoted() {
        let captured = map_event(inbound(&["flood", "Storm"], &["storm", "quake"])).unwrap();
        let terms: Vec<&str> = captured.matched_terms.iter().map(String::as_str).collect();
        assert_eq!(terms, vec!["flood", "quake", "storm"]);
    }

    #[test]
    fn test_carries_identity_and_geo() {
        let mut event = inbound(&["flood"], &[]);
        event.author = Author {
            id: "42".into(),
            screen_name: "reporter".into(),
            name: "A Reporter".into(),
        };
        event.geo.point = Some(GeoPoint {
            latitude: 38.7,
            longitude: -9.1,
        });
        event.full_text = Some("river flooding downtown, roads closed".into());

        let captured = map_event(event).unwrap();
        assert_eq!(captured.author.screen_name, "reporter");
        assert_eq!(captured.geo.point.unwrap().latitude, 38.7);
        assert_eq!(captured.best_text(), "river flooding downtown, roads closed");
        assert_eq!(captured.raw, r#"{"id":1001}"#);
    }

    #[test]
    fn test_raw_digest() {
        let captured = map_event(inbound(&["flood"], &[])).unwrap();
        assert_eq!(captured.raw_digest.len(), 64);
        let again = map_event(inbound(&["flood"], &[])).unwrap();
        assert_eq!(captured.raw_digest, again.raw_digest);
        assert_ne!(captured.record.id, again.record.id);
    }

    #[test]
    fn test_missing_provider_id() {
        let mut event = inbound(&["flood"], &[]);
        event.provider_id = " ".into();
        assert_eq!(map_event(event), Err(MappingError::MissingProviderId));
    }
}
