//! The shared event filter.
//!
//! One filter is loaded at startup and shared read-only by every relay worker
//! and the dispatcher. Workers turn it into a `REQ` filter bounded by their
//! cursor; the dispatcher re-applies it locally because relays are free to
//! ignore parts of a subscription filter.

use crate::error::{Error, Result};
use nostr::{Event, Filter, Kind, PublicKey, SingleLetterTag, Timestamp};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Default result limit per pagination window.
pub const DEFAULT_LIMIT: usize = 500;

/// Event kinds, authors, tags, and result limit accepted by the harvester.
///
/// Empty lists mean "no constraint" for that field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EventFilter {
    /// Accepted event kinds.
    pub kinds: Vec<u16>,

    /// Accepted authors as 64-character hex public keys.
    pub authors: Vec<String>,

    /// Single-letter tag constraints, e.g. `t = ["nostr"]`.
    pub tags: BTreeMap<String, Vec<String>>,

    /// Maximum number of events requested per window.
    pub limit: usize,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            kinds: Vec::new(),
            authors: Vec::new(),
            tags: BTreeMap::new(),
            limit: DEFAULT_LIMIT,
        }
    }
}

impl EventFilter {
    /// Validate the filter and bring it into canonical form.
    ///
    /// Authors are lowercased and must parse as public keys, tag names must be
    /// a single ASCII letter, and the limit is clamped to at least 1.
    pub fn normalized(mut self) -> Result<Self> {
        for author in &mut self.authors {
            *author = author.trim().to_lowercase();
            PublicKey::from_hex(author.as_str()).map_err(|e| Error::InvalidFilter {
                field: "authors",
                reason: format!("{author}: {e}"),
            })?;
        }
        for name in self.tags.keys() {
            single_letter_tag(name)?;
        }
        self.limit = self.limit.max(1);
        Ok(self)
    }

    /// Number of events that may be in flight at once.
    ///
    /// Sizes the aggregated stream, so it is never zero.
    pub fn capacity(&self) -> usize {
        self.limit.max(1)
    }

    /// Build the relay subscription filter for a window ending at `until`.
    pub fn to_request(&self, until: Timestamp) -> Result<Filter> {
        let mut filter = Filter::new().until(until).limit(self.capacity());

        if !self.kinds.is_empty() {
            filter = filter.kinds(self.kinds.iter().copied().map(Kind::from));
        }

        if !self.authors.is_empty() {
            let authors = self
                .authors
                .iter()
                .map(|a| PublicKey::from_hex(a.as_str()))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::InvalidFilter {
                    field: "authors",
                    reason: e.to_string(),
                })?;
            filter = filter.authors(authors);
        }

        for (name, values) in &self.tags {
            if values.is_empty() {
                continue;
            }
            filter = filter.custom_tags(single_letter_tag(name)?, values.iter().cloned());
        }

        Ok(filter)
    }

    /// Check whether an event satisfies this filter.
    ///
    /// Mirrors NIP-01 semantics: every non-empty field must match, and for
    /// each tag constraint the event must carry at least one tag with that
    /// name whose value is listed.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind.as_u16()) {
            return false;
        }

        if !self.authors.is_empty() {
            let author = event.pubkey.to_hex();
            if !self.authors.iter().any(|a| *a == author) {
                return false;
            }
        }

        self.tags
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .all(|(name, values)| {
                event.tags.iter().any(|tag| match tag.as_slice() {
                    [tag_name, value, ..] => tag_name == name && values.contains(value),
                    _ => false,
                })
            })
    }
}

fn single_letter_tag(name: &str) -> Result<SingleLetterTag> {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => {
            SingleLetterTag::from_char(c).map_err(|e| Error::InvalidFilter {
                field: "tags",
                reason: format!("{name}: {e}"),
            })
        }
        _ => Err(Error::InvalidFilter {
            field: "tags",
            reason: format!("tag name '{name}' must be a single letter"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr::{EventBuilder, Keys, Tag};

    fn note(keys: &Keys, kind: Kind, tags: Vec<Tag>) -> Event {
        let mut builder =
            EventBuilder::new(kind, "hello").custom_created_at(Timestamp::from(1_700_000_000));
        for tag in tags {
            builder = builder.tag(tag);
        }
        builder.sign_with_keys(keys).unwrap()
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let filter: EventFilter = toml::from_str("kinds = [1, 7]").unwrap();
        assert_eq!(filter.kinds, vec![1, 7]);
        assert!(filter.authors.is_empty());
        assert!(filter.tags.is_empty());
        assert_eq!(filter.limit, DEFAULT_LIMIT);
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let keys = Keys::generate();
        let filter = EventFilter::default();
        assert!(filter.matches(&note(&keys, Kind::TextNote, vec![])));
        assert!(filter.matches(&note(&keys, Kind::Reaction, vec![])));
    }

    #[test]
    fn test_kind_mismatch() {
        let keys = Keys::generate();
        let filter = EventFilter {
            kinds: vec![1],
            ..Default::default()
        };
        assert!(filter.matches(&note(&keys, Kind::TextNote, vec![])));
        assert!(!filter.matches(&note(&keys, Kind::Reaction, vec![])));
    }

    #[test]
    fn test_author_match_is_case_insensitive_after_normalizing() {
        let keys = Keys::generate();
        let other = Keys::generate();
        let filter = EventFilter {
            authors: vec![keys.public_key().to_hex().to_uppercase()],
            ..Default::default()
        }
        .normalized()
        .unwrap();

        assert!(filter.matches(&note(&keys, Kind::TextNote, vec![])));
        assert!(!filter.matches(&note(&other, Kind::TextNote, vec![])));
    }

    #[test]
    fn test_tag_constraint() {
        let keys = Keys::generate();
        let filter = EventFilter {
            tags: BTreeMap::from([("t".to_string(), vec!["nostr".to_string()])]),
            ..Default::default()
        };

        assert!(filter.matches(&note(&keys, Kind::TextNote, vec![Tag::hashtag("nostr")])));
        assert!(!filter.matches(&note(&keys, Kind::TextNote, vec![Tag::hashtag("bitcoin")])));
        assert!(!filter.matches(&note(&keys, Kind::TextNote, vec![])));
    }

    #[test]
    fn test_normalized_rejects_bad_input() {
        let bad_author = EventFilter {
            authors: vec!["not-a-key".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            bad_author.normalized(),
            Err(Error::InvalidFilter { field: "authors", .. })
        ));

        let bad_tag = EventFilter {
            tags: BTreeMap::from([("topic".to_string(), vec!["x".to_string()])]),
            ..Default::default()
        };
        assert!(matches!(
            bad_tag.normalized(),
            Err(Error::InvalidFilter { field: "tags", .. })
        ));
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let filter = EventFilter {
            limit: 0,
            ..Default::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(filter.limit, 1);
        assert_eq!(filter.capacity(), 1);
    }

    #[test]
    fn test_to_request_carries_window_bound() {
        let filter = EventFilter {
            kinds: vec![1],
            limit: 250,
            ..Default::default()
        };
        let until = Timestamp::from(1_704_067_200);
        let request = filter.to_request(until).unwrap();

        assert_eq!(request.until, Some(until));
        assert_eq!(request.limit, Some(250));
        assert!(request
            .kinds
            .as_ref()
            .is_some_and(|kinds| kinds.contains(&Kind::TextNote)));
    }
}
