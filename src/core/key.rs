//! Datastore keys
//!
//! A key is the ordered list of `(kind, id)` pairs from the root ancestor down
//! to the entity itself. Keys have two textual forms:
//!
//! - the URL-path form used inside route patterns: `author-5/book-moby`
//! - the URL-safe form used in query strings: unpadded URL-safe base64 of the
//!   JSON pair list

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// The id part of a key pair: either an integer id or a string name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Int(i64),
    Name(String),
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdValue::Int(i) => write!(f, "{}", i),
            IdValue::Name(n) => write!(f, "{}", n),
        }
    }
}

impl From<i64> for IdValue {
    fn from(value: i64) -> Self {
        IdValue::Int(value)
    }
}

impl From<i32> for IdValue {
    fn from(value: i32) -> Self {
        IdValue::Int(value as i64)
    }
}

impl From<&str> for IdValue {
    fn from(value: &str) -> Self {
        IdValue::Name(value.to_string())
    }
}

impl From<String> for IdValue {
    fn from(value: String) -> Self {
        IdValue::Name(value)
    }
}

/// Errors produced when decoding keys
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("key has no path elements")]
    Empty,

    #[error("invalid url-safe key encoding")]
    InvalidEncoding,

    #[error("expected kinds {expected:?}, found {found:?}")]
    KindMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("malformed key segment '{0}'")]
    MalformedSegment(String),
}

/// A complete datastore key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pairs: Vec<(String, IdValue)>,
}

impl Key {
    /// Create a root key
    pub fn new(kind: impl Into<String>, id: impl Into<IdValue>) -> Self {
        Self {
            pairs: vec![(kind.into(), id.into())],
        }
    }

    /// Create a key from its pairs, root first
    pub fn from_pairs(pairs: Vec<(String, IdValue)>) -> Result<Self, KeyError> {
        if pairs.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(Self { pairs })
    }

    /// Create a key for a child entity of this key
    pub fn child(&self, kind: impl Into<String>, id: impl Into<IdValue>) -> Self {
        let mut pairs = self.pairs.clone();
        pairs.push((kind.into(), id.into()));
        Self { pairs }
    }

    pub fn pairs(&self) -> &[(String, IdValue)] {
        &self.pairs
    }

    /// The kind of the entity this key addresses
    pub fn kind(&self) -> &str {
        // Invariant: pairs is never empty.
        &self.pairs[self.pairs.len() - 1].0
    }

    pub fn id(&self) -> &IdValue {
        &self.pairs[self.pairs.len() - 1].1
    }

    /// The parent key, if this key has ancestors
    pub fn parent(&self) -> Option<Key> {
        if self.pairs.len() < 2 {
            return None;
        }
        Some(Self {
            pairs: self.pairs[..self.pairs.len() - 1].to_vec(),
        })
    }

    /// Every key from the root down to and including this one
    pub fn lineage(&self) -> Vec<Key> {
        (1..=self.pairs.len())
            .map(|n| Self {
                pairs: self.pairs[..n].to_vec(),
            })
            .collect()
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.pairs.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Slash-separated kinds, e.g. `Author/Book`
    pub fn path(&self) -> String {
        self.kinds().join("/")
    }

    /// Whether `self` is a strict ancestor of `other`
    pub fn is_ancestor_of(&self, other: &Key) -> bool {
        self.pairs.len() < other.pairs.len() && other.pairs.starts_with(&self.pairs)
    }

    /// Whether `self` equals `other` or is one of its ancestors
    pub fn contains(&self, other: &Key) -> bool {
        other.pairs.starts_with(&self.pairs)
    }

    /// Encode as unpadded URL-safe base64 of the JSON pair list
    pub fn urlsafe(&self) -> String {
        // Serializing a Vec of (String, IdValue) cannot fail.
        let json = serde_json::to_vec(&self.pairs).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a key produced by [`Key::urlsafe`]
    pub fn from_urlsafe(value: &str) -> Result<Self, KeyError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(value.trim_end_matches('='))
            .map_err(|_| KeyError::InvalidEncoding)?;
        let pairs: Vec<(String, IdValue)> =
            serde_json::from_slice(&bytes).map_err(|_| KeyError::InvalidEncoding)?;
        Self::from_pairs(pairs)
    }

    /// Encode as route path segments: `author-5/book-moby`
    pub fn to_url_path(&self) -> String {
        self.pairs
            .iter()
            .map(|(kind, id)| {
                let id = match id {
                    IdValue::Int(i) => i.to_string(),
                    IdValue::Name(n) => urlencoding::encode(n).into_owned(),
                };
                format!("{}-{}", kind.to_lowercase(), id)
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Decode route path segments for the expected kinds
    ///
    /// Numeric ids become integer ids, anything else a name.
    pub fn from_url_path(kinds: &[&str], value: &str) -> Result<Self, KeyError> {
        let segments: Vec<&str> = value.trim_matches('/').split('/').collect();
        if segments.len() != kinds.len() {
            return Err(KeyError::KindMismatch {
                expected: kinds.iter().map(|k| k.to_string()).collect(),
                found: segments.iter().map(|s| s.to_string()).collect(),
            });
        }

        let mut pairs = Vec::with_capacity(kinds.len());
        for (kind, segment) in kinds.iter().zip(segments) {
            let prefix = format!("{}-", kind.to_lowercase());
            let raw = segment
                .strip_prefix(&prefix)
                .filter(|rest| !rest.is_empty())
                .ok_or_else(|| KeyError::MalformedSegment(segment.to_string()))?;
            let id = match raw.parse::<i64>() {
                Ok(i) => IdValue::Int(i),
                Err(_) => IdValue::Name(
                    urlencoding::decode(raw)
                        .map_err(|_| KeyError::MalformedSegment(segment.to_string()))?
                        .into_owned(),
                ),
            };
            pairs.push((kind.to_string(), id));
        }
        Self::from_pairs(pairs)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .pairs
            .iter()
            .map(|(kind, id)| format!("{}:{}", kind, id))
            .collect();
        write!(f, "{}", parts.join("/"))
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.urlsafe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_key() -> Key {
        Key::new("Author", 5).child("Book", "moby dick")
    }

    #[test]
    fn test_parent_and_kind() {
        let key = book_key();
        assert_eq!(key.kind(), "Book");
        assert_eq!(key.id(), &IdValue::Name("moby dick".to_string()));
        assert_eq!(key.parent(), Some(Key::new("Author", 5)));
        assert_eq!(Key::new("Author", 5).parent(), None);
        assert_eq!(key.path(), "Author/Book");
    }

    #[test]
    fn test_ancestry() {
        let author = Key::new("Author", 5);
        let key = book_key();
        assert!(author.is_ancestor_of(&key));
        assert!(!key.is_ancestor_of(&key));
        assert!(key.contains(&key));
        assert!(!Key::new("Author", 6).is_ancestor_of(&key));
        assert_eq!(key.lineage(), vec![author, key.clone()]);
    }

    #[test]
    fn test_urlsafe_roundtrip() {
        let key = book_key();
        let encoded = key.urlsafe();
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('/'));
        assert_eq!(Key::from_urlsafe(&encoded), Ok(key));
    }

    #[test]
    fn test_urlsafe_rejects_garbage() {
        assert_eq!(Key::from_urlsafe("not a key"), Err(KeyError::InvalidEncoding));
        let empty = URL_SAFE_NO_PAD.encode(b"[]");
        assert_eq!(Key::from_urlsafe(&empty), Err(KeyError::Empty));
    }

    #[test]
    fn test_url_path_roundtrip() {
        let key = book_key();
        let path = key.to_url_path();
        assert_eq!(path, "author-5/book-moby%20dick");
        assert_eq!(Key::from_url_path(&["Author", "Book"], &path), Ok(key));
    }

    #[test]
    fn test_url_path_kind_checks() {
        assert!(matches!(
            Key::from_url_path(&["Author", "Book"], "author-5"),
            Err(KeyError::KindMismatch { .. })
        ));
        assert_eq!(
            Key::from_url_path(&["Author"], "book-5"),
            Err(KeyError::MalformedSegment("book-5".to_string()))
        );
        assert_eq!(
            Key::from_url_path(&["Author"], "author-"),
            Err(KeyError::MalformedSegment("author-".to_string()))
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(book_key().to_string(), "Author:5/Book:moby dick");
    }
}
