//! Domain types for Spirea descriptors and cache entries.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem
//! paths. Cache keys are the one exception: they hold separator-normalized
//! absolute paths and are compared as strings.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed pipeline signature, namespacing one persisted cache
/// document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(pub String);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Signature {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Signature {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed name for a registered load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadName(pub String);

impl fmt::Display for LoadName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for LoadName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LoadName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Processing priority of a source within one build pass.
///
/// Total order: `Primary < Secondary < Tertiary`. Sources sharing a kind
/// keep their registration order (the sort is stable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Processed first.
    Primary,
    /// Processed after all primary sources.
    Secondary,
    /// Processed last.
    Tertiary,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Primary => write!(f, "primary"),
            SourceKind::Secondary => write!(f, "secondary"),
            SourceKind::Tertiary => write!(f, "tertiary"),
        }
    }
}

// ---------------------------------------------------------------------------
// Records and cache entries
// ---------------------------------------------------------------------------

/// Structured record produced by a parse callback. Keys and values are
/// opaque to the engine; they are cached alongside the fingerprint and
/// handed back on cache hits.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// One tracked path's cache state: the change-detection fingerprint plus
/// whatever custom fields the parse callback returned. Absence of an entry
/// means the path is untracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    #[serde(flatten)]
    pub data: Record,
}

impl CacheEntry {
    pub fn new(fingerprint: impl Into<String>, data: Record) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            data,
        }
    }

    /// Custom field lookup, shorthand for callbacks reading back their own
    /// records.
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}

/// What a parse callback produced for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Structured data to cache alongside the fingerprint.
    Record(Record),
    /// Track the fingerprint with no custom fields.
    Empty,
    /// The path no longer produces anything; evict any tracked entry.
    Retract,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn newtype_display() {
        assert_eq!(Signature::from("Docs").to_string(), "Docs");
        assert_eq!(LoadName::from("meta").to_string(), "meta");
    }

    #[test]
    fn newtype_equality() {
        let a = Signature::from("x");
        let b = Signature::from(String::from("x"));
        assert_eq!(a, b);
    }

    #[test]
    fn kind_total_order() {
        assert!(SourceKind::Primary < SourceKind::Secondary);
        assert!(SourceKind::Secondary < SourceKind::Tertiary);
        assert_eq!(SourceKind::Tertiary.to_string(), "tertiary");
    }

    #[test]
    fn cache_entry_flattens_custom_fields() {
        let mut data = Record::new();
        data.insert("title".into(), json!("A"));
        let entry = CacheEntry::new("deadbeef", data);

        let encoded = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(encoded, json!({"fingerprint": "deadbeef", "title": "A"}));

        let decoded: CacheEntry = serde_json::from_value(encoded).expect("deserialize");
        assert_eq!(decoded, entry);
        assert_eq!(decoded.field("title"), Some(&json!("A")));
    }
}
