//! Content types that atoms can hold.
//!
//! Content in noema is a closed tagged union: text, ordered lists, and
//! key-value maps. Every variant supports recursive structural equality,
//! order-independent canonical serialization (for content addressing), and
//! traversal by the structural index and the unifier.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A unit of knowledge content.
///
/// Maps use `BTreeMap` so key order is canonical by construction: two maps
/// built with different insertion orders serialize to identical bytes.
///
/// # Examples
///
/// ```
/// use noema::Content;
///
/// let stmt = Content::list(vec![
///     Content::text("is_similar_to"),
///     Content::text("chocolate"),
///     Content::text("cocoa"),
/// ]);
/// assert!(stmt.is_list());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Content {
    /// Free text, including symbol tokens.
    Text(String),
    /// Ordered sequence of content.
    List(Vec<Content>),
    /// Key-value structure with canonically ordered keys.
    Map(BTreeMap<String, Content>),
}

impl Content {
    /// Creates a text node.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Creates a list node.
    #[must_use]
    pub fn list(items: Vec<Content>) -> Self {
        Self::List(items)
    }

    /// Creates a map node from key-value pairs.
    pub fn map<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Content)>) -> Self {
        Self::Map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Returns true if this is a text node.
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Returns true if this is a list node.
    #[must_use]
    pub const fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    /// Returns true if this is a map node.
    #[must_use]
    pub const fn is_map(&self) -> bool {
        matches!(self, Self::Map(_))
    }

    /// Returns the text value, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the list elements, if any.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Content]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the map, if any.
    #[must_use]
    pub const fn as_map(&self) -> Option<&BTreeMap<String, Content>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the variable name if this node is a pattern variable.
    ///
    /// A variable is a text token starting with `?` and at least one more
    /// character, e.g. `?x` or `?relation`.
    #[must_use]
    pub fn as_variable(&self) -> Option<&str> {
        match self {
            Self::Text(s) if s.len() > 1 && s.starts_with('?') => Some(&s[1..]),
            _ => None,
        }
    }

    /// Fetches a map entry by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Content> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Appends this node's canonical byte form to `out`.
    ///
    /// The encoding is a tag byte plus length-prefixed payloads. Map keys
    /// come out sorted, so logically equal content always produces the same
    /// bytes regardless of how it was built.
    pub fn write_canonical(&self, out: &mut Vec<u8>) {
        match self {
            Self::Text(s) => {
                out.push(0x01);
                out.extend_from_slice(&(s.len() as u64).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Self::List(items) => {
                out.push(0x02);
                out.extend_from_slice(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.write_canonical(out);
                }
            }
            Self::Map(map) => {
                out.push(0x03);
                out.extend_from_slice(&(map.len() as u64).to_le_bytes());
                for (key, value) in map {
                    out.extend_from_slice(&(key.len() as u64).to_le_bytes());
                    out.extend_from_slice(key.as_bytes());
                    value.write_canonical(out);
                }
            }
        }
    }

    /// Returns the canonical byte form of this content.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_canonical(&mut out);
        out
    }

    /// Returns the blake3 digest of the canonical byte form.
    ///
    /// This is the symbolic-index key: content-only identity, independent of
    /// any atom metadata.
    #[must_use]
    pub fn content_hash(&self) -> [u8; 32] {
        *blake3::hash(&self.canonical_bytes()).as_bytes()
    }

    /// Converts a JSON value into content.
    ///
    /// Scalars become text via their display form; arrays become lists;
    /// objects become maps.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Text("null".to_string()),
            serde_json::Value::Bool(b) => Self::Text(b.to_string()),
            serde_json::Value::Number(n) => Self::Text(n.to_string()),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            serde_json::Value::Array(items) => {
                Self::List(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}
