//! Atom types—the immutable, content-addressed unit of knowledge.
//!
//! An atom never changes after creation. Its identity is a blake3 digest of
//! its canonicalized content and metadata, so structurally equal knowledge
//! always resolves to the same atom and store insertion is idempotent.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::content::Content;
use crate::error::ValidationError;

/// Content-addressed atom identifier: a 32-byte blake3 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtomId([u8; 32]);

impl AtomId {
    /// Wraps a raw digest.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the full lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use fmt::Write;
            let _ = write!(s, "{b:02x}");
        }
        s
    }

    /// Parses a 64-character hex string.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            bytes[i] = ((hi << 4) | lo) as u8;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for AtomId {
    /// Shows a short prefix; use `to_hex` for the full digest.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "{}", &hex[..12])
    }
}

impl Serialize for AtomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AtomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| D::Error::custom("invalid atom id hex"))
    }
}

/// Kind tag for atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomKind {
    /// A statement about the world.
    Fact,
    /// A declarative two-pattern derivation rule.
    Schema,
    /// Raw perceived input.
    Observation,
    /// A general inference rule; treated like `Schema` at registration.
    Rule,
}

impl AtomKind {
    /// Returns true for kinds the rule engine accepts at registration.
    #[must_use]
    pub const fn is_schema_kind(self) -> bool {
        matches!(self, Self::Schema | Self::Rule)
    }
}

impl fmt::Display for AtomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fact => write!(f, "fact"),
            Self::Schema => write!(f, "schema"),
            Self::Observation => write!(f, "observation"),
            Self::Rule => write!(f, "rule"),
        }
    }
}

/// Atom metadata: provenance and trust.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomMeta {
    /// Kind tag.
    pub kind: AtomKind,
    /// Where this knowledge came from (named source).
    pub source: String,
    /// Source trust in [0.0, 1.0].
    pub trust: f32,
    /// Creation time. Does not participate in atom identity.
    pub timestamp: DateTime<Utc>,
    /// Free-form extension fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl AtomMeta {
    /// Creates metadata with validation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::TrustOutOfRange` if trust is not in [0, 1].
    pub fn new(
        kind: AtomKind,
        source: impl Into<String>,
        trust: f32,
    ) -> Result<Self, ValidationError> {
        if !(0.0..=1.0).contains(&trust) || trust.is_nan() {
            return Err(ValidationError::TrustOutOfRange { value: trust });
        }
        Ok(Self {
            kind,
            source: source.into(),
            trust,
            timestamp: Utc::now(),
            extensions: BTreeMap::new(),
        })
    }

    /// Metadata for content derived by the rule engine.
    ///
    /// Trust is clamped rather than rejected because it is computed, not
    /// user input.
    #[must_use]
    pub fn derived(source: impl Into<String>, trust: f32) -> Self {
        Self {
            kind: AtomKind::Fact,
            source: source.into(),
            trust: trust.clamp(0.0, 1.0),
            timestamp: Utc::now(),
            extensions: BTreeMap::new(),
        }
    }

    /// Adds an extension field.
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Appends the identity-relevant fields in canonical form.
    ///
    /// The timestamp is deliberately excluded: two atoms carrying the same
    /// knowledge minted at different instants are the same atom, which is
    /// what makes `find_or_create` deduplicate derived content.
    fn write_canonical(&self, out: &mut Vec<u8>) {
        out.push(match self.kind {
            AtomKind::Fact => 0x10,
            AtomKind::Schema => 0x11,
            AtomKind::Observation => 0x12,
            AtomKind::Rule => 0x13,
        });
        out.extend_from_slice(&(self.source.len() as u64).to_le_bytes());
        out.extend_from_slice(self.source.as_bytes());
        out.extend_from_slice(&self.trust.to_le_bytes());
        out.extend_from_slice(&(self.extensions.len() as u64).to_le_bytes());
        for (key, value) in &self.extensions {
            out.extend_from_slice(&(key.len() as u64).to_le_bytes());
            out.extend_from_slice(key.as_bytes());
            // serde_json::to_string on a Value is deterministic for a fixed
            // Value; object keys inside extensions are caller-controlled.
            let rendered = value.to_string();
            out.extend_from_slice(&(rendered.len() as u64).to_le_bytes());
            out.extend_from_slice(rendered.as_bytes());
        }
    }
}

/// Immutable, content-addressed knowledge unit.
///
/// # Examples
///
/// ```
/// use noema::{Atom, AtomKind, AtomMeta, Content};
///
/// let meta = AtomMeta::new(AtomKind::Fact, "sensor-1", 0.9).unwrap();
/// let atom = Atom::new(Content::text("sky is blue"), Vec::new(), meta.clone());
/// let again = Atom::new(Content::text("sky is blue"), Vec::new(), meta);
/// assert_eq!(atom.id, again.id);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    /// Deterministic content-addressed id.
    pub id: AtomId,
    /// The knowledge content.
    pub content: Content,
    /// Dense embedding vector; empty when no embedding is available.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Provenance and trust metadata.
    pub meta: AtomMeta,
}

impl Atom {
    /// Creates an atom, computing its id from content and metadata.
    #[must_use]
    pub fn new(content: Content, embedding: Vec<f32>, meta: AtomMeta) -> Self {
        let id = Self::compute_id(&content, &meta);
        Self {
            id,
            content,
            embedding,
            meta,
        }
    }

    /// Computes the deterministic id for a (content, metadata) pair.
    #[must_use]
    pub fn compute_id(content: &Content, meta: &AtomMeta) -> AtomId {
        let mut buf = Vec::new();
        content.write_canonical(&mut buf);
        meta.write_canonical(&mut buf);
        AtomId(*blake3::hash(&buf).as_bytes())
    }

    /// Returns true if this atom carries an embedding.
    #[must_use]
    pub fn has_embedding(&self) -> bool {
        !self.embedding.is_empty()
    }
}
