//! Deterministic lexical embeddings for content.
//!
//! Feature hashing over tokens, not a learned model: stable, offline, and
//! good enough for approximate retrieval of lexically related knowledge.
//! Perception layers with a real embedding model can supply their own
//! vectors instead; nothing in the store assumes these.

use blake3::Hasher;

use crate::content::Content;
use crate::store::DEFAULT_EMBEDDING_DIM;

/// Deterministic feature-hashing embedder over content trees.
///
/// Every text token anywhere in the content, plus every map key, is hashed
/// into a signed bucket; the result is L2-normalized so cosine similarity
/// behaves.
///
/// # Examples
///
/// ```
/// use noema::{Content, LexicalEmbedder};
///
/// let embedder = LexicalEmbedder::default();
/// let a = embedder.embed(&Content::text("the cat likes milk"));
/// let b = embedder.embed(&Content::text("the cat likes milk"));
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LexicalEmbedder {
    dim: usize,
}

impl Default for LexicalEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIM)
    }
}

impl LexicalEmbedder {
    /// Creates an embedder producing vectors of the given dimensionality.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    /// The output dimensionality.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Embeds a content tree into a normalized vector.
    ///
    /// Content with no tokens at all embeds to the zero vector.
    #[must_use]
    pub fn embed(&self, content: &Content) -> Vec<f32> {
        if self.dim == 0 {
            return Vec::new();
        }
        let mut vec = vec![0.0f32; self.dim];
        let mut tokens = 0usize;
        self.accumulate(content, &mut vec, &mut tokens);
        if tokens == 0 {
            return vec;
        }

        let norm2: f64 = vec.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
        if norm2 > 0.0 {
            let inv = norm2.sqrt().recip() as f32;
            for x in &mut vec {
                *x *= inv;
            }
        }
        vec
    }

    /// Embeds plain text, the common perception case.
    #[must_use]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        self.embed(&Content::text(text))
    }

    fn accumulate(&self, content: &Content, vec: &mut [f32], tokens: &mut usize) {
        match content {
            Content::Text(s) => {
                for token in tokenize(s) {
                    self.bump(token, vec);
                    *tokens += 1;
                }
            }
            Content::List(items) => {
                for item in items {
                    self.accumulate(item, vec, tokens);
                }
            }
            Content::Map(map) => {
                for (key, value) in map {
                    self.bump(key, vec);
                    *tokens += 1;
                    self.accumulate(value, vec, tokens);
                }
            }
        }
    }

    fn bump(&self, token: &str, vec: &mut [f32]) {
        let mut hasher = Hasher::new();
        hasher.update(token.to_ascii_lowercase().as_bytes());
        let hash = hasher.finalize();
        let bytes = hash.as_bytes();

        let bucket = u64::from_le_bytes(
            bytes[..8].try_into().unwrap_or_else(|_| unreachable!()),
        );
        let idx = (bucket as usize) % self.dim;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vec[idx] += sign;
    }
}

fn tokenize(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
}
