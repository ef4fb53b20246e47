//! Approximate nearest-neighbor index over atom embeddings.
//!
//! Thin wrapper around an HNSW graph with cosine distance. The graph keys
//! points by dense `usize` ids, so a side table translates them to atom ids.
//! Inserted points cannot be removed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anndists::dist::DistCosine;
use dashmap::DashMap;
use hnsw_rs::prelude::*;

use crate::atom::AtomId;
use crate::error::ValidationError;

const MAX_NB_CONNECTION: usize = 16;
const NB_LAYER: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const INDEX_CAPACITY: usize = 100_000;

/// Cosine-similarity index over atom embeddings.
pub struct SemanticIndex {
    hnsw: RwLock<Hnsw<'static, f32, DistCosine>>,
    id_to_atom: DashMap<usize, AtomId>,
    atom_to_id: DashMap<AtomId, usize>,
    next_id: AtomicUsize,
    dim: usize,
}

// Hnsw is not auto Send/Sync because of internal raw pointers, but all
// mutation goes through the RwLock, which serializes access.
unsafe impl Send for SemanticIndex {}
unsafe impl Sync for SemanticIndex {}

impl SemanticIndex {
    /// Creates an empty index for vectors of the given dimensionality.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        let hnsw = Hnsw::new(
            MAX_NB_CONNECTION,
            INDEX_CAPACITY,
            NB_LAYER,
            EF_CONSTRUCTION,
            DistCosine {},
        );
        Self {
            hnsw: RwLock::new(hnsw),
            id_to_atom: DashMap::new(),
            atom_to_id: DashMap::new(),
            next_id: AtomicUsize::new(0),
            dim,
        }
    }

    /// The expected embedding dimensionality.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of indexed atoms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.id_to_atom.len()
    }

    /// Returns true if nothing has been indexed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id_to_atom.is_empty()
    }

    /// Indexes an atom's embedding. Re-inserting an already indexed atom is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmbeddingDimensionMismatch` when the vector
    /// has the wrong length.
    pub fn insert(&self, atom_id: AtomId, embedding: &[f32]) -> Result<(), ValidationError> {
        if embedding.len() != self.dim {
            return Err(ValidationError::EmbeddingDimensionMismatch {
                actual: embedding.len(),
                expected: self.dim,
            });
        }
        if self.atom_to_id.contains_key(&atom_id) {
            return Ok(());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.atom_to_id.insert(atom_id, id);
        self.id_to_atom.insert(id, atom_id);
        let point = embedding.to_vec();
        let hnsw = self
            .hnsw
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        hnsw.insert((&point, id));
        Ok(())
    }

    /// Returns up to `k` atoms nearest to the query, with cosine similarity
    /// in descending order.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmbeddingDimensionMismatch` when the query
    /// has the wrong length.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(AtomId, f32)>, ValidationError> {
        if query.len() != self.dim {
            return Err(ValidationError::EmbeddingDimensionMismatch {
                actual: query.len(),
                expected: self.dim,
            });
        }
        if k == 0 || self.id_to_atom.is_empty() {
            return Ok(Vec::new());
        }
        let ef_search = (k * 2).max(32);
        let hnsw = self
            .hnsw
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let neighbours = hnsw.search(query, k, ef_search);
        drop(hnsw);

        Ok(neighbours
            .into_iter()
            .filter_map(|n| {
                self.id_to_atom
                    .get(&n.d_id)
                    .map(|atom| (*atom.value(), 1.0 - n.distance))
            })
            .collect())
    }
}

impl std::fmt::Debug for SemanticIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticIndex")
            .field("dim", &self.dim)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Atom, AtomKind, AtomMeta};
    use crate::content::Content;

    fn atom_id(label: &str) -> AtomId {
        let meta = AtomMeta::new(AtomKind::Fact, "test", 0.5).unwrap();
        Atom::compute_id(&Content::text(label), &meta)
    }

    #[test]
    fn nearest_neighbour_wins() {
        let index = SemanticIndex::new(3);
        index.insert(atom_id("x"), &[1.0, 0.0, 0.0]).unwrap();
        index.insert(atom_id("y"), &[0.0, 1.0, 0.0]).unwrap();
        index.insert(atom_id("z"), &[0.0, 0.0, 1.0]).unwrap();

        let hits = index.search(&[0.9, 0.1, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, atom_id("x"));
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let index = SemanticIndex::new(3);
        assert!(index.insert(atom_id("x"), &[1.0, 0.0]).is_err());
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn duplicate_insert_is_noop() {
        let index = SemanticIndex::new(2);
        let id = atom_id("dup");
        index.insert(id, &[1.0, 0.0]).unwrap();
        index.insert(id, &[1.0, 0.0]).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = SemanticIndex::new(2);
        assert!(index.search(&[1.0, 0.0], 5).unwrap().is_empty());
        assert!(index.is_empty());
    }
}
