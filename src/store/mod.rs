//! The world model: a multi-index, content-addressed knowledge store.
//!
//! Atoms are immutable and deduplicated by content address. Items are
//! append-only in existence but mutable in their fields. Three retrieval
//! paths are kept in sync on every insert: exact (content hash), semantic
//! (ANN over embeddings), and structural (path queries over map/list
//! content). Belief revision is serialized per atom so concurrent workers
//! cannot double-merge.

mod semantic;
mod structural;

pub use semantic::SemanticIndex;
pub use structural::{PathOp, PathQuery, PathStep};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::atom::{Atom, AtomId, AtomMeta};
use crate::content::Content;
use crate::error::{EngineError, NoemaError, NoemaResult};
use crate::item::{Item, ItemId, ItemKind, ItemPatch};
use crate::revision::{self, ConflictWarning};

/// Default embedding dimensionality, matching [`crate::embedding`].
pub const DEFAULT_EMBEDDING_DIM: usize = 256;

fn lock_err<T>(_: PoisonError<T>) -> NoemaError {
    EngineError::Storage {
        message: "store lock poisoned".to_string(),
    }
    .into()
}

#[derive(Debug, Default)]
struct StoreState {
    atoms: HashMap<AtomId, Atom>,
    items: HashMap<ItemId, Item>,
    /// All items referencing an atom, in insertion order.
    items_by_atom: HashMap<AtomId, Vec<ItemId>>,
    /// The canonical belief per atom; revision merges into this item.
    belief_by_atom: HashMap<AtomId, ItemId>,
    /// Exact index: content hash → atoms carrying that content.
    symbolic: HashMap<[u8; 32], Vec<AtomId>>,
    /// Atoms with structured (map or list) content, scanned by path queries.
    structural: Vec<AtomId>,
    /// Item ids in insertion order, newest at the back.
    recency: VecDeque<ItemId>,
}

/// Concurrency-safe knowledge store with exact, semantic, and structural
/// retrieval.
///
/// # Examples
///
/// ```
/// use noema::{WorldModel, Atom, AtomKind, AtomMeta, Content};
///
/// let store = WorldModel::default();
/// let meta = AtomMeta::new(AtomKind::Fact, "sensor", 0.9).unwrap();
/// let atom = Atom::new(Content::text("sky is blue"), Vec::new(), meta);
/// let id = store.add_atom(atom.clone()).unwrap();
/// assert_eq!(store.add_atom(atom).unwrap(), id);
/// assert_eq!(store.atom_count().unwrap(), 1);
/// ```
#[derive(Debug)]
pub struct WorldModel {
    state: RwLock<StoreState>,
    semantic: SemanticIndex,
    /// Per-atom revision serialization.
    revision_locks: DashMap<AtomId, Arc<Mutex<()>>>,
    conflicts: Mutex<Vec<ConflictWarning>>,
}

impl Default for WorldModel {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIM)
    }
}

impl WorldModel {
    /// Creates an empty store accepting embeddings of the given dimension.
    #[must_use]
    pub fn new(embedding_dim: usize) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            semantic: SemanticIndex::new(embedding_dim),
            revision_locks: DashMap::new(),
            conflicts: Mutex::new(Vec::new()),
        }
    }

    /// Inserts an atom. Idempotent: re-inserting the same atom id is a
    /// no-op that returns the existing id.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the atom carries an embedding of the
    /// wrong dimension.
    pub fn add_atom(&self, atom: Atom) -> NoemaResult<AtomId> {
        let id = atom.id;
        // Validate before touching any index so a rejected atom leaves no trace.
        if atom.has_embedding() && atom.embedding.len() != self.semantic.dim() {
            return Err(crate::error::ValidationError::EmbeddingDimensionMismatch {
                actual: atom.embedding.len(),
                expected: self.semantic.dim(),
            }
            .into());
        }
        {
            let mut state = self.state.write().map_err(lock_err)?;
            if state.atoms.contains_key(&id) {
                return Ok(id);
            }
            state
                .symbolic
                .entry(atom.content.content_hash())
                .or_default()
                .push(id);
            if !atom.content.is_text() {
                state.structural.push(id);
            }
            state.atoms.insert(id, atom.clone());
        }
        if atom.has_embedding() {
            self.semantic.insert(id, &atom.embedding)?;
        }
        debug!(atom = %id, kind = %atom.meta.kind, "atom added");
        Ok(id)
    }

    /// Returns the existing atom for this (content, metadata) pair, or
    /// creates and indexes it.
    ///
    /// # Errors
    ///
    /// Propagates indexing failures from [`add_atom`](Self::add_atom).
    pub fn find_or_create_atom(
        &self,
        content: Content,
        embedding: Vec<f32>,
        meta: AtomMeta,
    ) -> NoemaResult<Atom> {
        let id = Atom::compute_id(&content, &meta);
        {
            let state = self.state.read().map_err(lock_err)?;
            if let Some(existing) = state.atoms.get(&id) {
                return Ok(existing.clone());
            }
        }
        let atom = Atom::new(content, embedding, meta);
        self.add_atom(atom.clone())?;
        Ok(atom)
    }

    /// Fetches an atom by id.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AtomNotFound` when absent.
    pub fn get_atom(&self, id: &AtomId) -> NoemaResult<Atom> {
        let state = self.state.read().map_err(lock_err)?;
        state
            .atoms
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::AtomNotFound { id: *id }.into())
    }

    /// Inserts an item. The referenced atom must already exist.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AtomNotFound` for a dangling atom reference and
    /// `EngineError::DuplicateItem` for an already-present item id.
    pub fn add_item(&self, item: Item) -> NoemaResult<()> {
        let mut state = self.state.write().map_err(lock_err)?;
        if !state.atoms.contains_key(&item.atom_id) {
            return Err(EngineError::AtomNotFound { id: item.atom_id }.into());
        }
        if state.items.contains_key(&item.id) {
            return Err(EngineError::DuplicateItem { id: item.id }.into());
        }
        state
            .items_by_atom
            .entry(item.atom_id)
            .or_default()
            .push(item.id);
        if item.kind == ItemKind::Belief {
            state.belief_by_atom.entry(item.atom_id).or_insert(item.id);
        }
        state.recency.push_back(item.id);
        debug!(item = %item.id, kind = %item.kind, atom = %item.atom_id, "item added");
        state.items.insert(item.id, item);
        Ok(())
    }

    /// Fetches an item by id.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ItemNotFound` when absent.
    pub fn get_item(&self, id: &ItemId) -> NoemaResult<Item> {
        let state = self.state.read().map_err(lock_err)?;
        state
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::ItemNotFound { id: *id }.into())
    }

    /// Applies a patch to an item in place and returns the updated item.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ItemNotFound` when absent.
    pub fn update_item(&self, id: &ItemId, patch: &ItemPatch) -> NoemaResult<Item> {
        let mut state = self.state.write().map_err(lock_err)?;
        let item = state
            .items
            .get_mut(id)
            .ok_or(EngineError::ItemNotFound { id: *id })?;
        item.apply(patch);
        Ok(item.clone())
    }

    /// Exact retrieval: items whose atom content is structurally equal to
    /// the probe content.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned store lock.
    pub fn query_by_symbolic(&self, content: &Content, k: usize) -> NoemaResult<Vec<Item>> {
        let state = self.state.read().map_err(lock_err)?;
        let hash = content.content_hash();
        let mut out = Vec::new();
        if let Some(atom_ids) = state.symbolic.get(&hash) {
            for atom_id in atom_ids {
                for item_id in state.items_by_atom.get(atom_id).into_iter().flatten() {
                    if let Some(item) = state.items.get(item_id) {
                        out.push(item.clone());
                        if out.len() >= k {
                            return Ok(out);
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// Semantic retrieval: items ranked by cosine similarity of their atom
    /// embedding to the query vector.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a wrong-dimension query.
    pub fn query_by_semantic(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> NoemaResult<Vec<(Item, f32)>> {
        let hits = self.semantic.search(embedding, k)?;
        let state = self.state.read().map_err(lock_err)?;
        let mut out = Vec::new();
        for (atom_id, similarity) in hits {
            for item_id in state.items_by_atom.get(&atom_id).into_iter().flatten() {
                if let Some(item) = state.items.get(item_id) {
                    out.push((item.clone(), similarity));
                }
            }
        }
        out.truncate(k);
        Ok(out)
    }

    /// Structural retrieval: items whose atom content matches the path
    /// query. Linear scan over structured atoms.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned store lock.
    pub fn query_by_structure(&self, query: &PathQuery, k: usize) -> NoemaResult<Vec<Item>> {
        let state = self.state.read().map_err(lock_err)?;
        let mut out = Vec::new();
        for atom_id in &state.structural {
            let Some(atom) = state.atoms.get(atom_id) else {
                continue;
            };
            if !query.matches(&atom.content) {
                continue;
            }
            for item_id in state.items_by_atom.get(atom_id).into_iter().flatten() {
                if let Some(item) = state.items.get(item_id) {
                    out.push(item.clone());
                    if out.len() >= k {
                        return Ok(out);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Items touched within the window, newest first, up to `k`.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned store lock.
    pub fn recent_items(&self, window: Duration, k: usize) -> NoemaResult<Vec<Item>> {
        let state = self.state.read().map_err(lock_err)?;
        let cutoff = Utc::now() - window;
        let mut out = Vec::new();
        for item_id in state.recency.iter().rev() {
            let Some(item) = state.items.get(item_id) else {
                continue;
            };
            if item.last_accessed >= cutoff {
                out.push(item.clone());
                if out.len() >= k {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// All items whose goal parent is the given goal.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned store lock.
    pub fn items_with_goal_parent(&self, parent: &ItemId) -> NoemaResult<Vec<Item>> {
        let state = self.state.read().map_err(lock_err)?;
        Ok(state
            .items
            .values()
            .filter(|item| item.goal_parent_id.as_ref() == Some(parent))
            .cloned()
            .collect())
    }

    /// The canonical belief item for an atom, if any.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned store lock.
    pub fn belief_for_atom(&self, atom_id: &AtomId) -> NoemaResult<Option<Item>> {
        let state = self.state.read().map_err(lock_err)?;
        Ok(state
            .belief_by_atom
            .get(atom_id)
            .and_then(|id| state.items.get(id))
            .cloned())
    }

    /// Revises the belief about an atom with incoming evidence.
    ///
    /// Revision per atom is serialized through a dedicated mutex so two
    /// workers merging into the same belief cannot interleave. Outcomes:
    ///
    /// - no prior belief: the incoming item is stored as the canonical
    ///   belief and `None` is returned;
    /// - the incoming item *is* the canonical belief: nothing to merge,
    ///   `None`;
    /// - otherwise the truth values merge into the canonical belief, a
    ///   contradiction is logged when both sides are confident and far
    ///   apart, and the updated belief is returned.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::WrongKind` for non-belief items and
    /// `ValidationError::BeliefWithoutTruth` when the truth is missing.
    pub fn revise_belief(&self, incoming: &Item) -> NoemaResult<Option<Item>> {
        if incoming.kind != ItemKind::Belief {
            return Err(EngineError::WrongKind {
                id: incoming.id,
                expected: ItemKind::Belief,
                actual: incoming.kind,
            }
            .into());
        }
        let incoming_truth = incoming
            .truth
            .ok_or(crate::error::ValidationError::BeliefWithoutTruth)?;

        let atom_lock = self
            .revision_locks
            .entry(incoming.atom_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = atom_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let existing = self.belief_for_atom(&incoming.atom_id)?;
        let Some(existing) = existing else {
            match self.add_item(incoming.clone()) {
                Ok(()) => return Ok(None),
                // Already stored (e.g. re-pushed from the agenda); it is now
                // the canonical belief, nothing to merge.
                Err(NoemaError::Engine(EngineError::DuplicateItem { .. })) => return Ok(None),
                Err(err) => return Err(err),
            }
        };
        if existing.id == incoming.id {
            return Ok(None);
        }
        let Some(existing_truth) = existing.truth else {
            return Err(crate::error::ValidationError::BeliefWithoutTruth.into());
        };

        if revision::is_conflict(existing_truth, incoming_truth) {
            let warning = ConflictWarning {
                existing_item: existing.id,
                incoming_item: incoming.id,
                atom_id: incoming.atom_id,
                existing_truth,
                incoming_truth,
                detected_at: Utc::now(),
            };
            warn!(
                atom = %incoming.atom_id,
                existing = %existing_truth,
                incoming = %incoming_truth,
                "confident contradiction detected"
            );
            // Push-only log; poison is recoverable.
            self.conflicts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(warning);
        }

        let merged = revision::merge_truth(existing_truth, incoming_truth);
        let attention = crate::attention::AttentionValue::clamped(
            existing.attention.priority.max(incoming.attention.priority),
            existing.attention.durability.max(merged.confidence),
        );
        let patch = ItemPatch::new()
            .truth(merged)
            .attention(attention)
            .last_accessed(Utc::now());
        let updated = self.update_item(&existing.id, &patch)?;
        debug!(atom = %incoming.atom_id, merged = %merged, "belief revised");
        Ok(Some(updated))
    }

    /// Number of stored atoms.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned store lock.
    pub fn atom_count(&self) -> NoemaResult<usize> {
        Ok(self.state.read().map_err(lock_err)?.atoms.len())
    }

    /// Number of stored items.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned store lock.
    pub fn item_count(&self) -> NoemaResult<usize> {
        Ok(self.state.read().map_err(lock_err)?.items.len())
    }

    /// Number of stored goal items.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned store lock.
    pub fn goal_count(&self) -> NoemaResult<usize> {
        let state = self.state.read().map_err(lock_err)?;
        Ok(state
            .items
            .values()
            .filter(|item| item.kind == ItemKind::Goal)
            .count())
    }

    /// Snapshot of every stored item, for sweep-style consumers.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned store lock.
    pub fn all_items(&self) -> NoemaResult<Vec<Item>> {
        let state = self.state.read().map_err(lock_err)?;
        Ok(state.items.values().cloned().collect())
    }

    /// Contradictions detected so far, oldest first.
    #[must_use]
    pub fn conflicts(&self) -> Vec<ConflictWarning> {
        self.conflicts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomKind;
    use crate::item::{Item, TruthValue};

    fn store() -> WorldModel {
        WorldModel::new(3)
    }

    fn fact(content: Content) -> Atom {
        let meta = AtomMeta::new(AtomKind::Fact, "test", 0.8).unwrap();
        Atom::new(content, Vec::new(), meta)
    }

    fn belief(atom: &Atom, f: f32, c: f32) -> Item {
        Item::builder()
            .atom(atom.id)
            .kind(ItemKind::Belief)
            .truth(TruthValue::new(f, c).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn add_atom_is_idempotent() {
        let store = store();
        let atom = fact(Content::text("water is wet"));
        let a = store.add_atom(atom.clone()).unwrap();
        let b = store.add_atom(atom).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.atom_count().unwrap(), 1);
    }

    #[test]
    fn wrong_dimension_embedding_leaves_no_trace() {
        let store = store();
        let meta = AtomMeta::new(AtomKind::Fact, "test", 0.8).unwrap();
        let atom = Atom::new(Content::text("bad vector"), vec![0.1, 0.2], meta);
        let id = atom.id;
        assert!(store.add_atom(atom).is_err());

        // The rejected atom must not be retrievable through any index.
        assert_eq!(store.atom_count().unwrap(), 0);
        assert!(store.get_atom(&id).is_err());
        assert!(store
            .query_by_symbolic(&Content::text("bad vector"), 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn find_or_create_returns_existing() {
        let store = store();
        let meta = AtomMeta::new(AtomKind::Fact, "test", 0.8).unwrap();
        let first = store
            .find_or_create_atom(Content::text("x"), Vec::new(), meta.clone())
            .unwrap();
        let second = store
            .find_or_create_atom(Content::text("x"), Vec::new(), meta)
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.atom_count().unwrap(), 1);
    }

    #[test]
    fn add_item_requires_existing_atom() {
        let store = store();
        let atom = fact(Content::text("phantom"));
        let item = belief(&atom, 0.5, 0.5);
        assert!(store.add_item(item).is_err());
    }

    #[test]
    fn duplicate_item_is_rejected() {
        let store = store();
        let atom = fact(Content::text("x"));
        store.add_atom(atom.clone()).unwrap();
        let item = belief(&atom, 0.5, 0.5);
        store.add_item(item.clone()).unwrap();
        assert!(store.add_item(item).is_err());
    }

    #[test]
    fn symbolic_query_finds_equal_content() {
        let store = store();
        let content = Content::list(vec![Content::text("likes"), Content::text("cat")]);
        let atom = fact(content.clone());
        store.add_atom(atom.clone()).unwrap();
        store.add_item(belief(&atom, 1.0, 0.9)).unwrap();

        let hits = store.query_by_symbolic(&content, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store
            .query_by_symbolic(&Content::text("other"), 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn semantic_query_ranks_by_similarity() {
        let store = store();
        let meta = AtomMeta::new(AtomKind::Fact, "test", 0.8).unwrap();
        let near = Atom::new(Content::text("near"), vec![1.0, 0.0, 0.0], meta.clone());
        let far = Atom::new(Content::text("far"), vec![0.0, 1.0, 0.0], meta);
        store.add_atom(near.clone()).unwrap();
        store.add_atom(far.clone()).unwrap();
        store.add_item(belief(&near, 1.0, 0.9)).unwrap();
        store.add_item(belief(&far, 1.0, 0.9)).unwrap();

        let hits = store.query_by_semantic(&[0.95, 0.05, 0.0], 2).unwrap();
        assert_eq!(hits[0].0.atom_id, near.id);
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn structural_query_scans_structured_atoms() {
        let store = store();
        let atom = fact(Content::map(vec![("kind", Content::text("fruit"))]));
        store.add_atom(atom.clone()).unwrap();
        store.add_item(belief(&atom, 1.0, 0.9)).unwrap();

        let query = PathQuery::parse(r#"kind = "fruit""#).unwrap();
        assert_eq!(store.query_by_structure(&query, 10).unwrap().len(), 1);
        let query = PathQuery::parse(r#"kind = "metal""#).unwrap();
        assert!(store.query_by_structure(&query, 10).unwrap().is_empty());
    }

    #[test]
    fn revision_merges_into_canonical_belief() {
        let store = store();
        let atom = fact(Content::text("door is open"));
        store.add_atom(atom.clone()).unwrap();
        let first = belief(&atom, 1.0, 0.5);
        store.add_item(first.clone()).unwrap();

        let incoming = belief(&atom, 1.0, 0.5);
        let updated = store.revise_belief(&incoming).unwrap().unwrap();
        assert_eq!(updated.id, first.id);
        let truth = updated.truth.unwrap();
        assert!(truth.confidence > 0.5);
        assert_eq!(store.item_count().unwrap(), 1);
    }

    #[test]
    fn revising_the_canonical_belief_itself_is_a_noop() {
        let store = store();
        let atom = fact(Content::text("x"));
        store.add_atom(atom.clone()).unwrap();
        let item = belief(&atom, 0.8, 0.6);
        store.add_item(item.clone()).unwrap();
        assert!(store.revise_belief(&item).unwrap().is_none());
    }

    #[test]
    fn first_belief_is_stored_not_merged() {
        let store = store();
        let atom = fact(Content::text("x"));
        store.add_atom(atom.clone()).unwrap();
        let item = belief(&atom, 0.8, 0.6);
        assert!(store.revise_belief(&item).unwrap().is_none());
        assert_eq!(store.item_count().unwrap(), 1);
    }

    #[test]
    fn confident_contradiction_is_logged_and_merged_anyway() {
        let store = store();
        let atom = fact(Content::text("reactor is safe"));
        store.add_atom(atom.clone()).unwrap();
        store.add_item(belief(&atom, 0.95, 0.9)).unwrap();

        let contrary = belief(&atom, 0.05, 0.9);
        let updated = store.revise_belief(&contrary).unwrap();
        assert!(updated.is_some());
        assert_eq!(store.conflicts().len(), 1);
        let warning = &store.conflicts()[0];
        assert_eq!(warning.atom_id, atom.id);
    }

    #[test]
    fn recent_items_returns_newest_first() {
        let store = store();
        let a = fact(Content::text("a"));
        let b = fact(Content::text("b"));
        store.add_atom(a.clone()).unwrap();
        store.add_atom(b.clone()).unwrap();
        store.add_item(belief(&a, 1.0, 0.9)).unwrap();
        let newer = belief(&b, 1.0, 0.9);
        let newer_id = newer.id;
        store.add_item(newer).unwrap();

        let recent = store.recent_items(Duration::hours(1), 1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, newer_id);
    }

    #[test]
    fn goal_parent_lookup() {
        let store = store();
        let atom = fact(Content::text("step"));
        store.add_atom(atom.clone()).unwrap();
        let parent_id = ItemId::new();
        let child = Item::builder()
            .atom(atom.id)
            .kind(ItemKind::Goal)
            .goal_parent(parent_id)
            .build()
            .unwrap();
        store.add_item(child).unwrap();

        assert_eq!(store.items_with_goal_parent(&parent_id).unwrap().len(), 1);
        assert_eq!(store.goal_count().unwrap(), 1);
    }
}
