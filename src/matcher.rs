//! The schema matcher: indexes compiled schemas and applies them to items.
//!
//! Derivation schemas are indexed by the kind pair (processed item, context
//! item) so a match attempt only considers rules that could possibly apply.
//! Every (context, schema) attempt is isolated: a failure is logged and
//! skipped, never propagated into the worker cycle.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::atom::{Atom, AtomMeta};
use crate::attention::AttentionEconomy;
use crate::error::NoemaResult;
use crate::item::{Item, ItemId, ItemKind, Stamp, TruthValue};
use crate::schema::{CompiledSchema, DeriveTemplate, SchemaBody};
use crate::store::WorldModel;
use crate::unify::{substitute, unify, Bindings};

/// Truth assumed for a premise that carries none (goals and queries).
/// Desire is treated as strong evidence for the purposes of derivation.
const PREMISE_DEFAULT_TRUTH: TruthValue = TruthValue {
    frequency: 1.0,
    confidence: 0.9,
};

/// Confidence discount applied to every derivation step.
const DERIVATION_DISCOUNT: f32 = 0.9;

/// Indexes schemas and produces derived items from matching premise pairs.
pub struct SchemaMatcher {
    derivations: RwLock<HashMap<(ItemKind, ItemKind), Vec<Arc<CompiledSchema>>>>,
    decompositions: RwLock<HashMap<ItemKind, Vec<Arc<CompiledSchema>>>>,
    economy: AttentionEconomy,
}

impl SchemaMatcher {
    /// Creates an empty matcher sharing the given attention economy.
    #[must_use]
    pub fn new(economy: AttentionEconomy) -> Self {
        Self {
            derivations: RwLock::new(HashMap::new()),
            decompositions: RwLock::new(HashMap::new()),
            economy,
        }
    }

    /// Compiles and indexes a schema atom. Re-registering the same schema
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the compilation error after logging it; callers treat a
    /// rejected schema as skippable.
    pub fn register_schema(&self, atom: &Atom) -> NoemaResult<()> {
        let schema = match CompiledSchema::compile(atom) {
            Ok(schema) => Arc::new(schema),
            Err(err) => {
                warn!(atom = %atom.id, error = %err, "schema rejected");
                return Err(err.into());
            }
        };

        match &schema.body {
            SchemaBody::Derivation { a, b, .. } => {
                let mut index = self
                    .derivations
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                let bucket = index.entry((a.kind, b.kind)).or_default();
                if !bucket.iter().any(|s| s.id == schema.id) {
                    bucket.push(schema.clone());
                }
            }
            SchemaBody::Decomposition { goal, .. } => {
                let mut index = self
                    .decompositions
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                let bucket = index.entry(goal.kind).or_default();
                if !bucket.iter().any(|s| s.id == schema.id) {
                    bucket.push(schema.clone());
                }
            }
        }
        debug!(schema = %schema.id, "schema registered");
        Ok(())
    }

    /// Number of registered schemas.
    #[must_use]
    pub fn schema_count(&self) -> usize {
        let derivations = self
            .derivations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum::<usize>();
        let decompositions = self
            .decompositions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum::<usize>();
        derivations + decompositions
    }

    /// Tries every applicable derivation schema against the processed item
    /// and each context item, storing and returning the derived items.
    ///
    /// A schema fires at most once per derived conclusion: if the store
    /// already holds an item for the derived atom stamped with the same
    /// schema, the attempt is skipped.
    ///
    /// # Errors
    ///
    /// Fails only when the processed item's own atom cannot be fetched;
    /// per-context failures are logged and skipped.
    pub fn find_and_apply(
        &self,
        item: &Item,
        context: &[Item],
        store: &WorldModel,
    ) -> NoemaResult<Vec<Item>> {
        let item_atom = store.get_atom(&item.atom_id)?;
        let mut derived = Vec::new();

        for context_item in context {
            let schemas = {
                let index = self
                    .derivations
                    .read()
                    .unwrap_or_else(PoisonError::into_inner);
                match index.get(&(item.kind, context_item.kind)) {
                    Some(bucket) => bucket.clone(),
                    None => continue,
                }
            };
            let context_atom = match store.get_atom(&context_item.atom_id) {
                Ok(atom) => atom,
                Err(err) => {
                    warn!(item = %context_item.id, error = %err, "context atom missing");
                    continue;
                }
            };

            for schema in schemas {
                match self.apply_one(item, &item_atom, context_item, &context_atom, &schema, store)
                {
                    Ok(Some(product)) => derived.push(product),
                    Ok(None) => {}
                    Err(err) => {
                        debug!(schema = %schema.id, error = %err, "derivation attempt failed");
                    }
                }
            }
        }
        Ok(derived)
    }

    fn apply_one(
        &self,
        item: &Item,
        item_atom: &Atom,
        context_item: &Item,
        context_atom: &Atom,
        schema: &CompiledSchema,
        store: &WorldModel,
    ) -> NoemaResult<Option<Item>> {
        let SchemaBody::Derivation { a, b, template } = &schema.body else {
            return Ok(None);
        };

        let mut bindings = Bindings::new();
        if !unify(&a.pattern, &item_atom.content, &mut bindings) {
            return Ok(None);
        }
        if !unify(&b.pattern, &context_atom.content, &mut bindings) {
            return Ok(None);
        }

        let content = substitute(&template.content, &bindings);
        let meta = AtomMeta::derived(format!("schema:{}", schema.id), schema.trust);
        let atom = store.find_or_create_atom(content.clone(), Vec::new(), meta)?;

        // Exactly-once per conclusion: skip if this schema already produced
        // an item for this atom.
        let existing = store.query_by_symbolic(&content, usize::MAX)?;
        if existing
            .iter()
            .any(|it| it.atom_id == atom.id && it.stamp.rule_id == Some(schema.id))
        {
            return Ok(None);
        }

        let label = template
            .label
            .as_ref()
            .map(|l| substitute(l, &bindings).to_string());
        let truth = derived_truth(template, item, context_item);
        let attention = self.economy.derived(&[item, context_item], schema.trust);
        let goal_parent = if template.attach_to_goal {
            goal_anchor(item).or_else(|| goal_anchor(context_item))
        } else {
            None
        };

        let mut builder = Item::builder()
            .atom(atom.id)
            .kind(template.kind)
            .attention(attention)
            .stamp(Stamp::derived(vec![item.id, context_item.id], schema.id));
        if let Some(truth) = truth {
            builder = builder.truth(truth);
        }
        if let Some(label) = label {
            builder = builder.label(label);
        }
        if let Some(parent) = goal_parent {
            builder = builder.goal_parent(parent);
        }
        let product = builder.build().map_err(crate::error::NoemaError::from)?;
        store.add_item(product.clone())?;
        debug!(schema = %schema.id, item = %product.id, content = %atom.content, "derived");
        Ok(Some(product))
    }

    /// Returns every decomposition schema matching the goal's atom content,
    /// with the bindings of the match.
    #[must_use]
    pub fn match_decompositions(
        &self,
        goal: &Item,
        atom: &Atom,
    ) -> Vec<(Arc<CompiledSchema>, Bindings)> {
        let schemas = {
            let index = self
                .decompositions
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match index.get(&goal.kind) {
                Some(bucket) => bucket.clone(),
                None => return Vec::new(),
            }
        };
        schemas
            .into_iter()
            .filter_map(|schema| {
                let SchemaBody::Decomposition { goal: pattern, .. } = &schema.body else {
                    return None;
                };
                let mut bindings = Bindings::new();
                unify(&pattern.pattern, &atom.content, &mut bindings)
                    .then_some((schema, bindings))
            })
            .collect()
    }
}

impl std::fmt::Debug for SchemaMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaMatcher")
            .field("schemas", &self.schema_count())
            .finish_non_exhaustive()
    }
}

/// The goal this item anchors derived work to: itself if it is a goal,
/// otherwise its goal parent.
fn goal_anchor(item: &Item) -> Option<ItemId> {
    if item.kind == ItemKind::Goal {
        Some(item.id)
    } else {
        item.goal_parent_id
    }
}

fn derived_truth(
    template: &DeriveTemplate,
    item: &Item,
    context_item: &Item,
) -> Option<TruthValue> {
    if template.kind != ItemKind::Belief {
        return None;
    }
    let a = item.truth.unwrap_or(PREMISE_DEFAULT_TRUTH);
    let b = context_item.truth.unwrap_or(PREMISE_DEFAULT_TRUTH);
    Some(TruthValue {
        frequency: ((a.frequency + b.frequency) / 2.0).clamp(0.0, 1.0),
        confidence: (a.confidence * b.confidence * DERIVATION_DISCOUNT).clamp(0.0, 1.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomKind;
    use crate::content::Content;
    use crate::schema::{derivation_content, DeriveTemplate};

    fn store() -> WorldModel {
        WorldModel::new(3)
    }

    fn matcher() -> SchemaMatcher {
        SchemaMatcher::new(AttentionEconomy::default())
    }

    fn fact_atom(store: &WorldModel, content: Content) -> Atom {
        let meta = AtomMeta::new(AtomKind::Fact, "test", 0.9).unwrap();
        let atom = Atom::new(content, Vec::new(), meta);
        store.add_atom(atom.clone()).unwrap();
        atom
    }

    fn belief(store: &WorldModel, atom: &Atom, f: f32, c: f32) -> Item {
        let item = Item::builder()
            .atom(atom.id)
            .kind(ItemKind::Belief)
            .truth(TruthValue::new(f, c).unwrap())
            .build()
            .unwrap();
        store.add_item(item.clone()).unwrap();
        item
    }

    fn goal(store: &WorldModel, atom: &Atom) -> Item {
        let item = Item::builder()
            .atom(atom.id)
            .kind(ItemKind::Goal)
            .build()
            .unwrap();
        store.add_item(item.clone()).unwrap();
        item
    }

    fn analogy_schema(store: &WorldModel, matcher: &SchemaMatcher) -> Atom {
        let content = derivation_content(
            ItemKind::Goal,
            Content::list(vec![Content::text("obtain"), Content::text("?x")]),
            ItemKind::Belief,
            Content::list(vec![
                Content::text("is_similar_to"),
                Content::text("?x"),
                Content::text("?y"),
            ]),
            DeriveTemplate {
                kind: ItemKind::Goal,
                content: Content::list(vec![Content::text("obtain"), Content::text("?y")]),
                label: None,
                attach_to_goal: true,
            },
        );
        let meta = AtomMeta::new(AtomKind::Schema, "rules", 0.9).unwrap();
        let atom = Atom::new(content, Vec::new(), meta);
        store.add_atom(atom.clone()).unwrap();
        matcher.register_schema(&atom).unwrap();
        atom
    }

    #[test]
    fn derivation_substitutes_bindings() {
        let store = store();
        let matcher = matcher();
        let schema_atom = analogy_schema(&store, &matcher);

        let goal_atom = fact_atom(
            &store,
            Content::list(vec![Content::text("obtain"), Content::text("chocolate")]),
        );
        let similar_atom = fact_atom(
            &store,
            Content::list(vec![
                Content::text("is_similar_to"),
                Content::text("chocolate"),
                Content::text("carob"),
            ]),
        );
        let g = goal(&store, &goal_atom);
        let b = belief(&store, &similar_atom, 1.0, 0.8);

        let derived = matcher.find_and_apply(&g, &[b.clone()], &store).unwrap();
        assert_eq!(derived.len(), 1);
        let product = &derived[0];
        assert_eq!(product.kind, ItemKind::Goal);
        assert_eq!(product.goal_parent_id, Some(g.id));
        assert_eq!(product.stamp.rule_id, Some(schema_atom.id));
        assert_eq!(product.stamp.parent_ids, vec![g.id, b.id]);

        let derived_atom = store.get_atom(&product.atom_id).unwrap();
        assert_eq!(derived_atom.content.to_string(), "(obtain carob)");
    }

    #[test]
    fn schema_fires_exactly_once_per_conclusion() {
        let store = store();
        let matcher = matcher();
        analogy_schema(&store, &matcher);

        let goal_atom = fact_atom(
            &store,
            Content::list(vec![Content::text("obtain"), Content::text("chocolate")]),
        );
        let similar_atom = fact_atom(
            &store,
            Content::list(vec![
                Content::text("is_similar_to"),
                Content::text("chocolate"),
                Content::text("carob"),
            ]),
        );
        let g = goal(&store, &goal_atom);
        let b = belief(&store, &similar_atom, 1.0, 0.8);

        let first = matcher.find_and_apply(&g, &[b.clone()], &store).unwrap();
        let second = matcher.find_and_apply(&g, &[b], &store).unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn non_matching_context_produces_nothing() {
        let store = store();
        let matcher = matcher();
        analogy_schema(&store, &matcher);

        let goal_atom = fact_atom(
            &store,
            Content::list(vec![Content::text("obtain"), Content::text("chocolate")]),
        );
        let unrelated = fact_atom(&store, Content::text("sky is blue"));
        let g = goal(&store, &goal_atom);
        let b = belief(&store, &unrelated, 1.0, 0.8);

        assert!(matcher.find_and_apply(&g, &[b], &store).unwrap().is_empty());
    }

    #[test]
    fn derived_belief_truth_follows_premises() {
        let store = store();
        let matcher = matcher();
        let content = derivation_content(
            ItemKind::Belief,
            Content::list(vec![Content::text("p"), Content::text("?x")]),
            ItemKind::Belief,
            Content::list(vec![Content::text("q"), Content::text("?x")]),
            DeriveTemplate {
                kind: ItemKind::Belief,
                content: Content::list(vec![Content::text("r"), Content::text("?x")]),
                label: None,
                attach_to_goal: false,
            },
        );
        let meta = AtomMeta::new(AtomKind::Schema, "rules", 1.0).unwrap();
        let schema_atom = Atom::new(content, Vec::new(), meta);
        store.add_atom(schema_atom.clone()).unwrap();
        matcher.register_schema(&schema_atom).unwrap();

        let p = fact_atom(
            &store,
            Content::list(vec![Content::text("p"), Content::text("a")]),
        );
        let q = fact_atom(
            &store,
            Content::list(vec![Content::text("q"), Content::text("a")]),
        );
        let pb = belief(&store, &p, 1.0, 0.8);
        let qb = belief(&store, &q, 0.6, 0.5);

        let derived = matcher.find_and_apply(&pb, &[qb], &store).unwrap();
        let truth = derived[0].truth.unwrap();
        assert!((truth.frequency - 0.8).abs() < 1e-6);
        assert!((truth.confidence - 0.8 * 0.5 * 0.9).abs() < 1e-6);
    }

    #[test]
    fn register_rejects_malformed_schema() {
        let store = store();
        let matcher = matcher();
        let meta = AtomMeta::new(AtomKind::Schema, "rules", 0.9).unwrap();
        let atom = Atom::new(Content::text("nonsense"), Vec::new(), meta);
        store.add_atom(atom.clone()).unwrap();
        assert!(matcher.register_schema(&atom).is_err());
        assert_eq!(matcher.schema_count(), 0);
    }

    #[test]
    fn reregistration_is_noop() {
        let store = store();
        let matcher = matcher();
        let atom = analogy_schema(&store, &matcher);
        matcher.register_schema(&atom).unwrap();
        assert_eq!(matcher.schema_count(), 1);
    }

    #[test]
    fn decomposition_matching_returns_bindings() {
        let store = store();
        let matcher = matcher();
        let content = crate::schema::decomposition_content(
            Content::list(vec![Content::text("make"), Content::text("?dish")]),
            vec![crate::schema::SubGoalTemplate {
                tmp_id: "cook".to_string(),
                kind: ItemKind::Goal,
                content: Content::list(vec![Content::text("cook"), Content::text("?dish")]),
                label: None,
                deps: Vec::new(),
            }],
        );
        let meta = AtomMeta::new(AtomKind::Schema, "rules", 0.9).unwrap();
        let schema_atom = Atom::new(content, Vec::new(), meta);
        store.add_atom(schema_atom.clone()).unwrap();
        matcher.register_schema(&schema_atom).unwrap();

        let goal_atom = fact_atom(
            &store,
            Content::list(vec![Content::text("make"), Content::text("soup")]),
        );
        let g = goal(&store, &goal_atom);
        let matches = matcher.match_decompositions(&g, &goal_atom);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].1.get("dish"), Some(&Content::text("soup")));
    }
}
