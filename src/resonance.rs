//! Resonance: weighted multi-factor retrieval of processing context.
//!
//! When a worker processes an item it does not scan the whole store; it
//! gathers a candidate pool from every retrieval path and scores each
//! candidate on salience, freshness, trust, kind affinity, shared lineage,
//! and any source constraints the probe carries. The top-k survivors are
//! the context handed to the schema matcher.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use tracing::debug;

use crate::atom::Atom;
use crate::content::Content;
use crate::error::NoemaResult;
use crate::item::{Item, ItemId, ItemKind};
use crate::store::{PathOp, PathQuery, PathStep, WorldModel};

/// Scoring weights and candidate pool sizes for context retrieval.
#[derive(Debug, Clone)]
pub struct ResonanceConfig {
    /// Weight of the candidate's scheduling priority.
    pub priority_weight: f32,
    /// Weight of the recency factor.
    pub recency_weight: f32,
    /// Weight of the candidate atom's source trust.
    pub trust_weight: f32,
    /// Bonus for sharing the probe's item kind.
    pub same_kind_weight: f32,
    /// Bonus for shared lineage (goal anchor or derivation parents).
    pub lineage_weight: f32,
    /// Bonus for satisfying the probe's `required_sources` constraint.
    pub source_bonus: f32,
    /// Idle duration over which the recency factor fades.
    pub recency_window: Duration,
    /// Candidates fetched per retrieval path.
    pub per_source_k: usize,
}

impl Default for ResonanceConfig {
    fn default() -> Self {
        Self {
            priority_weight: 0.3,
            recency_weight: 0.2,
            trust_weight: 0.2,
            same_kind_weight: 0.2,
            lineage_weight: 0.2,
            source_bonus: 0.5,
            recency_window: Duration::minutes(10),
            per_source_k: 16,
        }
    }
}

/// Finds the `k` most resonant context items for the probe.
///
/// The candidate pool is the union of semantic neighbours (when the probe
/// atom has an embedding), exact content matches, structurally similar
/// atoms, items under the same goal anchor, and recently touched items.
/// The probe itself is never part of its own context.
///
/// # Errors
///
/// Propagates store failures; an individual retrieval path that fails is
/// surfaced rather than silently dropped.
pub fn find_context(
    probe: &Item,
    store: &WorldModel,
    config: &ResonanceConfig,
    k: usize,
) -> NoemaResult<Vec<(Item, f32)>> {
    let probe_atom = store.get_atom(&probe.atom_id)?;
    let mut candidates: HashMap<ItemId, Item> = HashMap::new();
    let mut collect = |items: Vec<Item>| {
        for item in items {
            if item.id != probe.id {
                candidates.entry(item.id).or_insert(item);
            }
        }
    };

    if probe_atom.has_embedding() {
        let hits = store.query_by_semantic(&probe_atom.embedding, config.per_source_k)?;
        collect(hits.into_iter().map(|(item, _)| item).collect());
    }
    collect(store.query_by_symbolic(&probe_atom.content, config.per_source_k)?);
    for query in shape_queries(&probe_atom.content) {
        collect(store.query_by_structure(&query, config.per_source_k)?);
    }
    if let Some(anchor) = goal_anchor(probe) {
        collect(store.items_with_goal_parent(&anchor)?);
    }
    collect(store.recent_items(config.recency_window, config.per_source_k)?);

    let required_sources = required_sources(&probe_atom);
    let now = Utc::now();
    let mut scored: Vec<(Item, f32)> = Vec::with_capacity(candidates.len());
    for (_, candidate) in candidates {
        let atom = match store.get_atom(&candidate.atom_id) {
            Ok(atom) => atom,
            Err(_) => continue,
        };

        let mut score = config.priority_weight * candidate.attention.priority;

        let idle_ms = (now - candidate.last_accessed).num_milliseconds().max(0) as f32;
        let window_ms = config.recency_window.num_milliseconds().max(1) as f32;
        score += config.recency_weight * (-idle_ms / window_ms).exp();

        score += config.trust_weight * atom.meta.trust;

        if candidate.kind == probe.kind {
            score += config.same_kind_weight;
        }
        if shares_lineage(probe, &candidate) {
            score += config.lineage_weight;
        }
        if let Some(required) = &required_sources {
            if required
                .get(atom.meta.source.as_str())
                .is_some_and(|&min_trust| atom.meta.trust >= min_trust)
            {
                score += config.source_bonus;
            }
        }
        scored.push((candidate, score));
    }

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);
    debug!(probe = %probe.id, context = scored.len(), "resonance context assembled");
    Ok(scored)
}

/// Broad structural probes derived from the content's shape: shared
/// top-level keys for maps, a shared head symbol for lists.
fn shape_queries(content: &Content) -> Vec<PathQuery> {
    match content {
        Content::Map(map) => map
            .keys()
            .take(4)
            .map(|key| PathQuery {
                steps: vec![PathStep::Key(key.clone())],
                op: PathOp::Exists,
            })
            .collect(),
        Content::List(items) => items
            .first()
            .and_then(Content::as_text)
            .map(|head| PathQuery {
                steps: vec![PathStep::Index(0)],
                op: PathOp::Equals(Content::text(head)),
            })
            .into_iter()
            .collect(),
        Content::Text(_) => Vec::new(),
    }
}

fn goal_anchor(item: &Item) -> Option<ItemId> {
    if item.kind == ItemKind::Goal {
        Some(item.id)
    } else {
        item.goal_parent_id
    }
}

fn shares_lineage(probe: &Item, candidate: &Item) -> bool {
    if probe.goal_parent_id.is_some() && probe.goal_parent_id == candidate.goal_parent_id {
        return true;
    }
    if candidate.goal_parent_id == Some(probe.id) || probe.goal_parent_id == Some(candidate.id) {
        return true;
    }
    probe.stamp.parent_ids.iter().any(|p| {
        *p == candidate.id || candidate.stamp.parent_ids.contains(p)
    }) || candidate.stamp.parent_ids.contains(&probe.id)
}

/// Parses the `required_sources` extension of the probe atom: a map from
/// source name to minimum trust.
fn required_sources(atom: &Atom) -> Option<HashMap<String, f32>> {
    let value = atom.meta.extensions.get("required_sources")?;
    let object = value.as_object()?;
    Some(
        object
            .iter()
            .filter_map(|(source, min)| {
                min.as_f64().map(|m| (source.clone(), m as f32))
            })
            .collect(),
    )
}
