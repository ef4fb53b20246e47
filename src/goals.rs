//! Goal tracking: the dependency graph of goals and status propagation.
//!
//! The tracker keeps an id-indexed node table rather than owning trees, so
//! there are no reference cycles and every transition happens under one
//! mutex. Status changes ripple in two directions: achieving a goal can
//! unblock sibling goals that depended on it (one level), and a parent
//! becomes terminal only when all of its children agree on one terminal
//! status. A goal without children never changes status on its own.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, instrument};

use crate::atom::Atom;
use crate::attention::AttentionEconomy;
use crate::error::{EngineError, NoemaResult};
use crate::item::{GoalStatus, Item, ItemId, ItemKind, ItemPatch, Stamp};
use crate::matcher::SchemaMatcher;
use crate::schema::SchemaBody;
use crate::store::WorldModel;
use crate::unify::substitute;

#[derive(Debug, Clone)]
struct GoalNode {
    parent: Option<ItemId>,
    children: Vec<ItemId>,
    deps: Vec<ItemId>,
    status: GoalStatus,
}

/// Status changes produced by one terminal transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// Dependent goals that moved from Blocked to Active.
    pub unblocked: Vec<ItemId>,
    /// Ancestors whose status changed, with their new status.
    pub parent_updates: Vec<(ItemId, GoalStatus)>,
}

/// Tracks goal dependency structure and propagates status changes.
#[derive(Debug, Default)]
pub struct GoalTracker {
    nodes: Mutex<HashMap<ItemId, GoalNode>>,
}

/// Propagation stops past this depth; goal trees deeper than this indicate
/// a decomposition loop.
const MAX_PROPAGATION_DEPTH: usize = 64;

impl GoalTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ItemId, GoalNode>> {
        // Transitions mutate single nodes; a panic mid-update cannot occur
        // between related writes, so entering a poisoned lock is safe.
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a goal item, attaching it to its parent's child set.
    ///
    /// The goal starts Blocked when any of its dependencies is not yet
    /// achieved, Active otherwise. Returns the initial status.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::WrongKind` for non-goal items.
    pub fn add_goal(&self, item: &Item) -> NoemaResult<GoalStatus> {
        if item.kind != ItemKind::Goal {
            return Err(EngineError::WrongKind {
                id: item.id,
                expected: ItemKind::Goal,
                actual: item.kind,
            }
            .into());
        }
        let mut nodes = self.lock();
        if nodes.contains_key(&item.id) {
            return Err(EngineError::DuplicateItem { id: item.id }.into());
        }
        let status = if item
            .goal_deps
            .iter()
            .any(|dep| nodes.get(dep).map_or(true, |n| n.status != GoalStatus::Achieved))
        {
            GoalStatus::Blocked
        } else {
            GoalStatus::Active
        };
        if let Some(parent) = item.goal_parent_id {
            if let Some(parent_node) = nodes.get_mut(&parent) {
                parent_node.children.push(item.id);
            }
        }
        nodes.insert(
            item.id,
            GoalNode {
                parent: item.goal_parent_id,
                children: Vec::new(),
                deps: item.goal_deps.clone(),
                status,
            },
        );
        debug!(goal = %item.id, status = %status, "goal registered");
        Ok(status)
    }

    /// Decomposes a goal using every matching decomposition schema,
    /// minting subgoal items with resolved dependencies.
    ///
    /// Temp ids in the schema resolve to fresh item ids; a subgoal whose
    /// dependencies are all declaration-order siblings starts Blocked until
    /// they achieve. The minted items are stored, registered with the
    /// tracker, and returned for scheduling. Returns an empty vector when
    /// no schema matches.
    ///
    /// # Errors
    ///
    /// Propagates store failures; schema-level problems are logged and
    /// skipped by the matcher.
    #[instrument(skip_all, fields(goal = %goal.id))]
    pub fn decompose(
        &self,
        goal: &Item,
        atom: &Atom,
        matcher: &SchemaMatcher,
        store: &WorldModel,
        economy: &AttentionEconomy,
    ) -> NoemaResult<Vec<Item>> {
        let matches = matcher.match_decompositions(goal, atom);
        let mut minted = Vec::new();

        for (schema, bindings) in matches {
            let SchemaBody::Decomposition { subgoals, .. } = &schema.body else {
                continue;
            };
            // First pass: one fresh id per temp id.
            let id_map: HashMap<&str, ItemId> = subgoals
                .iter()
                .map(|sg| (sg.tmp_id.as_str(), ItemId::new()))
                .collect();

            for template in subgoals {
                let content = substitute(&template.content, &bindings);
                let meta = crate::atom::AtomMeta::derived(
                    format!("schema:{}", schema.id),
                    schema.trust,
                );
                let sub_atom = store.find_or_create_atom(content, Vec::new(), meta)?;
                let deps: Vec<ItemId> = template
                    .deps
                    .iter()
                    .filter_map(|d| id_map.get(d.as_str()).copied())
                    .collect();

                let mut builder = Item::builder()
                    .id(id_map[template.tmp_id.as_str()])
                    .atom(sub_atom.id)
                    .kind(template.kind)
                    .attention(economy.derived(&[goal], schema.trust))
                    .stamp(Stamp::derived(vec![goal.id], schema.id))
                    .goal_parent(goal.id)
                    .goal_deps(deps);
                if let Some(label) = &template.label {
                    builder = builder.label(label.clone());
                }
                let item = builder.build().map_err(crate::error::NoemaError::from)?;
                store.add_item(item.clone())?;
                let status = self.add_goal(&item)?;
                let item = store
                    .update_item(&item.id, &ItemPatch::new().goal_status(status))?;
                minted.push(item);
            }
        }
        debug!(count = minted.len(), "goal decomposed");
        Ok(minted)
    }

    /// Marks a goal achieved and propagates the change.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::GoalNotFound` for untracked ids.
    pub fn mark_achieved(&self, id: &ItemId) -> NoemaResult<StatusReport> {
        self.transition(id, GoalStatus::Achieved)
    }

    /// Marks a goal failed and propagates the change.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::GoalNotFound` for untracked ids.
    pub fn mark_failed(&self, id: &ItemId) -> NoemaResult<StatusReport> {
        self.transition(id, GoalStatus::Failed)
    }

    fn transition(&self, id: &ItemId, status: GoalStatus) -> NoemaResult<StatusReport> {
        let mut nodes = self.lock();
        let node = nodes
            .get_mut(id)
            .ok_or(EngineError::GoalNotFound { id: *id })?;
        if node.status == status {
            return Ok(StatusReport::default());
        }
        node.status = status;
        let mut report = StatusReport::default();

        if status == GoalStatus::Achieved {
            // One-level unblocking: dependents of this goal whose deps are
            // now all achieved become active.
            let dependents: Vec<ItemId> = nodes
                .iter()
                .filter(|(_, n)| n.status == GoalStatus::Blocked && n.deps.contains(id))
                .map(|(dep_id, _)| *dep_id)
                .collect();
            for dep_id in dependents {
                let all_achieved = nodes[&dep_id].deps.iter().all(|d| {
                    nodes
                        .get(d)
                        .is_some_and(|n| n.status == GoalStatus::Achieved)
                });
                if all_achieved {
                    if let Some(n) = nodes.get_mut(&dep_id) {
                        n.status = GoalStatus::Active;
                    }
                    report.unblocked.push(dep_id);
                }
            }
        }

        // Upward propagation: a parent turns terminal only when every child
        // shares one terminal status.
        let mut current = nodes.get(id).and_then(|n| n.parent);
        for _ in 0..MAX_PROPAGATION_DEPTH {
            let Some(parent_id) = current else {
                break;
            };
            let Some(parent) = nodes.get(&parent_id) else {
                break;
            };
            if parent.status.is_terminal() || parent.children.is_empty() {
                break;
            }
            let Some(first) = parent
                .children
                .first()
                .and_then(|c| nodes.get(c))
                .map(|n| n.status)
            else {
                break;
            };
            let unanimous = first.is_terminal()
                && parent
                    .children
                    .iter()
                    .all(|c| nodes.get(c).is_some_and(|n| n.status == first));
            if !unanimous {
                break;
            }
            let next = parent.parent;
            if let Some(p) = nodes.get_mut(&parent_id) {
                p.status = first;
            }
            report.parent_updates.push((parent_id, first));
            current = next;
        }

        debug!(
            goal = %id,
            status = %status,
            unblocked = report.unblocked.len(),
            parents = report.parent_updates.len(),
            "goal transition"
        );
        Ok(report)
    }

    /// The tracked status of a goal, if known.
    #[must_use]
    pub fn status(&self, id: &ItemId) -> Option<GoalStatus> {
        self.lock().get(id).map(|n| n.status)
    }

    /// The child goals of a goal.
    #[must_use]
    pub fn children(&self, id: &ItemId) -> Vec<ItemId> {
        self.lock()
            .get(id)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Returns true if the goal is tracked.
    #[must_use]
    pub fn contains(&self, id: &ItemId) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of tracked goals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no goals are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns true if the goal has children and every one of them has
    /// achieved.
    #[must_use]
    pub fn subtree_achieved(&self, id: &ItemId) -> bool {
        let nodes = self.lock();
        let Some(node) = nodes.get(id) else {
            return false;
        };
        !node.children.is_empty()
            && node.children.iter().all(|c| {
                nodes
                    .get(c)
                    .is_some_and(|n| n.status == GoalStatus::Achieved)
            })
    }
}
