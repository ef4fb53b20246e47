//! The engine facade: wires the store, agenda, matcher, goal tracker,
//! attention economy, and event bus into one handle.
//!
//! Outer layers (perception, action, reflection) talk to [`Engine`];
//! workers hold a shared handle and drive the processing loop through it.

use std::sync::Arc;

use tracing::info;

use crate::agenda::Agenda;
use crate::atom::{Atom, AtomId, AtomMeta};
use crate::attention::{AttentionEconomy, DecayReport, EconomyConfig};
use crate::content::Content;
use crate::error::NoemaResult;
use crate::events::{CoreEvent, EventBus};
use crate::goals::{GoalTracker, StatusReport};
use crate::item::{GoalStatus, Item, ItemId, ItemKind, ItemPatch};
use crate::matcher::SchemaMatcher;
use crate::resonance::ResonanceConfig;
use crate::store::WorldModel;

/// Construction-time engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Attention economy tunables.
    pub economy: EconomyConfig,
    /// Context retrieval tunables.
    pub resonance: ResonanceConfig,
    /// Embedding dimensionality accepted by the store.
    pub embedding_dim: usize,
    /// Context items gathered per worker cycle.
    pub context_k: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            economy: EconomyConfig::default(),
            resonance: ResonanceConfig::default(),
            embedding_dim: crate::store::DEFAULT_EMBEDDING_DIM,
            context_k: 8,
        }
    }
}

/// Aggregate counters for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Stored atoms.
    pub atoms: usize,
    /// Stored items.
    pub items: usize,
    /// Stored goal items.
    pub goals: usize,
    /// Items currently queued.
    pub agenda_len: usize,
    /// Registered schemas.
    pub schemas: usize,
    /// Contradictions logged so far.
    pub conflicts: usize,
}

/// One handle over the whole inference core.
///
/// # Examples
///
/// ```
/// use noema::{Engine, Content, AtomKind, AtomMeta, ItemKind, TruthValue};
///
/// let engine = Engine::default();
/// let meta = AtomMeta::new(AtomKind::Fact, "sensor", 0.9).unwrap();
/// let atom = engine
///     .find_or_create_atom(Content::text("sky is blue"), Vec::new(), meta)
///     .unwrap();
/// let item = engine
///     .perceive(atom.id, ItemKind::Belief, Some(TruthValue::new(1.0, 0.9).unwrap()))
///     .unwrap();
/// assert_eq!(engine.stats().unwrap().agenda_len, 1);
/// assert!(engine.agenda().contains(&item.id));
/// ```
#[derive(Debug)]
pub struct Engine {
    store: Arc<WorldModel>,
    agenda: Arc<Agenda>,
    matcher: Arc<SchemaMatcher>,
    goals: Arc<GoalTracker>,
    economy: AttentionEconomy,
    resonance: ResonanceConfig,
    events: Arc<EventBus>,
    context_k: usize,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// Builds an engine from the given configuration.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let economy = AttentionEconomy::new(config.economy);
        Self {
            store: Arc::new(WorldModel::new(config.embedding_dim)),
            agenda: Arc::new(Agenda::new()),
            matcher: Arc::new(SchemaMatcher::new(economy.clone())),
            goals: Arc::new(GoalTracker::new()),
            economy,
            resonance: config.resonance,
            events: Arc::new(EventBus::new()),
            context_k: config.context_k,
        }
    }

    /// The knowledge store.
    #[must_use]
    pub fn store(&self) -> &WorldModel {
        &self.store
    }

    /// The scheduler.
    #[must_use]
    pub fn agenda(&self) -> &Agenda {
        &self.agenda
    }

    /// The schema matcher.
    #[must_use]
    pub fn matcher(&self) -> &SchemaMatcher {
        &self.matcher
    }

    /// The goal tracker.
    #[must_use]
    pub fn goals(&self) -> &GoalTracker {
        &self.goals
    }

    /// The attention economy.
    #[must_use]
    pub fn economy(&self) -> &AttentionEconomy {
        &self.economy
    }

    /// The resonance configuration.
    #[must_use]
    pub fn resonance(&self) -> &ResonanceConfig {
        &self.resonance
    }

    /// Context items gathered per worker cycle.
    #[must_use]
    pub fn context_k(&self) -> usize {
        self.context_k
    }

    /// Subscribes to core events with the given channel capacity.
    pub fn subscribe(&self, capacity: usize) -> crossbeam_channel::Receiver<CoreEvent> {
        self.events.subscribe(capacity)
    }

    /// Adds an atom to the store (idempotent).
    ///
    /// # Errors
    ///
    /// Propagates store and index failures.
    pub fn add_atom(&self, atom: Atom) -> NoemaResult<AtomId> {
        self.store.add_atom(atom)
    }

    /// Finds or creates an atom by content address.
    ///
    /// # Errors
    ///
    /// Propagates store and index failures.
    pub fn find_or_create_atom(
        &self,
        content: Content,
        embedding: Vec<f32>,
        meta: AtomMeta,
    ) -> NoemaResult<Atom> {
        self.store.find_or_create_atom(content, embedding, meta)
    }

    /// Adds an existing atom's schema definition to the matcher, storing
    /// the atom first if needed.
    ///
    /// # Errors
    ///
    /// Returns validation errors for malformed or non-schema atoms.
    pub fn register_schema(&self, atom: Atom) -> NoemaResult<AtomId> {
        let id = self.store.add_atom(atom.clone())?;
        self.matcher.register_schema(&atom)?;
        Ok(id)
    }

    /// Perception entry point: mints an item for an atom, stores it, and
    /// schedules it.
    ///
    /// The item receives an externally-boosted initial attention value;
    /// goals are registered with the tracker and carry their computed
    /// initial status.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AtomNotFound` for unknown atoms and builder
    /// validation errors (e.g. a belief without truth).
    pub fn perceive(
        &self,
        atom_id: AtomId,
        kind: ItemKind,
        truth: Option<crate::item::TruthValue>,
    ) -> NoemaResult<Item> {
        let attention = self.economy.initial(kind, truth, true);
        let mut builder = Item::builder().atom(atom_id).kind(kind).attention(attention);
        if let Some(truth) = truth {
            builder = builder.truth(truth);
        }
        let item = builder.build().map_err(crate::error::NoemaError::from)?;
        self.add_item_internal(item)
    }

    /// Stores an already-built item and schedules it.
    ///
    /// # Errors
    ///
    /// Propagates store and tracker failures.
    pub fn add_item(&self, item: Item) -> NoemaResult<Item> {
        self.add_item_internal(item)
    }

    fn add_item_internal(&self, item: Item) -> NoemaResult<Item> {
        self.store.add_item(item.clone())?;
        let item = if item.kind == ItemKind::Goal {
            let status = self.goals.add_goal(&item)?;
            self.store
                .update_item(&item.id, &ItemPatch::new().goal_status(status))?
        } else {
            item
        };
        self.events.publish(&CoreEvent::ItemAdded(item.id));
        // Blocked goals wait for their dependencies; everything else
        // competes for processing immediately.
        if item.goal_status != Some(GoalStatus::Blocked) {
            self.agenda.push(item.clone());
        }
        Ok(item)
    }

    /// Schedules an item already present in the store.
    pub fn push(&self, item: Item) {
        self.agenda.push(item);
    }

    /// Revises the belief about an item's atom; see
    /// [`WorldModel::revise_belief`].
    ///
    /// Publishes `ItemUpdated` on a merge and `ConflictDetected` for any
    /// newly logged contradiction.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn revise_belief(&self, incoming: &Item) -> NoemaResult<Option<Item>> {
        let conflicts_before = self.store.conflicts().len();
        let updated = self.store.revise_belief(incoming)?;
        if let Some(updated) = &updated {
            self.events.publish(&CoreEvent::ItemUpdated(updated.id));
        }
        for warning in self.store.conflicts().into_iter().skip(conflicts_before) {
            self.events.publish(&CoreEvent::ConflictDetected(warning));
        }
        Ok(updated)
    }

    /// Marks a goal achieved, applying and publishing all propagated
    /// status changes.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::GoalNotFound` for untracked goals.
    pub fn mark_goal_achieved(&self, id: &ItemId) -> NoemaResult<StatusReport> {
        let report = self.goals.mark_achieved(id)?;
        self.finish_transition(id, GoalStatus::Achieved, &report)?;
        Ok(report)
    }

    /// Marks a goal failed, applying and publishing all propagated status
    /// changes.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::GoalNotFound` for untracked goals.
    pub fn mark_goal_failed(&self, id: &ItemId) -> NoemaResult<StatusReport> {
        let report = self.goals.mark_failed(id)?;
        self.finish_transition(id, GoalStatus::Failed, &report)?;
        Ok(report)
    }

    fn finish_transition(
        &self,
        id: &ItemId,
        status: GoalStatus,
        report: &StatusReport,
    ) -> NoemaResult<()> {
        self.store
            .update_item(id, &ItemPatch::new().goal_status(status))?;
        self.agenda.remove(id);
        self.events
            .publish(&CoreEvent::GoalStatusChanged(*id, status));

        for unblocked in &report.unblocked {
            let item = self
                .store
                .update_item(unblocked, &ItemPatch::new().goal_status(GoalStatus::Active))?;
            self.events
                .publish(&CoreEvent::GoalStatusChanged(*unblocked, GoalStatus::Active));
            self.agenda.push(item);
        }
        for (parent, parent_status) in &report.parent_updates {
            self.store
                .update_item(parent, &ItemPatch::new().goal_status(*parent_status))?;
            self.agenda.remove(parent);
            self.events
                .publish(&CoreEvent::GoalStatusChanged(*parent, *parent_status));
        }
        Ok(())
    }

    /// Runs one attention decay sweep and publishes its consequences.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn run_decay_cycle(&self) -> NoemaResult<DecayReport> {
        let report = self.economy.run_decay_cycle(&self.store, &self.agenda)?;
        for id in &report.removed {
            self.events.publish(&CoreEvent::ItemRemovedFromAgenda(*id));
        }
        for id in &report.flagged {
            self.events.publish(&CoreEvent::ItemFlaggedForArchival(*id));
        }
        info!(
            examined = report.examined,
            removed = report.removed.len(),
            flagged = report.flagged.len(),
            "decay cycle"
        );
        Ok(report)
    }

    /// Aggregate counters for monitoring.
    ///
    /// # Errors
    ///
    /// Fails only on a poisoned store lock.
    pub fn stats(&self) -> NoemaResult<EngineStats> {
        Ok(EngineStats {
            atoms: self.store.atom_count()?,
            items: self.store.item_count()?,
            goals: self.store.goal_count()?,
            agenda_len: self.agenda.len(),
            schemas: self.matcher.schema_count(),
            conflicts: self.store.conflicts().len(),
        })
    }
}
