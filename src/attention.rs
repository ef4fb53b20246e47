//! Attention economy: salience values, budgets, and the decay cycle.
//!
//! Every item carries an [`AttentionValue`]. The economy mints initial
//! values for new items, computes derived values for inference products,
//! reinforces items that participate in useful work, and periodically
//! decays everything so the agenda stays focused on what is current.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agenda::Agenda;
use crate::error::{NoemaResult, ValidationError};
use crate::item::{Item, ItemId, ItemKind, ItemPatch, TruthValue};
use crate::store::WorldModel;

/// Salience of an item: how urgently it competes for processing (priority)
/// and how resistant it is to forgetting (durability). Both in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttentionValue {
    /// Scheduling urgency.
    pub priority: f32,
    /// Resistance to decay-driven archival.
    pub durability: f32,
}

impl AttentionValue {
    /// Creates an attention value with validation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::AttentionOutOfRange` when either component
    /// is outside [0, 1].
    pub fn new(priority: f32, durability: f32) -> Result<Self, ValidationError> {
        if !(0.0..=1.0).contains(&priority) || priority.is_nan() {
            return Err(ValidationError::AttentionOutOfRange {
                field: "priority",
                value: priority,
            });
        }
        if !(0.0..=1.0).contains(&durability) || durability.is_nan() {
            return Err(ValidationError::AttentionOutOfRange {
                field: "durability",
                value: durability,
            });
        }
        Ok(Self {
            priority,
            durability,
        })
    }

    /// Creates an attention value, clamping components into range.
    #[must_use]
    pub fn clamped(priority: f32, durability: f32) -> Self {
        Self {
            priority: priority.clamp(0.0, 1.0),
            durability: durability.clamp(0.0, 1.0),
        }
    }
}

impl Default for AttentionValue {
    fn default() -> Self {
        Self {
            priority: 0.5,
            durability: 0.5,
        }
    }
}

/// Tunable parameters of the attention economy.
#[derive(Debug, Clone)]
pub struct EconomyConfig {
    /// Base priority for new goals.
    pub goal_base: f32,
    /// Base priority for new queries.
    pub query_base: f32,
    /// Base priority for new beliefs.
    pub belief_base: f32,
    /// Extra priority for externally supplied (perceived) items.
    pub external_boost: f32,
    /// Reinforcement boost for the item a worker processed directly.
    pub primary_boost: f32,
    /// Reinforcement boost for items that served as context.
    pub context_boost: f32,
    /// Multiplicative decay applied once an item has idled a full window.
    pub decay_factor: f32,
    /// Idle duration at which the full decay factor applies.
    pub recency_window: Duration,
    /// Priority below which an item is dropped from the agenda.
    pub priority_floor: f32,
    /// Durability below which an item is flagged for archival.
    pub durability_floor: f32,
    /// Hard ceiling on minted and boosted values.
    pub cap: f32,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            goal_base: 0.7,
            query_base: 0.6,
            belief_base: 0.5,
            external_boost: 0.1,
            primary_boost: 0.02,
            context_boost: 0.01,
            decay_factor: 0.95,
            recency_window: Duration::minutes(10),
            priority_floor: 0.05,
            durability_floor: 0.1,
            cap: 0.99,
        }
    }
}

/// Outcome of one decay sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecayReport {
    /// Items examined.
    pub examined: usize,
    /// Items whose priority fell below the floor and were removed from the
    /// agenda. They remain in the store and stay retrievable.
    pub removed: Vec<ItemId>,
    /// Items whose durability fell below the floor and were flagged for
    /// archival.
    pub flagged: Vec<ItemId>,
}

/// Mints, adjusts, and decays attention values.
#[derive(Debug, Clone, Default)]
pub struct AttentionEconomy {
    config: EconomyConfig,
}

impl AttentionEconomy {
    /// Creates an economy with the given configuration.
    #[must_use]
    pub fn new(config: EconomyConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EconomyConfig {
        &self.config
    }

    /// Mints the attention value for a newly created item.
    ///
    /// Priority starts at the kind base, plus a boost when the item came
    /// from outside rather than from inference. Durability tracks how much
    /// the item is worth keeping: a belief inherits its confidence, a goal
    /// is sticky, a query is cheap to forget.
    #[must_use]
    pub fn initial(
        &self,
        kind: ItemKind,
        truth: Option<TruthValue>,
        external: bool,
    ) -> AttentionValue {
        let base = match kind {
            ItemKind::Goal => self.config.goal_base,
            ItemKind::Query => self.config.query_base,
            ItemKind::Belief => self.config.belief_base,
        };
        let priority = if external {
            base + self.config.external_boost
        } else {
            base
        };
        let durability = match kind {
            ItemKind::Belief => truth.map_or(0.5, |t| t.confidence),
            ItemKind::Goal => 0.7,
            ItemKind::Query => 0.4,
        };
        AttentionValue::clamped(priority.min(self.config.cap), durability)
    }

    /// Computes the attention value for an inference product.
    ///
    /// Priority is the durability-weighted average of the parents' priority,
    /// scaled by the producing rule's trust, so conclusions never outrank
    /// well-established premises through a weak rule.
    #[must_use]
    pub fn derived(&self, parents: &[&Item], rule_trust: f32) -> AttentionValue {
        if parents.is_empty() {
            return AttentionValue::clamped(
                self.config.belief_base * rule_trust.clamp(0.0, 1.0),
                0.5,
            );
        }
        let weight_sum: f32 = parents.iter().map(|p| p.attention.durability).sum();
        let (priority, durability) = if weight_sum > 0.0 {
            let weighted: f32 = parents
                .iter()
                .map(|p| p.attention.priority * p.attention.durability)
                .sum();
            (weighted / weight_sum, weight_sum / parents.len() as f32)
        } else {
            let mean: f32 = parents.iter().map(|p| p.attention.priority).sum::<f32>()
                / parents.len() as f32;
            (mean, 0.0)
        };
        AttentionValue::clamped(
            (priority * rule_trust.clamp(0.0, 1.0)).min(self.config.cap),
            durability.min(self.config.cap),
        )
    }

    /// Reinforces an item a worker just processed and the items that served
    /// as its context, refreshing their access time.
    ///
    /// Failures on individual items are logged and skipped; reinforcement is
    /// advisory, not transactional.
    pub fn reinforce(&self, store: &WorldModel, primary: ItemId, context: &[ItemId]) {
        let now = Utc::now();
        self.boost_one(store, primary, self.config.primary_boost, now);
        for &id in context {
            if id != primary {
                self.boost_one(store, id, self.config.context_boost, now);
            }
        }
    }

    fn boost_one(
        &self,
        store: &WorldModel,
        id: ItemId,
        boost: f32,
        now: chrono::DateTime<Utc>,
    ) {
        let Ok(item) = store.get_item(&id) else {
            debug!(item = %id, "reinforce skipped, item not in store");
            return;
        };
        let attention = AttentionValue::clamped(
            (item.attention.priority + boost).min(self.config.cap),
            (item.attention.durability + boost / 2.0).min(self.config.cap),
        );
        let patch = ItemPatch::new().attention(attention).last_accessed(now);
        if let Err(err) = store.update_item(&id, &patch) {
            debug!(item = %id, error = %err, "reinforce patch failed");
        }
    }

    /// Returns the decay multiplier for an item idle for `idle`.
    ///
    /// The full decay factor applies once the item has idled a whole
    /// recency window; fresher items decay proportionally less, down to no
    /// decay at all for items touched this instant.
    #[must_use]
    pub fn effective_factor(&self, idle: Duration) -> f32 {
        let window_ms = self.config.recency_window.num_milliseconds().max(1) as f32;
        let idle_ms = idle.num_milliseconds().max(0) as f32;
        let age_ratio = (idle_ms / window_ms).min(1.0);
        1.0 - (1.0 - self.config.decay_factor) * age_ratio
    }

    /// Runs one decay sweep over every item in the store.
    ///
    /// Works from a snapshot and patches items one at a time, so no
    /// store-wide lock is held across the sweep. Items whose priority falls
    /// below the floor are removed from the agenda but remain retrievable;
    /// items whose durability falls below the floor are flagged for
    /// archival and left for outer reflection to judge.
    ///
    /// # Errors
    ///
    /// Returns the first storage error encountered while patching.
    pub fn run_decay_cycle(&self, store: &WorldModel, agenda: &Agenda) -> NoemaResult<DecayReport> {
        let now = Utc::now();
        let snapshot = store.all_items()?;
        let mut report = DecayReport {
            examined: snapshot.len(),
            ..DecayReport::default()
        };

        for item in snapshot {
            if item.is_settled_goal() {
                continue;
            }
            let factor = self.effective_factor(now - item.last_accessed);
            let decayed = AttentionValue::clamped(
                item.attention.priority * factor,
                item.attention.durability * factor,
            );

            let mut patch = ItemPatch::new().attention(decayed);
            let flag = decayed.durability < self.config.durability_floor && !item.archival_flag;
            if flag {
                patch = patch.archival_flag(true);
            }
            store.update_item(&item.id, &patch)?;

            if decayed.priority < self.config.priority_floor && agenda.remove(&item.id) {
                report.removed.push(item.id);
            }
            if flag {
                report.flagged.push(item.id);
            }
        }

        debug!(
            examined = report.examined,
            removed = report.removed.len(),
            flagged = report.flagged.len(),
            "decay cycle complete"
        );
        Ok(report)
    }
}
