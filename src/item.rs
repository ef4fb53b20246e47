//! Item types—the mutable stance toward an atom.
//!
//! An item is not knowledge; it is what the engine currently does with a
//! piece of knowledge: believe it (with a truth value), pursue it (as a
//! goal), or wonder about it (as a query). Many items may reference one
//! atom. Items mutate in place via belief revision, attention updates, and
//! goal-status transitions; they are never deleted from the store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::atom::AtomId;
use crate::attention::AttentionValue;
use crate::error::ValidationError;

/// Unique identifier for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(uuid::Uuid);

impl ItemId {
    /// Creates a new random item ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The stance an item takes toward its atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// An assertion held with a truth value.
    Belief,
    /// A desired state the engine works toward.
    Goal,
    /// An open question seeking answers.
    Query,
}

impl ItemKind {
    /// Parses a lowercase kind token.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "belief" => Some(Self::Belief),
            "goal" => Some(Self::Goal),
            "query" => Some(Self::Query),
            _ => None,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Belief => write!(f, "belief"),
            Self::Goal => write!(f, "goal"),
            Self::Query => write!(f, "query"),
        }
    }
}

/// Empirical support for a belief: (frequency, confidence), both in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruthValue {
    /// Observed frequency of the statement holding.
    pub frequency: f32,
    /// Certainty about the frequency estimate.
    pub confidence: f32,
}

impl TruthValue {
    /// Creates a truth value with validation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::TruthOutOfRange` when either component is
    /// outside [0, 1].
    pub fn new(frequency: f32, confidence: f32) -> Result<Self, ValidationError> {
        if !(0.0..=1.0).contains(&frequency) || frequency.is_nan() {
            return Err(ValidationError::TruthOutOfRange {
                field: "frequency",
                value: frequency,
            });
        }
        if !(0.0..=1.0).contains(&confidence) || confidence.is_nan() {
            return Err(ValidationError::TruthOutOfRange {
                field: "confidence",
                value: confidence,
            });
        }
        Ok(Self {
            frequency,
            confidence,
        })
    }
}

impl fmt::Display for TruthValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<f={:.2}, c={:.2}>", self.frequency, self.confidence)
    }
}

/// Lifecycle state of a goal item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    /// Ready to be worked on.
    Active,
    /// Waiting on unmet dependencies.
    Blocked,
    /// Terminal: completed.
    Achieved,
    /// Terminal: given up or impossible.
    Failed,
}

impl GoalStatus {
    /// Returns true for `Achieved` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Achieved | Self::Failed)
    }
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Blocked => write!(f, "blocked"),
            Self::Achieved => write!(f, "achieved"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Provenance stamp: where an item came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamp {
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Parent item ids, if derived.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_ids: Vec<ItemId>,
    /// The schema atom that produced this item, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<AtomId>,
}

impl Stamp {
    /// A stamp for externally supplied input.
    #[must_use]
    pub fn external() -> Self {
        Self {
            created_at: Utc::now(),
            parent_ids: Vec::new(),
            rule_id: None,
        }
    }

    /// A stamp for derived items.
    #[must_use]
    pub fn derived(parent_ids: Vec<ItemId>, rule_id: AtomId) -> Self {
        Self {
            created_at: Utc::now(),
            parent_ids,
            rule_id: Some(rule_id),
        }
    }
}

/// A mutable stance toward an atom.
///
/// # Examples
///
/// ```
/// use noema::{Item, ItemKind, TruthValue, Atom, AtomKind, AtomMeta, Content};
///
/// let meta = AtomMeta::new(AtomKind::Fact, "sensor", 0.9).unwrap();
/// let atom = Atom::new(Content::text("door is open"), Vec::new(), meta);
/// let item = Item::builder()
///     .atom(atom.id)
///     .kind(ItemKind::Belief)
///     .truth(TruthValue::new(1.0, 0.9).unwrap())
///     .build()
///     .unwrap();
/// assert!(item.truth.is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Unique item id.
    pub id: ItemId,
    /// The referenced atom.
    pub atom_id: AtomId,
    /// Stance kind.
    pub kind: ItemKind,
    /// Truth value; present on beliefs only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truth: Option<TruthValue>,
    /// Salience driving scheduling and retention.
    pub attention: AttentionValue,
    /// Provenance.
    pub stamp: Stamp,
    /// Parent goal in the goal tree, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_parent_id: Option<ItemId>,
    /// Sibling goals this goal depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub goal_deps: Vec<ItemId>,
    /// Goal lifecycle state; present on goals only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_status: Option<GoalStatus>,
    /// Optional human-readable label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Last time a worker touched this item.
    pub last_accessed: DateTime<Utc>,
    /// Set by the decay cycle when durability falls below the archival
    /// floor; external reflection decides what to do with it.
    #[serde(default)]
    pub archival_flag: bool,
}

impl Item {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> ItemBuilder {
        ItemBuilder::default()
    }

    /// Returns true if this is a goal in a terminal state.
    #[must_use]
    pub fn is_settled_goal(&self) -> bool {
        self.kind == ItemKind::Goal && self.goal_status.is_some_and(GoalStatus::is_terminal)
    }

    /// Applies a patch in place.
    pub fn apply(&mut self, patch: &ItemPatch) {
        if let Some(truth) = patch.truth {
            self.truth = Some(truth);
        }
        if let Some(attention) = patch.attention {
            self.attention = attention;
        }
        if let Some(status) = patch.goal_status {
            self.goal_status = Some(status);
        }
        if let Some(ref label) = patch.label {
            self.label = Some(label.clone());
        }
        if let Some(at) = patch.last_accessed {
            self.last_accessed = at;
        }
        if let Some(flag) = patch.archival_flag {
            self.archival_flag = flag;
        }
    }
}

/// Partial in-place update for an item held by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemPatch {
    /// New truth value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truth: Option<TruthValue>,
    /// New attention value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention: Option<AttentionValue>,
    /// New goal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_status: Option<GoalStatus>,
    /// New label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// New access time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
    /// New archival flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archival_flag: Option<bool>,
}

impl ItemPatch {
    /// An empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the truth value.
    #[must_use]
    pub fn truth(mut self, truth: TruthValue) -> Self {
        self.truth = Some(truth);
        self
    }

    /// Sets the attention value.
    #[must_use]
    pub fn attention(mut self, attention: AttentionValue) -> Self {
        self.attention = Some(attention);
        self
    }

    /// Sets the goal status.
    #[must_use]
    pub fn goal_status(mut self, status: GoalStatus) -> Self {
        self.goal_status = Some(status);
        self
    }

    /// Sets the access time.
    #[must_use]
    pub fn last_accessed(mut self, at: DateTime<Utc>) -> Self {
        self.last_accessed = Some(at);
        self
    }

    /// Sets the archival flag.
    #[must_use]
    pub fn archival_flag(mut self, flag: bool) -> Self {
        self.archival_flag = Some(flag);
        self
    }
}

/// Builder for items; validates kind-dependent requirements.
#[derive(Debug, Default)]
pub struct ItemBuilder {
    id: Option<ItemId>,
    atom_id: Option<AtomId>,
    kind: Option<ItemKind>,
    truth: Option<TruthValue>,
    attention: Option<AttentionValue>,
    stamp: Option<Stamp>,
    goal_parent_id: Option<ItemId>,
    goal_deps: Vec<ItemId>,
    label: Option<String>,
}

impl ItemBuilder {
    /// Sets the item id (generated when absent).
    #[must_use]
    pub fn id(mut self, id: ItemId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the referenced atom.
    #[must_use]
    pub fn atom(mut self, atom_id: AtomId) -> Self {
        self.atom_id = Some(atom_id);
        self
    }

    /// Sets the stance kind.
    #[must_use]
    pub fn kind(mut self, kind: ItemKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Sets the truth value.
    #[must_use]
    pub fn truth(mut self, truth: TruthValue) -> Self {
        self.truth = Some(truth);
        self
    }

    /// Sets the attention value.
    #[must_use]
    pub fn attention(mut self, attention: AttentionValue) -> Self {
        self.attention = Some(attention);
        self
    }

    /// Sets the provenance stamp.
    #[must_use]
    pub fn stamp(mut self, stamp: Stamp) -> Self {
        self.stamp = Some(stamp);
        self
    }

    /// Sets the parent goal.
    #[must_use]
    pub fn goal_parent(mut self, parent: ItemId) -> Self {
        self.goal_parent_id = Some(parent);
        self
    }

    /// Sets goal dependencies.
    #[must_use]
    pub fn goal_deps(mut self, deps: Vec<ItemId>) -> Self {
        self.goal_deps = deps;
        self
    }

    /// Sets the label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Builds the item.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MissingField` when atom or kind is unset and
    /// `ValidationError::BeliefWithoutTruth` for truth-less beliefs.
    pub fn build(self) -> Result<Item, ValidationError> {
        let atom_id = self.atom_id.ok_or(ValidationError::MissingField {
            field: "atom_id".to_string(),
        })?;
        let kind = self.kind.ok_or(ValidationError::MissingField {
            field: "kind".to_string(),
        })?;

        if kind == ItemKind::Belief && self.truth.is_none() {
            return Err(ValidationError::BeliefWithoutTruth);
        }

        let goal_status = (kind == ItemKind::Goal).then_some(GoalStatus::Active);
        let stamp = self.stamp.unwrap_or_else(Stamp::external);
        let last_accessed = stamp.created_at;

        Ok(Item {
            id: self.id.unwrap_or_default(),
            atom_id,
            kind,
            truth: self.truth,
            attention: self.attention.unwrap_or_default(),
            stamp,
            goal_parent_id: self.goal_parent_id,
            goal_deps: self.goal_deps,
            goal_status,
            label: self.label,
            last_accessed,
            archival_flag: false,
        })
    }
}
