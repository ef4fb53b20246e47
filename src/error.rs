//! Error types for noema.
//!
//! All errors are strongly typed using thiserror. The taxonomy follows the
//! engine's failure policy: validation failures are rejected at the boundary,
//! execution failures are caught and logged per item or per derivation
//! attempt, and only unclassified internal errors may terminate a worker.

use thiserror::Error;

use crate::atom::{AtomId, AtomKind};
use crate::item::{ItemId, ItemKind};

/// Validation errors raised while checking input at the boundary.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Trust value {value} is out of range [0.0, 1.0]")]
    TrustOutOfRange {
        value: f32,
    },

    #[error("Truth {field} value {value} is out of range [0.0, 1.0]")]
    TruthOutOfRange {
        field: &'static str,
        value: f32,
    },

    #[error("Attention {field} value {value} is out of range [0.0, 1.0]")]
    AttentionOutOfRange {
        field: &'static str,
        value: f32,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("A belief item requires a truth value")]
    BeliefWithoutTruth,

    #[error("Atom {id} has kind {kind}, which is not a schema kind")]
    NotASchema {
        id: AtomId,
        kind: AtomKind,
    },

    #[error("Malformed schema: {reason}")]
    MalformedSchema {
        reason: String,
    },

    #[error("Invalid path query '{query}': {reason}")]
    InvalidPathQuery {
        query: String,
        reason: String,
    },

    #[error("Embedding has {actual} dimensions, expected {expected}")]
    EmbeddingDimensionMismatch {
        actual: usize,
        expected: usize,
    },
}

/// Execution errors raised while the engine processes items.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Atom not found: {id}")]
    AtomNotFound {
        id: AtomId,
    },

    #[error("Item not found: {id}")]
    ItemNotFound {
        id: ItemId,
    },

    #[error("Goal not found in tracker: {id}")]
    GoalNotFound {
        id: ItemId,
    },

    #[error("Item {id} has kind {actual}, expected {expected}")]
    WrongKind {
        id: ItemId,
        expected: ItemKind,
        actual: ItemKind,
    },

    #[error("Derivation via schema {schema} failed: {reason}")]
    Derivation {
        schema: AtomId,
        reason: String,
    },

    #[error("Item {id} already exists in the store")]
    DuplicateItem {
        id: ItemId,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },

    #[error("Index error: {message}")]
    Index {
        message: String,
    },
}

/// Top-level error type for noema.
#[derive(Debug, Error)]
pub enum NoemaError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl NoemaError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an engine error.
    #[must_use]
    pub const fn is_engine(&self) -> bool {
        matches!(self, Self::Engine(_))
    }

    /// Returns true if a worker cycle may swallow this error and continue.
    ///
    /// Everything classified is recoverable at cycle granularity; only
    /// internal errors signal a broken invariant.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for noema operations.
pub type NoemaResult<T> = Result<T, NoemaError>;
