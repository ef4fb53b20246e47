//! # Noema - A Priority-Driven Inference Engine
//!
//! Noema is an attention-economy reasoning core: knowledge lives as
//! immutable, content-addressed atoms; the engine's stance toward that
//! knowledge (believe, pursue, wonder) lives as mutable items competing
//! for processing time on a priority agenda. Workers pop the most salient
//! item, gather resonant context, apply declarative schemas to derive new
//! items, revise beliefs as evidence accumulates, and let everything
//! unattended decay.
//!
//! ## Core Concepts
//!
//! - **Atom**: An immutable knowledge unit, identified by a content hash
//! - **Item**: A mutable stance toward an atom — belief, goal, or query
//! - **Agenda**: A concurrency-safe priority queue with blocking handoff
//! - **Schema**: A declarative derivation or decomposition rule, itself an atom
//! - **Resonance**: Weighted multi-factor retrieval of processing context
//! - **Attention economy**: Priority and durability, reinforced and decayed
//!
//! ## Usage
//!
//! ```rust
//! use noema::{Engine, Content, AtomKind, AtomMeta, ItemKind, TruthValue};
//!
//! let engine = Engine::default();
//! let meta = AtomMeta::new(AtomKind::Fact, "sensor", 0.9)?;
//! let atom = engine.find_or_create_atom(
//!     Content::text("door is open"),
//!     Vec::new(),
//!     meta,
//! )?;
//! engine.perceive(atom.id, ItemKind::Belief, Some(TruthValue::new(1.0, 0.9)?))?;
//! assert_eq!(engine.stats()?.agenda_len, 1);
//! # Ok::<(), noema::NoemaError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

// Knowledge representation
pub mod atom;
pub mod content;
pub mod error;
pub mod item;

// Core machinery
pub mod agenda;
pub mod attention;
pub mod embedding;
pub mod events;
pub mod goals;
pub mod matcher;
pub mod resonance;
pub mod revision;
pub mod schema;
pub mod store;
pub mod unify;

// Orchestration
pub mod engine;
pub mod worker;

// Re-export primary types at crate root for convenience
pub use agenda::Agenda;
pub use atom::{Atom, AtomId, AtomKind, AtomMeta};
pub use attention::{AttentionEconomy, AttentionValue, DecayReport, EconomyConfig};
pub use content::Content;
pub use embedding::LexicalEmbedder;
pub use engine::{Engine, EngineConfig, EngineStats};
pub use error::{EngineError, NoemaError, NoemaResult, ValidationError};
pub use events::{CoreEvent, EventBus};
pub use goals::{GoalTracker, StatusReport};
pub use item::{GoalStatus, Item, ItemId, ItemKind, ItemPatch, Stamp, TruthValue};
pub use matcher::SchemaMatcher;
pub use resonance::{find_context, ResonanceConfig};
pub use revision::{is_conflict, merge_truth, ConflictWarning};
pub use schema::{CompiledSchema, DeriveTemplate, KindPattern, SchemaBody, SubGoalTemplate};
pub use store::{PathQuery, SemanticIndex, WorldModel};
pub use worker::{ActionExecutor, ActionOutcome, NoActions, Worker, WorkerPool};
