//! The worker loop: pop, contextualize, derive, revise, reinforce.
//!
//! Workers are plain threads sharing an [`Engine`] handle. Every fallible
//! step inside a cycle is caught and logged per item; a failed cycle never
//! kills the loop. Action execution is pluggable through [`ActionExecutor`]
//! so the core stays free of environment concerns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::atom::{Atom, AtomMeta};
use crate::content::Content;
use crate::engine::Engine;
use crate::error::NoemaResult;
use crate::item::{GoalStatus, Item, ItemKind, ItemPatch, Stamp, TruthValue};
use crate::resonance::find_context;

/// How long a pooled worker waits for work before rechecking its stop flag.
const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// The result of attempting a goal as a primitive action.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    /// The action ran; the content describes the observed result.
    Completed {
        /// Result statement, stored as a belief under the goal.
        content: Content,
        /// Optional label for the result belief.
        label: Option<String>,
        /// Truth of the result; defaults to near-certain when absent.
        truth: Option<TruthValue>,
    },
    /// The action ran and failed.
    Failed {
        /// Why it failed.
        reason: String,
    },
}

/// Executes goals that name primitive actions.
///
/// Returning `None` means the goal is not an action this executor knows;
/// the worker then falls through to derivation.
pub trait ActionExecutor: Send + Sync {
    /// Attempts to execute the goal.
    fn execute(&self, goal: &Item, atom: &Atom) -> Option<ActionOutcome>;
}

/// Executor that knows no actions; every goal falls through to derivation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoActions;

impl ActionExecutor for NoActions {
    fn execute(&self, _goal: &Item, _atom: &Atom) -> Option<ActionOutcome> {
        None
    }
}

/// A single processing worker over a shared engine.
pub struct Worker {
    engine: Arc<Engine>,
    executor: Arc<dyn ActionExecutor>,
}

impl Worker {
    /// Creates a worker over the engine with the given action executor.
    #[must_use]
    pub fn new(engine: Arc<Engine>, executor: Arc<dyn ActionExecutor>) -> Self {
        Self { engine, executor }
    }

    /// Processes one item through the full cycle. Returns the number of
    /// items this cycle scheduled (derived products, merges, unblocked
    /// goals are counted by their pushes elsewhere).
    ///
    /// # Errors
    ///
    /// Returns an error only for failures at the cycle's spine (the item's
    /// own atom being unreachable); inner failures are logged and skipped.
    pub fn cycle_one(&self, item: &Item) -> NoemaResult<usize> {
        let engine = &self.engine;
        let atom = engine.store().get_atom(&item.atom_id)?;
        let _ = engine
            .store()
            .update_item(&item.id, &ItemPatch::new().last_accessed(chrono::Utc::now()));

        if item.kind == ItemKind::Goal && !self.advance_goal(item, &atom)? {
            return Ok(0);
        }

        // Resonance: gather context before attempting any derivation.
        let context: Vec<Item> =
            match find_context(item, engine.store(), engine.resonance(), engine.context_k()) {
                Ok(scored) => scored.into_iter().map(|(it, _)| it).collect(),
                Err(err) => {
                    warn!(item = %item.id, error = %err, "context retrieval failed");
                    Vec::new()
                }
            };

        let derived = match engine.matcher().find_and_apply(item, &context, engine.store()) {
            Ok(derived) => derived,
            Err(err) => {
                warn!(item = %item.id, error = %err, "derivation failed");
                Vec::new()
            }
        };
        let mut scheduled = 0;
        for product in derived {
            if product.kind == ItemKind::Belief {
                self.satisfy_goals(&product);
            }
            scheduled += usize::from(self.schedule_product(product));
        }

        if item.kind == ItemKind::Belief {
            match engine.revise_belief(item) {
                Ok(Some(merged)) => {
                    engine.push(merged);
                    scheduled += 1;
                }
                Ok(None) => {}
                Err(err) => warn!(item = %item.id, error = %err, "revision failed"),
            }
        }

        let context_ids: Vec<_> = context.iter().map(|c| c.id).collect();
        engine
            .economy()
            .reinforce(engine.store(), item.id, &context_ids);

        // A goal whose children have all achieved is itself achieved.
        if item.kind == ItemKind::Goal && engine.goals().subtree_achieved(&item.id) {
            if let Err(err) = engine.mark_goal_achieved(&item.id) {
                warn!(goal = %item.id, error = %err, "achievement propagation failed");
            }
        }

        debug!(item = %item.id, kind = %item.kind, scheduled, "cycle complete");
        Ok(scheduled)
    }

    /// Goal-specific steps: decompose or act. Returns false when the cycle
    /// is finished for this item (settled, decomposed, or acted on).
    fn advance_goal(&self, goal: &Item, atom: &Atom) -> NoemaResult<bool> {
        let engine = &self.engine;
        if goal
            .goal_status
            .or_else(|| engine.goals().status(&goal.id))
            .is_some_and(GoalStatus::is_terminal)
        {
            return Ok(false);
        }

        // A goal that already decomposed keeps its existing children;
        // re-processing it must not mint duplicates.
        let subgoals = if engine.goals().children(&goal.id).is_empty() {
            engine.goals().decompose(
                goal,
                atom,
                engine.matcher(),
                engine.store(),
                engine.economy(),
            )?
        } else {
            Vec::new()
        };
        if !subgoals.is_empty() {
            for subgoal in subgoals {
                if subgoal.goal_status != Some(GoalStatus::Blocked) {
                    engine.push(subgoal);
                }
            }
            return Ok(false);
        }

        match self.executor.execute(goal, atom) {
            Some(ActionOutcome::Completed {
                content,
                label,
                truth,
            }) => {
                let truth = truth.unwrap_or(TruthValue {
                    frequency: 1.0,
                    confidence: 0.9,
                });
                let meta = AtomMeta::derived(format!("action:{}", goal.id), 0.9);
                let result_atom = engine.store().find_or_create_atom(content, Vec::new(), meta)?;
                let mut builder = Item::builder()
                    .atom(result_atom.id)
                    .kind(ItemKind::Belief)
                    .truth(truth)
                    .attention(engine.economy().initial(ItemKind::Belief, Some(truth), false))
                    .stamp(Stamp {
                        created_at: chrono::Utc::now(),
                        parent_ids: vec![goal.id],
                        rule_id: None,
                    })
                    .goal_parent(goal.id);
                if let Some(label) = label {
                    builder = builder.label(label);
                }
                let result = builder.build().map_err(crate::error::NoemaError::from)?;
                engine.add_item(result)?;
                engine.mark_goal_achieved(&goal.id)?;
                Ok(false)
            }
            Some(ActionOutcome::Failed { reason }) => {
                warn!(goal = %goal.id, reason, "action failed");
                engine.mark_goal_failed(&goal.id)?;
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Achieves every active goal whose content the belief states. The
    /// tracker then propagates status upward through the goal graph.
    fn satisfy_goals(&self, belief: &Item) {
        let engine = &self.engine;
        let atom = match engine.store().get_atom(&belief.atom_id) {
            Ok(atom) => atom,
            Err(err) => {
                warn!(item = %belief.id, error = %err, "satisfaction lookup failed");
                return;
            }
        };
        let candidates = match engine.store().query_by_symbolic(&atom.content, 16) {
            Ok(items) => items,
            Err(err) => {
                warn!(item = %belief.id, error = %err, "satisfaction lookup failed");
                return;
            }
        };
        for candidate in candidates {
            let active = candidate.kind == ItemKind::Goal
                && candidate
                    .goal_status
                    .or_else(|| engine.goals().status(&candidate.id))
                    == Some(GoalStatus::Active);
            if !active {
                continue;
            }
            debug!(goal = %candidate.id, belief = %belief.id, "goal satisfied by derived belief");
            if let Err(err) = engine.mark_goal_achieved(&candidate.id) {
                warn!(goal = %candidate.id, error = %err, "goal satisfaction failed");
            }
        }
    }

    /// Registers and schedules a freshly derived item. Returns true when
    /// the item was pushed.
    fn schedule_product(&self, product: Item) -> bool {
        let engine = &self.engine;
        if product.kind == ItemKind::Goal {
            match engine.goals().add_goal(&product) {
                Ok(status) => {
                    let patched = engine
                        .store()
                        .update_item(&product.id, &ItemPatch::new().goal_status(status));
                    let item = patched.unwrap_or(product);
                    if status != GoalStatus::Blocked {
                        engine.push(item);
                        return true;
                    }
                    return false;
                }
                Err(err) => {
                    debug!(item = %product.id, error = %err, "derived goal not registered");
                    return false;
                }
            }
        }
        engine.push(product);
        true
    }

    /// Runs the loop until the stop flag is set, waiting up to 100ms per
    /// pop so the flag stays responsive.
    pub fn run(&self, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            let Some(item) = self.engine.agenda().pop_timeout(POP_TIMEOUT) else {
                continue;
            };
            if let Err(err) = self.cycle_one(&item) {
                if err.is_recoverable() {
                    warn!(item = %item.id, error = %err, "cycle failed, continuing");
                } else {
                    error!(item = %item.id, error = %err, "unrecoverable cycle failure");
                }
            }
        }
    }

    /// Single-threaded driver: drains the agenda without blocking, up to
    /// `max_cycles` items. Returns the number of items processed.
    pub fn run_until_idle(&self, max_cycles: usize) -> usize {
        let mut cycles = 0;
        while cycles < max_cycles {
            let Some(item) = self.engine.agenda().try_pop() else {
                break;
            };
            if let Err(err) = self.cycle_one(&item) {
                warn!(item = %item.id, error = %err, "cycle failed, continuing");
            }
            cycles += 1;
        }
        cycles
    }
}

/// A pool of named worker threads over one engine.
pub struct WorkerPool {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `n` worker threads named `noema-worker-N`.
    #[must_use]
    pub fn start(engine: Arc<Engine>, executor: Arc<dyn ActionExecutor>, n: usize) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let handles = (0..n)
            .map(|i| {
                let worker = Worker::new(Arc::clone(&engine), Arc::clone(&executor));
                let stop = Arc::clone(&stop);
                std::thread::Builder::new()
                    .name(format!("noema-worker-{i}"))
                    .spawn(move || worker.run(&stop))
                    .unwrap_or_else(|e| panic!("failed to spawn worker thread: {e}"))
            })
            .collect();
        Self { stop, handles }
    }

    /// Signals every worker to stop and joins them.
    pub fn shutdown(self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.handles {
            let _ = handle.join();
        }
    }

    /// Number of worker threads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true when the pool has no threads.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomKind;
    use crate::schema::{derivation_content, DeriveTemplate};

    fn worker(engine: &Arc<Engine>) -> Worker {
        Worker::new(Arc::clone(engine), Arc::new(NoActions))
    }

    fn fact(engine: &Engine, content: Content) -> Atom {
        let meta = AtomMeta::new(AtomKind::Fact, "test", 0.9).unwrap();
        engine
            .find_or_create_atom(content, Vec::new(), meta)
            .unwrap()
    }

    fn analogy_schema(engine: &Engine) {
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
        engine.register_schema(Atom::new(content, Vec::new(), meta)).unwrap();
    }

    #[test]
    fn goal_plus_belief_derives_a_subgoal() {
        let engine = Arc::new(Engine::default());
        analogy_schema(&engine);

        let goal_atom = fact(
            &engine,
            Content::list(vec![Content::text("obtain"), Content::text("chocolate")]),
        );
        let similar_atom = fact(
            &engine,
            Content::list(vec![
                Content::text("is_similar_to"),
                Content::text("chocolate"),
                Content::text("carob"),
            ]),
        );
        let goal = engine.perceive(goal_atom.id, ItemKind::Goal, None).unwrap();
        engine
            .perceive(
                similar_atom.id,
                ItemKind::Belief,
                Some(TruthValue::new(1.0, 0.8).unwrap()),
            )
            .unwrap();

        let worker = worker(&engine);
        let processed = worker.run_until_idle(16);
        assert!(processed >= 2);

        let children = engine.goals().children(&goal.id);
        assert_eq!(children.len(), 1);
        let child = engine.store().get_item(&children[0]).unwrap();
        let child_atom = engine.store().get_atom(&child.atom_id).unwrap();
        assert_eq!(child_atom.content.to_string(), "(obtain carob)");
    }

    #[test]
    fn belief_revision_happens_during_cycles() {
        let engine = Arc::new(Engine::default());
        let atom = fact(&engine, Content::text("road is wet"));
        engine
            .perceive(
                atom.id,
                ItemKind::Belief,
                Some(TruthValue::new(1.0, 0.5).unwrap()),
            )
            .unwrap();
        let duplicate = Item::builder()
            .atom(atom.id)
            .kind(ItemKind::Belief)
            .truth(TruthValue::new(1.0, 0.5).unwrap())
            .build()
            .unwrap();
        engine.store().add_item(duplicate.clone()).unwrap();
        engine.push(duplicate);

        let worker = worker(&engine);
        worker.run_until_idle(16);

        let beliefs = engine
            .store()
            .query_by_symbolic(&Content::text("road is wet"), 10)
            .unwrap();
        let canonical = beliefs
            .iter()
            .filter_map(|b| b.truth)
            .map(|t| t.confidence)
            .fold(0.0f32, f32::max);
        assert!(canonical > 0.5, "confidence {canonical}");
    }

    #[test]
    fn action_execution_achieves_the_goal() {
        struct AlwaysSucceeds;
        impl ActionExecutor for AlwaysSucceeds {
            fn execute(&self, _goal: &Item, atom: &Atom) -> Option<ActionOutcome> {
                Some(ActionOutcome::Completed {
                    content: Content::list(vec![Content::text("done"), atom.content.clone()]),
                    label: Some("result".to_string()),
                    truth: None,
                })
            }
        }

        let engine = Arc::new(Engine::default());
        let atom = fact(&engine, Content::text("press button"));
        let goal = engine.perceive(atom.id, ItemKind::Goal, None).unwrap();

        let worker = Worker::new(Arc::clone(&engine), Arc::new(AlwaysSucceeds));
        worker.run_until_idle(8);

        assert_eq!(
            engine.goals().status(&goal.id),
            Some(GoalStatus::Achieved)
        );
        let results = engine.store().items_with_goal_parent(&goal.id).unwrap();
        assert!(results.iter().any(|r| r.kind == ItemKind::Belief));
    }

    #[test]
    fn failed_action_fails_the_goal() {
        struct AlwaysFails;
        impl ActionExecutor for AlwaysFails {
            fn execute(&self, _goal: &Item, _atom: &Atom) -> Option<ActionOutcome> {
                Some(ActionOutcome::Failed {
                    reason: "actuator offline".to_string(),
                })
            }
        }

        let engine = Arc::new(Engine::default());
        let atom = fact(&engine, Content::text("open hatch"));
        let goal = engine.perceive(atom.id, ItemKind::Goal, None).unwrap();

        let worker = Worker::new(Arc::clone(&engine), Arc::new(AlwaysFails));
        worker.run_until_idle(8);

        assert_eq!(engine.goals().status(&goal.id), Some(GoalStatus::Failed));
    }

    #[test]
    fn pool_starts_and_shuts_down() {
        let engine = Arc::new(Engine::default());
        let pool = WorkerPool::start(Arc::clone(&engine), Arc::new(NoActions), 2);
        assert_eq!(pool.len(), 2);

        let atom = fact(&engine, Content::text("background work"));
        engine
            .perceive(
                atom.id,
                ItemKind::Belief,
                Some(TruthValue::new(1.0, 0.9).unwrap()),
            )
            .unwrap();
        std::thread::sleep(Duration::from_millis(200));
        pool.shutdown();
        assert!(engine.agenda().is_empty());
    }
}
