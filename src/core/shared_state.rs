// ============================================================================
// transparent-reactive - SharedState
// The graph registry: batching, tracking context, strict-mode enforcement
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use super::spy::{trace_event, SpyEvent, SpySink};
use super::types::Derivation;
use crate::error::{ReactiveError, Result};

/// A caller-supplied "run this later" hook, used by a reaction configured
/// with a `delay` and/or its own scheduler (see `ReactionOptions`). Called
/// with the reaction's configured delay (`Duration::ZERO` if none) and a
/// thunk that performs the actual track; the engine never calls this on its
/// own initiative outside that path, so it's not a general task queue.
pub type SchedulerFn = Rc<dyn Fn(Duration, Box<dyn FnOnce()>)>;

/// How strictly writes outside an action are policed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforceActions {
    /// Writes are always allowed.
    Never,
    /// Writes to observed observables must happen inside an action.
    Observed,
    /// Any write must happen inside an action.
    Always,
}

impl Default for EnforceActions {
    fn default() -> Self {
        EnforceActions::Never
    }
}

/// Configuration for a `SharedState` instance.
#[derive(Clone)]
pub struct SharedStateConfig {
    pub enforce_actions: EnforceActions,
    /// Reading a `ComputedValue` outside any tracking derivation fails with
    /// `ReadOutsideReaction` instead of only warning.
    pub computed_requires_reaction: bool,
    /// Reading an `Atom`/`ObservableValue` outside any tracking derivation
    /// fails with `ReadOutsideReaction` instead of only warning.
    pub observable_requires_reaction: bool,
    /// A reaction that completes a track having observed nothing emits a
    /// `tracing::warn!` (this is advisory only, per the source: the original
    /// never fails the run over it).
    pub reaction_requires_observable: bool,
    pub disable_error_boundaries: bool,
    pub max_reaction_iterations: usize,
    /// Default scheduler used by a reaction configured with a `delay` or
    /// its own scheduler override left unset. `None` means such reactions
    /// fall back to the normal FIFO flush.
    pub scheduler: Option<SchedulerFn>,
}

impl Default for SharedStateConfig {
    fn default() -> Self {
        Self {
            enforce_actions: EnforceActions::Never,
            computed_requires_reaction: false,
            observable_requires_reaction: false,
            reaction_requires_observable: false,
            disable_error_boundaries: false,
            max_reaction_iterations: 100,
            scheduler: None,
        }
    }
}

impl fmt::Debug for SharedStateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedStateConfig")
            .field("enforce_actions", &self.enforce_actions)
            .field("computed_requires_reaction", &self.computed_requires_reaction)
            .field("observable_requires_reaction", &self.observable_requires_reaction)
            .field("reaction_requires_observable", &self.reaction_requires_observable)
            .field("disable_error_boundaries", &self.disable_error_boundaries)
            .field("max_reaction_iterations", &self.max_reaction_iterations)
            .field("scheduler", &self.scheduler.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Snapshot captured by `SharedState::start_action`, required unchanged by
/// `SharedState::end_action` to close the same action it opened.
pub struct ActionRunInfo {
    id: u64,
    name: String,
    prev_derivation: Option<Weak<dyn Derivation>>,
    prev_allow_state_changes: bool,
    prev_allow_state_reads: bool,
}

/// The registry of one independent reactive graph: batching depth, the
/// currently tracking derivation, strict-mode flags, and the queues that
/// are drained at the outermost batch boundary.
///
/// Not a true singleton: construct as many as you need via `SharedState::new`.
/// `crate::ambient()` keeps one lazily-created instance per thread for
/// callers that don't need graph isolation.
pub struct SharedState {
    config: SharedStateConfig,

    tracking_derivation: RefCell<Option<Weak<dyn Derivation>>>,
    batch_count: Cell<u32>,
    allow_state_reads: Cell<bool>,
    allow_state_changes: Cell<bool>,

    run_id_counter: Cell<u64>,
    next_action_id: Cell<u64>,
    action_stack: RefCell<Vec<u64>>,

    pending_reactions: RefCell<VecDeque<Weak<dyn Derivation>>>,
    pending_unobservations: RefCell<VecDeque<Weak<dyn crate::core::types::Observable>>>,

    /// Scratch area for the set of observables read during the derivation
    /// currently being tracked. Swapped out and restored around nested
    /// `track_derived_function` calls (see `reactivity::tracking`).
    new_observing: RefCell<Vec<Rc<dyn crate::core::types::Observable>>>,

    spy_sinks: RefCell<Vec<Rc<dyn SpySink>>>,
}

impl SharedState {
    pub fn new(config: SharedStateConfig) -> Rc<Self> {
        Rc::new(Self {
            config,
            tracking_derivation: RefCell::new(None),
            batch_count: Cell::new(0),
            allow_state_reads: Cell::new(true),
            allow_state_changes: Cell::new(false),
            run_id_counter: Cell::new(0),
            next_action_id: Cell::new(0),
            action_stack: RefCell::new(Vec::new()),
            pending_reactions: RefCell::new(VecDeque::new()),
            pending_unobservations: RefCell::new(VecDeque::new()),
            new_observing: RefCell::new(Vec::new()),
            spy_sinks: RefCell::new(Vec::new()),
        })
    }

    /// Stable identity for this instance, used by nodes to detect
    /// `SharedStateMismatch`.
    pub fn id(&self) -> usize {
        self as *const SharedState as usize
    }

    pub fn config(&self) -> &SharedStateConfig {
        &self.config
    }

    pub fn register_spy_sink(&self, sink: Rc<dyn SpySink>) {
        self.spy_sinks.borrow_mut().push(sink);
    }

    pub fn emit_spy(&self, event: SpyEvent) {
        trace_event(&event);
        for sink in self.spy_sinks.borrow().iter() {
            sink.on_event(&event);
        }
    }

    // =========================================================================
    // TRACKING CONTEXT
    // =========================================================================

    pub fn tracking_derivation(&self) -> Option<Rc<dyn Derivation>> {
        self.tracking_derivation.borrow().as_ref().and_then(Weak::upgrade)
    }

    /// Run `f` with `derivation` as the active tracking context, restoring
    /// the previous one (including `None`) afterwards even if `f` panics.
    pub fn with_tracking<R>(
        &self,
        derivation: Option<Weak<dyn Derivation>>,
        f: impl FnOnce() -> R,
    ) -> R {
        let prev = self.tracking_derivation.replace(derivation);
        struct Restore<'a> {
            shared: &'a SharedState,
            prev: Option<Option<Weak<dyn Derivation>>>,
        }
        impl Drop for Restore<'_> {
            fn drop(&mut self) {
                if let Some(prev) = self.prev.take() {
                    *self.shared.tracking_derivation.borrow_mut() = prev;
                }
            }
        }
        let _restore = Restore { shared: self, prev: Some(prev) };
        f()
    }

    pub fn next_run_id(&self) -> u64 {
        let id = self.run_id_counter.get() + 1;
        self.run_id_counter.set(id);
        id
    }

    /// Swaps in a fresh scratch buffer for the observables read during the
    /// derivation about to be tracked, returning the buffer of the
    /// enclosing (if any) derivation so it can be restored afterwards.
    pub fn swap_new_observing(
        &self,
        buffer: Vec<Rc<dyn crate::core::types::Observable>>,
    ) -> Vec<Rc<dyn crate::core::types::Observable>> {
        self.new_observing.replace(buffer)
    }

    /// Records `observable` as read during the current tracked run, unless
    /// it was already recorded (dedup by pointer identity within one run).
    pub fn record_new_observing(&self, observable: Rc<dyn crate::core::types::Observable>) {
        let mut buf = self.new_observing.borrow_mut();
        let ptr = Rc::as_ptr(&observable) as *const ();
        if !buf.iter().any(|o| Rc::as_ptr(o) as *const () == ptr) {
            buf.push(observable);
        }
    }

    // =========================================================================
    // STATE-CHANGE / STATE-READ PERMISSION
    // =========================================================================

    pub fn allow_state_reads(&self) -> bool {
        self.allow_state_reads.get()
    }

    pub fn allow_state_changes(&self) -> bool {
        self.allow_state_changes.get()
    }

    /// Enforces `enforce_actions` for a write to an observable named `name`
    /// that currently has `has_observers` observers.
    pub fn check_write_allowed(&self, name: &str, has_observers: bool) -> Result<()> {
        let allowed = match self.config.enforce_actions {
            EnforceActions::Never => true,
            EnforceActions::Observed => self.allow_state_changes.get() || !has_observers,
            EnforceActions::Always => self.allow_state_changes.get(),
        };
        if allowed {
            Ok(())
        } else {
            Err(ReactiveError::WriteOutsideAction { name: name.to_string() })
        }
    }

    pub fn warn_if_read_disallowed(&self, name: &str) {
        if !self.allow_state_reads.get() {
            tracing::warn!(observable = %name, "observable read while reads are disallowed");
        }
    }

    /// Checked counterpart to `warn_if_read_disallowed`, used for a read
    /// that happens outside any tracking derivation. `is_computed` selects
    /// which of `computed_requires_reaction` / `observable_requires_reaction`
    /// applies. When the relevant flag is set, the read is a programmer
    /// error rather than a warning: panics with `ReadOutsideReaction`,
    /// tunneled the same way `ComputedCycle` is (caught by the nearest
    /// `catch_unwind` in `recompute`/reaction `run`, or escaping to the host
    /// if the read happens entirely outside any tracked context).
    pub fn check_untracked_read_allowed(&self, name: &str, is_computed: bool) {
        self.warn_if_read_disallowed(name);
        let requires_reaction = if is_computed {
            self.config.computed_requires_reaction
        } else {
            self.config.observable_requires_reaction
        };
        if requires_reaction {
            panic!("{}", ReactiveError::ReadOutsideReaction { name: name.to_string() });
        }
    }

    // =========================================================================
    // BATCHING
    // =========================================================================

    pub fn is_batching(&self) -> bool {
        self.batch_count.get() > 0
    }

    pub fn start_batch(&self) {
        self.batch_count.set(self.batch_count.get() + 1);
    }

    pub fn end_batch(&self) -> Result<()> {
        let depth = self.batch_count.get();
        let depth = depth.saturating_sub(1);
        self.batch_count.set(depth);
        if depth == 0 {
            self.run_reactions()?;
            self.process_pending_unobservations();
        }
        Ok(())
    }

    /// Runs `f` inside a batch, always closing it even if `f` panics.
    pub fn batch<R>(self: &Rc<Self>, f: impl FnOnce() -> R) -> R {
        self.start_batch();
        struct Guard(Rc<SharedState>);
        impl Drop for Guard {
            fn drop(&mut self) {
                let _ = self.0.end_batch();
            }
        }
        let _guard = Guard(self.clone());
        f()
    }

    pub fn enqueue_reaction(&self, reaction: Weak<dyn Derivation>) {
        self.pending_reactions.borrow_mut().push_back(reaction);
    }

    pub fn enqueue_unobservation(&self, observable: Weak<dyn crate::core::types::Observable>) {
        self.pending_unobservations.borrow_mut().push_back(observable);
    }

    fn run_reactions(&self) -> Result<()> {
        let mut iterations = 0usize;
        loop {
            let queued: Vec<_> = {
                let mut q = self.pending_reactions.borrow_mut();
                if q.is_empty() {
                    break;
                }
                q.drain(..).collect()
            };
            iterations += 1;
            if iterations > self.config.max_reaction_iterations {
                return Err(ReactiveError::ReactionCycle {
                    limit: self.config.max_reaction_iterations,
                });
            }
            for weak in queued {
                if let Some(derivation) = weak.upgrade() {
                    if !derivation.is_destroyed() {
                        derivation.update();
                    }
                }
            }
        }
        Ok(())
    }

    fn process_pending_unobservations(&self) {
        let queued: Vec<_> = self.pending_unobservations.borrow_mut().drain(..).collect();
        for weak in queued {
            if let Some(observable) = weak.upgrade() {
                if observable.observer_count() == 0 {
                    observable.set_being_observed(false);
                    observable.notify_become_unobserved();
                    if let Some(derivation) = observable.as_derivation() {
                        derivation.on_suspend();
                    }
                }
            }
        }
    }

    // =========================================================================
    // ACTIONS
    // =========================================================================

    pub fn start_action(&self, name: &str) -> ActionRunInfo {
        let id = self.next_action_id.get();
        self.next_action_id.set(id + 1);
        self.action_stack.borrow_mut().push(id);

        let prev_derivation = self.tracking_derivation.replace(None);
        let prev_allow_state_changes = self.allow_state_changes.replace(true);
        let prev_allow_state_reads = self.allow_state_reads.get();

        self.start_batch();
        self.emit_spy(SpyEvent::ActionStart { name: name.to_string() });

        ActionRunInfo {
            id,
            name: name.to_string(),
            prev_derivation,
            prev_allow_state_changes,
            prev_allow_state_reads,
        }
    }

    pub fn end_action(&self, info: ActionRunInfo) -> Result<()> {
        let top = self.action_stack.borrow_mut().pop();
        match top {
            Some(id) if id == info.id => {}
            Some(other) => {
                // Not actually closed: put it back so the action that owns
                // it can still close cleanly.
                self.action_stack.borrow_mut().push(other);
                return Err(ReactiveError::ActionNestingError {
                    expected: info.name.clone(),
                    actual: "a differently-nested action".to_string(),
                });
            }
            None => {
                return Err(ReactiveError::ActionNestingError {
                    expected: info.name.clone(),
                    actual: "<no open action>".to_string(),
                });
            }
        }

        *self.tracking_derivation.borrow_mut() = info.prev_derivation;
        self.allow_state_changes.set(info.prev_allow_state_changes);
        self.allow_state_reads.set(info.prev_allow_state_reads);

        let result = self.end_batch();
        self.emit_spy(SpyEvent::ActionEnd { name: info.name.clone() });
        result
    }

    /// Runs `f` as a named action: writes are coalesced and reactions flush
    /// once the outermost action returns. Panic-safe: the action always
    /// closes, even if `f` unwinds.
    pub fn action<R>(self: &Rc<Self>, name: impl Into<String>, f: impl FnOnce() -> R) -> R {
        let info = self.start_action(&name.into());
        struct Guard {
            shared: Rc<SharedState>,
            info: Option<ActionRunInfo>,
        }
        impl Drop for Guard {
            fn drop(&mut self) {
                if let Some(info) = self.info.take() {
                    self.shared
                        .end_action(info)
                        .expect("action nesting corrupted by an internal bug");
                }
            }
        }
        let _guard = Guard { shared: self.clone(), info: Some(info) };
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_count_tracks_nesting() {
        let shared = SharedState::new(SharedStateConfig::default());
        assert!(!shared.is_batching());
        shared.start_batch();
        shared.start_batch();
        assert!(shared.is_batching());
        shared.end_batch().unwrap();
        assert!(shared.is_batching());
        shared.end_batch().unwrap();
        assert!(!shared.is_batching());
    }

    #[test]
    fn action_nesting_mismatch_is_detected() {
        let shared = SharedState::new(SharedStateConfig::default());
        let outer = shared.start_action("outer");
        let inner = shared.start_action("inner");
        // Ending them out of order must fail.
        let err = shared.end_action(outer);
        assert!(err.is_err());
        shared.end_action(inner).unwrap();
    }

    #[test]
    fn strict_mode_always_requires_action() {
        let config = SharedStateConfig {
            enforce_actions: EnforceActions::Always,
            ..Default::default()
        };
        let shared = SharedState::new(config);
        assert!(shared.check_write_allowed("x", false).is_err());
        let info = shared.start_action("a");
        assert!(shared.check_write_allowed("x", false).is_ok());
        shared.end_action(info).unwrap();
        assert!(shared.check_write_allowed("x", false).is_err());
    }

    #[test]
    fn strict_mode_observed_only_guards_observed_writes() {
        let config = SharedStateConfig {
            enforce_actions: EnforceActions::Observed,
            ..Default::default()
        };
        let shared = SharedState::new(config);
        assert!(shared.check_write_allowed("x", false).is_ok());
        assert!(shared.check_write_allowed("x", true).is_err());
    }

    #[test]
    fn distinct_instances_have_distinct_ids() {
        let a = SharedState::new(SharedStateConfig::default());
        let b = SharedState::new(SharedStateConfig::default());
        assert_ne!(a.id(), b.id());
    }
}
