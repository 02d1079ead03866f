// ============================================================================
// transparent-reactive - Type Definitions
// Type-erased traits shared by every node in the reactive graph
// ============================================================================

use std::any::Any;
use std::rc::{Rc, Weak};

use super::constants::*;

// =============================================================================
// TYPE-ERASED TRAITS
// =============================================================================
//
// Graph operations (mark stale, compare versions, walk dependents) never
// need to know the value type T; only reading/writing a node's value does.
// This lets the graph hold heterogeneous nodes behind two narrow traits:
//
// - Vec<Weak<dyn Derivation>>  for an observable's observer list
// - Vec<Rc<dyn Observable>>    for a derivation's dependency list
//
// Atom, ObservableValue<T> and ComputedValue<T> implement Observable.
// ComputedValue<T> and Reaction implement Derivation. ComputedValue<T> is
// the one node kind that implements both, via a self-referential Weak.
// =============================================================================

/// Something that can be read and that reports its readers.
pub trait Observable: Any {
    fn flags(&self) -> u32;
    fn set_flags(&self, flags: u32);

    /// Debug/spy name. Never affects behavior.
    fn name(&self) -> &str;

    /// Identity of the SharedState this node was created from, used to
    /// detect cross-graph misuse (`SharedStateMismatch`).
    fn shared_state_id(&self) -> usize;

    fn observer_count(&self) -> usize;
    fn add_observer(&self, observer: Weak<dyn Derivation>);
    fn cleanup_dead_observers(&self);
    fn for_each_observer(&self, f: &mut dyn FnMut(Rc<dyn Derivation>) -> bool);
    fn remove_observer(&self, observer: &Rc<dyn Derivation>);
    fn clear_observers(&self);

    /// Cached minimum of `dependency_state()` across all observers.
    /// Invariant 2: kept in sync by reactivity::propagation.
    fn lowest_observer_state(&self) -> u32;
    fn set_lowest_observer_state(&self, state: u32);

    fn is_atom(&self) -> bool {
        self.flags() & ATOM != 0
    }
    fn is_observable_value(&self) -> bool {
        self.flags() & OBSERVABLE_VALUE != 0
    }
    fn is_computed(&self) -> bool {
        self.flags() & COMPUTED != 0
    }
    fn is_being_observed(&self) -> bool {
        self.flags() & BEING_OBSERVED != 0
    }
    fn set_being_observed(&self, value: bool) {
        let flags = if value {
            self.flags() | BEING_OBSERVED
        } else {
            self.flags() & !BEING_OBSERVED
        };
        self.set_flags(flags);
    }

    fn as_any(&self) -> &dyn Any;

    /// If this observable is also a derivation (a ComputedValue), return it
    /// as a `Derivation`. Returns `None` for Atom and ObservableValue.
    fn as_derivation(&self) -> Option<Rc<dyn Derivation>> {
        None
    }

    /// Lifecycle hook: last observer was removed. Default no-op; Atom and
    /// ObservableValue forward to their optional `on_become_unobserved`
    /// callback.
    fn notify_become_unobserved(&self) {}

    /// Lifecycle hook: first observer was added. Default no-op.
    fn notify_become_observed(&self) {}
}

/// Something that runs user code while tracking which observables it reads.
pub trait Derivation: Any {
    fn flags(&self) -> u32;
    fn set_flags(&self, flags: u32);

    fn name(&self) -> &str;

    fn shared_state_id(&self) -> usize;

    /// The run-id assigned the last time this derivation was tracked.
    /// Used to deduplicate repeated reads of the same observable within
    /// one run.
    fn run_id(&self) -> u64;
    fn set_run_id(&self, id: u64);

    fn dep_count(&self) -> usize;
    fn add_dep(&self, source: Rc<dyn Observable>);
    fn clear_deps(&self);
    fn for_each_dep(&self, f: &mut dyn FnMut(&Rc<dyn Observable>) -> bool);
    fn remove_source(&self, source: &Rc<dyn Observable>);
    fn replace_deps(&self, deps: Vec<Rc<dyn Observable>>);

    /// Re-run the tracked function. Returns `true` if, for a ComputedValue,
    /// the produced value changed; Reactions always return `false`.
    fn update(&self);

    /// Called by propagation when this derivation transitions from
    /// UpToDate to Stale or PossiblyStale. Reactions schedule themselves;
    /// ComputedValue propagates maybe-changed to its own observers.
    fn on_become_stale(&self, new_state: u32);

    fn dependency_state(&self) -> u32 {
        self.flags() & (NOT_TRACKING | UP_TO_DATE | POSSIBLY_STALE | STALE)
    }

    fn set_dependency_state(&self, state: u32) {
        let flags = (self.flags() & STATUS_MASK) | state;
        self.set_flags(flags);
    }

    fn is_computed(&self) -> bool {
        self.flags() & COMPUTED != 0
    }
    fn is_reaction(&self) -> bool {
        self.flags() & REACTION != 0
    }
    fn is_destroyed(&self) -> bool {
        self.flags() & DESTROYED != 0
    }

    fn as_any(&self) -> &dyn Any;

    /// If this derivation is also an observable (a ComputedValue), return
    /// it as an `Observable`. Returns `None` for Reaction.
    fn as_observable(&self) -> Option<Rc<dyn Observable>>;

    /// Collects this derivation's current dependencies, for the
    /// collect-then-mutate unsubscription pattern (see
    /// `reactivity::tracking::unsubscribe_all`).
    fn collect_deps(&self) -> Vec<Rc<dyn Observable>> {
        let mut deps = Vec::with_capacity(self.dep_count());
        self.for_each_dep(&mut |d| {
            deps.push(d.clone());
            true
        });
        deps
    }

    /// Suspension hook invoked when this derivation's last observer (if it
    /// is also an Observable) is removed. Reaction ignores this; ComputedValue
    /// drops its cached value/exception.
    fn on_suspend(&self) {}
}

// =============================================================================
// EQUALITY
// =============================================================================

/// Equality function used to decide whether a write actually changed a
/// value (and therefore whether to notify observers).
pub type EqualsFn<T> = fn(&T, &T) -> bool;

/// Structural equality via `PartialEq`. The default for most types.
pub fn default_equals<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_equals_uses_partial_eq() {
        assert!(default_equals(&1, &1));
        assert!(!default_equals(&1, &2));
    }
}
