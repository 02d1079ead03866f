// ============================================================================
// transparent-reactive - Change Propagation
// propagateChanged / propagateMaybeChanged / propagateChangeConfirmed
// ============================================================================

use std::rc::Rc;

use crate::core::constants::*;
use crate::core::types::Observable;

/// An atom/observable-value changed for certain. Every UpToDate or
/// PossiblyStale observer becomes Stale.
pub fn propagate_changed(observable: &Rc<dyn Observable>) {
    if observable.lowest_observer_state() == STALE {
        return; // already fully propagated
    }
    observable.set_lowest_observer_state(STALE);

    let mut observers = Vec::with_capacity(observable.observer_count());
    observable.for_each_observer(&mut |d| {
        observers.push(d);
        true
    });

    for derivation in observers {
        let state = derivation.dependency_state();
        if state == UP_TO_DATE || state == POSSIBLY_STALE {
            derivation.set_dependency_state(STALE);
            derivation.on_become_stale(STALE);
        }
    }
}

/// A computed might change (one of its dependencies became Stale, but the
/// computed hasn't recomputed yet). Every UpToDate observer becomes
/// PossiblyStale.
pub fn propagate_maybe_changed(observable: &Rc<dyn Observable>) {
    if observable.lowest_observer_state() != UP_TO_DATE {
        return;
    }
    observable.set_lowest_observer_state(POSSIBLY_STALE);

    let mut observers = Vec::with_capacity(observable.observer_count());
    observable.for_each_observer(&mut |d| {
        observers.push(d);
        true
    });

    for derivation in observers {
        if derivation.dependency_state() == UP_TO_DATE {
            derivation.set_dependency_state(POSSIBLY_STALE);
            derivation.on_become_stale(POSSIBLY_STALE);
        }
    }
}

/// A computed recomputed and its result genuinely changed. Promotes any
/// PossiblyStale observer (which had only been warned, not confirmed) to
/// Stale.
pub fn propagate_change_confirmed(observable: &Rc<dyn Observable>) {
    observable.set_lowest_observer_state(STALE);

    let mut observers = Vec::with_capacity(observable.observer_count());
    observable.for_each_observer(&mut |d| {
        observers.push(d);
        true
    });

    for derivation in observers {
        if derivation.dependency_state() == POSSIBLY_STALE {
            derivation.set_dependency_state(STALE);
        }
    }
}
