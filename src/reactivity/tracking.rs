// ============================================================================
// transparent-reactive - Dependency Tracking
// trackDerivedFunction / bindDependencies / shouldCompute
// ============================================================================

use std::rc::{Rc, Weak};

use crate::core::constants::*;
use crate::core::shared_state::SharedState;
use crate::core::types::{Derivation, Observable};
use crate::error::ReactiveError;

fn observable_ptr(o: &Rc<dyn Observable>) -> *const () {
    Rc::as_ptr(o) as *const ()
}

/// Runs `f` with `derivation` installed as the active tracking context,
/// then rebinds `derivation`'s dependency set to exactly the observables
/// read during `f`. Returns `f`'s result.
///
/// This is the one entry point every derivation (ComputedValue, Reaction)
/// funnels through to (re)establish its dependencies.
pub fn track_derived_function<R>(
    shared: &Rc<SharedState>,
    derivation: &Rc<dyn Derivation>,
    weak_self: Weak<dyn Derivation>,
    f: impl FnOnce() -> R,
) -> R {
    let prev_new_observing = shared.swap_new_observing(Vec::new());

    derivation.set_run_id(shared.next_run_id());
    derivation.set_dependency_state(UP_TO_DATE);

    let result = shared.with_tracking(Some(weak_self), f);

    let new_observing = shared.swap_new_observing(prev_new_observing);
    let observed_nothing = new_observing.is_empty();
    bind_dependencies(derivation, new_observing);

    if observed_nothing && derivation.is_reaction() && shared.config().reaction_requires_observable {
        tracing::warn!(reaction = %derivation.name(), "reaction observed no dependencies");
    }

    result
}

/// Reconciles `derivation`'s previous dependency set against the
/// observables actually read this run: unsubscribes from ones no longer
/// read, subscribes to new ones. Uses the collect-then-mutate pattern
/// throughout to avoid mutating a `RefCell`-backed list while iterating it.
pub fn bind_dependencies(
    derivation: &Rc<dyn Derivation>,
    new_observing: Vec<Rc<dyn Observable>>,
) {
    let old_deps = derivation.collect_deps();

    let new_ptrs: Vec<*const ()> = new_observing.iter().map(observable_ptr).collect();
    let old_ptrs: Vec<*const ()> = old_deps.iter().map(observable_ptr).collect();

    for old in &old_deps {
        let p = observable_ptr(old);
        if !new_ptrs.contains(&p) {
            old.remove_observer(derivation);
        }
    }

    derivation.clear_deps();
    for new in &new_observing {
        let p = observable_ptr(new);
        if !old_ptrs.contains(&p) {
            new.add_observer(Rc::downgrade(derivation));
        }
        derivation.add_dep(new.clone());
    }

    // Invariant 2, at bind time: if one of the freshly-read dependencies is
    // itself a derivation that is not UpToDate, this derivation can't claim
    // to be UpToDate either.
    let mut lowest = UP_TO_DATE;
    for new in &new_observing {
        if let Some(dep_derivation) = new.as_derivation() {
            let state = dep_derivation.dependency_state();
            if severity(state) > severity(lowest) {
                lowest = state;
            }
        }
    }
    if severity(lowest) > severity(UP_TO_DATE) {
        derivation.set_dependency_state(lowest);
    }
}

fn severity(state: u32) -> u8 {
    match state {
        STALE => 2,
        POSSIBLY_STALE => 1,
        _ => 0,
    }
}

/// Decides whether `derivation` must recompute before its value can be
/// trusted. For `PossiblyStale`, walks the observed computeds (which may
/// themselves recompute) to confirm or rule out an actual change.
pub fn should_compute(derivation: &Rc<dyn Derivation>) -> bool {
    match derivation.dependency_state() {
        UP_TO_DATE => false,
        POSSIBLY_STALE => {
            let deps = derivation.collect_deps();
            for dep in &deps {
                if let Some(dep_derivation) = dep.as_derivation() {
                    dep_derivation.update();
                    if derivation.dependency_state() == STALE {
                        return true;
                    }
                }
            }
            derivation.set_dependency_state(UP_TO_DATE);
            for dep in &deps {
                dep.set_lowest_observer_state(UP_TO_DATE);
            }
            false
        }
        _ => true, // NOT_TRACKING or STALE
    }
}

/// Removes `derivation` from every observable it currently depends on and
/// clears its own dependency list, returning it to `NotTracking`. Used when
/// a Reaction is disposed or a ComputedValue suspends.
pub fn unsubscribe_all(derivation: &Rc<dyn Derivation>) {
    let deps = derivation.collect_deps();
    for dep in &deps {
        dep.remove_observer(derivation);
    }
    derivation.clear_deps();
    derivation.set_dependency_state(NOT_TRACKING);
}

/// Reports that `observable` was read. Records it against the currently
/// tracking derivation (if any) and flips `BEING_OBSERVED` on first read.
///
/// Panics with `ReactiveError::SharedStateMismatch` if the tracking
/// derivation and the observable belong to different `SharedState`
/// instances — mixing nodes across graphs is a programmer error the type
/// system can't catch (both sides are plain `Rc`s), so it surfaces the same
/// way a getter/effect panic does: caught by the nearest `catch_unwind`
/// (recompute or reaction run) and reported as `ComputedReadFailed` /
/// `ReactionException`, or unwinding past the host if read outside either.
pub fn report_observed(shared: &Rc<SharedState>, observable: &Rc<dyn Observable>) {
    if let Some(derivation) = shared.tracking_derivation() {
        if derivation.shared_state_id() != observable.shared_state_id() {
            panic!(
                "{}",
                ReactiveError::SharedStateMismatch { name: observable.name().to_string() }
            );
        }
        shared.record_new_observing(observable.clone());
        if !observable.is_being_observed() {
            observable.set_being_observed(true);
            observable.notify_become_observed();
        }
    } else {
        shared.check_untracked_read_allowed(observable.name(), observable.is_computed());
    }
}
