// ============================================================================
// transparent-reactive - A Transparent Functional Reactive Programming Engine
// ============================================================================
//
// MobX-style observable state: a bipartite graph of observable cells (Atom,
// ObservableValue<T>, ComputedValue<T>) and derivations (ComputedValue<T>,
// Reaction), tracked automatically and propagated through a 4-state
// dependency machine (NotTracking / UpToDate / PossiblyStale / Stale).
// ============================================================================

pub mod core;
pub mod disposer;
pub mod error;
#[macro_use]
pub mod macros;
pub mod primitives;
pub mod reactivity;

use std::cell::RefCell;
use std::rc::Rc;

pub use core::shared_state::{ActionRunInfo, EnforceActions, SharedState, SharedStateConfig};
pub use core::spy::{SpyEvent, SpySink};
pub use core::types::{default_equals, Derivation, EqualsFn, Observable};
pub use disposer::Disposer;
pub use error::{BoxedError, OpaqueError, ReactiveError, Result};
pub use primitives::{
    autorun, autorun_with, reaction, when, when_handle, Atom, ChangeFn, ComputedValue, Enhancer,
    InterceptFn, ObservableValue, ReactionOptions, WhenHandle, WhenOptions,
};

thread_local! {
    static AMBIENT: RefCell<Option<Rc<SharedState>>> = RefCell::new(None);
}

/// The lazily-created, per-thread default `SharedState`, for callers who
/// don't need an isolated graph. Every free function in this module
/// (`observable`, `computed`, `autorun`, ...) operates on this instance.
pub fn ambient() -> Rc<SharedState> {
    AMBIENT.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            *slot = Some(SharedState::new(SharedStateConfig::default()));
        }
        slot.as_ref().unwrap().clone()
    })
}

/// Creates an `ObservableValue<T>` on the ambient `SharedState`.
pub fn observable<T: Clone + PartialEq + 'static>(value: T) -> ObservableValue<T> {
    ObservableValue::new(&ambient(), value, "observable")
}

/// Creates a named `ObservableValue<T>` on the ambient `SharedState`.
/// Named `observable_box` (rather than `box`, the name used by the system
/// this engine generalizes) because `box` is a reserved identifier in Rust.
pub fn observable_box<T: Clone + PartialEq + 'static>(value: T, name: impl Into<String>) -> ObservableValue<T> {
    ObservableValue::new(&ambient(), value, name)
}

/// Creates a memoized `ComputedValue<T>` on the ambient `SharedState`.
pub fn computed<T: Clone + PartialEq + 'static>(getter: impl Fn() -> T + 'static) -> ComputedValue<T> {
    ComputedValue::new(&ambient(), "computed", getter)
}

/// Runs `f` as a named action on the ambient `SharedState`: writes are
/// coalesced and reactions flush once the outermost action returns.
pub fn run_in_action<R>(name: impl Into<String>, f: impl FnOnce() -> R) -> R {
    ambient().action(name, f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spreadsheet_sum_scenario() {
        // S1: price * amount, observed by an autorun, updated inside an action.
        let shared = SharedState::new(SharedStateConfig::default());
        let price = ObservableValue::new(&shared, 2, "price");
        let amount = ObservableValue::new(&shared, 3, "amount");

        let p = price.clone();
        let a = amount.clone();
        let total = ComputedValue::new(&shared, "total", move || p.get() * a.get());

        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let t = total.clone();
        let _disposer = autorun(&shared, "log-total", move || {
            l.borrow_mut().push(t.get().unwrap());
        });
        assert_eq!(*log.borrow(), vec![6]);

        let price2 = price.clone();
        let amount2 = amount.clone();
        shared.action("update-inputs", || {
            price2.set(4).unwrap();
            amount2.set(5).unwrap();
        });

        assert_eq!(*log.borrow(), vec![6, 20], "one new entry, not two");
    }

    #[test]
    fn strict_mode_scenario() {
        // S4: direct writes fail outside an action under EnforceActions::Always.
        let shared = SharedState::new(SharedStateConfig {
            enforce_actions: EnforceActions::Always,
            ..Default::default()
        });
        let b = ObservableValue::new(&shared, 0, "b");
        assert!(matches!(b.set(1), Err(ReactiveError::WriteOutsideAction { .. })));

        let b2 = b.clone();
        shared.action("set-b", move || b2.set(1).unwrap());
        assert_eq!(b.get(), 1);
    }

    #[test]
    fn when_with_predicate_scenario() {
        // S5: on_hide fires exactly once when visible flips to false.
        let shared = SharedState::new(SharedStateConfig::default());
        let visible = ObservableValue::new(&shared, true, "visible");
        let hidden_count = Rc::new(std::cell::Cell::new(0));

        let v = visible.clone();
        let hc = hidden_count.clone();
        let _disposer = when(&shared, move || !v.get(), move || hc.set(hc.get() + 1), WhenOptions::default());

        let visible2 = visible.clone();
        shared.action("hide", move || visible2.set(false).unwrap());
        assert_eq!(hidden_count.get(), 1);

        let visible3 = visible.clone();
        shared.action("show-again", move || visible3.set(true).unwrap());
        let visible4 = visible.clone();
        shared.action("hide-again", move || visible4.set(false).unwrap());
        assert_eq!(hidden_count.get(), 1, "when fires only once");
    }

    #[test]
    fn ambient_instance_is_shared_per_thread() {
        let a = ambient();
        let b = ambient();
        assert_eq!(a.id(), b.id());
    }
}
