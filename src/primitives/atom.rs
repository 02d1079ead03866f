// ============================================================================
// transparent-reactive - Atom
// The minimal observable: no stored value, just read/write reporting
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::core::constants::*;
use crate::core::shared_state::SharedState;
use crate::core::types::{Derivation, Observable};
use crate::error::{ReactiveError, Result};
use crate::reactivity::{propagation, tracking};

struct AtomInner {
    flags: Cell<u32>,
    name: String,
    shared: Rc<SharedState>,
    observers: RefCell<Vec<Weak<dyn Derivation>>>,
    lowest_observer_state: Cell<u32>,
    on_become_observed: RefCell<Option<Box<dyn Fn()>>>,
    on_become_unobserved: RefCell<Option<Box<dyn Fn()>>>,
    /// Set immediately after construction (the weak-self trick): lets
    /// `remove_observer`, called from `&self`, hand back a `Weak<dyn
    /// Observable>` pointing at this same allocation for the
    /// pending-unobservation queue.
    self_weak: RefCell<Weak<dyn Observable>>,
}

impl Observable for AtomInner {
    fn flags(&self) -> u32 {
        self.flags.get()
    }
    fn set_flags(&self, flags: u32) {
        self.flags.set(flags);
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn shared_state_id(&self) -> usize {
        self.shared.id()
    }
    fn observer_count(&self) -> usize {
        self.observers.borrow().len()
    }
    fn add_observer(&self, observer: Weak<dyn Derivation>) {
        self.observers.borrow_mut().push(observer);
    }
    fn cleanup_dead_observers(&self) {
        self.observers.borrow_mut().retain(|w| w.strong_count() > 0);
    }
    fn for_each_observer(&self, f: &mut dyn FnMut(Rc<dyn Derivation>) -> bool) {
        for w in self.observers.borrow().iter() {
            if let Some(rc) = w.upgrade() {
                if !f(rc) {
                    break;
                }
            }
        }
    }
    fn remove_observer(&self, observer: &Rc<dyn Derivation>) {
        let ptr = Rc::as_ptr(observer) as *const ();
        self.observers
            .borrow_mut()
            .retain(|w| w.upgrade().map(|rc| Rc::as_ptr(&rc) as *const () != ptr).unwrap_or(false));
        if self.observers.borrow().is_empty() {
            self.shared.enqueue_unobservation(self.self_weak.borrow().clone());
        }
    }
    fn clear_observers(&self) {
        self.observers.borrow_mut().clear();
    }
    fn lowest_observer_state(&self) -> u32 {
        self.lowest_observer_state.get()
    }
    fn set_lowest_observer_state(&self, state: u32) {
        self.lowest_observer_state.set(state);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn notify_become_observed(&self) {
        if let Some(cb) = self.on_become_observed.borrow().as_ref() {
            cb();
        }
    }
    fn notify_become_unobserved(&self) {
        if let Some(cb) = self.on_become_unobserved.borrow().as_ref() {
            cb();
        }
    }
}

/// A value-less observable. Useful for reporting reads/writes on state that
/// isn't itself a single `T` (e.g. backing storage owned by other code, or
/// a signal that only ever means "something changed").
#[derive(Clone)]
pub struct Atom {
    inner: Rc<AtomInner>,
}

impl Atom {
    pub fn new(shared: &Rc<SharedState>, name: impl Into<String>) -> Self {
        let inner = Rc::new(AtomInner {
            flags: Cell::new(ATOM | UP_TO_DATE),
            name: name.into(),
            shared: shared.clone(),
            observers: RefCell::new(Vec::new()),
            lowest_observer_state: Cell::new(UP_TO_DATE),
            on_become_observed: RefCell::new(None),
            on_become_unobserved: RefCell::new(None),
            self_weak: RefCell::new(Weak::<AtomInner>::new()),
        });
        let weak: Weak<dyn Observable> = Rc::downgrade(&inner);
        *inner.self_weak.borrow_mut() = weak;
        Self { inner }
    }

    pub fn on_become_observed(&self, f: impl Fn() + 'static) {
        *self.inner.on_become_observed.borrow_mut() = Some(Box::new(f));
    }

    pub fn on_become_unobserved(&self, f: impl Fn() + 'static) {
        *self.inner.on_become_unobserved.borrow_mut() = Some(Box::new(f));
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn as_observable(&self) -> Rc<dyn Observable> {
        self.inner.clone()
    }

    /// Reports that the backing state this atom stands for was read.
    pub fn report_observed(&self) {
        tracking::report_observed(&self.inner.shared, &self.as_observable());
    }

    /// Reports that the backing state this atom stands for changed.
    /// Coalesces reaction flushing into the enclosing batch, if any, and
    /// opens a one-write batch otherwise.
    pub fn report_changed(&self) -> Result<()> {
        let has_observers = self.inner.observer_count() > 0;
        self.inner.shared.check_write_allowed(&self.inner.name, has_observers)?;

        let shared = self.inner.shared.clone();
        let observable = self.as_observable();
        shared.batch(|| {
            propagation::propagate_changed(&observable);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared_state::SharedStateConfig;

    #[test]
    fn report_changed_without_observers_succeeds() {
        let shared = SharedState::new(SharedStateConfig::default());
        let atom = Atom::new(&shared, "a");
        assert!(atom.report_changed().is_ok());
    }

    #[test]
    fn strict_mode_rejects_bare_write() {
        use crate::core::shared_state::EnforceActions;
        let shared = SharedState::new(SharedStateConfig {
            enforce_actions: EnforceActions::Always,
            ..Default::default()
        });
        let atom = Atom::new(&shared, "a");
        let err = atom.report_changed();
        assert!(matches!(err, Err(ReactiveError::WriteOutsideAction { .. })));
    }

    #[test]
    fn observed_hooks_fire_once() {
        use std::cell::Cell as StdCell;
        let shared = SharedState::new(SharedStateConfig::default());
        let atom = Atom::new(&shared, "a");
        let observed_count = Rc::new(StdCell::new(0));
        let oc = observed_count.clone();
        atom.on_become_observed(move || oc.set(oc.get() + 1));

        // Simulate a read while tracking by directly toggling the flag
        // via report_observed with no active derivation: this exercises
        // the `is_being_observed` transition edge only when something is
        // tracking, so here we assert the no-op (no tracking) path leaves
        // the counter untouched.
        atom.report_observed();
        assert_eq!(observed_count.get(), 0);
    }
}
