// ============================================================================
// transparent-reactive - ObservableValue<T>
// An Atom plus a typed value, equality-gated writes, intercept/change events
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::core::constants::*;
use crate::core::shared_state::SharedState;
use crate::core::spy::SpyEvent;
use crate::core::types::{Derivation, EqualsFn, Observable};
use crate::disposer::Disposer;
use crate::error::Result;
use crate::primitives::enhancer::Enhancer;
use crate::reactivity::{propagation, tracking};

/// A pre-write hook. Receives the current value and a mutable handle to the
/// proposed new value; return `false` to cancel the write entirely.
pub type InterceptFn<T> = Box<dyn Fn(&T, &mut T) -> bool>;

/// A post-write hook. Receives the old and new value.
pub type ChangeFn<T> = Box<dyn Fn(&T, &T)>;

struct ObservableValueInner<T> {
    flags: Cell<u32>,
    name: String,
    shared: Rc<SharedState>,
    value: RefCell<T>,
    equals: EqualsFn<T>,
    observers: RefCell<Vec<Weak<dyn Derivation>>>,
    lowest_observer_state: Cell<u32>,
    on_become_observed: RefCell<Option<Box<dyn Fn()>>>,
    on_become_unobserved: RefCell<Option<Box<dyn Fn()>>>,
    next_listener_id: Cell<u64>,
    intercepts: RefCell<Vec<(u64, InterceptFn<T>)>>,
    changes: RefCell<Vec<(u64, ChangeFn<T>)>>,
    self_weak: RefCell<Weak<dyn Observable>>,
}

impl<T: 'static> Observable for ObservableValueInner<T> {
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

/// An observable cell holding a single value of type `T`.
#[derive(Clone)]
pub struct ObservableValue<T: 'static> {
    inner: Rc<ObservableValueInner<T>>,
}

impl<T: Clone + PartialEq + 'static> ObservableValue<T> {
    pub fn new(shared: &Rc<SharedState>, value: T, name: impl Into<String>) -> Self {
        Self::new_with_enhancer(shared, value, name, Enhancer::default())
    }
}

impl<T: Clone + 'static> ObservableValue<T> {
    pub fn new_with_equals(
        shared: &Rc<SharedState>,
        value: T,
        name: impl Into<String>,
        equals: EqualsFn<T>,
    ) -> Self {
        let inner = Rc::new(ObservableValueInner {
            flags: Cell::new(OBSERVABLE_VALUE | UP_TO_DATE),
            name: name.into(),
            shared: shared.clone(),
            value: RefCell::new(value),
            equals,
            observers: RefCell::new(Vec::new()),
            lowest_observer_state: Cell::new(UP_TO_DATE),
            on_become_observed: RefCell::new(None),
            on_become_unobserved: RefCell::new(None),
            next_listener_id: Cell::new(0),
            intercepts: RefCell::new(Vec::new()),
            changes: RefCell::new(Vec::new()),
            self_weak: RefCell::new(Weak::<ObservableValueInner<T>>::new()),
        });
        let weak: Weak<dyn Observable> = Rc::downgrade(&inner);
        *inner.self_weak.borrow_mut() = weak;
        Self { inner }
    }
}

impl<T: Clone + PartialEq + 'static> ObservableValue<T> {
    pub fn new_with_enhancer(
        shared: &Rc<SharedState>,
        value: T,
        name: impl Into<String>,
        enhancer: Enhancer,
    ) -> Self {
        Self::new_with_equals(shared, value, name, enhancer.equals_fn::<T>())
    }
}

impl<T: Clone + 'static> ObservableValue<T> {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn as_observable(&self) -> Rc<dyn Observable> {
        self.inner.clone()
    }

    /// Reads the current value, recording this observable as a dependency
    /// of the currently tracking derivation, if any.
    pub fn get(&self) -> T {
        tracking::report_observed(&self.inner.shared, &self.as_observable());
        self.inner.value.borrow().clone()
    }

    /// Reads the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        tracking::report_observed(&self.inner.shared, &self.as_observable());
        f(&self.inner.value.borrow())
    }

    /// Reads the current value without recording a dependency.
    pub fn peek(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Subscribes a pre-write hook. Returns a disposer.
    pub fn intercept(&self, f: impl Fn(&T, &mut T) -> bool + 'static) -> Disposer {
        let id = self.inner.next_listener_id.get();
        self.inner.next_listener_id.set(id + 1);
        self.inner.intercepts.borrow_mut().push((id, Box::new(f)));
        let inner = self.inner.clone();
        Disposer::new(move || {
            inner.intercepts.borrow_mut().retain(|(i, _)| *i != id);
        })
    }

    /// Subscribes a post-write hook. Returns a disposer.
    pub fn on_change(&self, f: impl Fn(&T, &T) + 'static) -> Disposer {
        let id = self.inner.next_listener_id.get();
        self.inner.next_listener_id.set(id + 1);
        self.inner.changes.borrow_mut().push((id, Box::new(f)));
        let inner = self.inner.clone();
        Disposer::new(move || {
            inner.changes.borrow_mut().retain(|(i, _)| *i != id);
        })
    }

    pub fn on_become_observed(&self, f: impl Fn() + 'static) {
        *self.inner.on_become_observed.borrow_mut() = Some(Box::new(f));
    }

    pub fn on_become_unobserved(&self, f: impl Fn() + 'static) {
        *self.inner.on_become_unobserved.borrow_mut() = Some(Box::new(f));
    }

    /// Writes a new value, running the intercept chain, the equality gate,
    /// strict-mode enforcement, change propagation and the post-write
    /// listeners, in that order.
    pub fn set(&self, new_value: T) -> Result<()> {
        let mut candidate = new_value;
        {
            let current = self.inner.value.borrow();
            for (_, intercept) in self.inner.intercepts.borrow().iter() {
                if !intercept(&current, &mut candidate) {
                    return Ok(()); // cancelled
                }
            }
        }

        let changed = {
            let current = self.inner.value.borrow();
            !(self.inner.equals)(&current, &candidate)
        };
        if !changed {
            return Ok(());
        }

        let has_observers = self.inner.observer_count() > 0;
        self.inner.shared.check_write_allowed(&self.inner.name, has_observers)?;

        let old_value = self.inner.value.replace(candidate.clone());

        let shared = self.inner.shared.clone();
        let observable = self.as_observable();
        shared.batch(|| {
            propagation::propagate_changed(&observable);
        });

        self.inner.shared.emit_spy(SpyEvent::ObservableValueChanged {
            name: self.inner.name.clone(),
        });

        for (_, listener) in self.inner.changes.borrow().iter() {
            listener(&old_value, &candidate);
        }

        Ok(())
    }

    /// Mutates the value in place via `f`, then notifies as if it had
    /// changed (the enhancer can't detect in-place mutation by equality
    /// alone, so this always propagates — pair with `Enhancer::Reference`
    /// semantics).
    pub fn update(&self, f: impl FnOnce(&mut T)) -> Result<()> {
        let has_observers = self.inner.observer_count() > 0;
        self.inner.shared.check_write_allowed(&self.inner.name, has_observers)?;

        let old_value = self.inner.value.borrow().clone();
        f(&mut self.inner.value.borrow_mut());
        let new_value = self.inner.value.borrow().clone();

        let shared = self.inner.shared.clone();
        let observable = self.as_observable();
        shared.batch(|| {
            propagation::propagate_changed(&observable);
        });

        for (_, listener) in self.inner.changes.borrow().iter() {
            listener(&old_value, &new_value);
        }
        Ok(())
    }
}
