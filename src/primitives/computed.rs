// ============================================================================
// transparent-reactive - ComputedValue<T>
// A derived, lazily-evaluated, memoized observable. Both an Observable (to
// its own observers) and a Derivation (of the observables it reads).
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::core::constants::*;
use crate::core::shared_state::SharedState;
use crate::core::spy::SpyEvent;
use crate::core::types::{default_equals, Derivation, EqualsFn, Observable};
use crate::error::{OpaqueError, ReactiveError, Result};
use crate::reactivity::{propagation, tracking};

type Getter<T> = Box<dyn Fn() -> T>;
type Setter<T> = Box<dyn Fn(T)>;

/// Panic payload used to tunnel a cycle signal through a plain `Fn() -> T`
/// getter: a self-referential (or mutually cyclic) read panics with this
/// marker instead of a string, so the recompute that catches it can tell a
/// cycle apart from an ordinary getter failure.
struct ComputedCycleMarker;

#[derive(Clone, PartialEq)]
enum ComputedFailure {
    Cycle,
    Failed(String),
}

impl ComputedFailure {
    fn message(&self) -> String {
        match self {
            ComputedFailure::Cycle => "cycle detected".to_string(),
            ComputedFailure::Failed(message) => message.clone(),
        }
    }
}

struct ComputedValueInner<T> {
    flags: Cell<u32>,
    name: String,
    shared: Rc<SharedState>,

    getter: Getter<T>,
    setter: RefCell<Option<Setter<T>>>,
    equals: EqualsFn<T>,
    keep_alive: bool,
    /// Per-instance override of `SharedStateConfig::computed_requires_reaction`:
    /// when either is set, an untracked read (no batch, no observers, not
    /// kept-alive) fails with `ReadOutsideReaction` instead of warning.
    requires_reaction: bool,

    cached: RefCell<Option<std::result::Result<T, ComputedFailure>>>,

    run_id: Cell<u64>,
    deps: RefCell<Vec<Rc<dyn Observable>>>,
    observers: RefCell<Vec<Weak<dyn Derivation>>>,
    lowest_observer_state: Cell<u32>,

    self_weak_observable: RefCell<Weak<dyn Observable>>,
    self_weak_derivation: RefCell<Weak<dyn Derivation>>,
}

impl<T: Clone + 'static> Observable for ComputedValueInner<T> {
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
        if self.observers.borrow().is_empty() && !self.keep_alive {
            self.shared
                .enqueue_unobservation(self.self_weak_observable.borrow().clone());
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
    fn as_derivation(&self) -> Option<Rc<dyn Derivation>> {
        self.self_weak_derivation.borrow().upgrade()
    }
}

impl<T: Clone + 'static> Derivation for ComputedValueInner<T> {
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
    fn run_id(&self) -> u64 {
        self.run_id.get()
    }
    fn set_run_id(&self, id: u64) {
        self.run_id.set(id);
    }
    fn dep_count(&self) -> usize {
        self.deps.borrow().len()
    }
    fn add_dep(&self, source: Rc<dyn Observable>) {
        self.deps.borrow_mut().push(source);
    }
    fn clear_deps(&self) {
        self.deps.borrow_mut().clear();
    }
    fn for_each_dep(&self, f: &mut dyn FnMut(&Rc<dyn Observable>) -> bool) {
        for d in self.deps.borrow().iter() {
            if !f(d) {
                break;
            }
        }
    }
    fn remove_source(&self, source: &Rc<dyn Observable>) {
        let ptr = Rc::as_ptr(source) as *const ();
        self.deps.borrow_mut().retain(|d| Rc::as_ptr(d) as *const () != ptr);
    }
    fn replace_deps(&self, deps: Vec<Rc<dyn Observable>>) {
        *self.deps.borrow_mut() = deps;
    }

    /// Recomputes if stale, comparing the new result against the cached one
    /// and confirming the change to observers only when it actually differs.
    fn update(&self) {
        if self.flags.get() & DESTROYED != 0 {
            return;
        }
        let derivation_self = match self.self_weak_derivation.borrow().upgrade() {
            Some(d) => d,
            None => return,
        };
        if !tracking::should_compute(&derivation_self) {
            return;
        }
        self.recompute(&derivation_self);
    }

    fn on_become_stale(&self, new_state: u32) {
        // A computed doesn't eagerly recompute; it forwards the
        // possibly-changed notice to its own observers and waits for a pull.
        if let Some(observable_self) = self.self_weak_observable.borrow().upgrade() {
            match new_state {
                STALE => propagation::propagate_maybe_changed(&observable_self),
                POSSIBLY_STALE => propagation::propagate_maybe_changed(&observable_self),
                _ => {}
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_observable(&self) -> Option<Rc<dyn Observable>> {
        self.self_weak_observable.borrow().upgrade()
    }

    fn on_suspend(&self) {
        *self.cached.borrow_mut() = None;
        if let Some(derivation_self) = self.self_weak_derivation.borrow().upgrade() {
            tracking::unsubscribe_all(&derivation_self);
        }
    }
}

impl<T: Clone + 'static> ComputedValueInner<T> {
    fn recompute(&self, derivation_self: &Rc<dyn Derivation>) {
        self.flags.set(self.flags.get() | IS_COMPUTING);
        let weak: Weak<dyn Derivation> = self.self_weak_derivation.borrow().clone();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tracking::track_derived_function(&self.shared, derivation_self, weak, || (self.getter)())
        }));

        self.flags.set(self.flags.get() & !IS_COMPUTING);

        let new_result: std::result::Result<T, ComputedFailure> = match outcome {
            Ok(value) => Ok(value),
            Err(payload) => {
                if payload.downcast_ref::<ComputedCycleMarker>().is_some() {
                    Err(ComputedFailure::Cycle)
                } else {
                    Err(ComputedFailure::Failed(panic_message(payload)))
                }
            }
        };

        let changed = {
            let cached = self.cached.borrow();
            match (cached.as_ref(), &new_result) {
                (Some(Ok(old)), Ok(new)) => !(self.equals)(old, new),
                (Some(Err(old)), Err(new)) => old != new,
                _ => true,
            }
        };

        *self.cached.borrow_mut() = Some(new_result.clone());
        self.shared.emit_spy(SpyEvent::ComputedRead {
            name: self.name.clone(),
            recomputed: true,
        });

        if let Err(failure) = &new_result {
            self.shared.emit_spy(SpyEvent::ReactionException {
                name: self.name.clone(),
                message: failure.message(),
            });
        }

        if changed {
            if let Some(observable_self) = self.self_weak_observable.borrow().upgrade() {
                propagation::propagate_change_confirmed(&observable_self);
            }
        }
        derivation_self.set_dependency_state(UP_TO_DATE);
    }
}

impl<T: Clone + 'static> ComputedValueInner<T> {
    /// One-off recompute for a read with no observers, not kept-alive, and
    /// outside any batch: runs the getter directly instead of through
    /// `track_derived_function`, since nothing subscribes to this computed
    /// to make tracking its dependencies worthwhile.
    fn recompute_untracked(&self) {
        self.flags.set(self.flags.get() | IS_COMPUTING);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (self.getter)()));
        self.flags.set(self.flags.get() & !IS_COMPUTING);

        let new_result: std::result::Result<T, ComputedFailure> = match outcome {
            Ok(value) => Ok(value),
            Err(payload) => {
                if payload.downcast_ref::<ComputedCycleMarker>().is_some() {
                    Err(ComputedFailure::Cycle)
                } else {
                    Err(ComputedFailure::Failed(panic_message(payload)))
                }
            }
        };

        *self.cached.borrow_mut() = Some(new_result.clone());
        self.shared.emit_spy(SpyEvent::ComputedRead { name: self.name.clone(), recomputed: true });
        if let Err(failure) = &new_result {
            self.shared.emit_spy(SpyEvent::ReactionException { name: self.name.clone(), message: failure.message() });
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "computed function panicked".to_string()
    }
}

/// A memoized, lazily-recomputed derived value.
///
/// Reads outside of any tracking context (no enclosing reaction or computed)
/// are "untracked": the value is still computed on demand and cached, but
/// since nothing subscribes to it, it's eligible to be suspended the moment
/// the pull that triggered the read finishes — in practice this means each
/// untracked read that finds no live subscription recomputes from scratch.
#[derive(Clone)]
pub struct ComputedValue<T: 'static> {
    inner: Rc<ComputedValueInner<T>>,
}

impl<T: Clone + PartialEq + 'static> ComputedValue<T> {
    pub fn new(shared: &Rc<SharedState>, name: impl Into<String>, getter: impl Fn() -> T + 'static) -> Self {
        Self::build(shared, name.into(), Box::new(getter), None, default_equals, false, false)
    }
}

impl<T: Clone + 'static> ComputedValue<T> {
    pub fn with_equals(
        shared: &Rc<SharedState>,
        name: impl Into<String>,
        getter: impl Fn() -> T + 'static,
        equals: EqualsFn<T>,
    ) -> Self {
        Self::build(shared, name.into(), Box::new(getter), None, equals, false, false)
    }

    pub fn with_setter(
        shared: &Rc<SharedState>,
        name: impl Into<String>,
        getter: impl Fn() -> T + 'static,
        setter: impl Fn(T) + 'static,
        equals: EqualsFn<T>,
    ) -> Self {
        Self::build(shared, name.into(), Box::new(getter), Some(Box::new(setter)), equals, false, false)
    }

    /// A computed that stays subscribed (and thus cached) even with no
    /// observers, instead of suspending. Use sparingly: it trades memory for
    /// avoiding recompute-from-scratch on the next untracked read.
    pub fn keep_alive(
        shared: &Rc<SharedState>,
        name: impl Into<String>,
        getter: impl Fn() -> T + 'static,
        equals: EqualsFn<T>,
    ) -> Self {
        Self::build(shared, name.into(), Box::new(getter), None, equals, true, false)
    }

    /// A computed whose untracked reads (no batch, no observers, not
    /// kept-alive) fail with `ReadOutsideReaction` instead of only warning,
    /// regardless of the `SharedState`-wide `computed_requires_reaction`
    /// default.
    pub fn requiring_reaction(
        shared: &Rc<SharedState>,
        name: impl Into<String>,
        getter: impl Fn() -> T + 'static,
        equals: EqualsFn<T>,
    ) -> Self {
        Self::build(shared, name.into(), Box::new(getter), None, equals, false, true)
    }

    fn build(
        shared: &Rc<SharedState>,
        name: String,
        getter: Getter<T>,
        setter: Option<Setter<T>>,
        equals: EqualsFn<T>,
        keep_alive: bool,
        requires_reaction: bool,
    ) -> Self {
        let inner = Rc::new(ComputedValueInner {
            flags: Cell::new(COMPUTED | NOT_TRACKING),
            name,
            shared: shared.clone(),
            getter,
            setter: RefCell::new(setter),
            equals,
            keep_alive,
            requires_reaction,
            cached: RefCell::new(None),
            run_id: Cell::new(0),
            deps: RefCell::new(Vec::new()),
            observers: RefCell::new(Vec::new()),
            lowest_observer_state: Cell::new(UP_TO_DATE),
            self_weak_observable: RefCell::new(Weak::<ComputedValueInner<T>>::new()),
            self_weak_derivation: RefCell::new(Weak::<ComputedValueInner<T>>::new()),
        });
        let weak_obs: Weak<dyn Observable> = Rc::downgrade(&inner);
        let weak_der: Weak<dyn Derivation> = Rc::downgrade(&inner);
        *inner.self_weak_observable.borrow_mut() = weak_obs;
        *inner.self_weak_derivation.borrow_mut() = weak_der;
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn as_observable(&self) -> Rc<dyn Observable> {
        self.inner.self_weak_observable.borrow().upgrade().expect("self-weak upgrade")
    }

    fn as_derivation(&self) -> Rc<dyn Derivation> {
        self.inner.self_weak_derivation.borrow().upgrade().expect("self-weak upgrade")
    }

    /// Reads the memoized value, recomputing first if stale (or possibly
    /// stale and confirmed stale by walking its own dependencies). Raises
    /// `ComputedCycle` if read while already computing (a self-referential
    /// computed), and re-raises the last computation's panic as
    /// `ComputedReadFailed` if the getter failed.
    pub fn get(&self) -> Result<T> {
        if self.inner.flags.get() & IS_COMPUTING != 0 {
            // Re-entered while already computing: if this read is itself
            // nested inside this computed's own getter (directly, or through
            // a chain of other computeds), panicking tunnels the cycle
            // signal through the caller's `Fn() -> T` getter closure back to
            // the outermost `recompute`, which is the only frame that can
            // turn it back into a `Result`.
            std::panic::panic_any(ComputedCycleMarker);
        }

        let derivation_self = self.as_derivation();
        let observable_self = self.as_observable();

        // Outside any batch, with no observers, and not kept-alive: this
        // read isn't worth tracking (nothing subscribes to benefit from
        // it). Warn, or fail with `ReadOutsideReaction` if configured
        // stricter, then do a one-off untracked recompute inside its own
        // micro-batch instead of the normal report_observed/track path.
        if !self.inner.shared.is_batching() && observable_self.observer_count() == 0 && !self.inner.keep_alive {
            let requires_reaction =
                self.inner.requires_reaction || self.inner.shared.config().computed_requires_reaction;
            if requires_reaction {
                panic!(
                    "{}",
                    ReactiveError::ReadOutsideReaction { name: self.inner.name.clone() }
                );
            }
            tracing::warn!(computed = %self.inner.name, "computed read outside a batch with no observers");
            let inner = self.inner.clone();
            self.inner.shared.clone().batch(move || inner.recompute_untracked());
        } else {
            tracking::report_observed(&self.inner.shared, &observable_self);
            if tracking::should_compute(&derivation_self) {
                self.inner.recompute(&derivation_self);
            }
        }

        self.inner.shared.emit_spy(SpyEvent::ComputedRead {
            name: self.inner.name.clone(),
            recomputed: false,
        });

        match self.inner.cached.borrow().as_ref() {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(ComputedFailure::Cycle)) => {
                Err(ReactiveError::ComputedCycle { name: self.inner.name.clone() })
            }
            Some(Err(ComputedFailure::Failed(message))) => Err(ReactiveError::ComputedReadFailed {
                name: self.inner.name.clone(),
                source: Box::new(OpaqueError::new(message.clone())),
            }),
            None => unreachable!("cache populated by recompute above"),
        }
    }

    /// Writes through the computed's setter, if one was supplied.
    pub fn set(&self, value: T) -> Result<()> {
        if self.inner.flags.get() & IS_RUNNING_SETTER != 0 {
            return Err(ReactiveError::ComputedSetterCycle { name: self.inner.name.clone() });
        }
        let setter = self.inner.setter.borrow();
        let setter = setter.as_ref().ok_or_else(|| ReactiveError::ComputedReadOnly {
            name: self.inner.name.clone(),
        })?;
        self.inner.flags.set(self.inner.flags.get() | IS_RUNNING_SETTER);
        let shared = self.inner.shared.clone();
        shared.action(format!("{}.set", self.inner.name), || setter(value));
        self.inner.flags.set(self.inner.flags.get() & !IS_RUNNING_SETTER);
        Ok(())
    }

    /// Drops the cached value and dependency subscriptions, as if every
    /// observer had been removed. Safe to call even with live observers —
    /// the next read simply recomputes from scratch.
    pub fn suspend(&self) {
        self.inner.on_suspend();
        self.inner.set_dependency_state(NOT_TRACKING);
    }
}
