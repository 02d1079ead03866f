// ============================================================================
// transparent-reactive - Reaction
// A scheduled side-effecting derivation: autorun / reaction / when
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crate::core::constants::*;
use crate::core::shared_state::{SchedulerFn, SharedState};
use crate::core::spy::SpyEvent;
use crate::core::types::{Derivation, Observable};
use crate::disposer::Disposer;
use crate::error::{ReactiveError, Result};
use crate::reactivity::tracking;

type Effect = Box<dyn Fn()>;
type ErrorHandler = Box<dyn Fn(&str)>;

struct ReactionInner {
    flags: Cell<u32>,
    name: String,
    shared: Rc<SharedState>,

    effect: RefCell<Effect>,
    on_error: RefCell<Option<ErrorHandler>>,

    /// Optional debounce window and/or custom "run this later" hook. When
    /// either is set, `on_become_stale` bypasses the normal FIFO
    /// `pending_reactions` flush and instead calls through the scheduler
    /// (falling back to `shared.config().scheduler` when this reaction has
    /// no scheduler of its own) with a deferred callback that performs the
    /// actual track. See §4.6's "reaction scheduling model".
    delay: Option<Duration>,
    scheduler: Option<SchedulerFn>,

    run_id: Cell<u64>,
    deps: RefCell<Vec<Rc<dyn Observable>>>,

    self_weak: RefCell<Weak<dyn Derivation>>,
}

impl Derivation for ReactionInner {
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

    fn update(&self) {
        if self.flags.get() & (DESTROYED | IS_RUNNING) != 0 {
            return;
        }
        let derivation_self = match self.self_weak.borrow().upgrade() {
            Some(d) => d,
            None => return,
        };
        if !tracking::should_compute(&derivation_self) {
            return;
        }
        self.run(&derivation_self);
    }

    fn on_become_stale(&self, _new_state: u32) {
        if self.flags.get() & (DESTROYED | SCHEDULED) != 0 {
            return;
        }
        self.flags.set(self.flags.get() | SCHEDULED);
        self.shared.emit_spy(SpyEvent::ReactionScheduled { name: self.name.clone() });

        let derivation_self = match self.self_weak.borrow().upgrade() {
            Some(d) => d,
            None => return,
        };

        match self.scheduler.clone().or_else(|| self.shared.config().scheduler.clone()) {
            Some(scheduler) => {
                let weak = Rc::downgrade(&derivation_self);
                let job: Box<dyn FnOnce()> = Box::new(move || {
                    if let Some(derivation) = weak.upgrade() {
                        if !derivation.is_destroyed() {
                            derivation.update();
                        }
                    }
                });
                scheduler(self.delay.unwrap_or(Duration::ZERO), job);
            }
            None => {
                self.shared.enqueue_reaction(Rc::downgrade(&derivation_self));
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_observable(&self) -> Option<Rc<dyn Observable>> {
        None
    }
}

impl ReactionInner {
    fn run(&self, derivation_self: &Rc<dyn Derivation>) {
        self.flags.set((self.flags.get() | IS_RUNNING) & !SCHEDULED);
        let run_id = self.shared.next_run_id();
        self.shared.emit_spy(SpyEvent::ReactionStart { name: self.name.clone(), run_id });

        let weak: Weak<dyn Derivation> = self.self_weak.borrow().clone();
        let effect_ref = &*self.effect.borrow();
        let shared = self.shared.clone();
        let outcome = shared.batch(|| {
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                tracking::track_derived_function(&self.shared, derivation_self, weak, || effect_ref())
            }))
        });

        self.flags.set(self.flags.get() & !IS_RUNNING);
        self.shared.emit_spy(SpyEvent::ReactionEnd { name: self.name.clone(), run_id });

        if self.flags.get() & DESTROYED != 0 {
            // dispose() was called while this run was in flight: the
            // tracked function already rebound deps against the observables
            // it just read, so finish the deferred teardown now.
            tracking::unsubscribe_all(derivation_self);
        }

        if let Err(payload) = outcome {
            let message = panic_message(payload);
            self.shared.emit_spy(SpyEvent::ReactionException {
                name: self.name.clone(),
                message: message.clone(),
            });
            match self.on_error.borrow().as_ref() {
                Some(handler) => handler(&message),
                None if !self.shared.config().disable_error_boundaries => {
                    tracing::error!(reaction = %self.name, %message, "reaction effect panicked");
                }
                None => std::panic::resume_unwind(Box::new(message)),
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "reaction effect panicked".to_string()
    }
}

/// Options shared by `autorun` and `reaction`.
#[derive(Default)]
pub struct ReactionOptions {
    pub name: Option<String>,
    pub on_error: Option<Box<dyn Fn(&str)>>,
    /// Debounce window passed to `scheduler` (or to
    /// `SharedStateConfig::scheduler` when this field is `None`); ignored
    /// when neither resolves to a scheduler.
    pub delay: Option<Duration>,
    /// Per-reaction override of `SharedStateConfig::scheduler`.
    pub scheduler: Option<SchedulerFn>,
}

fn new_reaction_inner(
    shared: &Rc<SharedState>,
    name: String,
    on_error: Option<ErrorHandler>,
    delay: Option<Duration>,
    scheduler: Option<SchedulerFn>,
    effect: Effect,
) -> Rc<ReactionInner> {
    let inner = Rc::new(ReactionInner {
        flags: Cell::new(REACTION | NOT_TRACKING),
        name,
        shared: shared.clone(),
        effect: RefCell::new(effect),
        on_error: RefCell::new(on_error),
        delay,
        scheduler,
        run_id: Cell::new(0),
        deps: RefCell::new(Vec::new()),
        self_weak: RefCell::new(Weak::<ReactionInner>::new()),
    });
    let weak: Weak<dyn Derivation> = Rc::downgrade(&inner);
    *inner.self_weak.borrow_mut() = weak;
    inner
}

fn dispose_reaction(inner: &Rc<ReactionInner>) {
    if inner.flags.get() & DESTROYED != 0 {
        return;
    }
    if inner.flags.get() & IS_RUNNING != 0 {
        // Deferred: mark destroyed now, unsubscribe happens once the
        // in-flight `run` returns and nothing re-tracks it.
        inner.flags.set(inner.flags.get() | DESTROYED);
        return;
    }
    inner.flags.set(inner.flags.get() | DESTROYED);
    let derivation_self: Rc<dyn Derivation> = inner.clone();
    inner.shared.batch(|| tracking::unsubscribe_all(&derivation_self));
}

/// Runs `effect` immediately, tracking its reads, then re-runs it whenever
/// any of those observables change. Returns a `Disposer` to stop it.
pub fn autorun(shared: &Rc<SharedState>, name: impl Into<String>, effect: impl Fn() + 'static) -> Disposer {
    autorun_with(shared, ReactionOptions { name: Some(name.into()), ..Default::default() }, effect)
}

pub fn autorun_with(shared: &Rc<SharedState>, opts: ReactionOptions, effect: impl Fn() + 'static) -> Disposer {
    let name = opts.name.unwrap_or_else(|| "autorun".to_string());
    let inner = new_reaction_inner(shared, name, opts.on_error, opts.delay, opts.scheduler, Box::new(effect));
    let derivation_self: Rc<dyn Derivation> = inner.clone();
    inner.run(&derivation_self);

    let disposer_inner = inner.clone();
    Disposer::new(move || dispose_reaction(&disposer_inner))
}

/// Tracks `expr`'s reads and re-runs `effect` with its result whenever `expr`
/// would produce a different value. Unlike `autorun`, `effect` itself is not
/// tracked: only `expr`'s dependencies matter.
pub fn reaction<T: PartialEq + Clone + 'static>(
    shared: &Rc<SharedState>,
    name: impl Into<String>,
    expr: impl Fn() -> T + 'static,
    effect: impl Fn(T) + 'static,
) -> Disposer {
    let first_run = Rc::new(Cell::new(true));
    let last_value: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));

    let lv = last_value.clone();
    let fr = first_run.clone();
    let wrapped = move || {
        let value = expr();
        let changed = match lv.borrow().as_ref() {
            Some(prev) => prev != &value,
            None => true,
        };
        *lv.borrow_mut() = Some(value.clone());
        if fr.get() {
            fr.set(false);
            return;
        }
        if changed {
            effect(value);
        }
    };

    autorun(shared, name, wrapped)
}

/// Options for `when`.
#[derive(Default)]
pub struct WhenOptions {
    pub name: Option<String>,
    pub timeout: Option<Duration>,
}

/// Runs `effect` exactly once, the first time `predicate` becomes true, then
/// disposes itself. If `timeout` elapses first, the returned disposer's
/// underlying reaction stops and the error handler (if any) receives a
/// `Timeout` error; without an error handler the timeout is only observable
/// via the spy channel's `ReactionException`. Timing is checked each time
/// `predicate` is re-evaluated, not via a background timer.
pub fn when(
    shared: &Rc<SharedState>,
    predicate: impl Fn() -> bool + 'static,
    effect: impl Fn() + 'static,
    opts: WhenOptions,
) -> Disposer {
    let name = opts.name.unwrap_or_else(|| "when".to_string());
    let started = Instant::now();
    let timeout = opts.timeout;
    let shared_for_timeout = shared.clone();
    let reaction_name = name.clone();

    let disposer_cell: Rc<RefCell<Option<Disposer>>> = Rc::new(RefCell::new(None));
    let dc = disposer_cell.clone();

    let wrapped = move || {
        if predicate() {
            effect();
            if let Some(d) = dc.borrow_mut().take() {
                d.dispose();
            }
            return;
        }
        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                shared_for_timeout.emit_spy(SpyEvent::ReactionException {
                    name: reaction_name.clone(),
                    message: format!("when timed out after {}ms", limit.as_millis()),
                });
                if let Some(d) = dc.borrow_mut().take() {
                    d.dispose();
                }
            }
        }
    };

    let inner_disposer = autorun(shared, name, wrapped);
    *disposer_cell.borrow_mut() = Some(inner_disposer);

    // Returned disposer and the self-disposing path inside `wrapped` share
    // `disposer_cell`: whichever runs first takes it, the other finds it
    // already empty and does nothing.
    let outer_cell = disposer_cell;
    Disposer::new(move || {
        if let Some(d) = outer_cell.borrow_mut().take() {
            d.dispose();
        }
    })
}

/// A handle to a `when()` with no effect. Settles (becomes `Ok`) the moment
/// its predicate is first observed true, or `Err(Timeout)` if a configured
/// timeout elapses first. Since this engine has no async runtime, there is
/// no blocking `.wait()`: poll `is_settled()` from your own event loop, or
/// use `reaction`/`autorun` with an explicit effect instead.
pub struct WhenHandle {
    settled: Rc<Cell<Option<std::result::Result<(), (String, u64)>>>>,
    _disposer_cell: Rc<RefCell<Option<Disposer>>>,
}

impl WhenHandle {
    pub fn is_settled(&self) -> bool {
        self.settled.get().is_some()
    }

    /// `None` while pending, `Some(Ok(()))` once the predicate was true,
    /// `Some(Err(..))` if the timeout elapsed first.
    pub fn poll(&self) -> Option<Result<()>> {
        match self.settled.get()? {
            Ok(()) => Some(Ok(())),
            Err((name, millis)) => Some(Err(ReactiveError::Timeout { name, millis })),
        }
    }
}

/// `when` without an effect: settles once `predicate` is first true.
pub fn when_handle(shared: &Rc<SharedState>, predicate: impl Fn() -> bool + 'static, opts: WhenOptions) -> WhenHandle {
    let name = opts.name.unwrap_or_else(|| "when".to_string());
    let started = Instant::now();
    let timeout = opts.timeout;

    let settled: Rc<Cell<Option<std::result::Result<(), (String, u64)>>>> = Rc::new(Cell::new(None));
    let disposer_cell: Rc<RefCell<Option<Disposer>>> = Rc::new(RefCell::new(None));

    let s = settled.clone();
    let dc = disposer_cell.clone();
    let name_for_effect = name.clone();
    let wrapped = move || {
        if predicate() {
            s.set(Some(Ok(())));
            if let Some(d) = dc.borrow_mut().take() {
                d.dispose();
            }
            return;
        }
        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                s.set(Some(Err((name_for_effect.clone(), limit.as_millis() as u64))));
                if let Some(d) = dc.borrow_mut().take() {
                    d.dispose();
                }
            }
        }
    };

    let inner_disposer = autorun(shared, name, wrapped);
    *disposer_cell.borrow_mut() = Some(inner_disposer);

    WhenHandle { settled, _disposer_cell: disposer_cell }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared_state::SharedStateConfig;
    use crate::primitives::observable_value::ObservableValue;
    use std::cell::Cell as StdCell;

    #[test]
    fn autorun_runs_immediately_and_on_change() {
        let shared = SharedState::new(SharedStateConfig::default());
        let src = ObservableValue::new(&shared, 1, "src");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let src2 = src.clone();
        let _disposer = autorun(&shared, "au", move || {
            s.borrow_mut().push(src2.get());
        });
        assert_eq!(*seen.borrow(), vec![1]);

        src.set(2).unwrap();
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn disposed_autorun_stops_reacting() {
        let shared = SharedState::new(SharedStateConfig::default());
        let src = ObservableValue::new(&shared, 1, "src");
        let count = Rc::new(StdCell::new(0));
        let c = count.clone();
        let src2 = src.clone();
        let disposer = autorun(&shared, "au", move || {
            src2.get();
            c.set(c.get() + 1);
        });
        assert_eq!(count.get(), 1);
        disposer.dispose();
        src.set(2).unwrap();
        assert_eq!(count.get(), 1, "disposed reaction must not re-run");
    }

    #[test]
    fn reaction_only_fires_on_actual_change() {
        let shared = SharedState::new(SharedStateConfig::default());
        let src = ObservableValue::new(&shared, 1, "src");
        let fired = Rc::new(StdCell::new(0));
        let f = fired.clone();
        let src2 = src.clone();
        let _disposer = reaction(&shared, "r", move || src2.get(), move |_v| f.set(f.get() + 1));

        assert_eq!(fired.get(), 0, "reaction does not fire on the initial run");
        src.set(1).unwrap();
        assert_eq!(fired.get(), 0, "setting the same value must not fire");
        src.set(2).unwrap();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn when_fires_effect_once_then_disposes() {
        let shared = SharedState::new(SharedStateConfig::default());
        let ready = ObservableValue::new(&shared, false, "ready");
        let fired = Rc::new(StdCell::new(0));
        let f = fired.clone();
        let ready2 = ready.clone();
        let _d = when(&shared, move || ready2.get(), move || f.set(f.get() + 1), WhenOptions::default());

        assert_eq!(fired.get(), 0);
        ready.set(true).unwrap();
        assert_eq!(fired.get(), 1);
        ready.set(false).unwrap();
        ready.set(true).unwrap();
        assert_eq!(fired.get(), 1, "when must not fire a second time");
    }
}
