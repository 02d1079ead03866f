// Integration tests for the core reactive scenarios the engine must support.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use transparent_reactive::{
    autorun, reaction, when, ComputedValue, EnforceActions, ObservableValue, ReactiveError,
    SharedState, SharedStateConfig, WhenOptions,
};

fn fresh() -> Rc<SharedState> {
    SharedState::new(SharedStateConfig::default())
}

#[test]
fn cycle_detection_on_self_referential_computed() {
    // S2: a computed whose getter reads its own value must fail with ComputedCycle.
    let shared = fresh();

    // Tie the knot with a RefCell<Option<ComputedValue<i32>>> since the getter
    // closure needs a handle to the computed before it exists.
    let slot: Rc<RefCell<Option<ComputedValue<i32>>>> = Rc::new(RefCell::new(None));
    let slot2 = slot.clone();
    let comp = ComputedValue::new(&shared, "self-referential", move || {
        // The nested read panics with the cycle marker; that panic tunnels
        // back through this `Fn() -> T` getter to the outermost `get()`.
        slot2.borrow().as_ref().unwrap().get().unwrap()
    });
    *slot.borrow_mut() = Some(comp.clone());

    let err = comp.get();
    assert!(matches!(err, Err(ReactiveError::ComputedCycle { .. })));
}

#[test]
fn reaction_expression_effect_split() {
    // S3 (collections are out of scope; modeled with a Vec<String> observable
    // rather than an observable container type).
    let shared = fresh();
    let todos = ObservableValue::new(&shared, vec!["a".to_string(), "b".to_string()], "todos");

    let counts: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
    let c = counts.clone();
    let todos_for_count = todos.clone();
    let _count_reaction = reaction(
        &shared,
        "count",
        move || todos_for_count.get().len(),
        move |n| c.borrow_mut().push(n),
    );

    let titles: Rc<RefCell<Vec<Vec<String>>>> = Rc::new(RefCell::new(Vec::new()));
    let t = titles.clone();
    let todos_for_titles = todos.clone();
    let _title_reaction = reaction(
        &shared,
        "titles",
        move || todos_for_titles.get(),
        move |titles| t.borrow_mut().push(titles),
    );

    todos.update(|v| v.push("c".to_string())).unwrap();
    assert_eq!(*counts.borrow(), vec![3]);
    assert_eq!(*titles.borrow(), vec![vec!["a", "b", "c"]]);

    todos.update(|v| v[0] = "z".to_string()).unwrap();
    assert_eq!(*counts.borrow(), vec![3], "title edit must not change count");
    assert_eq!(*titles.borrow(), vec![vec!["a", "b", "c"], vec!["z", "b", "c"]]);
}

#[test]
fn suspension_round_trip_drops_cache() {
    // S6: disposing the only observer suspends the computed; the next
    // untracked read must recompute from scratch.
    let shared = fresh();
    let calls = Rc::new(Cell::new(0));
    let c = calls.clone();
    let src = ObservableValue::new(&shared, 1, "src");
    let src2 = src.clone();
    let comp = ComputedValue::new(&shared, "counting", move || {
        c.set(c.get() + 1);
        src2.get() * 2
    });

    let comp_for_autorun = comp.clone();
    let disposer = autorun(&shared, "observe-once", move || {
        comp_for_autorun.get().unwrap();
    });
    let n = calls.get();
    assert_eq!(n, 1);

    disposer.dispose();

    assert_eq!(comp.get().unwrap(), 2);
    assert_eq!(calls.get(), n + 1, "suspended computed must recompute on next read");
}

#[test]
fn strict_mode_allows_batched_write_inside_action_once() {
    let shared = SharedState::new(SharedStateConfig {
        enforce_actions: EnforceActions::Always,
        ..Default::default()
    });
    let b = ObservableValue::new(&shared, 0, "b");

    let fire_count = Rc::new(Cell::new(0));
    let f = fire_count.clone();
    let b2 = b.clone();
    let _disposer = autorun(&shared, "watch-b", move || {
        b2.get();
        f.set(f.get() + 1);
    });
    assert_eq!(fire_count.get(), 1, "autorun runs once on creation");

    assert!(matches!(b.set(1), Err(ReactiveError::WriteOutsideAction { .. })));

    let b3 = b.clone();
    shared.action("set-b", move || b3.set(1).unwrap());
    assert_eq!(fire_count.get(), 2);
}

#[test]
fn when_disposes_its_reaction_before_effect_returns() {
    let shared = fresh();
    let visible = ObservableValue::new(&shared, true, "visible");
    let disposed_before_effect = Rc::new(Cell::new(false));

    let v = visible.clone();
    let dbe = disposed_before_effect.clone();
    let v_for_check = visible.clone();
    let _disposer = when(
        &shared,
        move || !v.get(),
        move || {
            // If the underlying reaction were still subscribed, a second
            // flip of `visible` inside this effect would re-trigger it.
            v_for_check.set(true).unwrap();
            dbe.set(true);
        },
        WhenOptions::default(),
    );

    let v2 = visible.clone();
    shared.action("hide", move || v2.set(false).unwrap());
    assert!(disposed_before_effect.get());
}

#[test]
fn diamond_dependency_converges_without_glitches() {
    //      a
    //     / \
    //    b   c
    //     \ /
    //      d
    let shared = fresh();
    let a = ObservableValue::new(&shared, 1, "a");

    let a1 = a.clone();
    let b = ComputedValue::new(&shared, "b", move || a1.get() + 10);
    let a2 = a.clone();
    let c = ComputedValue::new(&shared, "c", move || a2.get() * 10);

    let b2 = b.clone();
    let c2 = c.clone();
    let d = ComputedValue::new(&shared, "d", move || b2.get().unwrap() + c2.get().unwrap());

    assert_eq!(d.get().unwrap(), 21); // (1+10) + (1*10)

    let runs = Rc::new(Cell::new(0));
    let r = runs.clone();
    let d_for_autorun = d.clone();
    let _disposer = autorun(&shared, "watch-d", move || {
        d_for_autorun.get().unwrap();
        r.set(r.get() + 1);
    });
    assert_eq!(runs.get(), 1);

    a.set(2).unwrap();
    assert_eq!(d.get().unwrap(), 32); // (2+10) + (2*10)
    assert_eq!(runs.get(), 2, "d's autorun must run exactly once per batched write, not twice");
}

#[test]
fn equality_gate_suppresses_redundant_notifications() {
    let shared = fresh();
    let v = ObservableValue::new(&shared, 1, "v");
    let runs = Rc::new(Cell::new(0));
    let r = runs.clone();
    let v2 = v.clone();
    let _disposer = autorun(&shared, "watch-v", move || {
        v2.get();
        r.set(r.get() + 1);
    });
    assert_eq!(runs.get(), 1);

    v.set(1).unwrap();
    assert_eq!(runs.get(), 1, "setting an equal value must not notify");

    v.set(2).unwrap();
    assert_eq!(runs.get(), 2);
}
