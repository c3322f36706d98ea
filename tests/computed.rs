use reactive_core::{
    computed::Computed,
    effect::Effect,
    prelude::*,
    signal::Signal,
    watch::same_value_f64,
};
use std::{cell::RefCell, rc::Rc};

#[test]
fn computed_calculates_value() {
    let a = Signal::new(1);
    let b = Signal::new(2);
    let c = Signal::new(3);

    let d = Computed::new(move |_| a.get() + b.get() + c.get());
    assert_eq!(d.get(), 6);
}

#[test]
fn computed_is_lazy() {
    let calculations = Rc::new(RefCell::new(0));
    let a = Signal::new(1);

    let doubled = Computed::new({
        let calculations = Rc::clone(&calculations);
        move |_| {
            *calculations.borrow_mut() += 1;
            a.get() * 2
        }
    });

    // nothing runs until somebody asks
    assert_eq!(*calculations.borrow(), 0);
    assert_eq!(doubled.get(), 2);
    assert_eq!(*calculations.borrow(), 1);

    // and a write alone does not recompute either
    a.set(2);
    assert_eq!(*calculations.borrow(), 1);
    assert_eq!(doubled.get(), 4);
    assert_eq!(*calculations.borrow(), 2);
}

#[test]
fn computed_does_not_repeat_calculation_per_get() {
    let calculations = Rc::new(RefCell::new(0));
    let a = Signal::new(1);
    let b = Signal::new(2);
    let c = Signal::new(3);

    let d = Computed::new({
        let calculations = Rc::clone(&calculations);
        move |_| {
            *calculations.borrow_mut() += 1;
            a.get() + b.get() + c.get()
        }
    });
    assert_eq!(d.get(), 6);
    assert_eq!(d.get(), 6);
    assert_eq!(d.get(), 6);
    assert_eq!(*calculations.borrow(), 1);

    println!("\n\n**setting to 0**");
    a.set(0);
    assert_eq!(d.get(), 5);
    assert_eq!(*calculations.borrow(), 2);
}

#[test]
fn nested_computeds() {
    let a = Signal::new(0);
    let b = Signal::new(0);
    let c = Computed::new(move |_| {
        println!("calculating C");
        a.get() + b.get()
    });
    let d = Computed::new(move |_| {
        println!("calculating D");
        c.get() * 2
    });
    let e = Computed::new(move |_| {
        println!("calculating E");
        d.get() + 1
    });
    assert_eq!(e.get(), 1);
    assert_eq!(d.get(), 0);
    assert_eq!(c.get(), 0);

    println!("\n\nFirst Set\n\n");
    a.set(5);
    assert_eq!(c.get(), 5);
    assert_eq!(d.get(), 10);
    assert_eq!(e.get(), 11);

    println!("\n\nSecond Set\n\n");
    b.set(1);
    assert_eq!(e.get(), 13);
    assert_eq!(d.get(), 12);
    assert_eq!(c.get(), 6);
}

#[test]
fn chained_computeds_run_once_per_write() {
    let a = Signal::new(0);
    let b_runs = Rc::new(RefCell::new(0));
    let c_runs = Rc::new(RefCell::new(0));
    let log = Rc::new(RefCell::new(Vec::new()));

    let b = Computed::new({
        let b_runs = Rc::clone(&b_runs);
        move |_| {
            *b_runs.borrow_mut() += 1;
            a.get() * 2
        }
    });
    let c = Computed::new({
        let c_runs = Rc::clone(&c_runs);
        move |_| {
            *c_runs.borrow_mut() += 1;
            b.get() + 1
        }
    });
    Effect::new({
        let log = Rc::clone(&log);
        move |_| log.borrow_mut().push(c.get())
    });

    assert_eq!(*log.borrow(), [1]);
    assert_eq!(*b_runs.borrow(), 1);
    assert_eq!(*c_runs.borrow(), 1);

    a.set(10);
    // the effect observes only the settled value, exactly once
    assert_eq!(*log.borrow(), [1, 21]);
    assert_eq!(*b_runs.borrow(), 2);
    assert_eq!(*c_runs.borrow(), 2);
}

#[test]
fn unchanged_computed_stops_the_wave() {
    let a = Signal::new(1);
    let log = Rc::new(RefCell::new(Vec::new()));

    let parity = Computed::new(move |_| a.get() % 2);
    Effect::new({
        let log = Rc::clone(&log);
        move |_| log.borrow_mut().push(parity.get())
    });
    assert_eq!(*log.borrow(), [1]);

    // 3 is still odd: the computed re-runs, sees no change, and the
    // effect stays asleep
    a.set(3);
    assert_eq!(*log.borrow(), [1]);

    a.set(4);
    assert_eq!(*log.borrow(), [1, 0]);
}

#[test]
fn diamond_reruns_effect_once() {
    let a = Signal::new(1);
    let left = Computed::new(move |_| a.get() + 1);
    let right = Computed::new(move |_| a.get() * 10);
    let runs = Rc::new(RefCell::new(0));
    let seen = Rc::new(RefCell::new(Vec::new()));

    Effect::new({
        let runs = Rc::clone(&runs);
        let seen = Rc::clone(&seen);
        move |_| {
            *runs.borrow_mut() += 1;
            seen.borrow_mut().push((left.get(), right.get()));
        }
    });
    assert_eq!(*runs.borrow(), 1);
    assert_eq!(*seen.borrow(), [(2, 10)]);

    a.set(2);
    // both arms changed, but the effect ran once, with consistent values
    assert_eq!(*runs.borrow(), 2);
    assert_eq!(*seen.borrow(), [(2, 10), (3, 20)]);
}

#[test]
fn computed_receives_previous_value() {
    let a = Signal::new(1);
    let history = Rc::new(RefCell::new(Vec::new()));

    let c = Computed::new({
        let history = Rc::clone(&history);
        move |prev: Option<&i32>| {
            history.borrow_mut().push(prev.copied());
            a.get()
        }
    });

    c.get();
    a.set(2);
    c.get();
    assert_eq!(*history.borrow(), [None, Some(1)]);
}

#[test]
fn custom_compare_treats_nan_as_unchanged() {
    let a = Signal::new(f64::NAN);
    let runs = Rc::new(RefCell::new(0));

    let c = Computed::new_with_compare(move |_| a.get(), same_value_f64);
    Effect::new({
        let runs = Rc::clone(&runs);
        move |_| {
            *runs.borrow_mut() += 1;
            c.get();
        }
    });
    assert_eq!(*runs.borrow(), 1);

    // NaN != NaN under PartialEq, but the comparator says nothing changed
    a.update(|v| *v = f64::NAN);
    assert_eq!(*runs.borrow(), 1);

    a.update(|v| *v = 1.0);
    assert_eq!(*runs.borrow(), 2);
}

#[test]
fn writable_computed_routes_through_setter() {
    let celsius = Signal::new(0.0_f64);
    let fahrenheit = Computed::new_with_setter(
        move |_| celsius.get() * 9.0 / 5.0 + 32.0,
        move |f| celsius.set((f - 32.0) * 5.0 / 9.0),
    );

    assert_eq!(fahrenheit.get(), 32.0);

    fahrenheit.set(212.0);
    assert_eq!(celsius.get_untracked(), 100.0);
    assert_eq!(fahrenheit.get(), 212.0);
}

#[test]
fn untracked_reads_do_not_subscribe() {
    let a = Signal::new(0);
    let c = Computed::new(move |_| a.get());
    let runs = Rc::new(RefCell::new(0));

    Effect::new({
        let runs = Rc::clone(&runs);
        move |_| {
            *runs.borrow_mut() += 1;
            c.get_untracked();
        }
    });
    assert_eq!(*runs.borrow(), 1);

    a.set(1);
    assert_eq!(*runs.borrow(), 1);
    // the peek still sees a fresh value
    assert_eq!(c.get_untracked(), 1);
}

#[test]
fn disposed_computed_fails_fallible_accessors() {
    let a = Signal::new(1);
    let c = Computed::new(move |_| a.get());
    assert_eq!(c.try_get(), Some(1));

    c.dispose();
    assert_eq!(c.try_get(), None);
    assert_eq!(c.try_with(|v| *v), None);
}
