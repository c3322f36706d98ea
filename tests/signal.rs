use reactive_core::{effect::Effect, prelude::*, signal::Signal};
use std::{cell::RefCell, rc::Rc};

#[test]
fn signal_reads_and_writes() {
    let count = Signal::new(0);
    assert_eq!(count.get(), 0);

    count.set(5);
    assert_eq!(count.get(), 5);

    count.update(|n| *n += 1);
    assert_eq!(count.get(), 6);

    assert_eq!(count.with(|n| n * 10), 60);
    assert_eq!(count.get_untracked(), 6);
}

#[test]
fn effect_observes_signal() {
    let a = Signal::new(1);
    let log = Rc::new(RefCell::new(Vec::new()));

    Effect::new({
        let log = Rc::clone(&log);
        move |_| log.borrow_mut().push(a.get())
    });
    assert_eq!(*log.borrow(), [1]);

    a.set(2);
    assert_eq!(*log.borrow(), [1, 2]);

    // writing the same value back is not a change
    a.set(2);
    assert_eq!(*log.borrow(), [1, 2]);
}

#[test]
fn update_notifies_unconditionally() {
    let a = Signal::new(0);
    let runs = Rc::new(RefCell::new(0));

    Effect::new({
        let runs = Rc::clone(&runs);
        move |_| {
            *runs.borrow_mut() += 1;
            a.get();
        }
    });
    assert_eq!(*runs.borrow(), 1);

    // update cannot compare, so it always notifies
    a.update(|n| *n = 0);
    assert_eq!(*runs.borrow(), 2);
}

#[test]
fn untracked_writes_are_silent() {
    let a = Signal::new(0);
    let runs = Rc::new(RefCell::new(0));

    Effect::new({
        let runs = Rc::clone(&runs);
        move |_| {
            *runs.borrow_mut() += 1;
            a.get();
        }
    });
    assert_eq!(*runs.borrow(), 1);

    a.set_untracked(10);
    assert_eq!(*runs.borrow(), 1);
    assert_eq!(a.get_untracked(), 10);

    // the next real change still propagates
    a.set(11);
    assert_eq!(*runs.borrow(), 2);
}

#[test]
fn untracked_reads_do_not_subscribe() {
    let tracked = Signal::new(0);
    let ignored = Signal::new(0);
    let runs = Rc::new(RefCell::new(0));

    Effect::new({
        let runs = Rc::clone(&runs);
        move |_| {
            *runs.borrow_mut() += 1;
            tracked.get();
            ignored.get_untracked();
        }
    });
    assert_eq!(*runs.borrow(), 1);

    ignored.set(1);
    assert_eq!(*runs.borrow(), 1);

    tracked.set(1);
    assert_eq!(*runs.borrow(), 2);
}

#[test]
fn disposed_signal_fails_fallible_accessors() {
    let a = Signal::new(7);
    assert_eq!(a.try_get(), Some(7));

    a.dispose();
    assert_eq!(a.try_get(), None);
    assert_eq!(a.try_with(|n| *n), None);
    // the value comes back to the caller instead of being dropped silently
    assert_eq!(a.try_set(8), Some(8));
}

#[test]
fn writes_to_disposed_signal_are_ignored_by_effects() {
    let a = Signal::new(0);
    let runs = Rc::new(RefCell::new(0));

    Effect::new({
        let runs = Rc::clone(&runs);
        move |_| {
            *runs.borrow_mut() += 1;
            a.try_get();
        }
    });
    assert_eq!(*runs.borrow(), 1);

    a.dispose();
    assert_eq!(a.try_set(1), Some(1));
    assert_eq!(*runs.borrow(), 1);
}
