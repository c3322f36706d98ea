#![cfg(feature = "serde")]

use reactive_core::{computed::Computed, prelude::*, signal::Signal};

#[test]
fn signal_serializes_by_value() {
    let a = Signal::new(vec![1, 2, 3]);
    assert_eq!(serde_json::to_string(&a).unwrap(), "[1,2,3]");

    a.update(|v| v.push(4));
    assert_eq!(serde_json::to_string(&a).unwrap(), "[1,2,3,4]");
}

#[test]
fn signal_round_trips() {
    let a: Signal<Vec<i32>> = serde_json::from_str("[5,6]").unwrap();
    assert_eq!(a.get(), vec![5, 6]);
}

#[test]
fn computed_serializes_its_current_value() {
    let a = Signal::new(2);
    let squared = Computed::new(move |_| a.get() * a.get());
    assert_eq!(serde_json::to_string(&squared).unwrap(), "4");

    a.set(3);
    assert_eq!(serde_json::to_string(&squared).unwrap(), "9");
}

#[test]
fn disposed_values_refuse_to_serialize() {
    let a = Signal::new(1);
    a.dispose();
    assert!(serde_json::to_string(&a).is_err());
}
