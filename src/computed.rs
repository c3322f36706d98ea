//! Computed values: lazy, memoised derivations that are themselves reactive.

use crate::{
    graph::{create_dep_for_computed, untrack, Dep, DirtyLevel},
    macros::debug_warn,
    runtime::{with_runtime, AnyComputation, EffectId},
    scope,
    traits::{SignalDispose, SignalGet, SignalGetUntracked, SignalSet, SignalWith, SignalWithUntracked},
};
use cfg_if::cfg_if;
use std::{any::Any, cell::RefCell, fmt, marker::PhantomData, rc::Rc};

/// A reactive derived value.
///
/// A computed pairs a subject (other effects can subscribe to it) with an
/// internal effect (it subscribes to whatever its getter reads). Two
/// guarantees follow:
/// 1. The getter runs at most once per upstream change, no matter how many
///    times the value is read.
/// 2. Subscribers are re-run only when the computed value *actually* changes
///    under its comparator, not merely when an upstream write occurs.
///
/// The getter is lazy: it does not run at construction, only on first read.
/// An upstream write first propagates a cheap "may have changed" hint; the
/// getter re-runs when a consumer next asks, and if the result compares equal
/// to the cached value the hint is cancelled and downstream effects stay
/// asleep.
///
/// ```
/// use reactive_core::{computed::Computed, signal::Signal, traits::*};
///
/// let count = Signal::new(1);
/// let double = Computed::new(move |_| count.get() * 2);
///
/// assert_eq!(double.get(), 2);
/// count.set(3);
/// assert_eq!(double.get(), 6);
/// ```
pub struct Computed<T>
where
    T: 'static,
{
    effect: EffectId,
    dep: Dep,
    ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    defined_at: &'static std::panic::Location<'static>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Computed<T> {}

impl<T> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("ty", &std::any::type_name::<T>())
            .field("dep", &self.dep)
            .finish()
    }
}

impl<T> PartialEq for Computed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.dep == other.dep
    }
}

impl<T> Eq for Computed<T> {}

pub(crate) struct ComputedState<T> {
    f: Box<dyn Fn(Option<&T>) -> T>,
    compare: fn(Option<&T>, Option<&T>) -> bool,
    setter: Option<Box<dyn Fn(T)>>,
}

impl<T: 'static> AnyComputation for ComputedState<T> {
    fn run(&self, value: &Rc<RefCell<dyn Any>>) -> bool {
        let mut value = value.borrow_mut();
        let slot = value
            .downcast_mut::<Option<T>>()
            .expect("to downcast computed value");
        let new_value = (self.f)(slot.as_ref());
        let changed = !(self.compare)(Some(&new_value), slot.as_ref());
        *slot = Some(new_value);
        changed
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T> Computed<T>
where
    T: 'static,
{
    /// Creates a computed from a getter, comparing successive values with
    /// `PartialEq`. The getter receives the previously-cached value, `None`
    /// on the first evaluation.
    #[cfg_attr(
        debug_assertions,
        tracing::instrument(level = "trace", skip_all, fields(ty = %std::any::type_name::<T>()))
    )]
    #[track_caller]
    pub fn new(fun: impl Fn(Option<&T>) -> T + 'static) -> Self
    where
        T: PartialEq,
    {
        Self::new_with_compare(fun, |lhs, rhs| lhs == rhs)
    }

    /// Creates a computed with a custom "is unchanged" comparator.
    ///
    /// This is where callers opt into value semantics `PartialEq` does not
    /// give them, e.g. [`same_value_f64`](crate::watch::same_value_f64) to
    /// treat any two NaNs as equal.
    #[track_caller]
    pub fn new_with_compare(
        fun: impl Fn(Option<&T>) -> T + 'static,
        is_same: fn(Option<&T>, Option<&T>) -> bool,
    ) -> Self {
        Self::build(Box::new(fun), is_same, None)
    }

    /// Creates a writable computed: reads go through `get`, writes through
    /// `set` (which is expected to update the sources `get` reads from).
    #[track_caller]
    pub fn new_with_setter(
        get: impl Fn(Option<&T>) -> T + 'static,
        set: impl Fn(T) + 'static,
    ) -> Self
    where
        T: PartialEq,
    {
        Self::build(Box::new(get), |lhs, rhs| lhs == rhs, Some(Box::new(set)))
    }

    #[track_caller]
    fn build(
        f: Box<dyn Fn(Option<&T>) -> T>,
        compare: fn(Option<&T>, Option<&T>) -> bool,
        setter: Option<Box<dyn Fn(T)>>,
    ) -> Self {
        let value: Rc<RefCell<dyn Any>> = Rc::new(RefCell::new(None::<T>));
        let state = ComputedState { f, compare, setter };
        let (effect, dep) = with_runtime(|runtime| {
            let effect = runtime.create_effect_node(value, Rc::new(state));
            let dep = create_dep_for_computed(effect);
            _ = runtime.with_effect_node(effect, |node| {
                // a write burst upstream folds into a single tentative
                // notification to our own subscribers
                node.trigger = Some(Rc::new(move || {
                    with_runtime(|runtime| {
                        runtime.trigger_dep(dep.id(), DirtyLevel::MaybeDirty)
                    });
                }));
                // on drain, pass the baton downstream without recomputing
                node.scheduler = Some(Rc::new(move || {
                    with_runtime(|runtime| {
                        runtime.pause_scheduling();
                        runtime.schedule_effects(dep.id());
                        runtime.reset_scheduling();
                    });
                }));
                cfg_if! {
                    if #[cfg(feature = "ssr")] {
                        node.cacheable = false;
                    } else {
                        node.cacheable = true;
                    }
                }
            });
            (effect, dep)
        });
        scope::register_disposal(Box::new(move || {
            with_runtime(|runtime| {
                runtime.dispose_effect(effect);
                runtime.dispose_dep(dep.id());
            });
        }));
        Self {
            effect,
            dep,
            ty: PhantomData,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        }
    }

    pub(crate) fn traverse_key(&self) -> u64 {
        use slotmap::Key;
        self.effect.data().as_ffi()
    }
}

impl<T> SignalWith for Computed<T>
where
    T: 'static,
{
    type Value = T;

    #[track_caller]
    fn with<O>(&self, f: impl FnOnce(&T) -> O) -> O {
        match self.try_with(f) {
            Some(value) => value,
            None => panic_getting_dead_computed(
                #[cfg(debug_assertions)]
                self.defined_at,
            ),
        }
    }

    #[track_caller]
    fn try_with<O>(&self, f: impl FnOnce(&T) -> O) -> Option<O> {
        with_runtime(|runtime| {
            runtime.refresh_computed(self.dep.id(), self.effect);
            runtime.track(self.dep.id());
            // a consumer may be reading in the middle of a partially
            // propagated wave; hand the hint on so the value it keeps is
            // re-examined downstream
            let level = runtime
                .with_effect_node(self.effect, |node| node.dirty_level)
                .unwrap_or(DirtyLevel::NotDirty);
            if level >= DirtyLevel::MaybeDirty {
                runtime.trigger_dep(self.dep.id(), DirtyLevel::MaybeDirty);
            }
            runtime
                .with_effect_value::<T, _>(self.effect, |value| {
                    value.as_ref().map(f)
                })
                .flatten()
        })
    }
}

impl<T> SignalWithUntracked for Computed<T>
where
    T: 'static,
{
    type Value = T;

    #[track_caller]
    fn with_untracked<O>(&self, f: impl FnOnce(&T) -> O) -> O {
        untrack(|| self.with(f))
    }

    #[track_caller]
    fn try_with_untracked<O>(&self, f: impl FnOnce(&T) -> O) -> Option<O> {
        untrack(|| self.try_with(f))
    }
}

impl<T> SignalGet for Computed<T>
where
    T: Clone + 'static,
{
    type Value = T;

    #[track_caller]
    fn get(&self) -> T {
        self.with(T::clone)
    }

    #[track_caller]
    fn try_get(&self) -> Option<T> {
        self.try_with(T::clone)
    }
}

impl<T> SignalGetUntracked for Computed<T>
where
    T: Clone + 'static,
{
    type Value = T;

    #[track_caller]
    fn get_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }

    #[track_caller]
    fn try_get_untracked(&self) -> Option<T> {
        self.try_with_untracked(T::clone)
    }
}

impl<T> SignalSet for Computed<T>
where
    T: 'static,
{
    type Value = T;

    /// Routes the write through the setter given to
    /// [`Computed::new_with_setter`]. Warns and drops the value if the
    /// computed is read-only.
    #[track_caller]
    fn set(&self, new_value: T) {
        _ = self.try_set(new_value);
    }

    #[track_caller]
    fn try_set(&self, new_value: T) -> Option<T> {
        let fun = with_runtime(|runtime| {
            runtime.with_effect_node(self.effect, |node| Rc::clone(&node.fun))
        });
        let Some(fun) = fun else {
            return Some(new_value);
        };
        let state = fun
            .as_any()
            .downcast_ref::<ComputedState<T>>()
            .expect("to downcast computed state");
        match &state.setter {
            Some(setter) => {
                setter(new_value);
                None
            }
            None => {
                debug_warn!("tried to set a computed that has no setter");
                Some(new_value)
            }
        }
    }
}

impl<T> SignalDispose for Computed<T> {
    fn dispose(self) {
        with_runtime(|runtime| {
            runtime.dispose_effect(self.effect);
            runtime.dispose_dep(self.dep.id());
        });
    }
}

#[cold]
#[inline(never)]
#[track_caller]
fn panic_getting_dead_computed(
    #[cfg(debug_assertions)] defined_at: &'static std::panic::Location<'static>,
) -> ! {
    #[cfg(debug_assertions)]
    panic!(
        "Attempted to read a computed value after it was disposed.\ncomputed \
         created here: {defined_at}\naccess happened here: {}",
        std::panic::Location::caller()
    );
    #[cfg(not(debug_assertions))]
    panic!("Attempted to read a computed value after it was disposed.");
}
