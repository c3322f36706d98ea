//! Signals: writable cells that notify the engine when they change.
//!
//! A signal is an ordinary reactive source: it stores its value itself and
//! talks to the engine only through [`create_dep_with_cleanup`],
//! [`track`](crate::graph::track), and [`trigger`](crate::graph::trigger).
//! The dependency is created lazily on the first tracked read and dropped
//! again (through its cleanup hook) when the last subscriber walks away.

use crate::{
    graph::{self, create_dep_with_cleanup, Dep, DirtyLevel},
    runtime::with_runtime,
    scope,
    traits::{
        SignalDispose, SignalGet, SignalGetUntracked, SignalSet, SignalUpdate,
        SignalWith, SignalWithUntracked,
    },
};
use slotmap::{Key, SlotMap};
use std::{any::Any, cell::{Cell, RefCell}, fmt, marker::PhantomData, rc::Rc};

slotmap::new_key_type! {
    struct SignalId;
}

struct StoredSignal {
    value: Rc<RefCell<dyn Any>>,
    dep: Cell<Option<Dep>>,
}

thread_local! {
    static SIGNALS: RefCell<SlotMap<SignalId, StoredSignal>> = Default::default();
}

fn signal_value(id: SignalId) -> Option<Rc<RefCell<dyn Any>>> {
    SIGNALS.with(|signals| {
        signals.borrow().get(id).map(|stored| Rc::clone(&stored.value))
    })
}

/// Returns the signal's dependency, creating it on first use.
///
/// The cleanup hook forgets the dependency once nobody subscribes to it any
/// more; a later tracked read simply creates a fresh one.
fn ensure_dep(id: SignalId) -> Option<Dep> {
    SIGNALS.with(|signals| {
        let signals = signals.borrow();
        let stored = signals.get(id)?;
        if let Some(dep) = stored.dep.get() {
            return Some(dep);
        }
        let dep = create_dep_with_cleanup(move || {
            SIGNALS.with(|signals| {
                if let Some(stored) = signals.borrow().get(id) {
                    if let Some(dep) = stored.dep.take() {
                        dep.dispose();
                    }
                }
            });
        });
        stored.dep.set(Some(dep));
        Some(dep)
    })
}

fn existing_dep(id: SignalId) -> Option<Dep> {
    SIGNALS.with(|signals| signals.borrow().get(id).and_then(|stored| stored.dep.get()))
}

/// A reactive read-write cell.
///
/// Reading inside an effect, computed, or watcher subscribes it to this
/// signal; writing a value that compares unequal re-schedules the
/// subscribers. The handle is `Copy`; the value lives until
/// [`dispose`](SignalDispose::dispose) or the owning
/// [`EffectScope`](crate::scope::EffectScope) is stopped.
///
/// ```
/// use reactive_core::{signal::Signal, traits::*};
///
/// let count = Signal::new(0);
/// assert_eq!(count.get(), 0);
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// count.update(|n| *n += 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Signal<T>
where
    T: 'static,
{
    id: SignalId,
    ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    defined_at: &'static std::panic::Location<'static>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Signal<T> {}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("ty", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> PartialEq for Signal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Signal<T> {}

impl<T> std::hash::Hash for Signal<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> Signal<T>
where
    T: 'static,
{
    #[cfg_attr(
        debug_assertions,
        tracing::instrument(level = "trace", skip_all, fields(ty = %std::any::type_name::<T>()))
    )]
    #[track_caller]
    pub fn new(value: T) -> Self {
        let id = SIGNALS.with(|signals| {
            signals.borrow_mut().insert(StoredSignal {
                value: Rc::new(RefCell::new(value)),
                dep: Cell::new(None),
            })
        });
        scope::register_disposal(Box::new(move || dispose_signal(id)));
        Self {
            id,
            ty: PhantomData,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        }
    }

    pub(crate) fn traverse_key(&self) -> u64 {
        self.id.data().as_ffi()
    }

    /// Writes without notifying any subscriber.
    pub fn set_untracked(&self, new_value: T) {
        self.update_untracked(|value| *value = new_value);
    }

    /// Applies `fun` to the value without notifying any subscriber.
    pub fn update_untracked(&self, fun: impl FnOnce(&mut T)) {
        if let Some(value) = signal_value(self.id) {
            let mut value = value.borrow_mut();
            if let Some(value) = value.downcast_mut::<T>() {
                fun(value);
            }
        }
    }
}

fn dispose_signal(id: SignalId) {
    let stored = SIGNALS.with(|signals| signals.borrow_mut().remove(id));
    if let Some(stored) = stored {
        if let Some(dep) = stored.dep.get() {
            dep.dispose();
        }
    }
}

impl<T> SignalWithUntracked for Signal<T>
where
    T: 'static,
{
    type Value = T;

    #[track_caller]
    fn with_untracked<O>(&self, f: impl FnOnce(&T) -> O) -> O {
        match self.try_with_untracked(f) {
            Some(value) => value,
            None => panic_getting_dead_signal(
                #[cfg(debug_assertions)]
                self.defined_at,
            ),
        }
    }

    fn try_with_untracked<O>(&self, f: impl FnOnce(&T) -> O) -> Option<O> {
        let value = signal_value(self.id)?;
        let value = value.borrow();
        value.downcast_ref::<T>().map(f)
    }
}

impl<T> SignalWith for Signal<T>
where
    T: 'static,
{
    type Value = T;

    #[track_caller]
    fn with<O>(&self, f: impl FnOnce(&T) -> O) -> O {
        self.track();
        self.with_untracked(f)
    }

    #[track_caller]
    fn try_with<O>(&self, f: impl FnOnce(&T) -> O) -> Option<O> {
        self.track();
        self.try_with_untracked(f)
    }
}

impl<T> Signal<T>
where
    T: 'static,
{
    /// Subscribes the currently-active effect to this signal without reading
    /// the value.
    pub fn track(&self) {
        // only materialize the dependency when someone is listening
        if with_runtime(|runtime| runtime.is_tracking()) {
            if let Some(dep) = ensure_dep(self.id) {
                graph::track(dep);
            }
        }
    }

    /// Notifies subscribers as if the value had changed.
    pub fn notify(&self) {
        if let Some(dep) = existing_dep(self.id) {
            graph::trigger(dep, DirtyLevel::Dirty);
        }
    }
}

impl<T> SignalGet for Signal<T>
where
    T: Clone + 'static,
{
    type Value = T;

    #[track_caller]
    fn get(&self) -> T {
        self.with(T::clone)
    }

    fn try_get(&self) -> Option<T> {
        self.try_with(T::clone)
    }
}

impl<T> SignalGetUntracked for Signal<T>
where
    T: Clone + 'static,
{
    type Value = T;

    #[track_caller]
    fn get_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }

    fn try_get_untracked(&self) -> Option<T> {
        self.try_with_untracked(T::clone)
    }
}

impl<T> SignalUpdate for Signal<T>
where
    T: 'static,
{
    type Value = T;

    /// Applies `fun` and notifies subscribers unconditionally.
    fn update(&self, fun: impl FnOnce(&mut T)) {
        _ = self.try_update(fun);
    }

    fn try_update<O>(&self, fun: impl FnOnce(&mut T) -> O) -> Option<O> {
        let value = signal_value(self.id)?;
        let result = {
            let mut value = value.borrow_mut();
            fun(value.downcast_mut::<T>()?)
        };
        self.notify();
        Some(result)
    }
}

impl<T> SignalSet for Signal<T>
where
    T: PartialEq + 'static,
{
    type Value = T;

    /// Writes `new_value`, notifying subscribers only if it compares unequal
    /// to the current value.
    #[track_caller]
    fn set(&self, new_value: T) {
        _ = self.try_set(new_value);
    }

    fn try_set(&self, new_value: T) -> Option<T> {
        let Some(value) = signal_value(self.id) else {
            return Some(new_value);
        };
        let changed = {
            let mut value = value.borrow_mut();
            match value.downcast_mut::<T>() {
                Some(value) => {
                    let changed = *value != new_value;
                    if changed {
                        *value = new_value;
                    }
                    changed
                }
                None => return Some(new_value),
            }
        };
        if changed {
            self.notify();
        }
        None
    }
}

impl<T> SignalDispose for Signal<T> {
    fn dispose(self) {
        dispose_signal(self.id);
    }
}

#[cold]
#[inline(never)]
#[track_caller]
fn panic_getting_dead_signal(
    #[cfg(debug_assertions)] defined_at: &'static std::panic::Location<'static>,
) -> ! {
    #[cfg(debug_assertions)]
    panic!(
        "Attempted to read a signal after it was disposed.\nsignal created \
         here: {defined_at}\naccess happened here: {}",
        std::panic::Location::caller()
    );
    #[cfg(not(debug_assertions))]
    panic!("Attempted to read a signal after it was disposed.");
}
