//! Effects: computations re-run automatically when the reactive values they
//! read change.

use crate::{
    runtime::{with_runtime, AnyComputation, EffectId},
    scope,
    traits::SignalDispose,
};
use std::{any::Any, cell::RefCell, fmt, marker::PhantomData, rc::Rc};

/// A computation that re-runs whenever its dependencies change.
///
/// The function receives the value it returned on its previous run (`None` the
/// first time), and the returned value is stored for the next run. Reads of
/// reactive values inside the function register dependencies automatically;
/// dependencies are recollected on every run, so a branch that stops reading a
/// value also stops listening to it.
///
/// By default the effect runs once on creation and then again, synchronously,
/// whenever one of its dependencies settles on a real change. Effects created
/// inside an [`EffectScope`](crate::scope::EffectScope) are stopped with the
/// scope.
///
/// ```
/// use reactive_core::{effect::Effect, signal::Signal, traits::*};
/// use std::{cell::RefCell, rc::Rc};
///
/// let name = Signal::new("Alice".to_string());
/// let seen = Rc::new(RefCell::new(Vec::new()));
///
/// Effect::new({
///     let seen = Rc::clone(&seen);
///     move |_| seen.borrow_mut().push(name.get())
/// });
///
/// name.set("Bob".to_string());
/// assert_eq!(*seen.borrow(), ["Alice", "Bob"]);
/// ```
pub struct Effect<T = ()>
where
    T: 'static,
{
    pub(crate) id: EffectId,
    ty: PhantomData<T>,
}

impl<T> Clone for Effect<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Effect<T> {}

impl<T> fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect").field("id", &self.id).finish()
    }
}

impl<T> PartialEq for Effect<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Effect<T> {}

/// Configuration for [`Effect::new_with_options`].
pub struct EffectOptions {
    /// Skip the initial run; the effect collects no dependencies until
    /// [`Effect::run`] is called.
    pub lazy: bool,
    /// Allow the effect to schedule itself when one of its own writes
    /// triggers it mid-run.
    pub allow_recurse: bool,
    /// Replaces the built-in scheduler (which re-runs the effect if it is
    /// still dirty once its turn comes).
    pub scheduler: Option<Rc<dyn Fn()>>,
    /// Invoked once when the effect is stopped.
    pub on_stop: Option<Box<dyn FnOnce()>>,
}

impl Default for EffectOptions {
    fn default() -> Self {
        Self {
            lazy: false,
            allow_recurse: false,
            scheduler: None,
            on_stop: None,
        }
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("lazy", &self.lazy)
            .field("allow_recurse", &self.allow_recurse)
            .finish_non_exhaustive()
    }
}

/// Runs the user function against the effect's typed value slot.
pub(crate) struct EffectState<T, F>
where
    T: 'static,
    F: Fn(Option<T>) -> T,
{
    pub f: F,
    pub ty: PhantomData<T>,
}

impl<T, F> AnyComputation for EffectState<T, F>
where
    T: 'static,
    F: Fn(Option<T>) -> T + 'static,
{
    fn run(&self, value: &Rc<RefCell<dyn Any>>) -> bool {
        let prev = {
            let mut value = value.borrow_mut();
            value
                .downcast_mut::<Option<T>>()
                .expect("to downcast effect value")
                .take()
        };
        // the slot is released while the user function runs, so the effect
        // may legitimately re-enter itself
        let new = (self.f)(prev);
        let mut value = value.borrow_mut();
        *value
            .downcast_mut::<Option<T>>()
            .expect("to downcast effect value") = Some(new);
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T> Effect<T>
where
    T: 'static,
{
    /// Creates an effect and runs it once immediately.
    #[cfg_attr(
        debug_assertions,
        tracing::instrument(level = "trace", skip_all, fields(ty = %std::any::type_name::<T>()))
    )]
    #[track_caller]
    pub fn new(fun: impl Fn(Option<T>) -> T + 'static) -> Self {
        Self::new_with_options(fun, EffectOptions::default())
    }

    /// Creates an effect with explicit [`EffectOptions`].
    #[track_caller]
    pub fn new_with_options(
        fun: impl Fn(Option<T>) -> T + 'static,
        options: EffectOptions,
    ) -> Self {
        let value: Rc<RefCell<dyn Any>> = Rc::new(RefCell::new(None::<T>));
        let state = EffectState {
            f: fun,
            ty: PhantomData,
        };
        let id = with_runtime(|runtime| {
            runtime.create_effect_node(value, Rc::new(state))
        });
        let scheduler = options.scheduler.unwrap_or_else(|| {
            Rc::new(move || {
                with_runtime(|runtime| {
                    let active = runtime
                        .with_effect_node(id, |node| node.active)
                        .unwrap_or(false);
                    // a queued entry for a stopped or clean effect is a no-op
                    if active && runtime.effect_dirty(id) {
                        runtime.run_effect(id);
                    }
                });
            })
        });
        _ = with_runtime(|runtime| {
            runtime.with_effect_node(id, |node| {
                node.scheduler = Some(scheduler);
                node.allow_recurse = options.allow_recurse;
                node.on_stop = options.on_stop;
            })
        });
        scope::register_disposal(Box::new(move || {
            with_runtime(|runtime| runtime.dispose_effect(id));
        }));
        let this = Self {
            id,
            ty: PhantomData,
        };
        if !options.lazy {
            this.run();
        }
        this
    }

    /// Re-runs the effect's function, recollecting its dependencies.
    ///
    /// On a stopped effect this still invokes the function, but registers
    /// nothing.
    pub fn run(&self) {
        with_runtime(|runtime| {
            runtime.run_effect(self.id);
        });
    }

    /// Detaches the effect from every dependency and deactivates it. No
    /// subsequent write to a previously-tracked value reaches it. Idempotent.
    pub fn stop(&self) {
        with_runtime(|runtime| runtime.stop_effect(self.id));
    }

    /// Whether the effect has not been stopped or disposed.
    pub fn is_active(&self) -> bool {
        with_runtime(|runtime| {
            runtime
                .with_effect_node(self.id, |node| node.active)
                .unwrap_or(false)
        })
    }

    /// Applies a closure to the value produced by the last run, if any.
    pub fn with_value_mut<U>(&self, fun: impl FnOnce(&mut T) -> U) -> Option<U> {
        with_runtime(|runtime| {
            runtime
                .with_effect_value_mut::<T, _>(self.id, |value| {
                    value.as_mut().map(fun)
                })
                .flatten()
        })
    }
}

impl<T> SignalDispose for Effect<T> {
    fn dispose(self) {
        with_runtime(|runtime| runtime.dispose_effect(self.id));
    }
}

/// Stops an effect runner. Equivalent to [`Effect::stop`].
pub fn stop<T>(effect: &Effect<T>) {
    effect.stop();
}
