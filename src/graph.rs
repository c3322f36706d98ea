//! The surface a reactive source talks to: dependency handles, the
//! track/trigger primitives, and the tracking and scheduling brackets.
//!
//! A source owns one [`Dep`] per observable event (typically one property of
//! one object), calls [`track`] when that event is read and [`trigger`] when
//! it is written. Everything else — which effect is listening, when it re-runs
//! — is the engine's business.

use crate::runtime::{with_runtime, DepId, EffectId};
use std::rc::Rc;

pub use crate::runtime::DirtyLevel;

/// A dependency: the set of effects subscribed to one observable event.
///
/// This is a plain copyable handle; the node it names lives in the runtime
/// until [`Dep::dispose`] is called. Operations on a disposed handle are
/// no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dep {
    pub(crate) id: DepId,
}

impl Dep {
    pub(crate) fn id(&self) -> DepId {
        self.id
    }

    /// Removes the dependency from the runtime. Subscribers that still hold
    /// links to it are unaffected; the links just go dead.
    pub fn dispose(self) {
        with_runtime(|runtime| runtime.dispose_dep(self.id));
    }
}

/// Creates a dependency with no cleanup hook.
pub fn create_dep() -> Dep {
    with_runtime(|runtime| Dep {
        id: runtime.create_dep_node(None, None),
    })
}

/// Creates a dependency whose `cleanup` hook runs the first time its
/// subscriber set empties out. Sources use this to forget a dependency nobody
/// is listening to; the handle itself stays valid and may pick up new
/// subscribers afterwards.
pub fn create_dep_with_cleanup(cleanup: impl Fn() + 'static) -> Dep {
    with_runtime(|runtime| Dep {
        id: runtime.create_dep_node(Some(Rc::new(cleanup)), None),
    })
}

pub(crate) fn create_dep_for_computed(computed: EffectId) -> Dep {
    with_runtime(|runtime| Dep {
        id: runtime.create_dep_node(None, Some(computed)),
    })
}

/// Registers `dep` as a dependency of the currently-active effect.
///
/// No-op when no effect is active or tracking is paused.
pub fn track(dep: Dep) {
    with_runtime(|runtime| runtime.track(dep.id));
}

/// Announces to every subscriber of `dep` that the underlying value has
/// changed (`DirtyLevel::Dirty`) or may have changed (`DirtyLevel::MaybeDirty`).
///
/// Subscribers' schedulers are queued and, unless a scheduling pause is open,
/// drained in insertion order before this returns.
pub fn trigger(dep: Dep, level: DirtyLevel) {
    with_runtime(|runtime| runtime.trigger_dep(dep.id, level));
}

/// Stops dependency registration until the matching [`reset_tracking`].
///
/// Pairs strictly: every `pause_tracking` must be matched by exactly one
/// `reset_tracking`. Prefer [`untrack`] where a closure fits.
pub fn pause_tracking() {
    with_runtime(|runtime| runtime.pause_tracking());
}

/// Re-enables dependency registration until the matching [`reset_tracking`],
/// inside an outer paused region.
pub fn enable_tracking() {
    with_runtime(|runtime| runtime.enable_tracking());
}

/// Restores the tracking state saved by the most recent [`pause_tracking`] or
/// [`enable_tracking`].
pub fn reset_tracking() {
    with_runtime(|runtime| runtime.reset_tracking());
}

/// Opens a scheduling pause: triggers keep marking subscribers, but queued
/// schedulers are not dispatched until the matching [`reset_scheduling`]
/// closes the outermost pause.
pub fn pause_scheduling() {
    with_runtime(|runtime| runtime.pause_scheduling());
}

/// Closes a scheduling pause, draining the queue if this was the outermost
/// one.
pub fn reset_scheduling() {
    with_runtime(|runtime| runtime.reset_scheduling());
}

struct ResetTrackingOnDrop;

impl Drop for ResetTrackingOnDrop {
    fn drop(&mut self) {
        reset_tracking();
    }
}

/// Runs `fun` without registering any dependencies.
///
/// ```
/// use reactive_core::{computed::Computed, graph::untrack, signal::Signal, traits::*};
///
/// let a = Signal::new(0);
/// let b = Signal::new(0);
/// let c = Computed::new(move |_| a.get() + untrack(move || b.get()));
///
/// assert_eq!(c.get(), 0);
/// a.set(1);
/// assert_eq!(c.get(), 1);
/// b.set(10);
/// // unchanged: `b` was read untracked
/// assert_eq!(c.get(), 1);
/// a.set(2);
/// assert_eq!(c.get(), 12);
/// ```
pub fn untrack<T>(fun: impl FnOnce() -> T) -> T {
    pause_tracking();
    let _guard = ResetTrackingOnDrop;
    fun()
}

struct ResetSchedulingOnDrop;

impl Drop for ResetSchedulingOnDrop {
    fn drop(&mut self) {
        reset_scheduling();
    }
}

/// Runs `fun` with scheduling paused, so that a burst of writes dispatches
/// each affected effect at most once, after the closure returns.
///
/// ```
/// use reactive_core::{batch, effect::Effect, signal::Signal, traits::*};
/// use std::{cell::RefCell, rc::Rc};
///
/// let a = Signal::new(1);
/// let b = Signal::new(2);
/// let runs = Rc::new(RefCell::new(0));
/// Effect::new({
///     let runs = Rc::clone(&runs);
///     move |_| {
///         *runs.borrow_mut() += 1;
///         a.get() + b.get();
///     }
/// });
/// batch(|| {
///     a.set(10);
///     b.set(20);
/// });
/// // one initial run, one for the whole batch
/// assert_eq!(*runs.borrow(), 2);
/// ```
pub fn batch<T>(fun: impl FnOnce() -> T) -> T {
    pause_scheduling();
    let _guard = ResetSchedulingOnDrop;
    fun()
}
