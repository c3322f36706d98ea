//! Watchers: value-change callbacks with old/new comparison.
//!
//! A watcher is an effect whose scheduler, instead of re-running blindly,
//! evaluates the watched source, compares the result against the previous
//! one, and invokes a user callback only on a real change. Where that job
//! runs is governed by [`FlushMode`]: immediately within the triggering write
//! (`Sync`), or parked on the host's pre/post queues
//! (see [`queue`](crate::queue)).

use crate::{
    computed::Computed,
    effect::EffectState,
    macros::debug_warn,
    queue::{queue_post_job, queue_pre_job},
    runtime::{with_runtime, EffectId},
    scope,
    signal::Signal,
    traits::SignalGet,
    traverse::{traverse, Traverse},
};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt,
    marker::PhantomData,
    rc::Rc,
};

/// Where a watcher's job runs relative to the write that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Parked on the host's pre-flush queue; runs at [`flush_pre_jobs`](crate::queue::flush_pre_jobs).
    #[default]
    Pre,
    /// Parked on the host's post-flush queue; runs at [`flush_post_jobs`](crate::queue::flush_post_jobs).
    Post,
    /// Runs synchronously, inside the write that triggered it.
    Sync,
}

/// How far a watcher traverses into its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Deep {
    /// Only replacement of the watched value itself is observed.
    #[default]
    False,
    /// Every nested reactive value is observed.
    True,
    /// Nested reactive values are observed down to this many levels.
    Depth(usize),
}

/// Options for [`watch`] and [`watch_many`].
#[derive(Debug, Default)]
pub struct WatchOptions {
    /// Invoke the callback right away with the initial value (and no old
    /// value), instead of waiting for the first change.
    pub immediate: bool,
    /// Deep traversal; only honoured for sources built with
    /// [`WatchSource::deep`] / [`WatchSource::deep_with`].
    pub deep: Deep,
    /// Stop the watcher after the first callback invocation.
    pub once: bool,
    pub flush: FlushMode,
}

/// What a watcher observes.
///
/// The variants cover the supported source shapes; [`From`] impls exist for
/// the handle types, so `watch(signal, …)` and `watch(computed, …)` work
/// directly.
pub enum WatchSource<T>
where
    T: 'static,
{
    /// An arbitrary getter; whatever it reads is tracked.
    Getter(Rc<dyn Fn() -> T>),
    Signal(Signal<T>),
    Computed(Computed<T>),
    /// A reactive structure walked deeply on every evaluation. The callback
    /// is always invoked on trigger, since the structure compares equal to
    /// itself.
    Traversed(Rc<dyn Fn(Option<usize>) -> T>),
}

impl<T> Clone for WatchSource<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Getter(f) => Self::Getter(Rc::clone(f)),
            Self::Signal(s) => Self::Signal(*s),
            Self::Computed(c) => Self::Computed(*c),
            Self::Traversed(f) => Self::Traversed(Rc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for WatchSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Getter(_) => "Getter",
            Self::Signal(_) => "Signal",
            Self::Computed(_) => "Computed",
            Self::Traversed(_) => "Traversed",
        };
        f.debug_tuple(name).finish()
    }
}

impl<T> From<Signal<T>> for WatchSource<T> {
    fn from(signal: Signal<T>) -> Self {
        Self::Signal(signal)
    }
}

impl<T> From<Computed<T>> for WatchSource<T> {
    fn from(computed: Computed<T>) -> Self {
        Self::Computed(computed)
    }
}

impl<T> WatchSource<T>
where
    T: 'static,
{
    /// Watches whatever the closure reads.
    pub fn getter(f: impl Fn() -> T + 'static) -> Self {
        Self::Getter(Rc::new(f))
    }

    /// Watches a reactive structure deeply: every nested signal and computed
    /// is subscribed to on each evaluation.
    pub fn deep(value: T) -> Self
    where
        T: Traverse + Clone,
    {
        Self::Traversed(Rc::new(move |depth| {
            traverse(&value, depth);
            value.clone()
        }))
    }

    /// Like [`WatchSource::deep`], for structures reached through a getter.
    pub fn deep_with(f: impl Fn() -> T + 'static) -> Self
    where
        T: Traverse,
    {
        Self::Traversed(Rc::new(move |depth| {
            let value = f();
            traverse(&value, depth);
            value
        }))
    }

    fn read(&self, depth: Option<usize>) -> T
    where
        T: Clone,
    {
        match self {
            Self::Getter(f) => f(),
            Self::Signal(signal) => signal.get(),
            Self::Computed(computed) => computed.get(),
            Self::Traversed(f) => f(depth),
        }
    }
}

/// Registers cleanups that run just before the next callback invocation, and
/// once more when the watcher stops.
pub struct OnCleanup {
    registrations: Rc<RefCell<Vec<Box<dyn FnOnce()>>>>,
}

impl OnCleanup {
    pub fn register(&self, f: impl FnOnce() + 'static) {
        self.registrations.borrow_mut().push(Box::new(f));
    }
}

impl fmt::Debug for OnCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnCleanup")
            .field("pending", &self.registrations.borrow().len())
            .finish()
    }
}

/// Stops a watcher. Cloneable; stopping twice is a no-op.
#[derive(Clone)]
pub struct WatchHandle {
    stop: Rc<dyn Fn()>,
}

impl WatchHandle {
    pub fn stop(&self) {
        (self.stop)();
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle").finish_non_exhaustive()
    }
}

struct WatcherInner<T> {
    effect: EffectId,
    old: RefCell<Option<T>>,
    cleanups: Rc<RefCell<Vec<Box<dyn FnOnce()>>>>,
    once: bool,
    force: bool,
    stopped: Cell<bool>,
}

fn stop_watcher<T>(inner: &WatcherInner<T>) {
    if inner.stopped.replace(true) {
        return;
    }
    let cleanups: Vec<_> = inner.cleanups.borrow_mut().drain(..).collect();
    for cleanup in cleanups {
        cleanup();
    }
    with_runtime(|runtime| runtime.dispose_effect(inner.effect));
}

type Callback<T> = Rc<RefCell<dyn FnMut(&T, Option<&T>, &OnCleanup)>>;

fn run_watcher_job<T>(inner: &Rc<WatcherInner<T>>, callback: &Callback<T>)
where
    T: Clone + PartialEq + 'static,
{
    if inner.stopped.get() {
        return;
    }
    let (active, dirty) = with_runtime(|runtime| {
        let active = runtime
            .with_effect_node(inner.effect, |node| node.active)
            .unwrap_or(false);
        (active, active && runtime.effect_dirty(inner.effect))
    });
    if !active || !dirty {
        // a stale dispatch: the watcher was stopped, or the change settled
        // out as a false alarm
        return;
    }
    with_runtime(|runtime| {
        runtime.run_effect(inner.effect);
    });
    let new_value = with_runtime(|runtime| {
        runtime.with_effect_value::<T, _>(inner.effect, Option::clone)
    })
    .flatten();
    let Some(new_value) = new_value else {
        return;
    };
    let changed = inner.force || {
        let old = inner.old.borrow();
        match old.as_ref() {
            Some(old) => *old != new_value,
            None => true,
        }
    };
    if !changed {
        return;
    }
    let cleanups: Vec<_> = inner.cleanups.borrow_mut().drain(..).collect();
    for cleanup in cleanups {
        cleanup();
    }
    let on_cleanup = OnCleanup {
        registrations: Rc::clone(&inner.cleanups),
    };
    {
        let old = inner.old.borrow();
        (&mut *callback.borrow_mut())(&new_value, old.as_ref(), &on_cleanup);
    }
    *inner.old.borrow_mut() = Some(new_value);
    if inner.once {
        stop_watcher(inner);
    }
}

fn flush_scheduler(job: Rc<dyn Fn()>, flush: FlushMode) -> Rc<dyn Fn()> {
    match flush {
        FlushMode::Sync => job,
        FlushMode::Pre => Rc::new(move || queue_pre_job(Rc::clone(&job))),
        FlushMode::Post => Rc::new(move || queue_post_job(Rc::clone(&job))),
    }
}

/// Watches `source` and invokes `callback` with the new and previous values
/// whenever it settles on a real change.
///
/// ```
/// use reactive_core::{queue::flush_pre_jobs, signal::Signal, traits::*, watch::{watch, WatchOptions}};
/// use std::{cell::RefCell, rc::Rc};
///
/// let a = Signal::new(5);
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// watch(
///     a,
///     {
///         let log = Rc::clone(&log);
///         move |new: &i32, old: Option<&i32>, _| log.borrow_mut().push((*new, old.copied()))
///     },
///     WatchOptions { immediate: true, ..Default::default() },
/// );
/// assert_eq!(*log.borrow(), [(5, None)]);
///
/// a.set(6);
/// flush_pre_jobs();
/// assert_eq!(*log.borrow(), [(5, None), (6, Some(5))]);
/// ```
#[cfg_attr(
    debug_assertions,
    tracing::instrument(level = "trace", skip_all, fields(ty = %std::any::type_name::<T>()))
)]
#[track_caller]
pub fn watch<T>(
    source: impl Into<WatchSource<T>>,
    callback: impl FnMut(&T, Option<&T>, &OnCleanup) + 'static,
    options: WatchOptions,
) -> WatchHandle
where
    T: Clone + PartialEq + 'static,
{
    let source = source.into();
    let traversed = matches!(source, WatchSource::Traversed(_));
    if !traversed && options.deep != Deep::False {
        debug_warn!(
            "`deep` has no effect on this source; build it with \
             `WatchSource::deep` to traverse it"
        );
    }
    let depth = match options.deep {
        Deep::False | Deep::True => None,
        Deep::Depth(levels) => Some(levels),
    };
    let value: Rc<RefCell<dyn Any>> = Rc::new(RefCell::new(None::<T>));
    let getter = {
        let source = source.clone();
        move |_: Option<T>| source.read(depth)
    };
    let effect = with_runtime(|runtime| {
        runtime.create_effect_node(
            value,
            Rc::new(EffectState {
                f: getter,
                ty: PhantomData,
            }),
        )
    });
    let inner = Rc::new(WatcherInner {
        effect,
        old: RefCell::new(None),
        cleanups: Default::default(),
        once: options.once,
        force: traversed,
        stopped: Cell::new(false),
    });
    let callback: Callback<T> = Rc::new(RefCell::new(callback));
    let job: Rc<dyn Fn()> = Rc::new({
        let inner = Rc::clone(&inner);
        let callback = Rc::clone(&callback);
        move || run_watcher_job(&inner, &callback)
    });
    let scheduler = flush_scheduler(job, options.flush);
    with_runtime(|runtime| {
        _ = runtime
            .with_effect_node(effect, |node| node.scheduler = Some(scheduler));
        // initial evaluation: collect dependencies and the baseline value
        runtime.run_effect(effect);
    });
    let initial = with_runtime(|runtime| {
        runtime.with_effect_value::<T, _>(effect, Option::clone)
    })
    .flatten();
    if options.immediate {
        if let Some(initial) = &initial {
            let on_cleanup = OnCleanup {
                registrations: Rc::clone(&inner.cleanups),
            };
            (&mut *callback.borrow_mut())(initial, None, &on_cleanup);
        }
    }
    *inner.old.borrow_mut() = initial;
    if options.immediate && options.once {
        stop_watcher(&inner);
    }
    let stop: Rc<dyn Fn()> = Rc::new({
        let inner = Rc::clone(&inner);
        move || stop_watcher(&inner)
    });
    scope::register_disposal(Box::new({
        let stop = Rc::clone(&stop);
        move || stop()
    }));
    WatchHandle { stop }
}

/// Watches several sources of the same type at once; the callback receives
/// slices of new and previous values.
#[track_caller]
pub fn watch_many<T>(
    sources: Vec<WatchSource<T>>,
    mut callback: impl FnMut(&[T], Option<&[T]>, &OnCleanup) + 'static,
    options: WatchOptions,
) -> WatchHandle
where
    T: Clone + PartialEq + 'static,
{
    let getter = WatchSource::getter(move || {
        sources.iter().map(|source| source.read(None)).collect::<Vec<T>>()
    });
    watch(
        getter,
        move |new: &Vec<T>, old: Option<&Vec<T>>, on_cleanup| {
            callback(new, old.map(Vec::as_slice), on_cleanup)
        },
        options,
    )
}

/// Runs `fun` immediately and again (at `Pre` flush) whenever anything it
/// reads changes. The argument registers cleanups that run before each re-run
/// and on stop.
#[track_caller]
pub fn watch_effect(fun: impl FnMut(&OnCleanup) + 'static) -> WatchHandle {
    watch_effect_with_flush(fun, FlushMode::Pre)
}

/// [`watch_effect`] flushed on the host's post queue.
#[track_caller]
pub fn watch_post_effect(fun: impl FnMut(&OnCleanup) + 'static) -> WatchHandle {
    watch_effect_with_flush(fun, FlushMode::Post)
}

/// [`watch_effect`] re-run synchronously inside the triggering write.
#[track_caller]
pub fn watch_sync_effect(fun: impl FnMut(&OnCleanup) + 'static) -> WatchHandle {
    watch_effect_with_flush(fun, FlushMode::Sync)
}

fn watch_effect_with_flush(
    fun: impl FnMut(&OnCleanup) + 'static,
    flush: FlushMode,
) -> WatchHandle {
    let cleanups: Rc<RefCell<Vec<Box<dyn FnOnce()>>>> = Default::default();
    let fun = RefCell::new(fun);
    let wrapped = {
        let cleanups = Rc::clone(&cleanups);
        move |_: Option<()>| {
            let pending: Vec<_> = cleanups.borrow_mut().drain(..).collect();
            for cleanup in pending {
                cleanup();
            }
            let on_cleanup = OnCleanup {
                registrations: Rc::clone(&cleanups),
            };
            (&mut *fun.borrow_mut())(&on_cleanup);
        }
    };
    let value: Rc<RefCell<dyn Any>> = Rc::new(RefCell::new(None::<()>));
    let effect = with_runtime(|runtime| {
        runtime.create_effect_node(
            value,
            Rc::new(EffectState {
                f: wrapped,
                ty: PhantomData,
            }),
        )
    });
    let stopped = Rc::new(Cell::new(false));
    let job: Rc<dyn Fn()> = Rc::new({
        let stopped = Rc::clone(&stopped);
        move || {
            if stopped.get() {
                return;
            }
            with_runtime(|runtime| {
                let active = runtime
                    .with_effect_node(effect, |node| node.active)
                    .unwrap_or(false);
                if active && runtime.effect_dirty(effect) {
                    runtime.run_effect(effect);
                }
            });
        }
    });
    let scheduler = flush_scheduler(job, flush);
    with_runtime(|runtime| {
        _ = runtime
            .with_effect_node(effect, |node| node.scheduler = Some(scheduler));
        runtime.run_effect(effect);
    });
    let stop: Rc<dyn Fn()> = Rc::new(move || {
        if stopped.replace(true) {
            return;
        }
        let pending: Vec<_> = cleanups.borrow_mut().drain(..).collect();
        for cleanup in pending {
            cleanup();
        }
        with_runtime(|runtime| runtime.dispose_effect(effect));
    });
    scope::register_disposal(Box::new({
        let stop = Rc::clone(&stop);
        move || stop()
    }));
    WatchHandle { stop }
}

/// The refined sameness predicate for `f64`: same-signed zeros are equal and
/// any two NaNs are equal, unlike `PartialEq`. Shaped for
/// [`Computed::new_with_compare`](crate::computed::Computed::new_with_compare).
pub fn same_value_f64(a: Option<&f64>, b: Option<&f64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            (a == b && (*a != 0.0 || a.is_sign_positive() == b.is_sign_positive()))
                || (a.is_nan() && b.is_nan())
        }
        (None, None) => true,
        _ => false,
    }
}

/// [`same_value_f64`] for `f32`.
pub fn same_value_f32(a: Option<&f32>, b: Option<&f32>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            (a == b && (*a != 0.0 || a.is_sign_positive() == b.is_sign_positive()))
                || (a.is_nan() && b.is_nan())
        }
        (None, None) => true,
        _ => false,
    }
}
