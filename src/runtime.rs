//! The reactive runtime: arenas for dependency and effect nodes, the ambient
//! tracking state, and the scheduling queue.
//!
//! All state lives in a thread-local [`Runtime`]. Handles (`Signal`, `Computed`,
//! `Effect`, `Dep`) are plain generational ids into its arenas, which keeps the
//! subject/subscriber graph free of reference cycles: a handle that outlives its
//! node simply fails to resolve. Stale *links* between live nodes are detected
//! by comparing the epoch stored in a dependency's subscriber map against the
//! effect's current `track_id`.

use crate::macros::debug_warn;
use indexmap::IndexMap;
use rustc_hash::FxHasher;
use slotmap::SlotMap;
use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::VecDeque,
    hash::BuildHasherDefault,
    rc::Rc,
};

pub(crate) type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

slotmap::new_key_type! {
    /// Unique id assigned to a dependency (subject) node.
    pub(crate) struct DepId;
}

slotmap::new_key_type! {
    /// Unique id assigned to an effect (subscriber) node.
    pub(crate) struct EffectId;
}

thread_local! {
    static RUNTIME: Runtime = Runtime::default();
}

/// Runs a closure with the thread's reactive runtime.
pub(crate) fn with_runtime<T>(f: impl FnOnce(&Runtime) -> T) -> T {
    RUNTIME.with(f)
}

/// How fresh an effect's last run still is.
///
/// The ordering is meaningful: a level is only ever raised by a trigger and
/// only lowered by running or by a resolved dirty check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DirtyLevel {
    /// The last run is still valid.
    NotDirty,
    /// An upstream computed was notified of a change, but whether its value
    /// actually changed has not been decided yet.
    MaybeDirty,
    /// A dependency has definitely changed; the next run is required.
    Dirty,
}

/// A type-erased computation owned by an effect node.
///
/// `run` regenerates the value stored in the node's slot and reports whether
/// the stored value meaningfully changed. Plain effects always report `true`;
/// computed values apply their comparator.
pub(crate) trait AnyComputation {
    fn run(&self, value: &Rc<RefCell<dyn Any>>) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// A subject node: the set of effects subscribed to one observable event.
pub(crate) struct DepNode {
    /// Subscribers in insertion order, each with the epoch at which it last
    /// tracked this dependency. An entry whose epoch disagrees with the
    /// effect's current `track_id` is a dead edge.
    pub subscribers: FxIndexMap<EffectId, u64>,
    /// Invoked the first time the subscriber map empties out.
    pub cleanup: Option<Rc<dyn Fn()>>,
    pub cleanup_fired: bool,
    /// Set when this dependency announces a computed value; the dirty-check
    /// walk refreshes that computed through this link.
    pub computed: Option<EffectId>,
}

/// A subscriber node: a computation plus the bookkeeping that re-runs it.
pub(crate) struct EffectNode {
    pub value: Rc<RefCell<dyn Any>>,
    pub fun: Rc<dyn AnyComputation>,
    /// Invoked when this effect leaves `NotDirty`; computed values use it to
    /// announce `MaybeDirty` to their own subscribers.
    pub trigger: Option<Rc<dyn Fn()>>,
    /// Queued to re-run the computation; absent for trigger-only effects.
    pub scheduler: Option<Rc<dyn Fn()>>,
    pub on_stop: Option<Box<dyn FnOnce()>>,
    pub active: bool,
    pub allow_recurse: bool,
    /// Computed-only: when false, every value read re-runs the getter.
    pub cacheable: bool,
    pub dirty_level: DirtyLevel,
    /// Epoch bumped on every pre-cleanup; tombstones all previous links.
    pub track_id: u64,
    /// Nested-run depth; a running effect does not self-schedule unless
    /// `allow_recurse` is set.
    pub runnings: u32,
    pub should_schedule: bool,
    /// Dependencies in the order the last run read them. Only the first
    /// `deps_len` entries are current; the tail is garbage from the run
    /// before, reclaimed by post-cleanup.
    pub deps: Vec<DepId>,
    pub deps_len: usize,
}

pub(crate) struct Runtime {
    pub deps: RefCell<SlotMap<DepId, DepNode>>,
    pub effects: RefCell<SlotMap<EffectId, EffectNode>>,
    observer: Cell<Option<EffectId>>,
    should_track: Cell<bool>,
    track_stack: RefCell<Vec<bool>>,
    pause_schedule: Cell<usize>,
    queue: RefCell<VecDeque<Rc<dyn Fn()>>>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            deps: Default::default(),
            effects: Default::default(),
            observer: Cell::new(None),
            should_track: Cell::new(true),
            track_stack: Default::default(),
            pause_schedule: Cell::new(0),
            queue: Default::default(),
        }
    }
}

/// Restores the outer observer and tracking flag, then runs the effect's
/// post-cleanup. Running this on drop keeps the invariants intact when the
/// user function panics.
struct RunGuard<'a> {
    runtime: &'a Runtime,
    id: EffectId,
    prev_observer: Option<EffectId>,
    prev_should_track: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.runtime.post_cleanup(self.id);
        self.runtime.observer.set(self.prev_observer);
        self.runtime.should_track.set(self.prev_should_track);
        let mut effects = self.runtime.effects.borrow_mut();
        if let Some(node) = effects.get_mut(self.id) {
            node.runnings -= 1;
        }
    }
}

/// Re-enables tracking on drop; used around the dirty-check walk.
struct TrackingGuard<'a>(&'a Runtime);

impl Drop for TrackingGuard<'_> {
    fn drop(&mut self) {
        self.0.reset_tracking();
    }
}

impl Runtime {
    // ------------------------------------------------------------------
    // node construction and disposal
    // ------------------------------------------------------------------

    pub(crate) fn create_dep_node(
        &self,
        cleanup: Option<Rc<dyn Fn()>>,
        computed: Option<EffectId>,
    ) -> DepId {
        self.deps.borrow_mut().insert(DepNode {
            subscribers: FxIndexMap::default(),
            cleanup,
            cleanup_fired: false,
            computed,
        })
    }

    pub(crate) fn create_effect_node(
        &self,
        value: Rc<RefCell<dyn Any>>,
        fun: Rc<dyn AnyComputation>,
    ) -> EffectId {
        self.effects.borrow_mut().insert(EffectNode {
            value,
            fun,
            trigger: None,
            scheduler: None,
            on_stop: None,
            active: true,
            allow_recurse: false,
            cacheable: true,
            // new computations have never produced a value
            dirty_level: DirtyLevel::Dirty,
            track_id: 0,
            runnings: 0,
            should_schedule: false,
            deps: Vec::new(),
            deps_len: 0,
        })
    }

    pub(crate) fn with_effect_node<T>(
        &self,
        id: EffectId,
        f: impl FnOnce(&mut EffectNode) -> T,
    ) -> Option<T> {
        self.effects.borrow_mut().get_mut(id).map(f)
    }

    /// Gives typed access to the value slot of an effect node.
    pub(crate) fn with_effect_value<T, O>(
        &self,
        id: EffectId,
        f: impl FnOnce(&Option<T>) -> O,
    ) -> Option<O>
    where
        T: 'static,
    {
        let value = self.effects.borrow().get(id).map(|node| Rc::clone(&node.value))?;
        let value = value.borrow();
        value.downcast_ref::<Option<T>>().map(f)
    }

    pub(crate) fn with_effect_value_mut<T, O>(
        &self,
        id: EffectId,
        f: impl FnOnce(&mut Option<T>) -> O,
    ) -> Option<O>
    where
        T: 'static,
    {
        let value = self.effects.borrow().get(id).map(|node| Rc::clone(&node.value))?;
        let mut value = value.borrow_mut();
        value.downcast_mut::<Option<T>>().map(f)
    }

    /// Whether a read at this moment would register a dependency.
    pub(crate) fn is_tracking(&self) -> bool {
        self.should_track.get() && self.observer.get().is_some()
    }

    pub(crate) fn dispose_dep(&self, id: DepId) {
        self.deps.borrow_mut().remove(id);
    }

    pub(crate) fn dispose_effect(&self, id: EffectId) {
        self.stop_effect(id);
        self.effects.borrow_mut().remove(id);
    }

    // ------------------------------------------------------------------
    // tracking
    // ------------------------------------------------------------------

    /// Records that the currently-active effect depends on `dep_id`.
    ///
    /// Dependencies read in the same order as the previous run hit the
    /// positional fast path: the slot at `deps_len` already holds this dep, so
    /// relinking is a single bump of the cursor. A different dep in that slot
    /// is displaced and lazily unsubscribed.
    pub(crate) fn track(&self, dep_id: DepId) {
        if !self.should_track.get() {
            return;
        }
        let Some(effect_id) = self.observer.get() else {
            return;
        };
        let track_id = match self.effects.borrow().get(effect_id) {
            Some(node) => node.track_id,
            None => return,
        };
        {
            let mut deps = self.deps.borrow_mut();
            let Some(dep) = deps.get_mut(dep_id) else {
                return;
            };
            if dep.subscribers.get(&effect_id) == Some(&track_id) {
                // link is already current
                return;
            }
            dep.subscribers.insert(effect_id, track_id);
        }
        let displaced = {
            let mut effects = self.effects.borrow_mut();
            let Some(node) = effects.get_mut(effect_id) else {
                return;
            };
            let at = node.deps_len;
            if node.deps.get(at) == Some(&dep_id) {
                node.deps_len += 1;
                return;
            }
            let old = node.deps.get(at).copied();
            if at < node.deps.len() {
                node.deps[at] = dep_id;
            } else {
                node.deps.push(dep_id);
            }
            node.deps_len += 1;
            old
        };
        if let Some(old) = displaced {
            self.cleanup_dep_effect(old, effect_id);
        }
    }

    /// Drops the link between `dep_id` and `effect_id` if it is stale, firing
    /// the dependency's cleanup hook the first time its subscriber map
    /// empties.
    pub(crate) fn cleanup_dep_effect(&self, dep_id: DepId, effect_id: EffectId) {
        let track_id = match self.effects.borrow().get(effect_id) {
            Some(node) => node.track_id,
            None => u64::MAX,
        };
        let cleanup = {
            let mut deps = self.deps.borrow_mut();
            let Some(dep) = deps.get_mut(dep_id) else {
                return;
            };
            match dep.subscribers.get(&effect_id) {
                Some(&epoch) if epoch != track_id => {
                    // shift_remove keeps the remaining subscribers in
                    // insertion order, which drives drain order
                    dep.subscribers.shift_remove(&effect_id);
                    if dep.subscribers.is_empty() && !dep.cleanup_fired {
                        dep.cleanup_fired = true;
                        dep.cleanup.clone()
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }

    pub(crate) fn pause_tracking(&self) {
        self.track_stack
            .borrow_mut()
            .push(self.should_track.replace(false));
    }

    pub(crate) fn enable_tracking(&self) {
        self.track_stack
            .borrow_mut()
            .push(self.should_track.replace(true));
    }

    pub(crate) fn reset_tracking(&self) {
        let prev = self.track_stack.borrow_mut().pop().unwrap_or(true);
        self.should_track.set(prev);
    }

    // ------------------------------------------------------------------
    // triggering and scheduling
    // ------------------------------------------------------------------

    /// Propagates a change on `dep_id` to every live subscriber.
    ///
    /// The `trigger` hook fires only on the `NotDirty` edge, which collapses a
    /// write burst into a single downstream notification and stops redundant
    /// `MaybeDirty` waves at already-dirty effects.
    pub(crate) fn trigger_dep(&self, dep_id: DepId, level: DirtyLevel) {
        tracing::trace!("triggering dep {dep_id:?} at {level:?}");
        self.pause_scheduling();
        let subscribers: Vec<(EffectId, u64)> = self
            .deps
            .borrow()
            .get(dep_id)
            .map(|dep| dep.subscribers.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default();
        for (effect_id, epoch) in subscribers {
            let fire = {
                let mut effects = self.effects.borrow_mut();
                let Some(node) = effects.get_mut(effect_id) else {
                    continue;
                };
                if epoch != node.track_id || node.dirty_level >= level {
                    continue;
                }
                let last = node.dirty_level;
                node.dirty_level = level;
                if last == DirtyLevel::NotDirty {
                    node.should_schedule = true;
                    node.trigger.clone()
                } else {
                    None
                }
            };
            if let Some(fire) = fire {
                fire();
            }
        }
        self.schedule_effects(dep_id);
        self.reset_scheduling();
    }

    /// Queues the scheduler of every live subscriber that asked to be
    /// scheduled. A running effect is skipped unless it allows recursion.
    pub(crate) fn schedule_effects(&self, dep_id: DepId) {
        let subscribers: Vec<(EffectId, u64)> = self
            .deps
            .borrow()
            .get(dep_id)
            .map(|dep| dep.subscribers.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default();
        for (effect_id, epoch) in subscribers {
            let scheduler = {
                let mut effects = self.effects.borrow_mut();
                let Some(node) = effects.get_mut(effect_id) else {
                    continue;
                };
                if node.scheduler.is_none()
                    || !node.should_schedule
                    || epoch != node.track_id
                    || (node.runnings > 0 && !node.allow_recurse)
                {
                    continue;
                }
                node.should_schedule = false;
                node.scheduler.clone()
            };
            if let Some(scheduler) = scheduler {
                self.queue.borrow_mut().push_back(scheduler);
            }
        }
    }

    pub(crate) fn pause_scheduling(&self) {
        self.pause_schedule.set(self.pause_schedule.get() + 1);
    }

    pub(crate) fn reset_scheduling(&self) {
        let depth = self.pause_schedule.get();
        if depth == 0 {
            debug_warn!("reset_scheduling() called without a matching pause");
            return;
        }
        self.pause_schedule.set(depth - 1);
        if depth == 1 {
            self.drain_queue();
        }
    }

    /// Runs queued schedulers FIFO. A scheduler may itself trigger writes;
    /// nested drains pop from the same queue, so the loop re-checks the pause
    /// depth each round.
    fn drain_queue(&self) {
        while self.pause_schedule.get() == 0 {
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(scheduler) => scheduler(),
                None => break,
            }
        }
    }

    // ------------------------------------------------------------------
    // running
    // ------------------------------------------------------------------

    /// (Re)runs an effect's computation, recollecting its dependencies.
    ///
    /// Returns whether the stored value meaningfully changed.
    pub(crate) fn run_effect(&self, id: EffectId) -> bool {
        let (fun, value, active) = {
            let mut effects = self.effects.borrow_mut();
            let Some(node) = effects.get_mut(id) else {
                return false;
            };
            node.dirty_level = DirtyLevel::NotDirty;
            (Rc::clone(&node.fun), Rc::clone(&node.value), node.active)
        };
        if !active {
            // a stopped effect still computes, but registers nothing
            return fun.run(&value);
        }
        {
            let mut effects = self.effects.borrow_mut();
            if let Some(node) = effects.get_mut(id) {
                node.runnings += 1;
                // pre-cleanup: every previous link is now stale
                node.track_id += 1;
                node.deps_len = 0;
            }
        }
        let _guard = RunGuard {
            runtime: self,
            id,
            prev_observer: self.observer.replace(Some(id)),
            prev_should_track: self.should_track.replace(true),
        };
        fun.run(&value)
    }

    /// Detaches the stale tail left behind by dependency recollection and
    /// truncates the list to the entries the run actually read.
    fn post_cleanup(&self, id: EffectId) {
        let tail: Vec<DepId> = {
            let mut effects = self.effects.borrow_mut();
            match effects.get_mut(id) {
                Some(node) if node.deps.len() > node.deps_len => {
                    node.deps.drain(node.deps_len..).collect()
                }
                _ => return,
            }
        };
        for dep_id in tail {
            self.cleanup_dep_effect(dep_id, id);
        }
    }

    /// Detaches the effect from every dependency and deactivates it.
    /// Idempotent; the computation can still be run by hand afterwards.
    pub(crate) fn stop_effect(&self, id: EffectId) {
        let on_stop = {
            let mut effects = self.effects.borrow_mut();
            match effects.get_mut(id) {
                Some(node) if node.active => {
                    node.track_id += 1;
                    node.deps_len = 0;
                    node.active = false;
                    node.on_stop.take()
                }
                _ => return,
            }
        };
        self.post_cleanup(id);
        if let Some(on_stop) = on_stop {
            on_stop();
        }
    }

    // ------------------------------------------------------------------
    // dirty resolution
    // ------------------------------------------------------------------

    /// Resolves this effect's freshness to a definite answer.
    ///
    /// `MaybeDirty` is settled by refreshing each upstream computed this
    /// effect reads; a computed that really changed re-triggers us at `Dirty`
    /// along the way. If none does, the hint was a false alarm and the effect
    /// is clean.
    pub(crate) fn effect_dirty(&self, id: EffectId) -> bool {
        let level = match self.effects.borrow().get(id) {
            Some(node) => node.dirty_level,
            None => return false,
        };
        if level != DirtyLevel::MaybeDirty {
            return level >= DirtyLevel::Dirty;
        }
        self.pause_tracking();
        let _guard = TrackingGuard(self);
        let deps: Vec<DepId> = {
            let effects = self.effects.borrow();
            match effects.get(id) {
                Some(node) => node.deps[..node.deps_len].to_vec(),
                None => Vec::new(),
            }
        };
        for dep_id in deps {
            let upstream = self.deps.borrow().get(dep_id).and_then(|dep| dep.computed);
            if let Some(upstream) = upstream {
                self.refresh_computed(dep_id, upstream);
                let level = self
                    .effects
                    .borrow()
                    .get(id)
                    .map(|node| node.dirty_level)
                    .unwrap_or(DirtyLevel::NotDirty);
                if level >= DirtyLevel::Dirty {
                    break;
                }
            }
        }
        let mut effects = self.effects.borrow_mut();
        match effects.get_mut(id) {
            Some(node) => {
                if node.dirty_level < DirtyLevel::Dirty {
                    node.dirty_level = DirtyLevel::NotDirty;
                }
                node.dirty_level >= DirtyLevel::Dirty
            }
            None => false,
        }
    }

    /// Re-evaluates a computed (identified by its dependency and its internal
    /// effect) if it is stale, announcing `Dirty` downstream only when its
    /// value really changed.
    pub(crate) fn refresh_computed(&self, dep_id: DepId, effect_id: EffectId) {
        let cacheable = self
            .effects
            .borrow()
            .get(effect_id)
            .map(|node| node.cacheable)
            .unwrap_or(true);
        if !cacheable || self.effect_dirty(effect_id) {
            if self.run_effect(effect_id) {
                self.trigger_dep(dep_id, DirtyLevel::Dirty);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{with_runtime, DirtyLevel};
    use crate::{
        effect::Effect,
        graph::{create_dep, track, trigger, Dep},
        signal::Signal,
        traits::{SignalGet, SignalSet},
    };
    use std::{cell::RefCell, rc::Rc};

    fn subscriber_count(dep: Dep) -> usize {
        with_runtime(|runtime| {
            let deps = runtime.deps.borrow();
            let node = &deps[dep.id()];
            let effects = runtime.effects.borrow();
            node.subscribers
                .iter()
                .filter(|(id, epoch)| {
                    effects.get(**id).map(|e| e.track_id) == Some(**epoch)
                })
                .count()
        })
    }

    #[test]
    fn rereading_registers_once() {
        let dep = create_dep();
        let e = Effect::new(move |_| {
            track(dep);
            track(dep);
            track(dep);
        });
        let current = with_runtime(|runtime| {
            let effects = runtime.effects.borrow();
            let node = &effects[e.id];
            node.deps[..node.deps_len].to_vec()
        });
        assert_eq!(current, vec![dep.id()]);
        assert_eq!(subscriber_count(dep), 1);
    }

    #[test]
    fn untouched_deps_are_dropped_on_rerun() {
        let a = create_dep();
        let b = create_dep();
        let c = create_dep();
        let d = create_dep();
        let second = Rc::new(RefCell::new(false));
        let e = Effect::new({
            let second = Rc::clone(&second);
            move |_| {
                if *second.borrow() {
                    track(a);
                    track(d);
                } else {
                    track(a);
                    track(b);
                    track(c);
                }
            }
        });
        *second.borrow_mut() = true;
        e.run();
        let current = with_runtime(|runtime| {
            let effects = runtime.effects.borrow();
            let node = &effects[e.id];
            assert_eq!(node.deps.len(), node.deps_len);
            node.deps[..node.deps_len].to_vec()
        });
        assert_eq!(current, vec![a.id(), d.id()]);
        assert_eq!(subscriber_count(b), 0);
        assert_eq!(subscriber_count(c), 0);
        assert_eq!(subscriber_count(a), 1);
        assert_eq!(subscriber_count(d), 1);
    }

    #[test]
    fn stable_read_order_reuses_slots() {
        let a = create_dep();
        let b = create_dep();
        let e = Effect::new(move |_| {
            track(a);
            track(b);
        });
        let before = with_runtime(|runtime| {
            runtime.effects.borrow()[e.id].deps.clone()
        });
        e.run();
        let after = with_runtime(|runtime| {
            runtime.effects.borrow()[e.id].deps.clone()
        });
        assert_eq!(before, after);
    }

    #[test]
    fn trigger_marks_only_live_links() {
        let dep = create_dep();
        let runs = Rc::new(RefCell::new(0));
        let e = Effect::new({
            let runs = Rc::clone(&runs);
            move |_| {
                *runs.borrow_mut() += 1;
                track(dep);
            }
        });
        assert_eq!(*runs.borrow(), 1);
        trigger(dep, DirtyLevel::Dirty);
        assert_eq!(*runs.borrow(), 2);
        e.stop();
        trigger(dep, DirtyLevel::Dirty);
        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn dirty_resolution_clears_false_alarms() {
        let a = Signal::new(1);
        let parity = crate::computed::Computed::new(move |_| a.get() % 2);
        let runs = Rc::new(RefCell::new(0));
        let e = Effect::new({
            let runs = Rc::clone(&runs);
            move |_| {
                *runs.borrow_mut() += 1;
                parity.get();
            }
        });
        assert_eq!(*runs.borrow(), 1);
        a.set(3);
        assert_eq!(*runs.borrow(), 1);
        let level = with_runtime(|runtime| {
            runtime.effects.borrow()[e.id].dirty_level
        });
        assert_eq!(level, DirtyLevel::NotDirty);
    }
}
