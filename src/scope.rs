//! Ownership scopes: collective teardown for groups of reactive nodes.
//!
//! Signals, effects, computeds, and watchers created inside
//! [`EffectScope::run`] register their disposal with that scope; stopping the
//! scope tears them all down, children first, in reverse creation order.

use crate::macros::debug_warn;
use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

thread_local! {
    static ACTIVE_SCOPE: RefCell<Option<EffectScope>> = const { RefCell::new(None) };
}

struct ScopeInner {
    active: Cell<bool>,
    disposals: RefCell<Vec<Box<dyn FnOnce()>>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    children: RefCell<Vec<EffectScope>>,
}

/// A collection of reactive nodes with a shared lifetime.
///
/// ```
/// use reactive_core::{effect::Effect, scope::EffectScope, signal::Signal, traits::*};
/// use std::{cell::RefCell, rc::Rc};
///
/// let count = Signal::new(0);
/// let runs = Rc::new(RefCell::new(0));
///
/// let scope = EffectScope::new();
/// scope.run(|| {
///     Effect::new({
///         let runs = Rc::clone(&runs);
///         move |_| {
///             *runs.borrow_mut() += 1;
///             count.get();
///         }
///     });
/// });
///
/// count.set(1);
/// assert_eq!(*runs.borrow(), 2);
///
/// scope.stop();
/// count.set(2);
/// // the effect went down with its scope
/// assert_eq!(*runs.borrow(), 2);
/// ```
#[derive(Clone)]
pub struct EffectScope {
    inner: Rc<ScopeInner>,
}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("active", &self.inner.active.get())
            .finish()
    }
}

struct RestoreScopeOnDrop(Option<EffectScope>);

impl Drop for RestoreScopeOnDrop {
    fn drop(&mut self) {
        ACTIVE_SCOPE.with(|scope| *scope.borrow_mut() = self.0.take());
    }
}

impl EffectScope {
    /// Creates a scope that is stopped together with the scope currently
    /// running, if any.
    pub fn new() -> Self {
        let this = Self::new_detached();
        ACTIVE_SCOPE.with(|scope| {
            if let Some(parent) = &*scope.borrow() {
                parent.inner.children.borrow_mut().push(this.clone());
            }
        });
        this
    }

    /// Creates a scope with no parent; only an explicit [`EffectScope::stop`]
    /// tears it down.
    pub fn new_detached() -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                active: Cell::new(true),
                disposals: Default::default(),
                cleanups: Default::default(),
                children: Default::default(),
            }),
        }
    }

    /// Runs `fun` with this scope collecting everything reactive it creates.
    pub fn run<T>(&self, fun: impl FnOnce() -> T) -> T {
        if !self.inner.active.get() {
            debug_warn!("ran a function in a scope that has already been stopped");
            return fun();
        }
        let prev = ACTIVE_SCOPE
            .with(|scope| scope.borrow_mut().replace(self.clone()));
        let _restore = RestoreScopeOnDrop(prev);
        fun()
    }

    /// Whether the scope has not been stopped yet.
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Stops every child scope, disposes every collected node (in reverse
    /// creation order), and runs registered cleanups. Idempotent.
    pub fn stop(&self) {
        if !self.inner.active.replace(false) {
            return;
        }
        let children: Vec<_> =
            self.inner.children.borrow_mut().drain(..).collect();
        for child in children {
            child.stop();
        }
        let disposals: Vec<_> =
            self.inner.disposals.borrow_mut().drain(..).collect();
        for disposal in disposals.into_iter().rev() {
            disposal();
        }
        let cleanups: Vec<_> =
            self.inner.cleanups.borrow_mut().drain(..).collect();
        for cleanup in cleanups {
            cleanup();
        }
    }
}

impl Default for EffectScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers `fun` to run when the innermost running scope is stopped.
/// Warns (and drops the closure) outside any scope.
pub fn on_scope_cleanup(fun: impl FnOnce() + 'static) {
    ACTIVE_SCOPE.with(|scope| match &*scope.borrow() {
        Some(scope) => scope.inner.cleanups.borrow_mut().push(Box::new(fun)),
        None => {
            debug_warn!("on_scope_cleanup called outside of a scope");
        }
    });
}

/// Hands a node's disposal to the innermost running scope, if there is one.
pub(crate) fn register_disposal(fun: Box<dyn FnOnce()>) {
    ACTIVE_SCOPE.with(|scope| {
        if let Some(scope) = &*scope.borrow() {
            scope.inner.disposals.borrow_mut().push(fun);
        }
    });
}
