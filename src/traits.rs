//! The access traits shared by reactive value types.
//!
//! Every accessor comes in a tracked and an untracked flavour, and each has a
//! fallible `try_` variant that returns `None` (or hands the value back) when
//! the underlying node has been disposed. The panicking variants report the
//! construction site of the dead handle in debug builds.
//!
//! | Trait                   | Meaning                                                 |
//! |-------------------------|---------------------------------------------------------|
//! | [`SignalWith`]          | Borrow the value reactively (subscribes the observer).  |
//! | [`SignalWithUntracked`] | Borrow the value without subscribing.                   |
//! | [`SignalGet`]           | Clone the value reactively.                             |
//! | [`SignalGetUntracked`]  | Clone the value without subscribing.                    |
//! | [`SignalSet`]           | Replace the value, notifying on real change.            |
//! | [`SignalUpdate`]        | Mutate the value in place, notifying unconditionally.   |
//! | [`SignalDispose`]       | Reclaim the node.                                       |

/// Reactively borrows the current value.
pub trait SignalWith {
    type Value: ?Sized;

    /// Applies the closure to the current value, subscribing the active
    /// observer.
    ///
    /// # Panics
    /// Panics if the value has been disposed.
    #[track_caller]
    fn with<O>(&self, f: impl FnOnce(&Self::Value) -> O) -> O;

    /// Like [`SignalWith::with`], but returns `None` if the value has been
    /// disposed.
    #[track_caller]
    fn try_with<O>(&self, f: impl FnOnce(&Self::Value) -> O) -> Option<O>;
}

/// Borrows the current value without subscribing.
pub trait SignalWithUntracked {
    type Value: ?Sized;

    /// # Panics
    /// Panics if the value has been disposed.
    #[track_caller]
    fn with_untracked<O>(&self, f: impl FnOnce(&Self::Value) -> O) -> O;

    #[track_caller]
    fn try_with_untracked<O>(&self, f: impl FnOnce(&Self::Value) -> O) -> Option<O>;
}

/// Reactively clones the current value.
pub trait SignalGet {
    type Value;

    /// # Panics
    /// Panics if the value has been disposed.
    #[track_caller]
    fn get(&self) -> Self::Value;

    #[track_caller]
    fn try_get(&self) -> Option<Self::Value>;
}

/// Clones the current value without subscribing.
pub trait SignalGetUntracked {
    type Value;

    /// # Panics
    /// Panics if the value has been disposed.
    #[track_caller]
    fn get_untracked(&self) -> Self::Value;

    #[track_caller]
    fn try_get_untracked(&self) -> Option<Self::Value>;
}

/// Replaces the current value.
pub trait SignalSet {
    type Value;

    /// Writes `new_value` and notifies subscribers if it constitutes a real
    /// change.
    #[track_caller]
    fn set(&self, new_value: Self::Value);

    /// Like [`SignalSet::set`], but hands the value back instead of dropping
    /// it when the target has been disposed or rejects writes.
    #[track_caller]
    fn try_set(&self, new_value: Self::Value) -> Option<Self::Value>;
}

/// Mutates the current value in place.
pub trait SignalUpdate {
    type Value;

    /// Applies the closure and notifies subscribers.
    #[track_caller]
    fn update(&self, f: impl FnOnce(&mut Self::Value));

    /// Like [`SignalUpdate::update`], returning the closure's result, or
    /// `None` if the value has been disposed.
    #[track_caller]
    fn try_update<O>(&self, f: impl FnOnce(&mut Self::Value) -> O) -> Option<O>;
}

/// Reclaims the node behind a handle. Later accesses through any copy of the
/// handle fail their `try_` variants.
pub trait SignalDispose {
    fn dispose(self);
}
