//! Update functions over optional state

use std::fmt;
use std::rc::Rc;

/// A pure update function from the previous state to the next one
///
/// Either side may be absent. A reducer applied to a collection item that
/// returns `None` removes that item from its parent collection.
pub struct Reducer<T>(Rc<dyn Fn(Option<&T>) -> Option<T>>);

impl<T> Clone for Reducer<T> {
    fn clone(&self) -> Self {
        Reducer(self.0.clone())
    }
}

impl<T> fmt::Debug for Reducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Reducer(..)")
    }
}

impl<T: 'static> Reducer<T> {
    pub fn new(f: impl Fn(Option<&T>) -> Option<T> + 'static) -> Self {
        Reducer(Rc::new(f))
    }

    /// Apply the reducer to a previous state
    pub fn apply(&self, prev: Option<&T>) -> Option<T> {
        (self.0)(prev)
    }

    /// Replace the state with a fixed value
    pub fn set(value: T) -> Self
    where
        T: Clone,
    {
        Reducer::new(move |_| Some(value.clone()))
    }

    /// Remove the state
    pub fn remove() -> Self {
        Reducer::new(|_| None)
    }

    /// Transform a present state; an absent state stays absent
    pub fn update(f: impl Fn(&T) -> T + 'static) -> Self {
        Reducer::new(move |prev| prev.map(&f))
    }

    /// Set a default if the state is absent, otherwise keep it
    pub fn init(default: T) -> Self
    where
        T: Clone,
    {
        Reducer::new(move |prev| Some(prev.cloned().unwrap_or_else(|| default.clone())))
    }
}
