//! Scoping of reducers and sources
//!
//! A child works on its own slice of state. Its reducers are lifted into
//! reducers over the parent container through the same lens that narrowed
//! its source.

use crate::lens::{IntoLens, Lens};
use crate::reducer::Reducer;
use crate::source::StateSource;
use lamina_stream::Stream;

/// Lift a single reducer through a lens
///
/// If the inner reducer leaves its slice unchanged the outer state is
/// returned as is. An inner `None` is written back through the lens, which
/// for collection items splices the item out of its parent.
pub fn lift<T, R>(lens: &Lens<T, R>, inner: Reducer<R>) -> Reducer<T>
where
    T: Clone + 'static,
    R: PartialEq + 'static,
{
    let lens = lens.clone();
    Reducer::new(move |outer: Option<&T>| {
        let prev = lens.get(outer);
        let next = inner.apply(prev.as_ref());
        if prev == next {
            outer.cloned()
        } else {
            lens.set(outer, next)
        }
    })
}

/// Lift a stream of child reducers into reducers over the parent state
pub fn isolate_sink<T, R>(reducers: &Stream<Reducer<R>>, scope: impl IntoLens<T, R>) -> Stream<Reducer<T>>
where
    T: Clone + 'static,
    R: PartialEq + 'static,
{
    let lens = scope.into_lens();
    reducers.map(move |inner| lift(&lens, inner))
}

/// Narrow a source to a child's slice
pub fn isolate_source<T, R>(source: &StateSource<T>, scope: impl IntoLens<T, R>) -> StateSource<R>
where
    T: Clone + PartialEq + 'static,
    R: Clone + PartialEq + 'static,
{
    source.select(scope)
}
