//! Reactive state cells
//!
//! A [`StateSource`] wraps a stream of optional values. Absent values are
//! dropped, consecutive equal values are dropped unless deduplication is
//! turned off, and the latest value is replayed to late subscribers. A
//! source narrows into a child source through a scope with
//! [`StateSource::select`].

use crate::config::StateConfig;
use crate::isolate;
use crate::lens::IntoLens;
use crate::reducer::Reducer;
use lamina_stream::Stream;
use std::fmt;
use std::rc::Rc;

/// A deduplicating, remembered state stream
pub struct StateSource<T> {
    stream: Stream<T>,
    name: Rc<str>,
}

impl<T> Clone for StateSource<T> {
    fn clone(&self) -> Self {
        Self {
            stream: self.stream.clone(),
            name: self.name.clone(),
        }
    }
}

impl<T> fmt::Debug for StateSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSource")
            .field("name", &self.name)
            .field("stream", &self.stream)
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> StateSource<T> {
    /// Wrap a stream of optional values, dropping repeats
    pub fn new(upstream: &Stream<Option<T>>, name: impl Into<Rc<str>>) -> Self {
        Self::with_dedupe(upstream, name, true)
    }

    /// Wrap a stream of optional values, choosing whether to drop repeats
    pub fn with_dedupe(upstream: &Stream<Option<T>>, name: impl Into<Rc<str>>, dedupe: bool) -> Self {
        let present = upstream.filter_map(|value| value);
        let present = if dedupe { present.drop_repeats() } else { present };
        Self {
            stream: present.remember(),
            name: name.into(),
        }
    }

    /// Wrap a stream of optional values using a config's name and dedupe flag
    pub fn from_config(upstream: &Stream<Option<T>>, config: &StateConfig) -> Self {
        Self::with_dedupe(upstream, config.name.as_str(), config.dedupe)
    }

    /// The underlying remembered stream
    pub fn stream(&self) -> &Stream<T> {
        &self.stream
    }

    /// The channel name this source was created under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The latest value, while the source has listeners
    pub fn current(&self) -> Option<T> {
        self.stream.last()
    }

    /// Narrow this source through a scope
    ///
    /// Values whose projection is absent are dropped; the child source
    /// deduplicates independently of its parent.
    pub fn select<R>(&self, scope: impl IntoLens<T, R>) -> StateSource<R>
    where
        R: Clone + PartialEq + 'static,
    {
        let lens = scope.into_lens();
        let projected = self.stream.map(move |outer| lens.get(Some(&outer)));
        StateSource::new(&projected, self.name.clone())
    }

    /// Same as [`StateSource::select`]
    pub fn isolate_source<R>(&self, scope: impl IntoLens<T, R>) -> StateSource<R>
    where
        R: Clone + PartialEq + 'static,
    {
        self.select(scope)
    }

    /// Lift a child's reducers into reducers over this source's values
    pub fn isolate_sink<R>(
        &self,
        reducers: &Stream<Reducer<R>>,
        scope: impl IntoLens<T, R>,
    ) -> Stream<Reducer<T>>
    where
        R: Clone + PartialEq + 'static,
    {
        isolate::isolate_sink(reducers, scope)
    }
}
