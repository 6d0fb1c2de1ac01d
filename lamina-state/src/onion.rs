//! Root feedback loop
//!
//! [`onionify`] closes the reducer cycle around a component: the state it
//! receives is the fold of the reducers it emits. The reducer proxy only
//! holds the component's reducer stream weakly, so the returned [`Onion`]
//! owns the loop and dropping it tears the loop down.

use crate::config::StateConfig;
use crate::error::Result;
use crate::reducer::Reducer;
use crate::sinks::SinkBundle;
use crate::source::StateSource;
use lamina_stream::Stream;
use std::fmt;

/// A component wired into its own state loop
pub struct Onion<T, Si> {
    /// The root state source
    pub state: StateSource<T>,
    /// Whatever the component returned
    pub sinks: Si,
    reducers: Option<Stream<Reducer<T>>>,
}

impl<T, Si> Onion<T, Si> {
    /// The reducer stream feeding the loop, if the component has one
    pub fn reducers(&self) -> Option<&Stream<Reducer<T>>> {
        self.reducers.as_ref()
    }
}

impl<T, Si: fmt::Debug> fmt::Debug for Onion<T, Si> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Onion")
            .field("state", &self.state)
            .field("sinks", &self.sinks)
            .field("reducers", &self.reducers.is_some())
            .finish()
    }
}

/// Run `main` with a state source fed by its own reducers
///
/// State starts absent. Every reducer `main` emits is applied to the
/// previous state and the result, when present, is what the source emits.
/// Nothing runs until something subscribes to the state or to a sink that
/// depends on it.
pub fn onionify<T, Si>(config: &StateConfig, main: impl FnOnce(StateSource<T>) -> Si) -> Result<Onion<T, Si>>
where
    T: Clone + PartialEq + 'static,
    Si: SinkBundle<T>,
{
    let proxy: Stream<Reducer<T>> = Stream::create();
    let folded = proxy
        .fold(None, |state: &Option<T>, reducer: Reducer<T>| reducer.apply(state.as_ref()))
        .skip(1);
    let state = StateSource::from_config(&folded, config);

    let sinks = main(state.clone());
    let reducers = sinks.reducers();
    match &reducers {
        Some(reducers) => proxy.imitate(reducers)?,
        None => tracing::debug!(name = %config.name, "component has no reducer channel, state stays absent"),
    }

    Ok(Onion {
        state,
        sinks,
        reducers,
    })
}
