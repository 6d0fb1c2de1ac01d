//! Channel selectors for the dynamic combinators

use crate::reducer::Reducer;
use crate::sinks::{ChannelMap, SinkBundle};
use lamina_stream::Stream;
use lamina_types::ChannelName;
use std::fmt;
use std::rc::Rc;

type PickFn<Si, R> = Rc<dyn Fn(&Si) -> Option<Stream<R>>>;

/// Picks one output channel out of every child's sink bundle
///
/// A child whose bundle lacks the channel is tracked through a stream that
/// never emits, unless a fallback value is configured.
pub struct Selector<Si, R> {
    channel: ChannelName,
    pick: PickFn<Si, R>,
    fallback: Option<R>,
}

impl<Si, R: Clone> Clone for Selector<Si, R> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            pick: self.pick.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

impl<Si, R> fmt::Debug for Selector<Si, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("channel", &self.channel)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl<Si: 'static, R: Clone + 'static> Selector<Si, R> {
    /// Create a selector from a channel name and an accessor
    pub fn new(channel: impl Into<ChannelName>, pick: impl Fn(&Si) -> Option<Stream<R>> + 'static) -> Self {
        Self {
            channel: channel.into(),
            pick: Rc::new(pick),
            fallback: None,
        }
    }

    /// Emit `value` once for children that lack the channel
    pub fn with_fallback(mut self, value: R) -> Self {
        self.fallback = Some(value);
        self
    }

    /// The channel this selector picks
    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    /// The channel's stream in one bundle, or the fallback if configured
    pub fn resolve(&self, sinks: &Si) -> Option<Stream<R>> {
        (self.pick)(sinks).or_else(|| self.fallback.clone().map(Stream::of))
    }
}

impl<R: Clone + 'static> Selector<ChannelMap<R>, R> {
    /// Pick a channel of a [`ChannelMap`] by name
    pub fn named(channel: impl Into<ChannelName>) -> Self {
        let channel = channel.into();
        let name = channel.clone();
        Selector::new(channel, move |sinks: &ChannelMap<R>| sinks.get(&name))
    }
}

impl<R: Clone + 'static> From<&str> for Selector<ChannelMap<R>, R> {
    fn from(channel: &str) -> Self {
        Selector::named(channel)
    }
}

impl<T, Si> Selector<Si, Reducer<T>>
where
    T: 'static,
    Si: SinkBundle<T> + 'static,
{
    /// Pick every child's own (unlifted) reducer channel
    pub fn reducers() -> Self {
        Selector::new("reducers", |sinks: &Si| sinks.reducers())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Child {
        view: Stream<String>,
    }

    #[test]
    fn test_struct_selector() {
        let child = Child {
            view: Stream::create(),
        };
        let selector = Selector::new("view", |c: &Child| Some(c.view.clone()));

        assert_eq!(selector.channel().as_str(), "view");
        assert_eq!(selector.resolve(&child).map(|s| s.id()), Some(child.view.id()));
    }

    #[test]
    fn test_named_and_fallback() {
        let sinks: ChannelMap<i32> = ChannelMap::new();
        let selector: Selector<ChannelMap<i32>, i32> = "count".into();
        assert!(selector.resolve(&sinks).is_none());

        let fallback = selector.with_fallback(0);
        let stream = fallback.resolve(&sinks).unwrap();
        let (collector, _sub) = stream.collect();
        assert_eq!(collector.values(), vec![0]);
        assert!(collector.is_complete());
    }

    #[test]
    fn test_reducers_selector() {
        let reducers: Stream<Reducer<i32>> = Stream::create();
        let selector = Selector::<Stream<Reducer<i32>>, Reducer<i32>>::reducers();
        assert_eq!(selector.resolve(&reducers).map(|s| s.id()), Some(reducers.id()));
    }
}
