//! Sink bundles produced by collection children

use crate::reducer::Reducer;
use lamina_stream::Stream;
use lamina_types::ChannelName;
use std::collections::HashMap;
use std::fmt;

/// Output of one child instance
///
/// Bundles are usually plain structs holding one stream per channel. The
/// only channel the state layer reads on its own is the reducer channel,
/// which the collection lifts into reducers over the parent list.
pub trait SinkBundle<T> {
    /// The child's reducer channel, if it has one
    fn reducers(&self) -> Option<Stream<Reducer<T>>> {
        None
    }
}

impl<T> SinkBundle<T> for () {}

/// A child whose only output is its reducer channel
impl<T: Clone + 'static> SinkBundle<T> for Stream<Reducer<T>> {
    fn reducers(&self) -> Option<Stream<Reducer<T>>> {
        Some(self.clone())
    }
}

/// Homogeneous bundle of named channels
pub struct ChannelMap<V> {
    channels: HashMap<ChannelName, Stream<V>>,
}

impl<V: Clone + 'static> ChannelMap<V> {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Add a channel, builder style
    pub fn with(mut self, name: impl Into<ChannelName>, stream: Stream<V>) -> Self {
        self.insert(name, stream);
        self
    }

    /// Add or replace a channel
    pub fn insert(&mut self, name: impl Into<ChannelName>, stream: Stream<V>) {
        self.channels.insert(name.into(), stream);
    }

    /// Look up a channel
    pub fn get(&self, name: &ChannelName) -> Option<Stream<V>> {
        self.channels.get(name).cloned()
    }

    /// Check if a channel is present
    pub fn contains(&self, name: &ChannelName) -> bool {
        self.channels.contains_key(name)
    }

    /// Channel names, in no particular order
    pub fn names(&self) -> impl Iterator<Item = &ChannelName> {
        self.channels.keys()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl<V: Clone + 'static> Default for ChannelMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for ChannelMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.channels.keys()).finish()
    }
}

impl<T, V> SinkBundle<T> for ChannelMap<V> {}
