//! Lamina state layer
//!
//! Lens-scoped reactive state on top of [`lamina_stream`], with keyed
//! collections whose children come and go as the state changes.
//!
//! # Architecture
//!
//! ```text
//! reducers ──fold──▶ StateSource ──select──▶ StateSource<Vec<T>>
//!    ▲                                          │ as_collection
//!    │                                          ▼
//!    └──── Collection::reducers ◀──── Instances snapshots ──▶ pick_combine / pick_merge
//! ```
//!
//! - [`Lens`] and [`IntoLens`] address a slice of a larger value.
//! - [`StateSource`] is a deduplicating, remembered state stream.
//! - [`isolate_sink`] lifts a child's reducers through a lens.
//! - [`StateSource::as_collection`] reconciles arrays against a cache of
//!   per-key child instances and emits [`Instances`] snapshots.
//! - [`pick_combine()`] and [`pick_merge()`] follow one channel of every live
//!   child as children are added and removed.
//! - [`onionify()`] closes the reducer loop at the root.
//!
//! # Example
//!
//! ```rust
//! use lamina_state::{ChildSources, Selector, SinkBundle, StateSource};
//! use lamina_stream::Stream;
//! use lamina_types::{Key, Value};
//! use serde_json::json;
//!
//! struct Todo {
//!     label: Stream<String>,
//! }
//!
//! impl SinkBundle<Value> for Todo {}
//!
//! let todos: Stream<Option<Vec<Value>>> = Stream::create();
//! let source = StateSource::new(&todos, "todos");
//! let collection = source.as_collection(
//!     |child: ChildSources<Value, Key, ()>| Todo {
//!         label: child
//!             .state
//!             .stream()
//!             .map(|item: Value| item["title"].as_str().unwrap_or_default().to_string()),
//!     },
//!     (),
//! );
//!
//! let labels = collection.pick_combine(Selector::new("label", |todo: &Todo| Some(todo.label.clone())));
//! let (seen, _sub) = labels.collect();
//!
//! todos.send_next(Some(vec![
//!     json!({"key": 1, "title": "write"}),
//!     json!({"key": 2, "title": "test"}),
//! ]));
//!
//! assert_eq!(seen.values(), vec![vec!["write".to_string(), "test".to_string()]]);
//! ```

pub mod collection;
pub mod config;
pub mod error;
pub mod isolate;
pub mod lens;
pub mod metrics;
pub mod onion;
pub mod pick_combine;
pub mod pick_merge;
pub mod reducer;
pub mod selector;
pub mod sinks;
pub mod source;

pub use collection::{ChildSources, Collection, CollectionEntry, CollectionKey, EntryRef, Instances};
pub use config::StateConfig;
pub use error::{Result, StateError};
pub use isolate::{isolate_sink, isolate_source, lift};
pub use lens::{array_items, field, index, instance_lens, IntoLens, KeyFn, Lens};
pub use metrics::{CollectionMetrics, MetricsSnapshot};
pub use onion::{onionify, Onion};
pub use pick_combine::pick_combine;
pub use pick_merge::pick_merge;
pub use reducer::Reducer;
pub use selector::Selector;
pub use sinks::{ChannelMap, SinkBundle};
pub use source::StateSource;
