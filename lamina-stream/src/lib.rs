//! Lamina push streams
//!
//! This crate provides the synchronous, single-threaded push-stream
//! substrate the lamina state layer is built on.
//!
//! # Model
//!
//! - A [`Stream`] is hot: values go to whoever is listening right now.
//! - It is also lazy: its [`Producer`] only runs while at least one
//!   [`Listener`] is attached, and it restarts from scratch when a
//!   listener attaches again later.
//! - Delivery is synchronous. `send_next` returns only after every
//!   listener has seen the value, including anything those listeners
//!   pushed in turn.
//! - A remembered stream (see [`Stream::remember`]) replays its latest
//!   value to late subscribers.
//! - An error or completion notifies every listener once and then tears
//!   the stream down.
//!
//! # Example
//!
//! ```rust
//! use lamina_stream::Stream;
//!
//! let clicks: Stream<u32> = Stream::create();
//! let total = clicks.fold(0, |acc, n| acc + n);
//!
//! let (seen, _sub) = total.collect();
//! clicks.send_next(1);
//! clicks.send_next(2);
//!
//! assert_eq!(seen.values(), vec![0, 1, 3]);
//! ```

pub mod error;
pub mod listener;
pub mod operators;
pub mod stream;
pub mod types;

pub use error::{Result, StreamError};
pub use listener::{Collector, Event, Listener, Observer};
pub use stream::{Producer, Sink, Stream, Subscription, WeakStream};
pub use types::{StreamId, SubscriptionId};
