//! Listeners receiving stream events
//!
//! A listener is attached to a stream and receives every value pushed
//! through it, plus at most one terminal event (error or completion).
//! Callbacks take `&self`: a listener may be re-entered while it is still
//! handling a previous value, so implementations keep their state in
//! `Cell`/`RefCell` and never hold a borrow across a downstream call.

use crate::error::StreamError;
use std::cell::RefCell;
use std::fmt;

/// Trait for receiving stream events
pub trait Listener<T> {
    /// Called for every value
    fn next(&self, value: T);

    /// Called once if the stream fails
    fn error(&self, err: StreamError) {
        let _ = err;
    }

    /// Called once if the stream completes
    fn complete(&self) {}
}

type NextFn<T> = Box<dyn Fn(T)>;
type ErrorFn = Box<dyn Fn(StreamError)>;
type CompleteFn = Box<dyn Fn()>;

/// A listener that calls closures
pub struct Observer<T> {
    on_next: NextFn<T>,
    on_error: Option<ErrorFn>,
    on_complete: Option<CompleteFn>,
}

impl<T> Observer<T> {
    /// Create an observer from a value callback
    pub fn new(on_next: impl Fn(T) + 'static) -> Self {
        Self {
            on_next: Box::new(on_next),
            on_error: None,
            on_complete: None,
        }
    }

    /// Attach an error callback
    pub fn on_error(mut self, f: impl Fn(StreamError) + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Attach a completion callback
    pub fn on_complete(mut self, f: impl Fn() + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }
}

impl<T> Listener<T> for Observer<T> {
    fn next(&self, value: T) {
        (self.on_next)(value);
    }

    fn error(&self, err: StreamError) {
        match &self.on_error {
            Some(f) => f(err),
            None => tracing::debug!(%err, "unhandled stream error"),
        }
    }

    fn complete(&self) {
        if let Some(f) = &self.on_complete {
            f();
        }
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("on_error", &self.on_error.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// One recorded stream event
#[derive(Debug, Clone, PartialEq)]
pub enum Event<T> {
    /// A value
    Next(T),
    /// A terminal error
    Error(StreamError),
    /// Completion
    Complete,
}

/// A listener that records every event it receives
#[derive(Debug)]
pub struct Collector<T> {
    events: RefCell<Vec<Event<T>>>,
}

impl<T: Clone> Collector<T> {
    /// Create an empty collector
    pub fn new() -> Self {
        Self {
            events: RefCell::new(Vec::new()),
        }
    }

    /// All recorded events
    pub fn events(&self) -> Vec<Event<T>> {
        self.events.borrow().clone()
    }

    /// Recorded values, in arrival order
    pub fn values(&self) -> Vec<T> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Next(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    /// The most recent value, if any
    pub fn last(&self) -> Option<T> {
        self.events.borrow().iter().rev().find_map(|e| match e {
            Event::Next(v) => Some(v.clone()),
            _ => None,
        })
    }

    /// The recorded error, if the stream failed
    pub fn error(&self) -> Option<StreamError> {
        self.events.borrow().iter().find_map(|e| match e {
            Event::Error(err) => Some(err.clone()),
            _ => None,
        })
    }

    /// Check if the stream completed
    pub fn is_complete(&self) -> bool {
        self.events
            .borrow()
            .iter()
            .any(|e| matches!(e, Event::Complete))
    }

    /// Take the recorded events, leaving the collector empty
    pub fn take(&self) -> Vec<Event<T>> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    /// Take only the recorded values, leaving the collector empty
    pub fn take_values(&self) -> Vec<T> {
        self.take()
            .into_iter()
            .filter_map(|e| match e {
                Event::Next(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    /// Clear recorded events
    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl<T: Clone> Default for Collector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Listener<T> for Collector<T> {
    fn next(&self, value: T) {
        self.events.borrow_mut().push(Event::Next(value));
    }

    fn error(&self, err: StreamError) {
        self.events.borrow_mut().push(Event::Error(err));
    }

    fn complete(&self) {
        self.events.borrow_mut().push(Event::Complete);
    }
}
