//! Hot, synchronous push streams
//!
//! A [`Stream`] owns a list of listeners and an optional [`Producer`]. The
//! producer is started when the first listener attaches and stopped when the
//! last one leaves, so a stream only does work while somebody is listening.
//! Values pushed into a stream are delivered to every current listener
//! before the push returns.
//!
//! Ownership runs from consumers to producers: a downstream stream holds its
//! upstream strongly, while the listener it attaches upstream only holds a
//! weak [`Sink`] back. Dropping the last handle to a running stream stops
//! its producer.

use crate::error::{Result, StreamError};
use crate::listener::{Collector, Listener, Observer};
use crate::types::{StreamId, SubscriptionId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// Source of values for a stream
///
/// `start` is called when the stream gains its first listener, `stop` when
/// it loses its last one. A producer may push synchronously from `start`.
pub trait Producer<T> {
    /// Begin producing into `sink`
    fn start(&self, sink: Sink<T>);

    /// Stop producing and release upstream subscriptions
    fn stop(&self);
}

pub(crate) struct Inner<T> {
    id: StreamId,
    listeners: RefCell<Vec<(SubscriptionId, Rc<dyn Listener<T>>)>>,
    producer: RefCell<Option<Rc<dyn Producer<T>>>>,
    running: Cell<bool>,
    remember: bool,
    memory: RefCell<Option<T>>,
}

impl<T: Clone + 'static> Inner<T> {
    fn new(producer: Option<Rc<dyn Producer<T>>>, remember: bool) -> Self {
        Self {
            id: StreamId::new(),
            listeners: RefCell::new(Vec::new()),
            producer: RefCell::new(producer),
            running: Cell::new(false),
            remember,
            memory: RefCell::new(None),
        }
    }

    fn add(self: &Rc<Self>, listener: Rc<dyn Listener<T>>) -> SubscriptionId {
        let id = SubscriptionId::new();
        let first = {
            let mut listeners = self.listeners.borrow_mut();
            listeners.push((id, listener.clone()));
            listeners.len() == 1
        };

        // Late subscribers see the latest value before anything new
        if self.remember {
            let replay = self.memory.borrow().clone();
            if let Some(value) = replay {
                listener.next(value);
            }
        }

        if first {
            self.start_producer();
        }
        id
    }

    fn remove(&self, id: SubscriptionId) {
        let emptied = {
            let mut listeners = self.listeners.borrow_mut();
            let before = listeners.len();
            listeners.retain(|(sid, _)| *sid != id);
            before != listeners.len() && listeners.is_empty()
        };
        if emptied {
            self.stop_producer();
        }
    }

    fn start_producer(self: &Rc<Self>) {
        let producer = self.producer.borrow().clone();
        if let Some(producer) = producer {
            if !self.running.replace(true) {
                tracing::trace!(stream = %self.id, "starting producer");
                producer.start(Sink {
                    inner: Rc::downgrade(self),
                });
            }
        }
    }

    fn stop_producer(&self) {
        if self.running.replace(false) {
            let producer = self.producer.borrow().clone();
            if let Some(producer) = producer {
                tracing::trace!(stream = %self.id, "stopping producer");
                self.memory.borrow_mut().take();
                producer.stop();
            }
        }
    }

    fn snapshot(&self) -> Vec<Rc<dyn Listener<T>>> {
        self.listeners
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect()
    }

    fn next(&self, value: T) {
        if self.remember {
            *self.memory.borrow_mut() = Some(value.clone());
        }
        let listeners = self.snapshot();
        match listeners.as_slice() {
            [] => {}
            [only] => only.next(value),
            many => {
                for listener in many {
                    listener.next(value.clone());
                }
            }
        }
    }

    fn error(&self, err: StreamError) {
        tracing::debug!(stream = %self.id, %err, "stream failed");
        for listener in self.snapshot() {
            listener.error(err.clone());
        }
        self.teardown();
    }

    fn complete(&self) {
        tracing::trace!(stream = %self.id, "stream completed");
        for listener in self.snapshot() {
            listener.complete();
        }
        self.teardown();
    }

    fn teardown(&self) {
        self.listeners.borrow_mut().clear();
        self.stop_producer();
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if self.running.get() {
            if let Some(producer) = self.producer.get_mut().take() {
                producer.stop();
            }
        }
    }
}

/// Detaches a listener without knowing the stream's value type
trait Detach {
    fn detach(&self, id: SubscriptionId);
}

impl<T: Clone + 'static> Detach for Inner<T> {
    fn detach(&self, id: SubscriptionId) {
        self.remove(id);
    }
}

/// A hot push stream
pub struct Stream<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.inner.id)
            .field("listeners", &self.inner.listeners.borrow().len())
            .field("running", &self.inner.running.get())
            .field("remember", &self.inner.remember)
            .finish()
    }
}

impl<T: Clone + 'static> Stream<T> {
    /// Create a stream with no producer; values arrive through `send_*`
    pub fn create() -> Self {
        Self::from_parts(None, false)
    }

    /// Create a stream driven by a producer
    pub fn create_with(producer: impl Producer<T> + 'static) -> Self {
        Self::from_parts(Some(Rc::new(producer)), false)
    }

    /// Create a stream that remembers its latest value for late subscribers
    pub fn create_remembered() -> Self {
        Self::from_parts(None, true)
    }

    /// Create a producer-driven stream that remembers its latest value
    pub fn create_remembered_with(producer: impl Producer<T> + 'static) -> Self {
        Self::from_parts(Some(Rc::new(producer)), true)
    }

    pub(crate) fn from_parts(producer: Option<Rc<dyn Producer<T>>>, remember: bool) -> Self {
        Self {
            inner: Rc::new(Inner::new(producer, remember)),
        }
    }

    /// Get the stream's identifier
    pub fn id(&self) -> StreamId {
        self.inner.id
    }

    /// Attach a listener, returning an RAII subscription
    pub fn subscribe(&self, listener: Rc<dyn Listener<T>>) -> Subscription {
        let id = self.add_listener(listener);
        Subscription {
            source: Some(self.inner.clone()),
            id,
        }
    }

    /// Attach a closure as a listener
    pub fn subscribe_fn(&self, on_next: impl Fn(T) + 'static) -> Subscription {
        self.subscribe(Rc::new(Observer::new(on_next)))
    }

    /// Attach a fresh collector, returning it with its subscription
    pub fn collect(&self) -> (Rc<Collector<T>>, Subscription) {
        let collector = Rc::new(Collector::new());
        let sub = self.subscribe(collector.clone());
        (collector, sub)
    }

    /// Attach a listener without an RAII handle
    ///
    /// The caller is responsible for calling [`Stream::remove_listener`].
    pub fn add_listener(&self, listener: Rc<dyn Listener<T>>) -> SubscriptionId {
        self.inner.add(listener)
    }

    /// Detach a listener; unknown IDs are ignored
    pub fn remove_listener(&self, id: SubscriptionId) {
        self.inner.remove(id);
    }

    /// Push a value to every current listener
    pub fn send_next(&self, value: T) {
        self.inner.next(value);
    }

    /// Fail the stream, notifying and detaching every listener
    pub fn send_error(&self, err: StreamError) {
        self.inner.error(err);
    }

    /// Complete the stream, notifying and detaching every listener
    pub fn send_complete(&self) {
        self.inner.complete();
    }

    /// Number of attached listeners
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Check if the producer is running
    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Check if this stream replays its latest value
    pub fn is_remembered(&self) -> bool {
        self.inner.remember
    }

    /// The remembered value, if this stream remembers and has one
    pub fn last(&self) -> Option<T> {
        self.inner.memory.borrow().clone()
    }

    /// Get a weak handle that does not keep the stream alive
    pub fn downgrade(&self) -> WeakStream<T> {
        WeakStream {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Make this producer-less stream mirror `target`
    ///
    /// This is how feedback loops are closed: a proxy stream is created
    /// first, consumed by code that eventually produces `target`, and then
    /// told to imitate it. The proxy holds `target` weakly, so whoever owns
    /// `target` owns the loop.
    pub fn imitate(&self, target: &Stream<T>) -> Result<()> {
        {
            let mut producer = self.inner.producer.borrow_mut();
            if producer.is_some() {
                return Err(StreamError::AlreadyProduced(self.inner.id));
            }
            *producer = Some(Rc::new(Imitate {
                target: target.downgrade(),
                subscription: Cell::new(None),
            }));
        }
        if self.listener_count() > 0 {
            self.inner.start_producer();
        }
        Ok(())
    }

    /// Apply an operator function to this stream
    pub fn compose<R>(&self, operator: impl FnOnce(&Stream<T>) -> R) -> R {
        operator(self)
    }
}

/// Weak handle to a stream
pub struct WeakStream<T> {
    inner: Weak<Inner<T>>,
}

impl<T> Clone for WeakStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> WeakStream<T> {
    /// Get the stream back if it is still alive
    pub fn upgrade(&self) -> Option<Stream<T>> {
        self.inner.upgrade().map(|inner| Stream { inner })
    }
}

impl<T> fmt::Debug for WeakStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStream")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// Handle a producer pushes into
///
/// Holds its stream weakly; pushing into a dropped stream is a no-op.
pub struct Sink<T> {
    inner: Weak<Inner<T>>,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> Sink<T> {
    /// Push a value
    pub fn next(&self, value: T) {
        if let Some(inner) = self.inner.upgrade() {
            inner.next(value);
        }
    }

    /// Fail the stream
    pub fn error(&self, err: StreamError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.error(err);
        }
    }

    /// Complete the stream
    pub fn complete(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.complete();
        }
    }

    /// Check if the stream behind this sink is gone
    pub fn is_closed(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

impl<T> fmt::Debug for Sink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("closed", &(self.inner.strong_count() == 0))
            .finish()
    }
}

/// RAII subscription handle
///
/// Dropping the handle detaches the listener. Detaching twice is a no-op.
pub struct Subscription {
    source: Option<Rc<dyn Detach>>,
    id: SubscriptionId,
}

impl Subscription {
    /// Get the subscription ID
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Check if the listener is still attached through this handle
    pub fn is_active(&self) -> bool {
        self.source.is_some()
    }

    /// Detach the listener
    pub fn unsubscribe(&mut self) {
        if let Some(source) = self.source.take() {
            source.detach(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Listener forwarding every event into a sink
pub(crate) struct Forward<T> {
    sink: Sink<T>,
}

impl<T> Forward<T> {
    pub(crate) fn new(sink: Sink<T>) -> Self {
        Self { sink }
    }
}

impl<T: Clone + 'static> Listener<T> for Forward<T> {
    fn next(&self, value: T) {
        self.sink.next(value);
    }

    fn error(&self, err: StreamError) {
        self.sink.error(err);
    }

    fn complete(&self) {
        self.sink.complete();
    }
}

struct Imitate<T> {
    target: WeakStream<T>,
    subscription: Cell<Option<SubscriptionId>>,
}

impl<T: Clone + 'static> Producer<T> for Imitate<T> {
    fn start(&self, sink: Sink<T>) {
        match self.target.upgrade() {
            Some(target) => {
                let id = target.add_listener(Rc::new(Forward::new(sink)));
                self.subscription.set(Some(id));
            }
            None => tracing::debug!("imitated stream was dropped before start"),
        }
    }

    fn stop(&self) {
        if let Some(id) = self.subscription.take() {
            if let Some(target) = self.target.upgrade() {
                target.remove_listener(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::Event;

    struct Counting {
        starts: Rc<Cell<u32>>,
        stops: Rc<Cell<u32>>,
        emit_on_start: Option<i32>,
    }

    impl Producer<i32> for Counting {
        fn start(&self, sink: Sink<i32>) {
            self.starts.set(self.starts.get() + 1);
            if let Some(v) = self.emit_on_start {
                sink.next(v);
            }
        }

        fn stop(&self) {
            self.stops.set(self.stops.get() + 1);
        }
    }

    fn counting(emit_on_start: Option<i32>) -> (Stream<i32>, Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let starts = Rc::new(Cell::new(0));
        let stops = Rc::new(Cell::new(0));
        let stream = Stream::create_with(Counting {
            starts: starts.clone(),
            stops: stops.clone(),
            emit_on_start,
        });
        (stream, starts, stops)
    }

    #[test]
    fn test_send_next_delivers_synchronously() {
        let stream = Stream::create();
        let (collector, _sub) = stream.collect();

        stream.send_next(1);
        stream.send_next(2);

        assert_eq!(collector.values(), vec![1, 2]);
    }

    #[test]
    fn test_producer_lifecycle() {
        let (stream, starts, stops) = counting(None);

        let mut a = stream.subscribe_fn(|_| {});
        let mut b = stream.subscribe_fn(|_| {});
        assert_eq!(starts.get(), 1);
        assert!(stream.is_running());

        a.unsubscribe();
        assert_eq!(stops.get(), 0);
        b.unsubscribe();
        assert_eq!(stops.get(), 1);
        assert!(!stream.is_running());

        // Unsubscribing twice is harmless
        b.unsubscribe();
        assert_eq!(stops.get(), 1);
    }

    #[test]
    fn test_synchronous_emission_on_start_reaches_first_listener() {
        let (stream, _, _) = counting(Some(7));
        let (collector, _sub) = stream.collect();
        assert_eq!(collector.values(), vec![7]);
    }

    #[test]
    fn test_remembered_stream_replays_to_late_subscribers() {
        let stream = Stream::create_remembered();
        stream.send_next(1);

        let (early, _a) = stream.collect();
        stream.send_next(2);
        let (late, _b) = stream.collect();

        assert_eq!(early.values(), vec![1, 2]);
        assert_eq!(late.values(), vec![2]);
        assert_eq!(stream.last(), Some(2));
    }

    #[test]
    fn test_error_tears_down() {
        let (stream, _, stops) = counting(None);
        let (collector, sub) = stream.collect();

        stream.send_error(StreamError::failed("boom"));

        assert_eq!(
            collector.events(),
            vec![Event::Error(StreamError::failed("boom"))]
        );
        assert_eq!(stream.listener_count(), 0);
        assert_eq!(stops.get(), 1);
        drop(sub);
        assert_eq!(stops.get(), 1);
    }

    #[test]
    fn test_stream_restarts_after_completion() {
        let (stream, starts, _) = counting(Some(1));
        let (first, _a) = stream.collect();
        stream.send_complete();
        assert!(first.is_complete());

        let (second, _b) = stream.collect();
        assert_eq!(second.values(), vec![1]);
        assert_eq!(starts.get(), 2);
    }

    #[test]
    fn test_dropping_running_stream_stops_producer() {
        let (stream, _, stops) = counting(None);
        let sub = stream.subscribe_fn(|_| {});
        drop(stream);
        // The subscription keeps the stream alive
        assert_eq!(stops.get(), 0);
        drop(sub);
        assert_eq!(stops.get(), 1);
    }

    #[test]
    fn test_imitate() {
        let proxy: Stream<i32> = Stream::create();
        let (collector, _sub) = proxy.collect();

        let target = Stream::create();
        proxy.imitate(&target).unwrap();
        target.send_next(5);

        assert_eq!(collector.values(), vec![5]);
        assert!(matches!(
            proxy.imitate(&target),
            Err(StreamError::AlreadyProduced(_))
        ));
    }

    #[test]
    fn test_reentrant_push_from_listener() {
        let stream: Stream<i32> = Stream::create();
        let (collector, _a) = stream.collect();

        let again = stream.clone();
        let _b = stream.subscribe_fn(move |v| {
            if v < 3 {
                again.send_next(v + 1);
            }
        });

        stream.send_next(1);
        assert_eq!(collector.values(), vec![1, 2, 3]);
    }
}
