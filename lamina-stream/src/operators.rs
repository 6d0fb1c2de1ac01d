//! Stream operators and constructors
//!
//! Every operator returns a new lazy stream whose producer subscribes to
//! the upstream stream on start and unsubscribes on stop. Per-start state
//! (fold accumulators, last-seen values, skip counters) is created fresh
//! each time the operator starts.

use crate::error::StreamError;
use crate::listener::Listener;
use crate::stream::{Forward, Producer, Sink, Stream};
use crate::types::SubscriptionId;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

type BuildFn<A, B> = Box<dyn Fn(Sink<B>) -> Rc<dyn Listener<A>>>;

/// Producer that attaches a freshly built listener to an upstream stream
struct Operator<A, B> {
    upstream: Stream<A>,
    build: BuildFn<A, B>,
    subscription: Cell<Option<SubscriptionId>>,
    active: Cell<bool>,
}

impl<A: Clone + 'static, B: Clone + 'static> Operator<A, B> {
    fn stream(
        upstream: &Stream<A>,
        remember: bool,
        build: impl Fn(Sink<B>) -> Rc<dyn Listener<A>> + 'static,
    ) -> Stream<B> {
        let op = Operator {
            upstream: upstream.clone(),
            build: Box::new(build),
            subscription: Cell::new(None),
            active: Cell::new(false),
        };
        Stream::from_parts(Some(Rc::new(op)), remember)
    }
}

impl<A: Clone + 'static, B: Clone + 'static> Producer<B> for Operator<A, B> {
    fn start(&self, sink: Sink<B>) {
        self.active.set(true);
        let listener = (self.build)(sink);
        let id = self.upstream.add_listener(listener);
        if self.active.get() {
            self.subscription.set(Some(id));
        } else {
            // Stopped while the upstream was still delivering on attach
            self.upstream.remove_listener(id);
        }
    }

    fn stop(&self) {
        self.active.set(false);
        if let Some(id) = self.subscription.take() {
            self.upstream.remove_listener(id);
        }
    }
}

/// Listener applying a closure per value and forwarding terminal events
struct Step<A, B> {
    sink: Sink<B>,
    on_next: Box<dyn Fn(A, &Sink<B>)>,
}

impl<A, B: Clone + 'static> Step<A, B> {
    fn listener(sink: Sink<B>, on_next: impl Fn(A, &Sink<B>) + 'static) -> Rc<dyn Listener<A>>
    where
        A: 'static,
    {
        Rc::new(Step {
            sink,
            on_next: Box::new(on_next),
        })
    }
}

impl<A, B: Clone + 'static> Listener<A> for Step<A, B> {
    fn next(&self, value: A) {
        (self.on_next)(value, &self.sink);
    }

    fn error(&self, err: StreamError) {
        self.sink.error(err);
    }

    fn complete(&self) {
        self.sink.complete();
    }
}

impl<T: Clone + 'static> Stream<T> {
    /// Transform every value
    pub fn map<R: Clone + 'static>(&self, f: impl Fn(T) -> R + 'static) -> Stream<R> {
        let f = Rc::new(f);
        Operator::stream(self, false, move |sink| {
            let f = f.clone();
            Step::listener(sink, move |v, out| out.next(f(v)))
        })
    }

    /// Replace every value with a constant
    pub fn map_to<R: Clone + 'static>(&self, value: R) -> Stream<R> {
        self.map(move |_| value.clone())
    }

    /// Keep values matching a predicate
    pub fn filter(&self, predicate: impl Fn(&T) -> bool + 'static) -> Stream<T> {
        let predicate = Rc::new(predicate);
        Operator::stream(self, false, move |sink| {
            let predicate = predicate.clone();
            Step::listener(sink, move |v, out| {
                if predicate(&v) {
                    out.next(v);
                }
            })
        })
    }

    /// Transform values, dropping those mapped to `None`
    pub fn filter_map<R: Clone + 'static>(
        &self,
        f: impl Fn(T) -> Option<R> + 'static,
    ) -> Stream<R> {
        let f = Rc::new(f);
        Operator::stream(self, false, move |sink| {
            let f = f.clone();
            Step::listener(sink, move |v, out| {
                if let Some(r) = f(v) {
                    out.next(r);
                }
            })
        })
    }

    /// Accumulate values, emitting the seed first and then every new
    /// accumulator. The result remembers its latest accumulator.
    pub fn fold<A: Clone + 'static>(
        &self,
        seed: A,
        f: impl Fn(&A, T) -> A + 'static,
    ) -> Stream<A> {
        let f = Rc::new(f);
        Operator::stream(self, true, move |sink: Sink<A>| {
            let f = f.clone();
            let acc = RefCell::new(seed.clone());
            sink.next(seed.clone());
            Step::listener(sink, move |v, out| {
                let next = {
                    let prev = acc.borrow();
                    f(&prev, v)
                };
                *acc.borrow_mut() = next.clone();
                out.next(next);
            })
        })
    }

    /// Ignore the first `count` values
    pub fn skip(&self, count: usize) -> Stream<T> {
        Operator::stream(self, false, move |sink| {
            let seen = Cell::new(0usize);
            Step::listener(sink, move |v, out| {
                if seen.get() < count {
                    seen.set(seen.get() + 1);
                } else {
                    out.next(v);
                }
            })
        })
    }

    /// Drop values equal to the previous one according to `eq`
    pub fn drop_repeats_by(&self, eq: impl Fn(&T, &T) -> bool + 'static) -> Stream<T> {
        let eq = Rc::new(eq);
        Operator::stream(self, false, move |sink| {
            let eq = eq.clone();
            let last: RefCell<Option<T>> = RefCell::new(None);
            Step::listener(sink, move |v, out| {
                let repeat = last.borrow().as_ref().is_some_and(|prev| eq(prev, &v));
                if !repeat {
                    *last.borrow_mut() = Some(v.clone());
                    out.next(v);
                }
            })
        })
    }

    /// Drop values equal to the previous one
    pub fn drop_repeats(&self) -> Stream<T>
    where
        T: PartialEq,
    {
        self.drop_repeats_by(|a, b| a == b)
    }

    /// Share this stream, replaying its latest value to late subscribers
    pub fn remember(&self) -> Stream<T> {
        Operator::stream(self, true, |sink| {
            Rc::new(Forward::new(sink)) as Rc<dyn Listener<T>>
        })
    }

    /// Run a side effect for every value
    pub fn inspect(&self, f: impl Fn(&T) + 'static) -> Stream<T> {
        let f = Rc::new(f);
        Operator::stream(self, false, move |sink| {
            let f = f.clone();
            Step::listener(sink, move |v, out| {
                f(&v);
                out.next(v);
            })
        })
    }

    /// Trace every value at `trace` level under `label`
    pub fn debug(&self, label: &'static str) -> Stream<T>
    where
        T: std::fmt::Debug,
    {
        self.inspect(move |v| tracing::trace!(label, value = ?v, "stream value"))
    }

    /// Interleave values from several streams
    ///
    /// Fails as soon as any input fails; completes once all inputs have.
    pub fn merge(streams: Vec<Stream<T>>) -> Stream<T> {
        Stream::create_with(Merge {
            inputs: streams,
            subscriptions: RefCell::new(Vec::new()),
            active: Cell::new(false),
        })
    }

    /// Emit one value, then complete
    pub fn of(value: T) -> Stream<T> {
        Stream::from_iter(vec![value])
    }

    /// Emit every value of `values` on start, then complete
    pub fn from_iter(values: impl IntoIterator<Item = T>) -> Stream<T> {
        Stream::create_with(FromIter {
            values: values.into_iter().collect(),
        })
    }

    /// A stream that never emits
    pub fn never() -> Stream<T> {
        Stream::create()
    }

    /// A stream that completes as soon as it starts
    pub fn empty() -> Stream<T> {
        Stream::from_iter(Vec::new())
    }

    /// A stream that fails as soon as it starts
    pub fn throw(err: StreamError) -> Stream<T> {
        Stream::create_with(Throw { err })
    }
}

struct FromIter<T> {
    values: Vec<T>,
}

impl<T: Clone + 'static> Producer<T> for FromIter<T> {
    fn start(&self, sink: Sink<T>) {
        for value in &self.values {
            sink.next(value.clone());
        }
        sink.complete();
    }

    fn stop(&self) {}
}

struct Throw {
    err: StreamError,
}

impl<T: Clone + 'static> Producer<T> for Throw {
    fn start(&self, sink: Sink<T>) {
        sink.error(self.err.clone());
    }

    fn stop(&self) {}
}

struct Merge<T> {
    inputs: Vec<Stream<T>>,
    subscriptions: RefCell<Vec<(usize, SubscriptionId)>>,
    active: Cell<bool>,
}

struct MergeListener<T> {
    sink: Sink<T>,
    remaining: Rc<Cell<usize>>,
}

impl<T: Clone + 'static> Listener<T> for MergeListener<T> {
    fn next(&self, value: T) {
        self.sink.next(value);
    }

    fn error(&self, err: StreamError) {
        self.sink.error(err);
    }

    fn complete(&self) {
        let left = self.remaining.get().saturating_sub(1);
        self.remaining.set(left);
        if left == 0 {
            self.sink.complete();
        }
    }
}

impl<T: Clone + 'static> Producer<T> for Merge<T> {
    fn start(&self, sink: Sink<T>) {
        if self.inputs.is_empty() {
            sink.complete();
            return;
        }
        self.active.set(true);
        let remaining = Rc::new(Cell::new(self.inputs.len()));
        for (i, input) in self.inputs.iter().enumerate() {
            let id = input.add_listener(Rc::new(MergeListener {
                sink: sink.clone(),
                remaining: remaining.clone(),
            }));
            if !self.active.get() {
                // An input failed or the last one completed while attaching
                input.remove_listener(id);
                break;
            }
            self.subscriptions.borrow_mut().push((i, id));
        }
    }

    fn stop(&self) {
        self.active.set(false);
        let subscriptions = std::mem::take(&mut *self.subscriptions.borrow_mut());
        for (i, id) in subscriptions {
            self.inputs[i].remove_listener(id);
        }
    }
}
