//! Dynamic fan-out combine
//!
//! Tracks one channel of every live instance and emits the array of their
//! latest values, ordered by instance index. Nothing is emitted until
//! every tracked instance has produced at least one value.
//!
//! New instances are added in two passes: every one of them is registered
//! as pending first, and only then are their channels subscribed. A child
//! that emits synchronously on subscription therefore cannot trigger an
//! array that is missing a sibling from the same snapshot.
//!
//! Item values reach children only after the snapshot that carries them has
//! been delivered. A snapshot that both moves instances and edits their
//! items therefore emits twice: first the new order with the previous
//! values, then again once each edited child has produced its new value.

use crate::collection::{entry_pick, CollectionKey, EntryPick, EntryRef, Instances};
use crate::selector::Selector;
use lamina_stream::{Listener, Producer, Sink, Stream, StreamError, Subscription, SubscriptionId};
use lamina_types::ChannelName;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// Operator form of [`crate::Collection::pick_combine`]
///
/// ```rust,ignore
/// let views = collection.instances().compose(pick_combine(selector));
/// ```
pub fn pick_combine<T, K, Si, R>(
    selector: impl Into<Selector<Si, R>>,
) -> impl Fn(&Stream<Instances<T, K, Si>>) -> Stream<Vec<R>>
where
    T: 'static,
    K: CollectionKey,
    Si: 'static,
    R: Clone + 'static,
{
    let selector = selector.into();
    move |instances: &Stream<Instances<T, K, Si>>| {
        combine(instances, selector.channel().clone(), entry_pick(selector.clone()))
    }
}

pub(crate) fn combine<T, K, Si, R>(
    instances: &Stream<Instances<T, K, Si>>,
    channel: ChannelName,
    pick: EntryPick<T, K, Si, R>,
) -> Stream<Vec<R>>
where
    T: 'static,
    K: CollectionKey,
    Si: 'static,
    R: Clone + 'static,
{
    Stream::create_with(CombineProducer {
        core: Rc::new(Combine {
            instances: instances.clone(),
            channel,
            pick,
            handles: RefCell::new(HashMap::new()),
            pending: Cell::new(0),
            primed: Cell::new(false),
            sink: RefCell::new(None),
            subscription: Cell::new(None),
            active: Cell::new(false),
        }),
    })
}

/// Per-key subscription with the latest value seen
struct Handle<K, R> {
    key: K,
    index: Cell<usize>,
    value: RefCell<Option<R>>,
    subscription: RefCell<Option<Subscription>>,
    live: Cell<bool>,
}

impl<K, R> Handle<K, R> {
    /// Detach from the child, returning whether it was still pending
    fn release(&self) -> bool {
        self.live.set(false);
        let subscription = self.subscription.borrow_mut().take();
        drop(subscription);
        self.value.borrow().is_none()
    }
}

struct Combine<T, K, Si, R> {
    instances: Stream<Instances<T, K, Si>>,
    channel: ChannelName,
    pick: EntryPick<T, K, Si, R>,
    handles: RefCell<HashMap<K, Rc<Handle<K, R>>>>,
    pending: Cell<usize>,
    primed: Cell<bool>,
    sink: RefCell<Option<Sink<Vec<R>>>>,
    subscription: Cell<Option<SubscriptionId>>,
    active: Cell<bool>,
}

impl<T, K, Si, R> Combine<T, K, Si, R>
where
    T: 'static,
    K: CollectionKey,
    Si: 'static,
    R: Clone + 'static,
{
    fn on_snapshot(self: &Rc<Self>, snapshot: Instances<T, K, Si>) {
        if !self.active.get() {
            return;
        }

        // A combinator that starts late sees the whole cache as new
        let (added, removed, reindexed) = if self.primed.replace(true) {
            (snapshot.added, snapshot.removed, snapshot.reindexed)
        } else {
            (snapshot.entries_by_index(), Vec::new(), Vec::new())
        };

        for entry in &removed {
            let handle = self.handles.borrow_mut().remove(entry.key());
            if let Some(handle) = handle {
                if handle.release() {
                    self.settle_one();
                }
            }
        }

        for entry in &reindexed {
            let handle = self.handles.borrow().get(entry.key()).cloned();
            if let Some(handle) = handle {
                handle.index.set(entry.index());
            }
        }

        let fresh = self.register(&added);
        for (entry, handle) in fresh {
            self.attach(&entry, &handle);
        }

        let structural = added.is_empty() && !(removed.is_empty() && reindexed.is_empty());
        if structural || self.handles.borrow().is_empty() {
            self.emit_if_ready();
        }
    }

    fn register(&self, added: &[EntryRef<T, K, Si>]) -> Vec<(EntryRef<T, K, Si>, Rc<Handle<K, R>>)> {
        let mut fresh = Vec::with_capacity(added.len());
        for entry in added {
            let handle = Rc::new(Handle {
                key: entry.key().clone(),
                index: Cell::new(entry.index()),
                value: RefCell::new(None),
                subscription: RefCell::new(None),
                live: Cell::new(true),
            });
            let replaced = self.handles.borrow_mut().insert(entry.key().clone(), handle.clone());
            if let Some(old) = replaced {
                if old.release() {
                    self.settle_one();
                }
            }
            self.pending.set(self.pending.get() + 1);
            fresh.push((entry.clone(), handle));
        }
        fresh
    }

    fn attach(self: &Rc<Self>, entry: &EntryRef<T, K, Si>, handle: &Rc<Handle<K, R>>) {
        if !handle.live.get() || !self.active.get() {
            return;
        }
        let stream = match (self.pick)(entry) {
            Some(stream) => stream,
            None => {
                tracing::warn!(
                    channel = %self.channel,
                    key = ?entry.key(),
                    "instance has no such channel, combine waits on a stream that never emits"
                );
                Stream::never()
            }
        };
        let subscription = stream.subscribe(Rc::new(ChildListener {
            core: Rc::downgrade(self),
            handle: Rc::downgrade(handle),
        }));
        if handle.live.get() {
            *handle.subscription.borrow_mut() = Some(subscription);
        }
    }

    fn settle_one(&self) {
        self.pending.set(self.pending.get().saturating_sub(1));
    }

    fn on_child_value(&self, handle: &Handle<K, R>, value: R) {
        if !handle.live.get() || !self.active.get() {
            return;
        }
        if handle.value.replace(Some(value)).is_none() {
            self.settle_one();
        }
        self.emit_if_ready();
    }

    fn emit_if_ready(&self) {
        if self.pending.get() != 0 || !self.active.get() {
            return;
        }
        let values = {
            let handles = self.handles.borrow();
            let mut rows = Vec::with_capacity(handles.len());
            for handle in handles.values() {
                match handle.value.borrow().clone() {
                    Some(value) => rows.push((handle.index.get(), value)),
                    None => return,
                }
            }
            rows.sort_by_key(|(index, _)| *index);
            rows.into_iter().map(|(_, value)| value).collect::<Vec<_>>()
        };
        tracing::trace!(channel = %self.channel, len = values.len(), "combine emitting");
        let sink = self.sink.borrow().clone();
        if let Some(sink) = sink {
            sink.next(values);
        }
    }

    fn fail(&self, err: StreamError) {
        let sink = self.sink.borrow().clone();
        if let Some(sink) = sink {
            sink.error(err);
        }
    }

    fn finish(&self) {
        let sink = self.sink.borrow().clone();
        if let Some(sink) = sink {
            sink.complete();
        }
    }

    fn reset(&self) {
        self.active.set(false);
        if let Some(id) = self.subscription.take() {
            self.instances.remove_listener(id);
        }
        self.sink.borrow_mut().take();
        let handles = std::mem::take(&mut *self.handles.borrow_mut());
        tracing::debug!(channel = %self.channel, released = handles.len(), "combine stopped");
        for handle in handles.values() {
            handle.release();
        }
        self.pending.set(0);
        self.primed.set(false);
    }
}

struct SnapshotListener<T, K, Si, R> {
    core: Weak<Combine<T, K, Si, R>>,
}

impl<T, K, Si, R> Listener<Instances<T, K, Si>> for SnapshotListener<T, K, Si, R>
where
    T: 'static,
    K: CollectionKey,
    Si: 'static,
    R: Clone + 'static,
{
    fn next(&self, snapshot: Instances<T, K, Si>) {
        if let Some(core) = self.core.upgrade() {
            core.on_snapshot(snapshot);
        }
    }

    fn error(&self, err: StreamError) {
        if let Some(core) = self.core.upgrade() {
            core.fail(err);
        }
    }

    fn complete(&self) {
        if let Some(core) = self.core.upgrade() {
            core.finish();
        }
    }
}

struct ChildListener<T, K, Si, R> {
    core: Weak<Combine<T, K, Si, R>>,
    handle: Weak<Handle<K, R>>,
}

impl<T, K, Si, R> Listener<R> for ChildListener<T, K, Si, R>
where
    T: 'static,
    K: CollectionKey,
    Si: 'static,
    R: Clone + 'static,
{
    fn next(&self, value: R) {
        if let (Some(core), Some(handle)) = (self.core.upgrade(), self.handle.upgrade()) {
            core.on_child_value(&handle, value);
        }
    }

    fn error(&self, err: StreamError) {
        if let (Some(core), Some(handle)) = (self.core.upgrade(), self.handle.upgrade()) {
            if handle.live.get() {
                let key = format!("{:?}", handle.key);
                core.fail(StreamError::child(key, core.channel.as_str(), err));
            }
        }
    }

    fn complete(&self) {
        // The last value stays in the combined array
        if let Some(handle) = self.handle.upgrade() {
            tracing::trace!(key = ?handle.key, "combined child completed");
        }
    }
}

struct CombineProducer<T, K, Si, R> {
    core: Rc<Combine<T, K, Si, R>>,
}

impl<T, K, Si, R> Producer<Vec<R>> for CombineProducer<T, K, Si, R>
where
    T: 'static,
    K: CollectionKey,
    Si: 'static,
    R: Clone + 'static,
{
    fn start(&self, sink: Sink<Vec<R>>) {
        let core = &self.core;
        core.active.set(true);
        *core.sink.borrow_mut() = Some(sink);
        let id = core.instances.add_listener(Rc::new(SnapshotListener {
            core: Rc::downgrade(core),
        }));
        if core.active.get() {
            core.subscription.set(Some(id));
        } else {
            core.instances.remove_listener(id);
        }
    }

    fn stop(&self) {
        self.core.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{ChildSources, Collection};
    use crate::sinks::SinkBundle;
    use crate::source::StateSource;
    use lamina_types::{Key, Value};
    use serde_json::json;

    struct Child {
        doubled: Stream<i64>,
        manual: Stream<i64>,
    }

    impl SinkBundle<Value> for Child {}

    fn child(sources: ChildSources<Value, Key, ()>) -> Child {
        Child {
            doubled: sources
                .state
                .stream()
                .map(|item: Value| item["v"].as_i64().unwrap_or(0) * 2),
            manual: Stream::create(),
        }
    }

    fn doubled() -> Selector<Child, i64> {
        Selector::new("doubled", |c: &Child| Some(c.doubled.clone()))
    }

    fn manual() -> Selector<Child, i64> {
        Selector::new("manual", |c: &Child| Some(c.manual.clone()))
    }

    fn setup() -> (Stream<Option<Vec<Value>>>, Collection<Value, Key, Child>) {
        let upstream = Stream::create();
        let source = StateSource::new(&upstream, "items");
        (upstream, source.as_collection(child, ()))
    }

    fn items(pairs: &[(i64, i64)]) -> Option<Vec<Value>> {
        Some(pairs.iter().map(|(k, v)| json!({"key": k, "v": v})).collect())
    }

    #[test]
    fn test_synchronous_child_emits_once() {
        let (upstream, collection) = setup();
        let (arrays, _sub) = collection.pick_combine(doubled()).collect();

        upstream.send_next(items(&[(1, 10)]));

        assert_eq!(arrays.values(), vec![vec![20]]);
    }

    #[test]
    fn test_reorder_with_edit_emits_order_before_values() {
        let (upstream, collection) = setup();
        let (arrays, _sub) = collection.pick_combine(doubled()).collect();

        upstream.send_next(items(&[(1, 1), (2, 2)]));
        upstream.send_next(items(&[(2, 5), (1, 1)]));

        assert_eq!(arrays.values(), vec![vec![2, 4], vec![4, 2], vec![10, 2]]);
    }

    #[test]
    fn test_two_phase_add_never_emits_partial_arrays() {
        let (upstream, collection) = setup();
        let (arrays, _sub) = collection.pick_combine(doubled()).collect();

        upstream.send_next(items(&[(1, 1), (2, 2), (3, 3)]));

        assert_eq!(arrays.values(), vec![vec![2, 4, 6]]);
    }

    #[test]
    fn test_waits_for_every_child() {
        let (upstream, collection) = setup();
        let combined = collection.pick_combine(manual());
        let (arrays, _sub) = combined.collect();
        let (snapshots, _snap_sub) = collection.instances().collect();

        upstream.send_next(items(&[(1, 0), (2, 0)]));
        let snapshot = snapshots.last().unwrap();
        let first = snapshot.get(&Key::from(1)).unwrap().sinks().manual.clone();
        let second = snapshot.get(&Key::from(2)).unwrap().sinks().manual.clone();

        first.send_next(1);
        assert!(arrays.values().is_empty());

        second.send_next(2);
        first.send_next(3);
        assert_eq!(arrays.values(), vec![vec![1, 2], vec![3, 2]]);
    }

    #[test]
    fn test_reorder_reemits_in_new_order() {
        let (upstream, collection) = setup();
        let (arrays, _sub) = collection.pick_combine(doubled()).collect();

        upstream.send_next(items(&[(1, 1), (2, 2)]));
        upstream.send_next(items(&[(2, 2), (1, 1)]));

        assert_eq!(arrays.values(), vec![vec![2, 4], vec![4, 2]]);
    }

    #[test]
    fn test_removal_reemits_without_removed_child() {
        let (upstream, collection) = setup();
        let (arrays, _sub) = collection.pick_combine(doubled()).collect();

        upstream.send_next(items(&[(1, 1), (2, 2)]));
        upstream.send_next(items(&[(2, 2)]));

        assert_eq!(arrays.values(), vec![vec![2, 4], vec![4]]);
    }

    #[test]
    fn test_item_change_reemits() {
        let (upstream, collection) = setup();
        let (arrays, _sub) = collection.pick_combine(doubled()).collect();

        upstream.send_next(items(&[(1, 1), (2, 2)]));
        upstream.send_next(items(&[(1, 5), (2, 2)]));

        assert_eq!(arrays.values(), vec![vec![2, 4], vec![10, 4]]);
    }

    #[test]
    fn test_empty_collection_emits_empty_array_once_per_snapshot() {
        let (upstream, collection) = setup();
        let (arrays, _sub) = collection.pick_combine(doubled()).collect();

        upstream.send_next(items(&[]));
        upstream.send_next(items(&[(1, 1)]));
        upstream.send_next(items(&[]));

        assert_eq!(arrays.values(), vec![vec![], vec![2], vec![]]);
    }

    #[test]
    fn test_removing_pending_child_unblocks() {
        let (upstream, collection) = setup();
        let (arrays, _sub) = collection.pick_combine(manual()).collect();
        let (snapshots, _snap_sub) = collection.instances().collect();

        upstream.send_next(items(&[(1, 0), (2, 0)]));
        let first = snapshots.last().unwrap().get(&Key::from(1)).unwrap().sinks().manual.clone();
        first.send_next(7);
        assert!(arrays.values().is_empty());

        // Key 2 never emitted; removing it leaves only key 1
        upstream.send_next(items(&[(1, 0)]));
        assert_eq!(arrays.values(), vec![vec![7]]);
    }

    #[test]
    fn test_absent_channel_with_fallback() {
        let (upstream, collection) = setup();
        let absent = Selector::new("absent", |_: &Child| None).with_fallback(-1i64);
        let (arrays, _sub) = collection.pick_combine(absent).collect();

        upstream.send_next(items(&[(1, 1), (2, 2)]));
        assert_eq!(arrays.values(), vec![vec![-1, -1]]);
    }

    #[test]
    fn test_child_error_fails_combine() {
        let (upstream, collection) = setup();
        let (arrays, _sub) = collection.pick_combine(manual()).collect();
        let (snapshots, _snap_sub) = collection.instances().collect();

        upstream.send_next(items(&[(1, 0), (2, 0)]));
        let snapshot = snapshots.last().unwrap();
        let first = snapshot.get(&Key::from(1)).unwrap().sinks().manual.clone();
        let second = snapshot.get(&Key::from(2)).unwrap().sinks().manual.clone();

        first.send_error(StreamError::failed("child"));

        let err = arrays.error().unwrap();
        assert!(matches!(err, StreamError::Child { ref channel, .. } if channel == "manual"));
        assert_eq!(err.root_cause(), &StreamError::failed("child"));
        assert_eq!(second.listener_count(), 0);
    }

    #[test]
    fn test_late_combinator_sees_whole_cache() {
        let (upstream, collection) = setup();
        let _keepalive = collection.instances().subscribe_fn(|_| {});

        upstream.send_next(items(&[(1, 1), (2, 2)]));
        let (arrays, _sub) = collection.pick_combine(doubled()).collect();

        assert_eq!(arrays.values(), vec![vec![2, 4]]);
    }

    #[test]
    fn test_operator_form() {
        let (upstream, collection) = setup();
        let (arrays, _sub) = collection
            .instances()
            .compose(pick_combine(doubled()))
            .collect();

        upstream.send_next(items(&[(1, 3)]));
        assert_eq!(arrays.values(), vec![vec![6]]);
    }
}
