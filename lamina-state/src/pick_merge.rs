//! Dynamic fan-in merge
//!
//! Tracks one channel of every live instance and forwards each value to a
//! single output as it arrives. Index changes are irrelevant here. A child
//! channel that completes is dropped; the merged output only completes
//! when the snapshot stream does.

use crate::collection::{entry_pick, CollectionKey, EntryPick, EntryRef, Instances};
use crate::selector::Selector;
use lamina_stream::{Listener, Producer, Sink, Stream, StreamError, Subscription, SubscriptionId};
use lamina_types::ChannelName;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// Operator form of [`crate::Collection::pick_merge`]
pub fn pick_merge<T, K, Si, R>(
    selector: impl Into<Selector<Si, R>>,
) -> impl Fn(&Stream<Instances<T, K, Si>>) -> Stream<R>
where
    T: 'static,
    K: CollectionKey,
    Si: 'static,
    R: Clone + 'static,
{
    let selector = selector.into();
    move |instances: &Stream<Instances<T, K, Si>>| {
        merge(instances, selector.channel().clone(), entry_pick(selector.clone()))
    }
}

pub(crate) fn merge<T, K, Si, R>(
    instances: &Stream<Instances<T, K, Si>>,
    channel: ChannelName,
    pick: EntryPick<T, K, Si, R>,
) -> Stream<R>
where
    T: 'static,
    K: CollectionKey,
    Si: 'static,
    R: Clone + 'static,
{
    Stream::create_with(MergeProducer {
        core: Rc::new(Merge {
            instances: instances.clone(),
            channel,
            pick,
            handles: RefCell::new(HashMap::new()),
            primed: Cell::new(false),
            sink: RefCell::new(None),
            subscription: Cell::new(None),
            active: Cell::new(false),
        }),
    })
}

struct Handle {
    subscription: RefCell<Option<Subscription>>,
    live: Cell<bool>,
}

impl Handle {
    fn release(&self) {
        self.live.set(false);
        let subscription = self.subscription.borrow_mut().take();
        drop(subscription);
    }
}

struct Merge<T, K, Si, R> {
    instances: Stream<Instances<T, K, Si>>,
    channel: ChannelName,
    pick: EntryPick<T, K, Si, R>,
    handles: RefCell<HashMap<K, Rc<Handle>>>,
    primed: Cell<bool>,
    sink: RefCell<Option<Sink<R>>>,
    subscription: Cell<Option<SubscriptionId>>,
    active: Cell<bool>,
}

impl<T, K, Si, R> Merge<T, K, Si, R>
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

        let (added, removed) = if self.primed.replace(true) {
            (snapshot.added, snapshot.removed)
        } else {
            (snapshot.entries_by_index(), Vec::new())
        };

        for entry in &removed {
            let handle = self.handles.borrow_mut().remove(entry.key());
            if let Some(handle) = handle {
                handle.release();
            }
        }

        let mut fresh: Vec<(EntryRef<T, K, Si>, Rc<Handle>)> = Vec::with_capacity(added.len());
        for entry in &added {
            let handle = Rc::new(Handle {
                subscription: RefCell::new(None),
                live: Cell::new(true),
            });
            let replaced = self.handles.borrow_mut().insert(entry.key().clone(), handle.clone());
            if let Some(old) = replaced {
                old.release();
            }
            fresh.push((entry.clone(), handle));
        }

        for (entry, handle) in fresh {
            self.attach(&entry, &handle);
        }
    }

    fn attach(self: &Rc<Self>, entry: &EntryRef<T, K, Si>, handle: &Rc<Handle>) {
        if !handle.live.get() || !self.active.get() {
            return;
        }
        let stream = match (self.pick)(entry) {
            Some(stream) => stream,
            None => {
                tracing::debug!(channel = %self.channel, key = ?entry.key(), "instance has no such channel");
                Stream::never()
            }
        };
        let subscription = stream.subscribe(Rc::new(ChildListener {
            core: Rc::downgrade(self),
            key: entry.key().clone(),
            handle: Rc::downgrade(handle),
        }));
        if handle.live.get() {
            *handle.subscription.borrow_mut() = Some(subscription);
        }
    }

    fn forward(&self, value: R) {
        let sink = self.sink.borrow().clone();
        if let Some(sink) = sink {
            sink.next(value);
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

    fn drop_child(&self, key: &K, handle: &Rc<Handle>) {
        let removed = {
            let mut handles = self.handles.borrow_mut();
            match handles.get(key) {
                Some(current) if Rc::ptr_eq(current, handle) => handles.remove(key),
                _ => None,
            }
        };
        if let Some(handle) = removed {
            tracing::trace!(channel = %self.channel, key = ?key, "merged child completed");
            handle.release();
        }
    }

    fn reset(&self) {
        self.active.set(false);
        if let Some(id) = self.subscription.take() {
            self.instances.remove_listener(id);
        }
        self.sink.borrow_mut().take();
        let handles = std::mem::take(&mut *self.handles.borrow_mut());
        tracing::debug!(channel = %self.channel, released = handles.len(), "merge stopped");
        for handle in handles.values() {
            handle.release();
        }
        self.primed.set(false);
    }
}

struct SnapshotListener<T, K, Si, R> {
    core: Weak<Merge<T, K, Si, R>>,
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
    core: Weak<Merge<T, K, Si, R>>,
    key: K,
    handle: Weak<Handle>,
}

impl<T, K, Si, R> ChildListener<T, K, Si, R> {
    fn live(&self) -> Option<(Rc<Merge<T, K, Si, R>>, Rc<Handle>)> {
        let core = self.core.upgrade()?;
        let handle = self.handle.upgrade()?;
        handle.live.get().then_some((core, handle))
    }
}

impl<T, K, Si, R> Listener<R> for ChildListener<T, K, Si, R>
where
    T: 'static,
    K: CollectionKey,
    Si: 'static,
    R: Clone + 'static,
{
    fn next(&self, value: R) {
        if let Some((core, _)) = self.live() {
            core.forward(value);
        }
    }

    fn error(&self, err: StreamError) {
        if let Some((core, _)) = self.live() {
            let key = format!("{:?}", self.key);
            core.fail(StreamError::child(key, core.channel.as_str(), err));
        }
    }

    fn complete(&self) {
        if let Some((core, handle)) = self.live() {
            core.drop_child(&self.key, &handle);
        }
    }
}

struct MergeProducer<T, K, Si, R> {
    core: Rc<Merge<T, K, Si, R>>,
}

impl<T, K, Si, R> Producer<R> for MergeProducer<T, K, Si, R>
where
    T: 'static,
    K: CollectionKey,
    Si: 'static,
    R: Clone + 'static,
{
    fn start(&self, sink: Sink<R>) {
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
