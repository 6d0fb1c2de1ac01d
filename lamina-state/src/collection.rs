//! Keyed collections
//!
//! [`StateSource::as_collection`] turns a source of arrays into a stream of
//! [`Instances`] snapshots. Every distinct key gets one child instance: a
//! per-item state source, the sink bundle built for it by the child
//! factory, and the child's reducers lifted back onto the parent list.
//! Instances live in a cache owned by the reconciler and are reused for as
//! long as their key stays in the array, including across a stop and
//! restart of the snapshot stream.
//!
//! Each upstream array produces exactly one snapshot, in this order:
//!
//! 1. Keys no longer present are removed from the cache.
//! 2. The array is walked, creating instances for new keys and recording
//!    index changes and item changes for existing ones.
//! 3. The snapshot is emitted.
//! 4. Removed instances are disposed (their item stream completes).
//! 5. Changed items are pushed into their instances.
//!
//! When a key appears more than once the last occurrence wins. Arrays that
//! arrive while a cycle is still running are processed after it, in order.

use crate::isolate::isolate_sink;
use crate::lens::{instance_lens, KeyFn};
use crate::metrics::{CollectionMetrics, MetricsSnapshot};
use crate::pick_combine;
use crate::pick_merge;
use crate::reducer::Reducer;
use crate::selector::Selector;
use crate::sinks::SinkBundle;
use crate::source::StateSource;
use lamina_stream::{Listener, Producer, Sink, Stream, StreamError, SubscriptionId};
use lamina_types::{ChannelName, Key, Value};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

/// Bounds required of collection keys
pub trait CollectionKey: Eq + Hash + Clone + fmt::Debug + 'static {}

impl<K: Eq + Hash + Clone + fmt::Debug + 'static> CollectionKey for K {}

/// Shared handle to a live child instance
pub type EntryRef<T, K, Si> = Rc<CollectionEntry<T, K, Si>>;

pub(crate) type EntryPick<T, K, Si, R> = Rc<dyn Fn(&CollectionEntry<T, K, Si>) -> Option<Stream<R>>>;

/// One live child instance
pub struct CollectionEntry<T, K, Si> {
    key: K,
    index: Cell<usize>,
    item: Rc<RefCell<T>>,
    cell: Stream<T>,
    state: StateSource<T>,
    sinks: Rc<Si>,
    reducers: Option<Stream<Reducer<Vec<T>>>>,
    disposed: Cell<bool>,
}

impl<T, K, Si> CollectionEntry<T, K, Si> {
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Position among the surviving items of the latest array
    pub fn index(&self) -> usize {
        self.index.get()
    }

    /// The instance's own state source
    pub fn state(&self) -> &StateSource<T> {
        &self.state
    }

    /// The sink bundle the child factory built for this key
    pub fn sinks(&self) -> &Rc<Si> {
        &self.sinks
    }

    /// The child's reducers, lifted onto the parent list
    pub fn reducers(&self) -> Option<&Stream<Reducer<Vec<T>>>> {
        self.reducers.as_ref()
    }

    /// Check if this instance has been removed from its collection
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }
}

impl<T: Clone + 'static, K, Si> CollectionEntry<T, K, Si> {
    /// The latest item delivered to this instance
    pub fn item(&self) -> T {
        self.item.borrow().clone()
    }

    fn dispose(&self) {
        if !self.disposed.replace(true) {
            self.cell.send_complete();
        }
    }

    fn push_item(&self, item: T) {
        if self.disposed.get() {
            return;
        }
        *self.item.borrow_mut() = item.clone();
        self.cell.send_next(item);
    }
}

impl<T, K: fmt::Debug, Si> fmt::Debug for CollectionEntry<T, K, Si> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionEntry")
            .field("key", &self.key)
            .field("index", &self.index.get())
            .field("disposed", &self.disposed.get())
            .finish()
    }
}

/// Emits an instance's current item to every new subscriber
struct ItemProducer<T> {
    item: Rc<RefCell<T>>,
}

impl<T: Clone + 'static> Producer<T> for ItemProducer<T> {
    fn start(&self, sink: Sink<T>) {
        let item = self.item.borrow().clone();
        sink.next(item);
    }

    fn stop(&self) {}
}

/// One reconciliation cycle's result
///
/// `cache` holds every live instance. `added` and `reindexed` are ordered
/// by index, `removed` by the index the instance had before removal.
/// Indices live in the entries, so an older snapshot reads the latest ones.
pub struct Instances<T, K, Si> {
    pub cache: Rc<HashMap<K, EntryRef<T, K, Si>>>,
    pub added: Vec<EntryRef<T, K, Si>>,
    pub removed: Vec<EntryRef<T, K, Si>>,
    pub reindexed: Vec<EntryRef<T, K, Si>>,
}

impl<T, K, Si> Clone for Instances<T, K, Si> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            added: self.added.clone(),
            removed: self.removed.clone(),
            reindexed: self.reindexed.clone(),
        }
    }
}

impl<T, K: fmt::Debug, Si> fmt::Debug for Instances<T, K, Si> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instances")
            .field("len", &self.cache.len())
            .field("added", &keys_of(&self.added))
            .field("removed", &keys_of(&self.removed))
            .field("reindexed", &keys_of(&self.reindexed))
            .finish()
    }
}

fn keys_of<T, K, Si>(entries: &[EntryRef<T, K, Si>]) -> Vec<&K> {
    entries.iter().map(|e| &e.key).collect()
}

impl<T, K: CollectionKey, Si> Instances<T, K, Si> {
    pub fn added_keys(&self) -> Vec<K> {
        self.added.iter().map(|e| e.key.clone()).collect()
    }

    pub fn removed_keys(&self) -> Vec<K> {
        self.removed.iter().map(|e| e.key.clone()).collect()
    }

    pub fn reindexed_keys(&self) -> Vec<K> {
        self.reindexed.iter().map(|e| e.key.clone()).collect()
    }

    /// Live instances in index order
    pub fn entries_by_index(&self) -> Vec<EntryRef<T, K, Si>> {
        let mut entries: Vec<_> = self.cache.values().cloned().collect();
        entries.sort_by_key(|e| e.index.get());
        entries
    }

    /// Keys of live instances in index order
    pub fn keys_by_index(&self) -> Vec<K> {
        self.entries_by_index().iter().map(|e| e.key.clone()).collect()
    }

    pub fn get(&self, key: &K) -> Option<&EntryRef<T, K, Si>> {
        self.cache.get(key)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// What the child factory receives for a new key
pub struct ChildSources<T, K, S> {
    /// The instance's key
    pub key: K,
    /// Index at creation time
    pub index: usize,
    /// The instance's item, as a state source without deduplication
    pub state: StateSource<T>,
    /// Whatever else the host passes to every child
    pub host: S,
}

type Factory<T, K, S, Si> = Box<dyn Fn(ChildSources<T, K, S>) -> Si>;
type Cache<T, K, Si> = HashMap<K, EntryRef<T, K, Si>>;

struct Reconciler<T, K, Si, S> {
    upstream: Stream<Vec<T>>,
    factory: Factory<T, K, S, Si>,
    host: S,
    key_of: KeyFn<T, K>,
    name: Rc<str>,
    metrics: Rc<CollectionMetrics>,
    cache: RefCell<Cache<T, K, Si>>,
    sink: RefCell<Option<Sink<Instances<T, K, Si>>>>,
    subscription: Cell<Option<SubscriptionId>>,
    queue: RefCell<VecDeque<Vec<T>>>,
    busy: Cell<bool>,
    active: Cell<bool>,
}

impl<T, K, Si, S> Reconciler<T, K, Si, S>
where
    T: Clone + PartialEq + 'static,
    K: CollectionKey,
    Si: SinkBundle<T> + 'static,
    S: Clone + 'static,
{
    fn receive(&self, items: Vec<T>) {
        if !self.active.get() {
            return;
        }
        self.queue.borrow_mut().push_back(items);
        if self.busy.replace(true) {
            tracing::trace!(collection = %self.name, "queued array behind running cycle");
            return;
        }
        loop {
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(items) => self.reconcile(items),
                None => break,
            }
        }
        self.busy.set(false);
    }

    fn reconcile(&self, items: Vec<T>) {
        let keys: Vec<K> = items.iter().map(|item| (self.key_of)(item)).collect();
        let mut last_position: HashMap<&K, usize> = HashMap::with_capacity(keys.len());
        for (position, key) in keys.iter().enumerate() {
            last_position.insert(key, position);
        }

        let duplicates = keys.len() - last_position.len();
        if duplicates > 0 {
            tracing::warn!(
                collection = %self.name,
                duplicates,
                "duplicate keys in array, keeping the last occurrence of each"
            );
            self.metrics.record_duplicates(duplicates);
        }

        // The factory may re-enter the stream graph, so no borrow of the
        // cache is held while instances are created
        let mut cache = std::mem::take(&mut *self.cache.borrow_mut());

        let mut removed = Vec::new();
        cache.retain(|key, entry| {
            let keep = last_position.contains_key(key);
            if !keep {
                removed.push(entry.clone());
            }
            keep
        });
        removed.sort_by_key(|e: &EntryRef<T, K, Si>| e.index.get());

        let mut added = Vec::new();
        let mut reindexed = Vec::new();
        let mut changed = Vec::new();
        let mut index = 0;
        for (position, (key, item)) in keys.iter().zip(items).enumerate() {
            if last_position.get(key) != Some(&position) {
                continue;
            }
            match cache.get(key) {
                Some(entry) => {
                    if entry.index.get() != index {
                        entry.index.set(index);
                        reindexed.push(entry.clone());
                    }
                    if *entry.item.borrow() != item {
                        changed.push((entry.clone(), item));
                    }
                }
                None => {
                    let entry = self.instantiate(key.clone(), index, item);
                    cache.insert(key.clone(), entry.clone());
                    added.push(entry);
                }
            }
            index += 1;
        }

        if !self.active.get() {
            // Keep the instances built so far; removed ones are still torn down
            tracing::debug!(collection = %self.name, "collection stopped during reconciliation");
            self.metrics.record_snapshot(added.len(), removed.len(), reindexed.len());
            *self.cache.borrow_mut() = cache;
            for entry in &removed {
                entry.dispose();
            }
            return;
        }

        let snapshot = Instances {
            cache: Rc::new(cache.clone()),
            added,
            removed,
            reindexed,
        };
        *self.cache.borrow_mut() = cache;

        self.metrics.record_snapshot(
            snapshot.added.len(),
            snapshot.removed.len(),
            snapshot.reindexed.len(),
        );
        tracing::debug!(
            collection = %self.name,
            len = snapshot.cache.len(),
            added = snapshot.added.len(),
            removed = snapshot.removed.len(),
            reindexed = snapshot.reindexed.len(),
            changed = changed.len(),
            "collection snapshot"
        );

        let removed = snapshot.removed.clone();
        let sink = self.sink.borrow().clone();
        if let Some(sink) = sink {
            sink.next(snapshot);
        }

        for entry in &removed {
            tracing::trace!(collection = %self.name, key = ?entry.key, "disposing instance");
            entry.dispose();
        }

        if self.active.get() {
            self.metrics.record_item_updates(changed.len());
            for (entry, item) in changed {
                entry.push_item(item);
            }
        }
    }

    fn instantiate(&self, key: K, index: usize, item: T) -> EntryRef<T, K, Si> {
        tracing::trace!(collection = %self.name, key = ?key, index, "creating instance");

        let item = Rc::new(RefCell::new(item));
        let cell = Stream::create_with(ItemProducer { item: item.clone() });
        let state = StateSource::with_dedupe(&cell.map(Some), self.name.clone(), false);

        let sinks = Rc::new((self.factory)(ChildSources {
            key: key.clone(),
            index,
            state: state.clone(),
            host: self.host.clone(),
        }));
        let reducers = sinks
            .reducers()
            .map(|r| isolate_sink(&r, instance_lens(self.key_of.clone(), key.clone())));

        Rc::new(CollectionEntry {
            key,
            index: Cell::new(index),
            item,
            cell,
            state,
            sinks,
            reducers,
            disposed: Cell::new(false),
        })
    }

    fn forward_error(&self, err: StreamError) {
        let sink = self.sink.borrow().clone();
        if let Some(sink) = sink {
            sink.error(err);
        }
    }

    fn forward_complete(&self) {
        let sink = self.sink.borrow().clone();
        if let Some(sink) = sink {
            sink.complete();
        }
    }

    fn stop(&self) {
        self.active.set(false);
        if let Some(id) = self.subscription.take() {
            self.upstream.remove_listener(id);
        }
        self.sink.borrow_mut().take();
        self.queue.borrow_mut().clear();

        // The cache outlives the subscription, so a restart diffs against it
        tracing::debug!(collection = %self.name, live = self.cache.borrow().len(), "collection stopped");
    }
}

struct UpstreamListener<T, K, Si, S> {
    core: Weak<Reconciler<T, K, Si, S>>,
}

impl<T, K, Si, S> Listener<Vec<T>> for UpstreamListener<T, K, Si, S>
where
    T: Clone + PartialEq + 'static,
    K: CollectionKey,
    Si: SinkBundle<T> + 'static,
    S: Clone + 'static,
{
    fn next(&self, items: Vec<T>) {
        if let Some(core) = self.core.upgrade() {
            core.receive(items);
        }
    }

    fn error(&self, err: StreamError) {
        if let Some(core) = self.core.upgrade() {
            core.forward_error(err);
        }
    }

    fn complete(&self) {
        if let Some(core) = self.core.upgrade() {
            core.forward_complete();
        }
    }
}

struct Driver<T, K, Si, S> {
    core: Rc<Reconciler<T, K, Si, S>>,
}

impl<T, K, Si, S> Producer<Instances<T, K, Si>> for Driver<T, K, Si, S>
where
    T: Clone + PartialEq + 'static,
    K: CollectionKey,
    Si: SinkBundle<T> + 'static,
    S: Clone + 'static,
{
    fn start(&self, sink: Sink<Instances<T, K, Si>>) {
        let core = &self.core;
        core.active.set(true);
        *core.sink.borrow_mut() = Some(sink);
        let id = core.upstream.add_listener(Rc::new(UpstreamListener {
            core: Rc::downgrade(core),
        }));
        if core.active.get() {
            core.subscription.set(Some(id));
        } else {
            core.upstream.remove_listener(id);
        }
    }

    fn stop(&self) {
        self.core.stop();
    }
}

/// A keyed collection of child instances
///
/// Wraps the snapshot stream and offers the dynamic combinators over it.
pub struct Collection<T, K, Si> {
    instances: Stream<Instances<T, K, Si>>,
    metrics: Rc<CollectionMetrics>,
    name: Rc<str>,
}

impl<T, K, Si> Clone for Collection<T, K, Si> {
    fn clone(&self) -> Self {
        Self {
            instances: self.instances.clone(),
            metrics: self.metrics.clone(),
            name: self.name.clone(),
        }
    }
}

impl<T, K, Si> fmt::Debug for Collection<T, K, Si> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("instances", &self.instances)
            .finish()
    }
}

impl<T, K, Si> Collection<T, K, Si>
where
    T: Clone + PartialEq + 'static,
    K: CollectionKey,
    Si: 'static,
{
    /// The remembered snapshot stream
    pub fn instances(&self) -> &Stream<Instances<T, K, Si>> {
        &self.instances
    }

    /// Combine one channel of every instance into an ordered array
    pub fn pick_combine<R: Clone + 'static>(&self, selector: impl Into<Selector<Si, R>>) -> Stream<Vec<R>> {
        let selector = selector.into();
        pick_combine::combine(&self.instances, selector.channel().clone(), entry_pick(selector))
    }

    /// Merge one channel of every instance into a single stream
    pub fn pick_merge<R: Clone + 'static>(&self, selector: impl Into<Selector<Si, R>>) -> Stream<R> {
        let selector = selector.into();
        pick_merge::merge(&self.instances, selector.channel().clone(), entry_pick(selector))
    }

    /// Every instance's reducers, lifted onto the parent list and merged
    pub fn reducers(&self) -> Stream<Reducer<Vec<T>>> {
        let pick: EntryPick<T, K, Si, Reducer<Vec<T>>> =
            Rc::new(|entry: &CollectionEntry<T, K, Si>| entry.reducers.clone());
        pick_merge::merge(&self.instances, ChannelName::new("reducers"), pick)
    }

    /// Current counters for this collection
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub(crate) fn entry_pick<T, K, Si, R>(selector: Selector<Si, R>) -> EntryPick<T, K, Si, R>
where
    T: 'static,
    K: 'static,
    Si: 'static,
    R: Clone + 'static,
{
    Rc::new(move |entry: &CollectionEntry<T, K, Si>| selector.resolve(entry.sinks()))
}

impl<T: Clone + PartialEq + 'static> StateSource<Vec<T>> {
    /// Turn this source into a keyed collection, with a custom key
    ///
    /// `factory` is called once per new key. `host` is cloned into every
    /// child's sources.
    pub fn as_collection_by<K, Si, S>(
        &self,
        factory: impl Fn(ChildSources<T, K, S>) -> Si + 'static,
        host: S,
        key_of: impl Fn(&T) -> K + 'static,
    ) -> Collection<T, K, Si>
    where
        K: CollectionKey,
        Si: SinkBundle<T> + 'static,
        S: Clone + 'static,
    {
        let name: Rc<str> = Rc::from(self.name());
        let metrics = Rc::new(CollectionMetrics::new());
        let core = Rc::new(Reconciler {
            upstream: self.stream().clone(),
            factory: Box::new(factory),
            host,
            key_of: Rc::new(key_of),
            name: name.clone(),
            metrics: metrics.clone(),
            cache: RefCell::new(HashMap::new()),
            sink: RefCell::new(None),
            subscription: Cell::new(None),
            queue: RefCell::new(VecDeque::new()),
            busy: Cell::new(false),
            active: Cell::new(false),
        });
        Collection {
            instances: Stream::create_remembered_with(Driver { core }),
            metrics,
            name,
        }
    }
}

impl StateSource<Vec<Value>> {
    /// Turn this source into a keyed collection keyed by each item's `key` field
    pub fn as_collection<Si, S>(
        &self,
        factory: impl Fn(ChildSources<Value, Key, S>) -> Si + 'static,
        host: S,
    ) -> Collection<Value, Key, Si>
    where
        Si: SinkBundle<Value> + 'static,
        S: Clone + 'static,
    {
        self.as_collection_by(factory, host, Key::of_item)
    }
}
