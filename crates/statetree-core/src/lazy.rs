//! Lists materialized on demand from a [`DataProvider`].
//!
//! A lazy slot keeps an active range over the provider's data and a
//! [`SingleRangeCache`] of child nodes built for it. It also remembers the
//! *client range*, the part of the active range already described to the
//! client. Narrowing the active range evicts and detaches children at once
//! and tells the client which items to drop; growing it schedules a pending
//! send which fetches, attaches and announces the new children right before
//! the next commit.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::ops::Range;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::change::{
    ListInsertManyChange, ListRemoveChange, NodeChange, PutChange, RangeEndChange,
    RangeStartChange,
};
use crate::error::TreeError;
use crate::key::Key;
use crate::node::StateNode;
use crate::range_cache::{RangeCacheState, SingleRangeCache};
use crate::tree::{Slot, TreeInner};
use crate::value::{NodeRef, SlotValue, Value, ValueKind};

/// Source of the items behind a lazy list.
pub trait DataProvider<T> {
    /// Returns up to `count` items starting at `index`.
    fn values(&self, index: usize, count: usize) -> Vec<T>;
}

impl<T, F> DataProvider<T> for F
where
    F: Fn(usize, usize) -> Vec<T>,
{
    fn values(&self, index: usize, count: usize) -> Vec<T> {
        self(index, count)
    }
}

pub(crate) trait LazyBacking {
    /// Fetches items and turns each into a fresh, unattached node.
    fn materialize(&self, tree: &Rc<TreeInner>, index: usize, count: usize) -> Vec<StateNode>;
}

type Populate<T> = dyn Fn(&T, &StateNode) -> Result<(), TreeError>;

struct ProviderBacking<T, P> {
    provider: P,
    populate: Box<Populate<T>>,
    _item: PhantomData<fn() -> T>,
}

impl<T, P: DataProvider<T>> LazyBacking for ProviderBacking<T, P> {
    fn materialize(&self, tree: &Rc<TreeInner>, index: usize, count: usize) -> Vec<StateNode> {
        let values = self.provider.values(index, count);
        if values.len() < count {
            log::warn!(
                "data provider returned {} of {count} items requested at index {index}",
                values.len()
            );
        }
        let mut nodes = Vec::with_capacity(values.len().min(count));
        for value in values.iter().take(count) {
            let node = tree.create(None);
            if let Err(error) = (self.populate)(value, &node) {
                log::warn!("populating lazy item {} failed: {error}", index + nodes.len());
                break;
            }
            nodes.push(node);
        }
        nodes
    }
}

/// Definition of a lazy list, installed with
/// [`StateNode::put_lazy_list`](crate::StateNode::put_lazy_list).
pub struct LazyList {
    backing: Rc<dyn LazyBacking>,
    range: Range<usize>,
}

impl LazyList {
    /// `populate` fills the node created for each provided item.
    pub fn new<T, P>(
        provider: P,
        populate: impl Fn(&T, &StateNode) -> Result<(), TreeError> + 'static,
    ) -> Self
    where
        T: 'static,
        P: DataProvider<T> + 'static,
    {
        Self {
            backing: Rc::new(ProviderBacking {
                provider,
                populate: Box::new(populate),
                _item: PhantomData,
            }),
            range: 0..0,
        }
    }

    pub fn with_active_range(mut self, range: Range<usize>) -> Self {
        self.range = range;
        self
    }
}

enum CacheEvent {
    Added(Vec<Value>),
    Removed(usize, Vec<Value>),
}

pub(crate) struct LazySlot {
    backing: Rc<dyn LazyBacking>,
    cache: SingleRangeCache<Value>,
    client: Range<usize>,
    events: Rc<RefCell<Vec<CacheEvent>>>,
}

#[derive(Clone)]
pub(crate) struct LazySnapshot {
    cache: RangeCacheState<Value>,
    client: Range<usize>,
}

impl LazySlot {
    fn new(list: LazyList) -> Result<Self, TreeError> {
        let mut cache = SingleRangeCache::new(list.range.start, list.range.end)?;
        let events: Rc<RefCell<Vec<CacheEvent>>> = Rc::default();
        let sink = Rc::clone(&events);
        cache.set_added_listener(move |_, items| {
            sink.borrow_mut().push(CacheEvent::Added(items.to_vec()))
        });
        let sink = Rc::clone(&events);
        cache.set_removed_listener(move |first, items| {
            sink.borrow_mut()
                .push(CacheEvent::Removed(first, items.to_vec()))
        });
        Ok(Self {
            backing: list.backing,
            cache,
            client: list.range.start..list.range.start,
            events,
        })
    }

    pub(crate) fn cached_nodes(&self) -> impl Iterator<Item = NodeRef> + '_ {
        self.cache.values().filter_map(Value::as_node)
    }

    /// Client range and the items the client holds for it.
    pub(crate) fn client_view(&self) -> (Range<usize>, Vec<Value>) {
        (self.client.clone(), self.cache.items(self.client.clone()))
    }

    pub(crate) fn snapshot(&self) -> LazySnapshot {
        LazySnapshot {
            cache: self.cache.state(),
            client: self.client.clone(),
        }
    }

    pub(crate) fn restore(&mut self, snapshot: LazySnapshot) {
        self.cache.restore(snapshot.cache);
        self.client = snapshot.client;
        self.events.borrow_mut().clear();
    }

    fn take_events(&self) -> Vec<CacheEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }
}

/// Values evicted from the cache, by position.
fn evicted_values(events: &[CacheEvent]) -> Vec<(usize, Value)> {
    events
        .iter()
        .filter_map(|event| match event {
            CacheEvent::Removed(first, items) => Some(
                items
                    .iter()
                    .enumerate()
                    .map(move |(offset, value)| (first + offset, value.clone())),
            ),
            CacheEvent::Added(_) => None,
        })
        .flatten()
        .collect()
}

/// Handle to the lazy list stored under a key of a node.
///
/// Indices passed to [`get`](Self::get) are relative to the active range
/// start.
#[derive(Clone, Debug)]
pub struct LazyListView {
    node: StateNode,
    key: Key,
}

impl LazyListView {
    pub(crate) fn new(node: StateNode, key: Key) -> Self {
        Self { node, key }
    }

    fn read<R>(&self, f: impl FnOnce(&LazySlot) -> R) -> Result<R, TreeError> {
        let tree = self.node.inner();
        tree.record_read(self.node.handle(), &self.key);
        let arena = tree.arena.borrow();
        match arena.node(self.node.handle()).slots.get(&self.key) {
            Some(Slot::Lazy(lazy)) => Ok(f(lazy)),
            _ => Err(TreeError::NotLazy {
                key: self.key.clone(),
            }),
        }
    }

    pub fn active_range(&self) -> Result<Range<usize>, TreeError> {
        self.read(|lazy| lazy.cache.range())
    }

    pub fn active_range_start(&self) -> Result<usize, TreeError> {
        Ok(self.active_range()?.start)
    }

    pub fn active_range_end(&self) -> Result<usize, TreeError> {
        Ok(self.active_range()?.end)
    }

    /// Positions already described to the client.
    pub fn client_range(&self) -> Result<Range<usize>, TreeError> {
        self.read(|lazy| lazy.client.clone())
    }

    /// Size of the active range.
    pub fn len(&self) -> Result<usize, TreeError> {
        Ok(self.active_range()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, TreeError> {
        Ok(self.len()? == 0)
    }

    pub fn set_active_range_start(&self, start: usize) -> Result<(), TreeError> {
        self.node
            .inner()
            .set_lazy_start(self.node.handle(), &self.key, start)
    }

    pub fn set_active_range_end(&self, end: usize) -> Result<(), TreeError> {
        self.node
            .inner()
            .set_lazy_end(self.node.handle(), &self.key, end)
    }

    /// Moves both bounds without ever inverting the range.
    pub fn set_active_range(&self, range: Range<usize>) -> Result<(), TreeError> {
        if range.start > range.end {
            return Err(TreeError::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }
        if range.start > self.active_range_end()? {
            self.set_active_range_end(range.end)?;
            self.set_active_range_start(range.start)
        } else {
            self.set_active_range_start(range.start)?;
            self.set_active_range_end(range.end)
        }
    }

    /// Node at `index` within the active range, materializing it if needed.
    /// `None` when the provider has no item for that position.
    pub fn get(&self, index: usize) -> Result<Option<StateNode>, TreeError> {
        let range = self.active_range()?;
        let position = range.start + index;
        if position >= range.end {
            return Err(TreeError::OutsideRange {
                index: position,
                start: range.start,
                end: range.end,
            });
        }
        let tree = self.node.inner();
        tree.ensure_mutable()?;
        tree.ensure_populated(self.node.handle(), &self.key);
        let value = self.read(|lazy| lazy.cache.get(position).ok().flatten().cloned())?;
        Ok(value
            .and_then(|value| value.as_node())
            .and_then(|node| self.node.resolve(node)))
    }
}

impl TreeInner {
    pub(crate) fn put_lazy(&self, handle: u32, key: Key, list: LazyList) -> Result<(), TreeError> {
        self.ensure_mutable()?;
        if self.is_computed(handle, &key) {
            return Err(TreeError::ComputedKey { key });
        }
        let mut arena = self.arena.borrow_mut();
        let node = arena.node(handle);
        if node.slots.contains_key(&key) {
            return Err(TreeError::KeyExists { key });
        }
        if let Some(expected) = node.schema.as_ref().and_then(|schema| schema.kind_of(&key)) {
            if !expected.accepts(ValueKind::List) {
                return Err(TreeError::TypeMismatch {
                    key,
                    expected,
                    actual: ValueKind::List,
                });
            }
        }
        let range = list.range.clone();
        let slot = LazySlot::new(list)?;
        arena
            .node_mut(handle)
            .slots
            .insert(key.clone(), Slot::Lazy(Box::new(slot)));
        self.log(
            handle,
            NodeChange::Put(PutChange {
                key: key.clone(),
                value: SlotValue::LazyList,
                computed: false,
            }),
        );
        self.log(
            handle,
            NodeChange::RangeStart(RangeStartChange {
                key: key.clone(),
                start: range.start,
            }),
        );
        self.log(
            handle,
            NodeChange::RangeEnd(RangeEndChange {
                key: key.clone(),
                end: range.end,
            }),
        );
        drop(arena);
        self.lazy_pending.borrow_mut().insert((handle, key.clone()));
        self.invalidate(handle, &key);
        Ok(())
    }

    fn snapshot_lazy(&self, handle: u32, key: &Key, lazy: &LazySlot) {
        self.txn
            .borrow_mut()
            .lazy
            .entry((handle, key.clone()))
            .or_insert_with(|| lazy.snapshot());
    }

    /// Detaches evicted nodes and attaches added ones.
    fn apply_cache_events(&self, handle: u32, events: &[CacheEvent]) {
        let mut arena = self.arena.borrow_mut();
        let mut txn = self.txn.borrow_mut();
        for event in events {
            match event {
                CacheEvent::Added(values) => {
                    for value in values {
                        self.attach(&mut arena, &mut txn, handle, value);
                    }
                }
                CacheEvent::Removed(_, values) => {
                    for value in values {
                        self.detach(&mut arena, &mut txn, handle, value);
                    }
                }
            }
        }
    }

    pub(crate) fn set_lazy_start(&self, handle: u32, key: &Key, start: usize) -> Result<(), TreeError> {
        self.ensure_mutable()?;
        let mut arena = self.arena.borrow_mut();
        let lazy = arena.lazy_mut(handle, key)?;
        let range = lazy.cache.range();
        if start > range.end {
            return Err(TreeError::InvalidRange {
                start,
                end: range.end,
            });
        }
        if start == range.start {
            return Ok(());
        }
        self.snapshot_lazy(handle, key, lazy);
        lazy.cache.set_range_start(start)?;
        let events = lazy.take_events();

        let client = lazy.client.clone();
        let new_start = start.max(client.start);
        lazy.client = new_start..client.end.max(new_start);
        let dropped = client.end.min(new_start).saturating_sub(client.start);
        drop(arena);

        log::debug!("lazy list {key} on node {handle}: active range start {start}");
        let evicted = evicted_values(&events);
        {
            let mut txn = self.txn.borrow_mut();
            txn.log(
                handle,
                NodeChange::RangeStart(RangeStartChange {
                    key: key.clone(),
                    start,
                }),
            );
            for position in client.start..client.start + dropped {
                let value = evicted
                    .iter()
                    .find(|(cached, _)| *cached == position)
                    .map(|(_, value)| value.clone());
                debug_assert!(value.is_some(), "client item {position} was not cached");
                if let Some(value) = value {
                    txn.log(
                        handle,
                        NodeChange::ListRemove(ListRemoveChange {
                            key: key.clone(),
                            index: 0,
                            value,
                        }),
                    );
                }
            }
        }
        self.apply_cache_events(handle, &events);
        self.lazy_pending.borrow_mut().insert((handle, key.clone()));
        self.invalidate(handle, key);
        Ok(())
    }

    pub(crate) fn set_lazy_end(&self, handle: u32, key: &Key, end: usize) -> Result<(), TreeError> {
        self.ensure_mutable()?;
        let mut arena = self.arena.borrow_mut();
        let lazy = arena.lazy_mut(handle, key)?;
        let range = lazy.cache.range();
        if end < range.start {
            return Err(TreeError::InvalidRange {
                start: range.start,
                end,
            });
        }
        if end == range.end {
            return Ok(());
        }
        self.snapshot_lazy(handle, key, lazy);
        lazy.cache.set_range_end(end)?;
        let events = lazy.take_events();

        let client = lazy.client.clone();
        let new_end = end.min(client.end);
        lazy.client = client.start.min(new_end)..new_end;
        let kept_from = end.max(client.start);
        drop(arena);

        log::debug!("lazy list {key} on node {handle}: active range end {end}");
        let evicted = evicted_values(&events);
        {
            let mut txn = self.txn.borrow_mut();
            txn.log(
                handle,
                NodeChange::RangeEnd(RangeEndChange {
                    key: key.clone(),
                    end,
                }),
            );
            for position in (kept_from..client.end).rev() {
                let value = evicted
                    .iter()
                    .find(|(cached, _)| *cached == position)
                    .map(|(_, value)| value.clone());
                debug_assert!(value.is_some(), "client item {position} was not cached");
                if let Some(value) = value {
                    txn.log(
                        handle,
                        NodeChange::ListRemove(ListRemoveChange {
                            key: key.clone(),
                            index: position - client.start,
                            value,
                        }),
                    );
                }
            }
        }
        self.apply_cache_events(handle, &events);
        self.lazy_pending.borrow_mut().insert((handle, key.clone()));
        self.invalidate(handle, key);
        Ok(())
    }

    /// Fetches every unpopulated position of the active range that is
    /// adjacent to the cached block.
    pub(crate) fn ensure_populated(self: &Rc<Self>, handle: u32, key: &Key) {
        let (backing, data, missing) = {
            let mut arena = self.arena.borrow_mut();
            let Ok(lazy) = arena.lazy_mut(handle, key) else {
                return;
            };
            let active = lazy.cache.range();
            let data = lazy.cache.data_range();
            let mut missing: SmallVec<[Range<usize>; 2]> = SmallVec::new();
            if data.is_empty() || data.end <= active.start || data.start >= active.end {
                missing.push(active);
            } else {
                missing.push(active.start..data.start);
                missing.push(data.end..active.end);
            }
            missing.retain(|range| !range.is_empty());
            (Rc::clone(&lazy.backing), data, missing)
        };

        for range in missing {
            let nodes = backing.materialize(self, range.start, range.len());
            if nodes.is_empty() {
                continue;
            }
            if !data.is_empty() && range.end == data.start && nodes.len() < range.len() {
                log::warn!(
                    "discarding {} items fetched before cached block of lazy list {key}",
                    nodes.len()
                );
                continue;
            }
            let values: Vec<Value> = nodes.iter().map(Value::from).collect();
            log::debug!(
                "lazy list {key} on node {handle}: materialized {} items at {}",
                values.len(),
                range.start
            );
            let events = {
                let mut arena = self.arena.borrow_mut();
                let Ok(lazy) = arena.lazy_mut(handle, key) else {
                    return;
                };
                self.snapshot_lazy(handle, key, lazy);
                if let Err(error) = lazy.cache.set(range.start, values) {
                    log::warn!("lazy list {key} rejected fetched items: {error}");
                }
                lazy.take_events()
            };
            self.apply_cache_events(handle, &events);
        }
    }

    /// Announces materialized items the client has not seen yet.
    pub(crate) fn send_pending(self: &Rc<Self>, handle: u32, key: &Key) {
        self.ensure_populated(handle, key);
        let mut arena = self.arena.borrow_mut();
        let Ok(lazy) = arena.lazy_mut(handle, key) else {
            return;
        };
        let active = lazy.cache.range();
        let client = lazy.client.clone();
        let available = lazy
            .cache
            .available_range(active.start, active.end)
            .unwrap_or(active.start..active.start);
        if available == client {
            return;
        }
        self.snapshot_lazy(handle, key, lazy);

        let mut inserts: SmallVec<[(usize, Vec<Value>); 2]> = SmallVec::new();
        if client.is_empty() || client.start < available.start || client.end > available.end {
            debug_assert!(client.is_empty(), "client range left the cached block");
            if !available.is_empty() {
                inserts.push((0, lazy.cache.items(available.clone())));
            }
        } else {
            if available.start < client.start {
                inserts.push((0, lazy.cache.items(available.start..client.start)));
            }
            if client.end < available.end {
                inserts.push((
                    client.end - available.start,
                    lazy.cache.items(client.end..available.end),
                ));
            }
        }
        lazy.client = available;
        drop(arena);

        let mut txn = self.txn.borrow_mut();
        for (index, values) in inserts {
            txn.log(
                handle,
                NodeChange::ListInsertMany(ListInsertManyChange {
                    key: key.clone(),
                    index,
                    values,
                }),
            );
        }
    }

    /// Runs pending lazy sends; called before each commit round.
    pub(crate) fn send_all_pending(self: &Rc<Self>) {
        let pending: Vec<(u32, Key)> = self.lazy_pending.borrow_mut().drain(..).collect();
        for (handle, key) in pending {
            self.send_pending(handle, &key);
        }
    }
}
