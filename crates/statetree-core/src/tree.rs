//! Arena storage shared by a root and all nodes created through it.
//!
//! Nodes live in a vector indexed by their handle; parent links and values
//! refer to other nodes by handle, never by pointer. The root keeps the
//! id table mapping client ids to handles. Every mutation is journaled in the
//! open [`Transaction`] so it can be delivered on commit or undone on rollback.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use smallvec::SmallVec;

use crate::change::{IdChange, NodeChange, ParentChange};
use crate::collections::map::HashMap;
use crate::collections::ordered::{IndexMap, IndexSet};
use crate::computed::{ComputedState, Frame};
use crate::config::TreeConfig;
use crate::error::TreeError;
use crate::key::Key;
use crate::lazy::{LazySlot, LazySnapshot};
use crate::node::{ChangeListener, ListenerId, StateNode};
use crate::schema::Schema;
use crate::value::{NodeId, NodeRef, SlotValue, TreeId, Value, UNATTACHED};
use crate::NodeChangeVisitor;

pub(crate) const ROOT: u32 = 0;
pub(crate) const ROOT_ID: NodeId = 1;

static NEXT_TREE_ID: AtomicU32 = AtomicU32::new(1);

pub(crate) struct NodeData {
    pub(crate) id: NodeId,
    pub(crate) parent: Option<u32>,
    pub(crate) slots: IndexMap<Key, Slot>,
    pub(crate) schema: Option<Rc<Schema>>,
}

impl NodeData {
    fn new(schema: Option<Rc<Schema>>) -> Self {
        Self {
            id: UNATTACHED,
            parent: None,
            slots: IndexMap::default(),
            schema,
        }
    }
}

pub(crate) struct ListSlot {
    pub(crate) id: u64,
    pub(crate) items: Vec<Value>,
}

pub(crate) enum Slot {
    Value(Value),
    List(ListSlot),
    Lazy(Box<LazySlot>),
}

impl Slot {
    pub(crate) fn payload(&self) -> SlotValue {
        match self {
            Slot::Value(value) => SlotValue::Value(value.clone()),
            Slot::List(list) => SlotValue::List(list.items.clone()),
            Slot::Lazy(_) => SlotValue::LazyList,
        }
    }

    fn for_each_node(&self, mut f: impl FnMut(u32)) {
        match self {
            Slot::Value(value) => {
                if let Some(node) = value.as_node() {
                    f(node.index);
                }
            }
            Slot::List(list) => list
                .items
                .iter()
                .filter_map(Value::as_node)
                .for_each(|node| f(node.index)),
            Slot::Lazy(lazy) => lazy.cached_nodes().for_each(|node| f(node.index)),
        }
    }
}

pub(crate) struct Arena {
    pub(crate) nodes: Vec<NodeData>,
    pub(crate) ids: HashMap<NodeId, u32>,
    pub(crate) next_id: NodeId,
    next_list: u64,
}

impl Arena {
    fn new() -> Self {
        let mut root = NodeData::new(None);
        root.id = ROOT_ID;
        let mut ids = HashMap::default();
        ids.insert(ROOT_ID, ROOT);
        Self {
            nodes: vec![root],
            ids,
            next_id: ROOT_ID + 1,
            next_list: 1,
        }
    }

    pub(crate) fn node(&self, handle: u32) -> &NodeData {
        &self.nodes[handle as usize]
    }

    pub(crate) fn node_mut(&mut self, handle: u32) -> &mut NodeData {
        &mut self.nodes[handle as usize]
    }

    fn allocate(&mut self, schema: Option<Rc<Schema>>) -> u32 {
        // FUTURE(gc): recycle slots of unreachable detached nodes.
        let handle = self.nodes.len() as u32;
        self.nodes.push(NodeData::new(schema));
        handle
    }

    pub(crate) fn new_list_id(&mut self) -> u64 {
        let id = self.next_list;
        self.next_list += 1;
        id
    }

    pub(crate) fn children(&self, handle: u32) -> SmallVec<[u32; 8]> {
        let mut children = SmallVec::new();
        for slot in self.node(handle).slots.values() {
            slot.for_each_node(|child| children.push(child));
        }
        children
    }

    pub(crate) fn list(&self, handle: u32, key: &Key, list: u64) -> Result<&ListSlot, TreeError> {
        match self.node(handle).slots.get(key) {
            Some(Slot::List(slot)) if slot.id == list => Ok(slot),
            _ => Err(TreeError::DetachedList { key: key.clone() }),
        }
    }

    pub(crate) fn list_mut(
        &mut self,
        handle: u32,
        key: &Key,
        list: u64,
    ) -> Result<&mut ListSlot, TreeError> {
        match self.node_mut(handle).slots.get_mut(key) {
            Some(Slot::List(slot)) if slot.id == list => Ok(slot),
            _ => Err(TreeError::DetachedList { key: key.clone() }),
        }
    }

    pub(crate) fn lazy_mut(&mut self, handle: u32, key: &Key) -> Result<&mut LazySlot, TreeError> {
        match self.node_mut(handle).slots.get_mut(key) {
            Some(Slot::Lazy(lazy)) => Ok(lazy),
            _ => Err(TreeError::NotLazy { key: key.clone() }),
        }
    }

    /// Whether `ancestor` is `node` or one of its parents.
    pub(crate) fn is_ancestor_or_self(&self, ancestor: u32, node: u32) -> bool {
        let mut current = Some(node);
        while let Some(handle) = current {
            if handle == ancestor {
                return true;
            }
            current = self.node(handle).parent;
        }
        false
    }

    /// Assigns fresh ids to `handle` and its subtree, parents before children.
    pub(crate) fn register(&mut self, txn: &mut Transaction, handle: u32) {
        let mut pending = vec![handle];
        while let Some(current) = pending.pop() {
            let id = self.next_id;
            self.next_id += 1;
            let node = self.node_mut(current);
            let old_id = std::mem::replace(&mut node.id, id);
            self.ids.insert(id, current);
            log::trace!("registered node {current} as id {id}");
            txn.log(current, NodeChange::Id(IdChange { old_id, new_id: id }));
            pending.extend(self.children(current).into_iter().rev());
        }
    }

    pub(crate) fn unregister(&mut self, txn: &mut Transaction, handle: u32) {
        let mut pending = vec![handle];
        while let Some(current) = pending.pop() {
            let node = self.node_mut(current);
            let old_id = std::mem::replace(&mut node.id, UNATTACHED);
            self.ids.remove(&old_id);
            log::trace!("unregistered node {current} (was id {old_id})");
            txn.log(
                current,
                NodeChange::Id(IdChange {
                    old_id,
                    new_id: UNATTACHED,
                }),
            );
            pending.extend(self.children(current).into_iter().rev());
        }
    }

    /// Reverts a single journaled change.
    fn undo(&mut self, handle: u32, change: &NodeChange, txn: &mut Transaction) {
        match change {
            NodeChange::Id(change) => {
                self.node_mut(handle).id = change.old_id;
                if self.ids.get(&change.new_id) == Some(&handle) {
                    self.ids.remove(&change.new_id);
                }
                if change.old_id != UNATTACHED {
                    self.ids.insert(change.old_id, handle);
                }
            }
            NodeChange::Parent(change) => {
                self.node_mut(handle).parent = change.old_parent.map(|parent| parent.index);
            }
            NodeChange::Put(change) if !change.computed => {
                self.node_mut(handle).slots.shift_remove(&change.key);
            }
            NodeChange::Remove(change) if !change.computed => {
                let slot = match &change.value {
                    SlotValue::Value(value) => Some(Slot::Value(value.clone())),
                    SlotValue::List(items) => Some(Slot::List(ListSlot {
                        id: self.new_list_id(),
                        items: items.clone(),
                    })),
                    SlotValue::LazyList => txn
                        .removed_lazy
                        .get_mut(&(handle, change.key.clone()))
                        .and_then(Vec::pop)
                        .map(Slot::Lazy),
                };
                if let Some(slot) = slot {
                    let slots = &mut self.node_mut(handle).slots;
                    let position = change.position.min(slots.len());
                    slots.shift_insert(position, change.key.clone(), slot);
                }
            }
            NodeChange::ListInsert(change) => {
                if let Some(Slot::List(list)) = self.node_mut(handle).slots.get_mut(&change.key) {
                    list.items.remove(change.index);
                }
            }
            NodeChange::ListInsertMany(change) => {
                if let Some(Slot::List(list)) = self.node_mut(handle).slots.get_mut(&change.key) {
                    list.items
                        .drain(change.index..change.index + change.values.len());
                }
            }
            NodeChange::ListRemove(change) => {
                if let Some(Slot::List(list)) = self.node_mut(handle).slots.get_mut(&change.key) {
                    list.items.insert(change.index, change.value.clone());
                }
            }
            NodeChange::ListReplace(change) => {
                if let Some(Slot::List(list)) = self.node_mut(handle).slots.get_mut(&change.key) {
                    list.items[change.index] = change.old_value.clone();
                }
            }
            // Computed values and lazy ranges are restored from snapshots.
            NodeChange::Put(_)
            | NodeChange::Remove(_)
            | NodeChange::RangeStart(_)
            | NodeChange::RangeEnd(_) => {}
        }
    }
}

/// Journal of the open transaction.
pub(crate) struct Transaction {
    pub(crate) changes: IndexMap<u32, Vec<NodeChange>>,
    pub(crate) next_id_at_start: NodeId,
    pub(crate) computed: Option<ComputedState>,
    pub(crate) lazy: HashMap<(u32, Key), LazySnapshot>,
    pub(crate) removed_lazy: HashMap<(u32, Key), Vec<Box<LazySlot>>>,
}

impl Transaction {
    fn new(next_id_at_start: NodeId) -> Self {
        Self {
            changes: IndexMap::default(),
            next_id_at_start,
            computed: None,
            lazy: HashMap::default(),
            removed_lazy: HashMap::default(),
        }
    }

    pub(crate) fn log(&mut self, handle: u32, change: NodeChange) {
        self.changes.entry(handle).or_default().push(change);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

type SharedVisitor = Rc<RefCell<dyn NodeChangeVisitor>>;

pub(crate) struct TreeInner {
    pub(crate) tree: TreeId,
    pub(crate) config: TreeConfig,
    pub(crate) arena: RefCell<Arena>,
    pub(crate) txn: RefCell<Transaction>,
    pub(crate) computed: RefCell<ComputedState>,
    pub(crate) eval_stack: RefCell<Vec<Frame>>,
    pub(crate) visitors: RefCell<Vec<(usize, SharedVisitor)>>,
    next_visitor: Cell<usize>,
    pub(crate) listeners: RefCell<HashMap<u32, Vec<(ListenerId, ChangeListener)>>>,
    next_listener: Cell<usize>,
    schemas: RefCell<HashMap<u64, Vec<Rc<Schema>>>>,
    pub(crate) lazy_pending: RefCell<IndexSet<(u32, Key)>>,
    pub(crate) commit_depth: Cell<usize>,
}

impl TreeInner {
    pub(crate) fn new(config: TreeConfig) -> Rc<Self> {
        let arena = Arena::new();
        let next_id = arena.next_id;
        Rc::new(Self {
            tree: TreeId(NEXT_TREE_ID.fetch_add(1, Ordering::Relaxed)),
            config,
            arena: RefCell::new(arena),
            txn: RefCell::new(Transaction::new(next_id)),
            computed: RefCell::new(ComputedState::default()),
            eval_stack: RefCell::new(Vec::new()),
            visitors: RefCell::new(Vec::new()),
            next_visitor: Cell::new(0),
            listeners: RefCell::new(HashMap::default()),
            next_listener: Cell::new(0),
            schemas: RefCell::new(HashMap::default()),
            lazy_pending: RefCell::new(IndexSet::default()),
            commit_depth: Cell::new(0),
        })
    }

    pub(crate) fn handle(self: &Rc<Self>, handle: u32) -> StateNode {
        StateNode::from_parts(Rc::clone(self), handle)
    }

    pub(crate) fn node_ref(&self, handle: u32) -> NodeRef {
        NodeRef {
            tree: self.tree,
            index: handle,
        }
    }

    /// Handle of `node` if it belongs to this tree.
    pub(crate) fn resolve(&self, node: NodeRef) -> Option<u32> {
        (node.tree == self.tree && node.slot() < self.arena.borrow().nodes.len())
            .then_some(node.index)
    }

    pub(crate) fn create(self: &Rc<Self>, schema: Option<Schema>) -> StateNode {
        let schema = schema.map(|schema| self.intern(schema));
        let handle = self.arena.borrow_mut().allocate(schema);
        self.handle(handle)
    }

    fn intern(&self, schema: Schema) -> Rc<Schema> {
        let fingerprint = crate::hash::fingerprint(&schema);
        let mut schemas = self.schemas.borrow_mut();
        let bucket = schemas.entry(fingerprint).or_default();
        if let Some(existing) = bucket.iter().find(|existing| ***existing == schema) {
            return Rc::clone(existing);
        }
        let schema = Rc::new(schema);
        bucket.push(Rc::clone(&schema));
        schema
    }

    pub(crate) fn log(&self, handle: u32, change: NodeChange) {
        self.txn.borrow_mut().log(handle, change);
    }

    pub(crate) fn ensure_mutable(&self) -> Result<(), TreeError> {
        if self.eval_stack.borrow().is_empty() {
            Ok(())
        } else {
            Err(TreeError::MutationWhileComputing)
        }
    }

    /// Validates that `value` may become owned by `parent`.
    pub(crate) fn check_attachable(
        &self,
        arena: &Arena,
        parent: u32,
        value: &Value,
    ) -> Result<(), TreeError> {
        let Some(node) = value.as_node() else {
            return Ok(());
        };
        if node.tree != self.tree || node.slot() >= arena.nodes.len() {
            return Err(TreeError::ForeignNode { node });
        }
        if node.index == ROOT {
            return Err(TreeError::RootAsChild);
        }
        if arena.node(node.index).parent.is_some() {
            return Err(TreeError::AlreadyOwned { node });
        }
        if arena.is_ancestor_or_self(node.index, parent) {
            return Err(TreeError::Cycle { node });
        }
        Ok(())
    }

    pub(crate) fn attach(&self, arena: &mut Arena, txn: &mut Transaction, parent: u32, value: &Value) {
        let Some(child) = value.as_node() else {
            return;
        };
        debug_assert!(arena.node(child.index).parent.is_none());
        arena.node_mut(child.index).parent = Some(parent);
        txn.log(
            child.index,
            NodeChange::Parent(ParentChange {
                old_parent: None,
                new_parent: Some(self.node_ref(parent)),
            }),
        );
        if arena.node(parent).id != UNATTACHED {
            arena.register(txn, child.index);
        }
    }

    pub(crate) fn detach(&self, arena: &mut Arena, txn: &mut Transaction, parent: u32, value: &Value) {
        let Some(child) = value.as_node() else {
            return;
        };
        arena.node_mut(child.index).parent = None;
        txn.log(
            child.index,
            NodeChange::Parent(ParentChange {
                old_parent: Some(self.node_ref(parent)),
                new_parent: None,
            }),
        );
        if arena.node(child.index).id != UNATTACHED {
            arena.unregister(txn, child.index);
        }
    }

    /// Removes the slot under `key`, journaling the removal and detaching
    /// every node it owned. Returns the key position and the old payload.
    pub(crate) fn take_slot(
        &self,
        arena: &mut Arena,
        txn: &mut Transaction,
        handle: u32,
        key: &Key,
    ) -> Option<(usize, SlotValue)> {
        let (position, key, slot) = arena.node_mut(handle).slots.shift_remove_full(key)?;
        let payload = slot.payload();
        let mut owned = SmallVec::<[u32; 8]>::new();
        slot.for_each_node(|child| owned.push(child));
        if let Slot::Lazy(lazy) = slot {
            txn.removed_lazy
                .entry((handle, key.clone()))
                .or_default()
                .push(lazy);
        }
        txn.log(
            handle,
            NodeChange::Remove(crate::change::RemoveChange {
                position,
                ..crate::change::RemoveChange::new(key, payload.clone())
            }),
        );
        for child in owned {
            self.detach(arena, txn, handle, &Value::Node(self.node_ref(child)));
        }
        Some((position, payload))
    }

    pub(crate) fn add_visitor(&self, visitor: SharedVisitor) -> usize {
        let id = self.next_visitor.get();
        self.next_visitor.set(id + 1);
        self.visitors.borrow_mut().push((id, visitor));
        id
    }

    pub(crate) fn remove_visitor(&self, id: usize) {
        self.visitors.borrow_mut().retain(|(existing, _)| *existing != id);
    }

    pub(crate) fn add_listener(&self, handle: u32, listener: ChangeListener) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners
            .borrow_mut()
            .entry(handle)
            .or_default()
            .push((id, listener));
        id
    }

    pub(crate) fn remove_listener(&self, handle: u32, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let Some(registered) = listeners.get_mut(&handle) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|(existing, _)| *existing != id);
        before != registered.len()
    }

    /// Closes the current transaction and opens a fresh one.
    pub(crate) fn take_transaction(&self) -> Transaction {
        let next_id = self.arena.borrow().next_id;
        std::mem::replace(&mut *self.txn.borrow_mut(), Transaction::new(next_id))
    }

    /// Reverts everything journaled since the last commit.
    pub(crate) fn rollback(&self) {
        let mut txn = self.take_transaction();
        let mut arena = self.arena.borrow_mut();
        let changes = std::mem::take(&mut txn.changes);
        for (handle, node_changes) in changes.iter().rev() {
            for change in node_changes.iter().rev() {
                arena.undo(*handle, change, &mut txn);
            }
        }
        arena.next_id = txn.next_id_at_start;
        self.txn.borrow_mut().next_id_at_start = arena.next_id;
        for ((handle, key), snapshot) in txn.lazy.drain() {
            if let Ok(lazy) = arena.lazy_mut(handle, &key) {
                lazy.restore(snapshot);
            }
        }
        drop(arena);
        if let Some(computed) = txn.computed.take() {
            *self.computed.borrow_mut() = computed;
        }
        self.lazy_pending.borrow_mut().clear();
        log::trace!(
            "rolled back {} node change lists",
            changes.len()
        );
    }
}
