use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::change::{NodeChange, PutChange};
use crate::computed::Supplier;
use crate::error::TreeError;
use crate::key::{Key, Marker};
use crate::lazy::{LazyList, LazyListView};
use crate::list::ListView;
use crate::schema::Schema;
use crate::tree::{ListSlot, Slot, TreeInner, ROOT};
use crate::value::{convert, FromValue, NodeId, NodeRef, SlotValue, Value, ValueKind, UNATTACHED};

/// Callback invoked with the changes of one node after they are committed.
pub type ChangeListener = Rc<dyn Fn(&StateNode, &[NodeChange])>;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ListenerId(pub(crate) usize);

/// Handle to a node of a state tree.
///
/// Handles are cheap to clone and compare by node identity. All nodes of a
/// tree, attached or not, are owned by the tree created with
/// [`RootNode::new`](crate::RootNode::new); a node becomes part of the
/// client-visible tree once it is put into an attached node.
#[derive(Clone)]
pub struct StateNode {
    tree: Rc<TreeInner>,
    handle: u32,
}

impl StateNode {
    pub(crate) fn from_parts(tree: Rc<TreeInner>, handle: u32) -> Self {
        Self { tree, handle }
    }

    pub(crate) fn inner(&self) -> &Rc<TreeInner> {
        &self.tree
    }

    pub(crate) fn handle(&self) -> u32 {
        self.handle
    }

    pub fn node_ref(&self) -> NodeRef {
        self.tree.node_ref(self.handle)
    }

    /// Client id, or `0` while the node is not attached.
    pub fn id(&self) -> NodeId {
        self.tree.arena.borrow().node(self.handle).id
    }

    pub fn is_attached(&self) -> bool {
        self.id() != UNATTACHED
    }

    pub fn is_root(&self) -> bool {
        self.handle == ROOT
    }

    pub fn parent(&self) -> Option<StateNode> {
        let parent = self.tree.arena.borrow().node(self.handle).parent;
        parent.map(|parent| self.tree.handle(parent))
    }

    /// Whether `ancestor` is this node or one of its parents.
    pub fn has_ancestor(&self, ancestor: &StateNode) -> bool {
        Rc::ptr_eq(&self.tree, &ancestor.tree)
            && self
                .tree
                .arena
                .borrow()
                .is_ancestor_or_self(ancestor.handle, self.handle)
    }

    /// Resolves a node reference from the same tree.
    pub fn resolve(&self, node: NodeRef) -> Option<StateNode> {
        self.tree.resolve(node).map(|handle| self.tree.handle(handle))
    }

    pub fn schema(&self) -> Option<Rc<Schema>> {
        self.tree.arena.borrow().node(self.handle).schema.clone()
    }

    /// Value stored or computed under `key`.
    ///
    /// List slots yield `None`; use [`StateNode::get_multi_valued`] for them.
    /// Inside a computed property the read is recorded as a dependency.
    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        let key = key.into();
        self.tree.record_read(self.handle, &key);
        if self.tree.is_computed(self.handle, &key) {
            return self.tree.evaluate(self.handle, &key);
        }
        match self.tree.arena.borrow().node(self.handle).slots.get(&key) {
            Some(Slot::Value(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Typed read. A value of another type is an error.
    pub fn get_as<T: FromValue>(&self, key: impl Into<Key>) -> Result<Option<T>, TreeError> {
        let key = key.into();
        match self.get(key.clone()) {
            Some(value) => convert(&key, &value).map(Some),
            None => Ok(None),
        }
    }

    /// Typed read falling back to `default` when the key is absent.
    pub fn get_or<T: FromValue>(&self, key: impl Into<Key>, default: T) -> Result<T, TreeError> {
        Ok(self.get_as(key)?.unwrap_or(default))
    }

    pub fn get_node(&self, key: impl Into<Key>) -> Option<StateNode> {
        self.get(key)
            .and_then(|value| value.as_node())
            .and_then(|node| self.resolve(node))
    }

    pub fn contains_key(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        self.tree.record_read(self.handle, &key);
        if self.tree.is_computed(self.handle, &key) {
            return true;
        }
        let arena = self.tree.arena.borrow();
        let node = arena.node(self.handle);
        node.slots.contains_key(&key)
            || node
                .schema
                .as_ref()
                .is_some_and(|schema| schema.kind_of(&key).is_some())
    }

    /// Stored keys in insertion order, then unset schema keys, then computed
    /// keys.
    pub fn keys(&self) -> Vec<Key> {
        let arena = self.tree.arena.borrow();
        let node = arena.node(self.handle);
        let mut keys: Vec<Key> = node.slots.keys().cloned().collect();
        if let Some(schema) = &node.schema {
            keys.extend(
                schema
                    .keys()
                    .filter(|key| !node.slots.contains_key(*key))
                    .cloned(),
            );
        }
        keys.extend(self.tree.computed.borrow().keys_of(self.handle).iter().cloned());
        keys
    }

    pub fn string_keys(&self) -> Vec<Rc<str>> {
        self.keys()
            .into_iter()
            .filter_map(|key| match key {
                Key::Name(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Stores `value` under `key` and returns the previous single value.
    ///
    /// Node values become children of this node and must not have a parent
    /// yet. Putting a value equal to the current one records nothing.
    pub fn put(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<Option<Value>, TreeError> {
        self.tree.put(self.handle, key.into(), value.into())
    }

    /// Removes `key` and returns the payload it held.
    pub fn remove(&self, key: impl Into<Key>) -> Result<Option<SlotValue>, TreeError> {
        self.tree.remove(self.handle, &key.into())
    }

    /// Live list view over the list stored under `key`, creating the list on
    /// first use. A single value already stored under `key` becomes the
    /// first list element.
    pub fn get_multi_valued(&self, key: impl Into<Key>) -> Result<ListView, TreeError> {
        let key = key.into();
        let list = self.tree.multi_valued(self.handle, &key)?;
        Ok(ListView::new(self.clone(), key, list))
    }

    /// Defines `key` as a computed property.
    ///
    /// The supplier receives this node. Reads it performs through any node
    /// of the tree are tracked, and the value is recomputed lazily after one
    /// of them changes.
    pub fn put_computed(
        &self,
        key: impl Into<Key>,
        supplier: impl Fn(&StateNode) -> Option<Value> + 'static,
    ) -> Result<(), TreeError> {
        let key = key.into();
        self.tree.ensure_mutable()?;
        if self.tree.is_computed(self.handle, &key) {
            return Err(TreeError::ComputedKey { key });
        }
        if self
            .tree
            .arena
            .borrow()
            .node(self.handle)
            .slots
            .contains_key(&key)
        {
            return Err(TreeError::StoredKey { key });
        }
        let supplier: Supplier = Rc::new(supplier);
        self.tree.define_computed(self.handle, key, supplier);
        Ok(())
    }

    /// Evaluates computed properties of this node invalidated since they
    /// were last read, so their new values are part of the next commit.
    pub fn flush_computed_properties(&self) {
        self.tree.flush_computed(Some(self.handle));
    }

    pub fn put_lazy_list(&self, key: impl Into<Key>, list: LazyList) -> Result<LazyListView, TreeError> {
        let key = key.into();
        self.tree.put_lazy(self.handle, key.clone(), list)?;
        Ok(LazyListView::new(self.clone(), key))
    }

    pub fn lazy_list(&self, key: impl Into<Key>) -> Option<LazyListView> {
        let key = key.into();
        let is_lazy = matches!(
            self.tree.arena.borrow().node(self.handle).slots.get(&key),
            Some(Slot::Lazy(_))
        );
        is_lazy.then(|| LazyListView::new(self.clone(), key))
    }

    /// Keeps this node and its subtree away from the client.
    pub fn mark_server_only(&self) -> Result<(), TreeError> {
        self.put(Marker::ServerOnly, true).map(drop)
    }

    /// Stops transmitting computed properties of this node.
    pub fn mark_computed_server_only(&self) -> Result<(), TreeError> {
        self.put(Marker::ComputedServerOnly, true).map(drop)
    }

    /// Whether this node or one of its ancestors is marked server-only.
    pub fn is_server_only(&self) -> bool {
        let key = Key::Marker(Marker::ServerOnly);
        let arena = self.tree.arena.borrow();
        let mut current = Some(self.handle);
        while let Some(handle) = current {
            let node = arena.node(handle);
            if node.slots.contains_key(&key) {
                return true;
            }
            current = node.parent;
        }
        false
    }

    pub fn is_computed_server_only(&self) -> bool {
        self.tree
            .arena
            .borrow()
            .node(self.handle)
            .slots
            .contains_key(&Key::Marker(Marker::ComputedServerOnly))
    }

    /// Registers a callback receiving this node's changes after each commit.
    /// The callback may mutate the tree; its changes are committed in a
    /// follow-up round of the same commit.
    pub fn add_change_listener(
        &self,
        listener: impl Fn(&StateNode, &[NodeChange]) + 'static,
    ) -> ListenerId {
        self.tree.add_listener(self.handle, Rc::new(listener))
    }

    pub fn remove_change_listener(&self, id: ListenerId) -> bool {
        self.tree.remove_listener(self.handle, id)
    }

    /// Changes recorded for this node in the open transaction, oldest first.
    pub fn pending_changes(&self) -> Vec<NodeChange> {
        self.tree
            .txn
            .borrow()
            .changes
            .get(&self.handle)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of what the client sees of this node: stored slots in key
    /// order followed by evaluated computed values.
    pub fn content(&self) -> NodeContent {
        let arena = self.tree.arena.borrow();
        let node = arena.node(self.handle);
        let mut entries: Vec<(Key, ContentSlot)> = node
            .slots
            .iter()
            .map(|(key, slot)| {
                let content = match slot {
                    Slot::Value(value) => ContentSlot::Value(value.clone()),
                    Slot::List(list) => ContentSlot::List(list.items.clone()),
                    Slot::Lazy(lazy) => {
                        let (range, items) = lazy.client_view();
                        ContentSlot::Lazy {
                            start: range.start,
                            end: range.end,
                            items,
                        }
                    }
                };
                (key.clone(), content)
            })
            .collect();
        drop(arena);
        let computed = self.tree.computed.borrow().keys_of(self.handle).to_vec();
        for key in computed {
            if let Some(value) = self.tree.peek_computed(self.handle, &key) {
                entries.push((key, ContentSlot::Computed(value)));
            }
        }
        NodeContent { entries }
    }

    /// Length of the client-visible list under `key`, if it holds one.
    pub fn list_len(&self, key: &Key) -> Option<usize> {
        match self.tree.arena.borrow().node(self.handle).slots.get(key) {
            Some(Slot::List(list)) => Some(list.items.len()),
            Some(Slot::Lazy(lazy)) => Some(lazy.client_view().0.len()),
            _ => None,
        }
    }
}

impl PartialEq for StateNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.tree, &other.tree) && self.handle == other.handle
    }
}

impl Eq for StateNode {}

impl Hash for StateNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node_ref().hash(state);
    }
}

impl fmt::Debug for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNode")
            .field("ref", &self.node_ref())
            .field("id", &self.id())
            .finish()
    }
}

impl From<&StateNode> for Value {
    fn from(node: &StateNode) -> Self {
        Value::Node(node.node_ref())
    }
}

impl From<StateNode> for Value {
    fn from(node: StateNode) -> Self {
        Value::Node(node.node_ref())
    }
}

impl From<&StateNode> for crate::value::SlotValue {
    fn from(node: &StateNode) -> Self {
        SlotValue::Value(Value::Node(node.node_ref()))
    }
}

/// Client-visible contents of a node, see [`StateNode::content`].
#[derive(Clone, PartialEq, Debug, Default)]
pub struct NodeContent {
    pub entries: Vec<(Key, ContentSlot)>,
}

#[derive(Clone, PartialEq, Debug)]
pub enum ContentSlot {
    Value(Value),
    List(Vec<Value>),
    Lazy {
        start: usize,
        end: usize,
        items: Vec<Value>,
    },
    Computed(Value),
}

impl TreeInner {
    fn check_schema(&self, handle: u32, key: &Key, kind: ValueKind) -> Result<(), TreeError> {
        let arena = self.arena.borrow();
        let Some(schema) = &arena.node(handle).schema else {
            return Ok(());
        };
        match schema.kind_of(key) {
            Some(expected) if !expected.accepts(kind) => Err(TreeError::TypeMismatch {
                key: key.clone(),
                expected,
                actual: kind,
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn put(&self, handle: u32, key: Key, value: Value) -> Result<Option<Value>, TreeError> {
        self.ensure_mutable()?;
        if self.is_computed(handle, &key) {
            return Err(TreeError::ComputedKey { key });
        }
        self.check_schema(handle, &key, value.kind())?;
        {
            let mut arena = self.arena.borrow_mut();
            if let Some(Slot::Value(current)) = arena.node(handle).slots.get(&key) {
                if *current == value {
                    return Ok(Some(current.clone()));
                }
            }
            self.check_attachable(&arena, handle, &value)?;

            let mut txn = self.txn.borrow_mut();
            let replaced = self.take_slot(&mut arena, &mut txn, handle, &key);
            let slots = &mut arena.node_mut(handle).slots;
            let position = replaced
                .as_ref()
                .map_or(slots.len(), |(position, _)| *position)
                .min(slots.len());
            slots.shift_insert(position, key.clone(), Slot::Value(value.clone()));
            txn.log(
                handle,
                NodeChange::Put(PutChange {
                    key: key.clone(),
                    value: SlotValue::Value(value.clone()),
                    computed: false,
                }),
            );
            self.attach(&mut arena, &mut txn, handle, &value);
            drop(txn);
            drop(arena);
            self.invalidate(handle, &key);
            Ok(replaced.and_then(|(_, payload)| match payload {
                SlotValue::Value(value) => Some(value),
                _ => None,
            }))
        }
    }

    pub(crate) fn remove(&self, handle: u32, key: &Key) -> Result<Option<SlotValue>, TreeError> {
        self.ensure_mutable()?;
        if self.is_computed(handle, key) {
            return Err(TreeError::ComputedKey { key: key.clone() });
        }
        let mut arena = self.arena.borrow_mut();
        if arena
            .node(handle)
            .schema
            .as_ref()
            .is_some_and(|schema| schema.kind_of(key).is_some())
        {
            return Err(TreeError::SchemaKey { key: key.clone() });
        }
        let mut txn = self.txn.borrow_mut();
        let removed = self.take_slot(&mut arena, &mut txn, handle, key);
        drop(txn);
        drop(arena);
        if removed.is_some() {
            self.invalidate(handle, key);
        }
        Ok(removed.map(|(_, payload)| payload))
    }

    /// Id of the list stored under `key`, creating it when needed.
    pub(crate) fn multi_valued(&self, handle: u32, key: &Key) -> Result<u64, TreeError> {
        if self.is_computed(handle, key) {
            return Err(TreeError::ComputedKey { key: key.clone() });
        }
        let mut arena = self.arena.borrow_mut();
        let (position, existing) = match arena.node(handle).slots.get_full(key) {
            Some((_, _, Slot::List(list))) => return Ok(list.id),
            Some((_, _, Slot::Lazy(_))) => return Err(TreeError::LazyList { key: key.clone() }),
            Some((position, _, Slot::Value(value))) => (position, Some(value.clone())),
            None => (arena.node(handle).slots.len(), None),
        };
        self.ensure_mutable()?;
        drop(arena);
        self.check_schema(handle, key, ValueKind::List)?;
        let mut arena = self.arena.borrow_mut();

        let mut txn = self.txn.borrow_mut();
        let items: Vec<Value> = existing.iter().cloned().collect();
        if let Some(value) = existing {
            // The wrapped value keeps its owner, so no detach/attach here.
            arena.node_mut(handle).slots.shift_remove(key);
            txn.log(
                handle,
                NodeChange::Remove(crate::change::RemoveChange {
                    position,
                    ..crate::change::RemoveChange::new(key.clone(), SlotValue::Value(value))
                }),
            );
        }
        let id = arena.new_list_id();
        arena.node_mut(handle).slots.shift_insert(
            position,
            key.clone(),
            Slot::List(ListSlot {
                id,
                items: items.clone(),
            }),
        );
        txn.log(
            handle,
            NodeChange::Put(PutChange {
                key: key.clone(),
                value: SlotValue::List(items),
                computed: false,
            }),
        );
        drop(txn);
        drop(arena);
        self.invalidate(handle, key);
        Ok(id)
    }
}
