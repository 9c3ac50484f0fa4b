//! Typed records of state tree mutations.
//!
//! Every mutation of a [`StateNode`] appends exactly one [`NodeChange`] to the
//! pending transaction of its tree. Changes are delivered to
//! [`NodeChangeVisitor`]s on commit and replayed backwards on rollback.

use crate::key::Key;
use crate::node::StateNode;
use crate::value::{NodeId, NodeRef, SlotValue, Value};

#[derive(Clone, PartialEq, Debug)]
pub struct PutChange {
    pub key: Key,
    pub value: SlotValue,
    /// Produced by a computed property evaluation rather than a `put`.
    pub computed: bool,
}

#[derive(Clone, Debug)]
pub struct RemoveChange {
    pub key: Key,
    /// The value the slot held right before removal.
    pub value: SlotValue,
    pub computed: bool,
    // Index of the key in the node's key order, used to restore it on rollback.
    pub(crate) position: usize,
}

impl RemoveChange {
    pub fn new(key: Key, value: SlotValue) -> Self {
        Self {
            key,
            value,
            computed: false,
            position: 0,
        }
    }

    pub(crate) fn computed(key: Key, value: SlotValue) -> Self {
        Self {
            computed: true,
            ..Self::new(key, value)
        }
    }
}

impl PartialEq for RemoveChange {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value && self.computed == other.computed
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct ListInsertChange {
    pub key: Key,
    pub index: usize,
    pub value: Value,
}

#[derive(Clone, PartialEq, Debug)]
pub struct ListInsertManyChange {
    pub key: Key,
    pub index: usize,
    pub values: Vec<Value>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct ListRemoveChange {
    pub key: Key,
    pub index: usize,
    pub value: Value,
}

#[derive(Clone, PartialEq, Debug)]
pub struct ListReplaceChange {
    pub key: Key,
    pub index: usize,
    pub old_value: Value,
    pub new_value: Value,
}

#[derive(Clone, PartialEq, Debug)]
pub struct ParentChange {
    pub old_parent: Option<NodeRef>,
    pub new_parent: Option<NodeRef>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct IdChange {
    pub old_id: NodeId,
    pub new_id: NodeId,
}

#[derive(Clone, PartialEq, Debug)]
pub struct RangeStartChange {
    pub key: Key,
    pub start: usize,
}

#[derive(Clone, PartialEq, Debug)]
pub struct RangeEndChange {
    pub key: Key,
    pub end: usize,
}

#[derive(Clone, PartialEq, Debug)]
pub enum NodeChange {
    Put(PutChange),
    Remove(RemoveChange),
    ListInsert(ListInsertChange),
    ListInsertMany(ListInsertManyChange),
    ListRemove(ListRemoveChange),
    ListReplace(ListReplaceChange),
    Parent(ParentChange),
    Id(IdChange),
    RangeStart(RangeStartChange),
    RangeEnd(RangeEndChange),
}

impl NodeChange {
    pub fn put(key: impl Into<Key>, value: impl Into<SlotValue>) -> Self {
        NodeChange::Put(PutChange {
            key: key.into(),
            value: value.into(),
            computed: false,
        })
    }

    pub fn remove(key: impl Into<Key>, value: impl Into<SlotValue>) -> Self {
        NodeChange::Remove(RemoveChange::new(key.into(), value.into()))
    }

    pub fn list_insert(key: impl Into<Key>, index: usize, value: impl Into<Value>) -> Self {
        NodeChange::ListInsert(ListInsertChange {
            key: key.into(),
            index,
            value: value.into(),
        })
    }

    pub fn list_insert_many(key: impl Into<Key>, index: usize, values: Vec<Value>) -> Self {
        NodeChange::ListInsertMany(ListInsertManyChange {
            key: key.into(),
            index,
            values,
        })
    }

    pub fn list_remove(key: impl Into<Key>, index: usize, value: impl Into<Value>) -> Self {
        NodeChange::ListRemove(ListRemoveChange {
            key: key.into(),
            index,
            value: value.into(),
        })
    }

    pub fn list_replace(
        key: impl Into<Key>,
        index: usize,
        old_value: impl Into<Value>,
        new_value: impl Into<Value>,
    ) -> Self {
        NodeChange::ListReplace(ListReplaceChange {
            key: key.into(),
            index,
            old_value: old_value.into(),
            new_value: new_value.into(),
        })
    }

    /// Key the change applies to; parent and id changes have none.
    pub fn key(&self) -> Option<&Key> {
        match self {
            NodeChange::Put(change) => Some(&change.key),
            NodeChange::Remove(change) => Some(&change.key),
            NodeChange::ListInsert(change) => Some(&change.key),
            NodeChange::ListInsertMany(change) => Some(&change.key),
            NodeChange::ListRemove(change) => Some(&change.key),
            NodeChange::ListReplace(change) => Some(&change.key),
            NodeChange::RangeStart(change) => Some(&change.key),
            NodeChange::RangeEnd(change) => Some(&change.key),
            NodeChange::Parent(_) | NodeChange::Id(_) => None,
        }
    }

    pub fn is_computed(&self) -> bool {
        match self {
            NodeChange::Put(change) => change.computed,
            NodeChange::Remove(change) => change.computed,
            _ => false,
        }
    }

    pub(crate) fn is_list_op(&self) -> bool {
        matches!(
            self,
            NodeChange::ListInsert(_)
                | NodeChange::ListInsertMany(_)
                | NodeChange::ListRemove(_)
                | NodeChange::ListReplace(_)
        )
    }

    /// Values this change adds to the tree.
    pub fn new_values(&self) -> &[Value] {
        match self {
            NodeChange::Put(PutChange {
                value: SlotValue::Value(value),
                ..
            }) => std::slice::from_ref(value),
            NodeChange::Put(PutChange {
                value: SlotValue::List(values),
                ..
            }) => values,
            NodeChange::ListInsert(change) => std::slice::from_ref(&change.value),
            NodeChange::ListInsertMany(change) => &change.values,
            NodeChange::ListReplace(change) => std::slice::from_ref(&change.new_value),
            _ => &[],
        }
    }

    /// Dispatches to the matching `visit_*` method of `visitor`.
    pub fn accept<V: NodeChangeVisitor + ?Sized>(&self, node: &StateNode, visitor: &mut V) {
        match self {
            NodeChange::Put(change) => visitor.visit_put(node, change),
            NodeChange::Remove(change) => visitor.visit_remove(node, change),
            NodeChange::ListInsert(change) => visitor.visit_list_insert(node, change),
            NodeChange::ListInsertMany(change) => visitor.visit_list_insert_many(node, change),
            NodeChange::ListRemove(change) => visitor.visit_list_remove(node, change),
            NodeChange::ListReplace(change) => visitor.visit_list_replace(node, change),
            NodeChange::Parent(change) => visitor.visit_parent(node, change),
            NodeChange::Id(change) => visitor.visit_id(node, change),
            NodeChange::RangeStart(change) => visitor.visit_range_start(node, change),
            NodeChange::RangeEnd(change) => visitor.visit_range_end(node, change),
        }
    }
}

/// Receives committed changes.
///
/// `visit_node` is called once per touched node with its ordered change
/// list; the default implementation dispatches each change to the typed
/// methods, which do nothing unless overridden.
pub trait NodeChangeVisitor {
    fn visit_node(&mut self, node: &StateNode, changes: &[NodeChange]) {
        for change in changes {
            change.accept(node, self);
        }
    }

    fn visit_put(&mut self, _node: &StateNode, _change: &PutChange) {}

    fn visit_remove(&mut self, _node: &StateNode, _change: &RemoveChange) {}

    fn visit_list_insert(&mut self, _node: &StateNode, _change: &ListInsertChange) {}

    fn visit_list_insert_many(&mut self, _node: &StateNode, _change: &ListInsertManyChange) {}

    fn visit_list_remove(&mut self, _node: &StateNode, _change: &ListRemoveChange) {}

    fn visit_list_replace(&mut self, _node: &StateNode, _change: &ListReplaceChange) {}

    fn visit_parent(&mut self, _node: &StateNode, _change: &ParentChange) {}

    fn visit_id(&mut self, _node: &StateNode, _change: &IdChange) {}

    fn visit_range_start(&mut self, _node: &StateNode, _change: &RangeStartChange) {}

    fn visit_range_end(&mut self, _node: &StateNode, _change: &RangeEndChange) {}
}
