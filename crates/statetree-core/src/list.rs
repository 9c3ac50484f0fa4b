use std::fmt;

use crate::change::{ListInsertChange, ListRemoveChange, ListReplaceChange, NodeChange};
use crate::error::TreeError;
use crate::key::Key;
use crate::node::StateNode;
use crate::tree::TreeInner;
use crate::value::Value;

/// Live view of a list slot, see [`StateNode::get_multi_valued`].
///
/// Every mutating method records exactly one change (`clear` records one
/// per element). Once the slot no longer holds the list the view was created
/// for, every call fails with [`TreeError::DetachedList`].
#[derive(Clone)]
pub struct ListView {
    node: StateNode,
    key: Key,
    list: u64,
}

impl ListView {
    pub(crate) fn new(node: StateNode, key: Key, list: u64) -> Self {
        Self { node, key, list }
    }

    pub fn node(&self) -> &StateNode {
        &self.node
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    fn read<R>(&self, f: impl FnOnce(&[Value]) -> R) -> Result<R, TreeError> {
        let tree = self.node.inner();
        tree.record_read(self.node.handle(), &self.key);
        let arena = tree.arena.borrow();
        let list = arena.list(self.node.handle(), &self.key, self.list)?;
        Ok(f(&list.items))
    }

    pub fn len(&self) -> Result<usize, TreeError> {
        self.read(<[Value]>::len)
    }

    pub fn is_empty(&self) -> Result<bool, TreeError> {
        self.read(<[Value]>::is_empty)
    }

    pub fn get(&self, index: usize) -> Result<Value, TreeError> {
        self.read(|items| {
            items.get(index).cloned().ok_or(TreeError::IndexOutOfBounds {
                index,
                len: items.len(),
            })
        })?
    }

    pub fn get_node(&self, index: usize) -> Result<Option<StateNode>, TreeError> {
        Ok(self
            .get(index)?
            .as_node()
            .and_then(|node| self.node.resolve(node)))
    }

    pub fn to_vec(&self) -> Result<Vec<Value>, TreeError> {
        self.read(<[Value]>::to_vec)
    }

    pub fn index_of(&self, value: &Value) -> Result<Option<usize>, TreeError> {
        self.read(|items| items.iter().position(|item| item == value))
    }

    pub fn contains(&self, value: &Value) -> Result<bool, TreeError> {
        Ok(self.index_of(value)?.is_some())
    }

    /// Appends `value`.
    pub fn add(&self, value: impl Into<Value>) -> Result<(), TreeError> {
        let len = self.len()?;
        self.insert(len, value)
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<(), TreeError> {
        self.node
            .inner()
            .list_insert(self.node.handle(), &self.key, self.list, index, value.into())
    }

    /// Replaces the element at `index` and returns the previous one.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<Value, TreeError> {
        self.node
            .inner()
            .list_set(self.node.handle(), &self.key, self.list, index, value.into())
    }

    pub fn remove(&self, index: usize) -> Result<Value, TreeError> {
        self.node
            .inner()
            .list_remove(self.node.handle(), &self.key, self.list, index)
    }

    /// Removes the first element equal to `value`.
    pub fn remove_value(&self, value: impl Into<Value>) -> Result<bool, TreeError> {
        match self.index_of(&value.into())? {
            Some(index) => self.remove(index).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn clear(&self) -> Result<(), TreeError> {
        while !self.is_empty()? {
            self.remove(0)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ListView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListView")
            .field("node", &self.node.node_ref())
            .field("key", &self.key)
            .field("items", &self.to_vec())
            .finish()
    }
}

impl TreeInner {
    pub(crate) fn list_insert(
        &self,
        handle: u32,
        key: &Key,
        list: u64,
        index: usize,
        value: Value,
    ) -> Result<(), TreeError> {
        self.ensure_mutable()?;
        let mut arena = self.arena.borrow_mut();
        let len = arena.list(handle, key, list)?.items.len();
        if index > len {
            return Err(TreeError::IndexOutOfBounds { index, len });
        }
        self.check_attachable(&arena, handle, &value)?;
        arena.list_mut(handle, key, list)?.items.insert(index, value.clone());
        let mut txn = self.txn.borrow_mut();
        txn.log(
            handle,
            NodeChange::ListInsert(ListInsertChange {
                key: key.clone(),
                index,
                value: value.clone(),
            }),
        );
        self.attach(&mut arena, &mut txn, handle, &value);
        drop(txn);
        drop(arena);
        self.invalidate(handle, key);
        Ok(())
    }

    pub(crate) fn list_set(
        &self,
        handle: u32,
        key: &Key,
        list: u64,
        index: usize,
        value: Value,
    ) -> Result<Value, TreeError> {
        self.ensure_mutable()?;
        let mut arena = self.arena.borrow_mut();
        let items = &arena.list(handle, key, list)?.items;
        let old_value = items
            .get(index)
            .cloned()
            .ok_or(TreeError::IndexOutOfBounds {
                index,
                len: items.len(),
            })?;
        if old_value == value {
            return Ok(old_value);
        }
        self.check_attachable(&arena, handle, &value)?;
        arena.list_mut(handle, key, list)?.items[index] = value.clone();
        let mut txn = self.txn.borrow_mut();
        txn.log(
            handle,
            NodeChange::ListReplace(ListReplaceChange {
                key: key.clone(),
                index,
                old_value: old_value.clone(),
                new_value: value.clone(),
            }),
        );
        self.detach(&mut arena, &mut txn, handle, &old_value);
        self.attach(&mut arena, &mut txn, handle, &value);
        drop(txn);
        drop(arena);
        self.invalidate(handle, key);
        Ok(old_value)
    }

    pub(crate) fn list_remove(
        &self,
        handle: u32,
        key: &Key,
        list: u64,
        index: usize,
    ) -> Result<Value, TreeError> {
        self.ensure_mutable()?;
        let mut arena = self.arena.borrow_mut();
        let items = &mut arena.list_mut(handle, key, list)?.items;
        if index >= items.len() {
            return Err(TreeError::IndexOutOfBounds {
                index,
                len: items.len(),
            });
        }
        let value = items.remove(index);
        let mut txn = self.txn.borrow_mut();
        txn.log(
            handle,
            NodeChange::ListRemove(ListRemoveChange {
                key: key.clone(),
                index,
                value: value.clone(),
            }),
        );
        self.detach(&mut arena, &mut txn, handle, &value);
        drop(txn);
        drop(arena);
        self.invalidate(handle, key);
        Ok(value)
    }
}
