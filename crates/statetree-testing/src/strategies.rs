//! Proptest strategies producing random edits of a small pool of nodes.

use proptest::prelude::*;
use statetree_core::{RootNode, StateNode, TreeError, Value};

/// Keys used for single values. List operations on them wrap the value.
pub const VALUE_KEYS: [&str; 3] = ["a", "b", "items"];
/// Keys used for list operations.
pub const LIST_KEYS: [&str; 2] = ["items", "more"];

/// A value to store; `Node` indexes into the pool.
#[derive(Clone, Debug)]
pub enum OpValue {
    Int(i64),
    Str(String),
    Bool(bool),
    Node(usize),
}

/// One mutation. Node and key indices wrap around the pool and key tables,
/// list indices around the current list length.
#[derive(Clone, Debug)]
pub enum TreeOp {
    Put {
        node: usize,
        key: usize,
        value: OpValue,
    },
    Remove {
        node: usize,
        key: usize,
    },
    Insert {
        node: usize,
        list: usize,
        index: usize,
        value: OpValue,
    },
    RemoveAt {
        node: usize,
        list: usize,
        index: usize,
    },
    Set {
        node: usize,
        list: usize,
        index: usize,
        value: OpValue,
    },
}

/// A fixed set of nodes to edit, usually the root followed by fresh nodes.
pub struct TreePool {
    root: RootNode,
    nodes: Vec<StateNode>,
}

impl TreePool {
    /// Root with `size` detached nodes.
    pub fn new(size: usize) -> Self {
        Self::with_root(RootNode::new(), size)
    }

    pub fn with_root(root: RootNode, size: usize) -> Self {
        let mut nodes = vec![StateNode::clone(&root)];
        nodes.extend((0..size).map(|_| root.create_node()));
        Self { root, nodes }
    }

    /// `size` fresh nodes of `root`'s tree, without the root itself.
    pub fn detached(root: &RootNode, size: usize) -> Self {
        Self {
            root: root.clone(),
            nodes: (0..size.max(1)).map(|_| root.create_node()).collect(),
        }
    }

    pub fn root(&self) -> &RootNode {
        &self.root
    }

    pub fn nodes(&self) -> &[StateNode] {
        &self.nodes
    }

    fn node(&self, index: usize) -> &StateNode {
        &self.nodes[index % self.nodes.len()]
    }

    fn value(&self, value: &OpValue) -> Value {
        match value {
            OpValue::Int(value) => Value::Int(*value),
            OpValue::Str(value) => Value::from(value.as_str()),
            OpValue::Bool(value) => Value::Bool(*value),
            OpValue::Node(index) => Value::from(self.node(*index)),
        }
    }

    /// Applies `op`. Rejected edits leave the tree untouched and report why.
    pub fn apply(&self, op: &TreeOp) -> Result<(), TreeError> {
        match op {
            TreeOp::Put { node, key, value } => {
                let key = VALUE_KEYS[key % VALUE_KEYS.len()];
                self.node(*node).put(key, self.value(value)).map(drop)
            }
            TreeOp::Remove { node, key } => {
                let key = VALUE_KEYS[key % VALUE_KEYS.len()];
                self.node(*node).remove(key).map(drop)
            }
            TreeOp::Insert {
                node,
                list,
                index,
                value,
            } => {
                let list = self.node(*node).get_multi_valued(LIST_KEYS[list % LIST_KEYS.len()])?;
                let index = index % (list.len()? + 1);
                list.insert(index, self.value(value))
            }
            TreeOp::RemoveAt { node, list, index } => {
                let list = self.node(*node).get_multi_valued(LIST_KEYS[list % LIST_KEYS.len()])?;
                match list.len()? {
                    0 => Ok(()),
                    len => list.remove(index % len).map(drop),
                }
            }
            TreeOp::Set {
                node,
                list,
                index,
                value,
            } => {
                let list = self.node(*node).get_multi_valued(LIST_KEYS[list % LIST_KEYS.len()])?;
                match list.len()? {
                    0 => Ok(()),
                    len => list.set(index % len, self.value(value)).map(drop),
                }
            }
        }
    }

    /// Applies every op, ignoring the rejected ones.
    pub fn apply_all(&self, ops: &[TreeOp]) {
        for op in ops {
            if let Err(error) = self.apply(op) {
                log::trace!("skipped {op:?}: {error}");
            }
        }
    }
}

pub fn arb_value(pool: usize) -> impl Strategy<Value = OpValue> {
    prop_oneof![
        2 => (-3i64..3).prop_map(OpValue::Int),
        1 => "[a-c]{1,2}".prop_map(OpValue::Str),
        1 => any::<bool>().prop_map(OpValue::Bool),
        3 => (0..pool).prop_map(OpValue::Node),
    ]
}

/// Ops over a pool of `pool` nodes, the root included.
pub fn arb_op(pool: usize) -> impl Strategy<Value = TreeOp> {
    let keys = VALUE_KEYS.len();
    let lists = LIST_KEYS.len();
    prop_oneof![
        3 => (0..pool, 0..keys, arb_value(pool))
            .prop_map(|(node, key, value)| TreeOp::Put { node, key, value }),
        1 => (0..pool, 0..keys).prop_map(|(node, key)| TreeOp::Remove { node, key }),
        3 => (0..pool, 0..lists, 0..8usize, arb_value(pool)).prop_map(
            |(node, list, index, value)| TreeOp::Insert {
                node,
                list,
                index,
                value,
            }
        ),
        2 => (0..pool, 0..lists, 0..8usize)
            .prop_map(|(node, list, index)| TreeOp::RemoveAt { node, list, index }),
        1 => (0..pool, 0..lists, 0..8usize, arb_value(pool)).prop_map(
            |(node, list, index, value)| TreeOp::Set {
                node,
                list,
                index,
                value,
            }
        ),
    ]
}

pub fn arb_transaction(pool: usize) -> impl Strategy<Value = Vec<TreeOp>> {
    prop::collection::vec(arb_op(pool), 0..16)
}

/// Transactions paired with whether they are committed or rolled back.
pub fn arb_history(pool: usize) -> impl Strategy<Value = Vec<(Vec<TreeOp>, bool)>> {
    prop::collection::vec((arb_transaction(pool), prop::bool::weighted(0.8)), 1..6)
}
