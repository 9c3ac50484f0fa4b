use std::fmt;
use std::rc::Rc;

use crate::error::TreeError;
use crate::key::Key;

/// Client-visible node id. `0` means "not attached".
pub type NodeId = usize;

/// Id of a node that is not attached to its root.
pub const UNATTACHED: NodeId = 0;

/// Identity of a tree instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct TreeId(pub(crate) u32);

/// Stable identity of a node inside its tree's arena.
///
/// Unlike [`NodeId`] it never changes while the node is detached and
/// re-attached, so it is what values and change payloads point at.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub(crate) tree: TreeId,
    pub(crate) index: u32,
}

impl NodeRef {
    pub fn tree(&self) -> TreeId {
        self.tree
    }

    pub(crate) fn slot(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.tree.0, self.index)
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single stored value.
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(Rc<str>),
    Node(NodeRef),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Double(_) => ValueKind::Double,
            Value::Str(_) => ValueKind::Str,
            Value::Node(_) => ValueKind::Node,
        }
    }

    pub fn as_node(&self) -> Option<NodeRef> {
        match self {
            Value::Node(node) => Some(*node),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Double(value) => write!(f, "{value}"),
            Value::Str(value) => f.write_str(value),
            Value::Node(node) => write!(f, "{node}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl From<Rc<str>> for Value {
    fn from(value: Rc<str>) -> Self {
        Value::Str(value)
    }
}

impl From<NodeRef> for Value {
    fn from(value: NodeRef) -> Self {
        Value::Node(value)
    }
}

impl From<&Value> for Value {
    fn from(value: &Value) -> Self {
        value.clone()
    }
}

/// Shape of a value, used by schemas and typed reads.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ValueKind {
    Bool,
    Int,
    Double,
    Str,
    Node,
    List,
    Any,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Double => "double",
            ValueKind::Str => "string",
            ValueKind::Node => "node",
            ValueKind::List => "list",
            ValueKind::Any => "any",
        }
    }

    pub(crate) fn accepts(self, other: ValueKind) -> bool {
        self == ValueKind::Any || self == other
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload of a whole slot, as carried by put and remove changes.
#[derive(Clone, PartialEq, Debug)]
pub enum SlotValue {
    Value(Value),
    List(Vec<Value>),
    LazyList,
}

impl SlotValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            SlotValue::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Nodes owned through this payload.
    pub fn nodes(&self) -> impl Iterator<Item = NodeRef> + '_ {
        let values: &[Value] = match self {
            SlotValue::Value(value) => std::slice::from_ref(value),
            SlotValue::List(values) => values,
            SlotValue::LazyList => &[],
        };
        values.iter().filter_map(Value::as_node)
    }
}

impl From<Value> for SlotValue {
    fn from(value: Value) -> Self {
        SlotValue::Value(value)
    }
}

macro_rules! slot_value_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for SlotValue {
            fn from(value: $ty) -> Self {
                SlotValue::Value(Value::from(value))
            }
        })*
    };
}

slot_value_from!(bool, i32, i64, f64, &str, String, NodeRef);

/// Conversion used by [`StateNode::get_as`](crate::StateNode::get_as).
pub trait FromValue: Sized {
    const KIND: ValueKind;

    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    const KIND: ValueKind = ValueKind::Int;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    const KIND: ValueKind = ValueKind::Double;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Double(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }
}

impl FromValue for Rc<str> {
    const KIND: ValueKind = ValueKind::Str;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Str(value) => Some(Rc::clone(value)),
            _ => None,
        }
    }
}

impl FromValue for String {
    const KIND: ValueKind = ValueKind::Str;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl FromValue for NodeRef {
    const KIND: ValueKind = ValueKind::Node;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_node()
    }
}

pub(crate) fn convert<T: FromValue>(key: &Key, value: &Value) -> Result<T, TreeError> {
    T::from_value(value).ok_or_else(|| TreeError::TypeMismatch {
        key: key.clone(),
        expected: T::KIND,
        actual: value.kind(),
    })
}
