use crate::key::Key;
use crate::value::{NodeRef, ValueKind};

/// Broad classification of a [`TreeError`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// The operation is not valid in the current state of the tree.
    IllegalState,
    /// An argument was rejected.
    IllegalArgument,
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum TreeError {
    #[error("node {node} already has a parent")]
    AlreadyOwned { node: NodeRef },
    #[error("node {node} cannot be attached below itself")]
    Cycle { node: NodeRef },
    #[error("the root node cannot be attached as a child")]
    RootAsChild,
    #[error("node {node} belongs to a different tree")]
    ForeignNode { node: NodeRef },
    #[error("list view for key {key} is no longer backed by a list")]
    DetachedList { key: Key },
    #[error("key {key} holds a lazy list")]
    LazyList { key: Key },
    #[error("key {key} does not hold a lazy list")]
    NotLazy { key: Key },
    #[error("key {key} is a computed property")]
    ComputedKey { key: Key },
    #[error("key {key} already holds a stored value")]
    StoredKey { key: Key },
    #[error("key {key} already exists")]
    KeyExists { key: Key },
    #[error("key {key} belongs to the node schema and cannot be removed")]
    SchemaKey { key: Key },
    #[error("key {key} expects {expected} but got {actual}")]
    TypeMismatch {
        key: Key,
        expected: ValueKind,
        actual: ValueKind,
    },
    #[error("index {index} is out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("range [{start}, {end}) is invalid")]
    InvalidRange { start: usize, end: usize },
    #[error("index {index} is outside of the active range [{start}, {end})")]
    OutsideRange {
        index: usize,
        start: usize,
        end: usize,
    },
    #[error("the tree cannot be mutated while a computed property is evaluated")]
    MutationWhileComputing,
}

impl TreeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TreeError::AlreadyOwned { .. }
            | TreeError::Cycle { .. }
            | TreeError::RootAsChild
            | TreeError::DetachedList { .. }
            | TreeError::LazyList { .. }
            | TreeError::NotLazy { .. }
            | TreeError::ComputedKey { .. }
            | TreeError::StoredKey { .. }
            | TreeError::KeyExists { .. }
            | TreeError::MutationWhileComputing => ErrorKind::IllegalState,
            TreeError::ForeignNode { .. }
            | TreeError::SchemaKey { .. }
            | TreeError::TypeMismatch { .. }
            | TreeError::IndexOutOfBounds { .. }
            | TreeError::InvalidRange { .. }
            | TreeError::OutsideRange { .. } => ErrorKind::IllegalArgument,
        }
    }
}
