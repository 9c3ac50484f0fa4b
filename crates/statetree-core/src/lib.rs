#![doc = r"Transactional state tree with computed properties and an optimizing change log."]

pub extern crate self as statetree_core;

mod change;
pub mod collections;
mod computed;
mod config;
mod error;
pub mod hash;
mod key;
mod lazy;
mod list;
pub mod log_builder;
mod node;
pub mod optimizer;
pub mod pruner;
pub mod range_cache;
mod root;
mod schema;
mod tree;
mod value;
pub mod wire;

pub use change::{
    IdChange, ListInsertChange, ListInsertManyChange, ListRemoveChange, ListReplaceChange,
    NodeChange, NodeChangeVisitor, ParentChange, PutChange, RangeEndChange, RangeStartChange,
    RemoveChange,
};
pub use config::{InsertCoalescing, OptimizerConfig, TreeConfig};
pub use error::{ErrorKind, TreeError};
pub use key::{Key, Marker, TypeKey};
pub use lazy::{DataProvider, LazyList, LazyListView};
pub use list::ListView;
pub use log_builder::{ChangeLog, NodeLog, TransactionLogBuilder};
pub use node::{ChangeListener, ContentSlot, ListenerId, NodeContent, StateNode};
pub use optimizer::{OptimizedLog, OptimizedNode, TransactionLogOptimizer};
pub use pruner::prune_server_only;
pub use range_cache::{RangeCacheState, SingleRangeCache};
pub use root::{CommitVisitorRegistration, RootNode};
pub use schema::Schema;
pub use value::{FromValue, NodeId, NodeRef, SlotValue, TreeId, Value, ValueKind, UNATTACHED};
pub use wire::{encode_changes, ChangeRecord, ChangeType};

#[cfg(test)]
#[path = "tests/node_tests.rs"]
mod node_tests;

#[cfg(test)]
#[path = "tests/transaction_tests.rs"]
mod transaction_tests;

#[cfg(test)]
#[path = "tests/computed_tests.rs"]
mod computed_tests;

#[cfg(test)]
#[path = "tests/lazy_tests.rs"]
mod lazy_tests;
