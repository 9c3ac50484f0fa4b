//! Reduces a [`ChangeLog`] to the smallest equivalent set of changes.
//!
//! Nodes the client never saw and no longer reachable are dropped together
//! with every value referring to them. Nodes new to the client are described
//! by their final contents. For the remaining nodes each key is reduced on
//! its own, in order of first occurrence:
//!
//! * put/remove sequences collapse to the last put, or to a single remove
//!   carrying the value the key held before the transaction;
//! * list changes are replayed against a model of the list that tracks
//!   which entries existed before the transaction, so inserts and removes of
//!   the same entry cancel and surviving inserts are grouped into runs;
//! * lazy lists report their final range bounds before their list changes.

use crate::change::{
    ListInsertChange, ListInsertManyChange, ListRemoveChange, ListReplaceChange, NodeChange,
    PutChange, RangeEndChange, RangeStartChange, RemoveChange,
};
use crate::collections::map::HashSet;
use crate::collections::ordered::IndexMap;
use crate::config::{InsertCoalescing, OptimizerConfig};
use crate::key::Key;
use crate::log_builder::{ChangeLog, NodeLog};
use crate::node::ContentSlot;
use crate::value::{NodeId, NodeRef, SlotValue, Value, UNATTACHED};

/// Changes for one node in an [`OptimizedLog`].
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizedNode {
    pub node: NodeRef,
    /// Client id of the node after the commit.
    pub id: NodeId,
    /// The client has to create the node; `changes` describe all of it.
    pub created: bool,
    pub changes: Vec<NodeChange>,
    pub(crate) server_only: bool,
    pub(crate) computed_server_only: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OptimizedLog {
    pub(crate) nodes: Vec<OptimizedNode>,
}

impl OptimizedLog {
    pub fn nodes(&self) -> &[OptimizedNode] {
        &self.nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = &OptimizedNode> {
        self.nodes.iter()
    }

    pub fn node(&self, node: NodeRef) -> Option<&OptimizedNode> {
        self.nodes.iter().find(|entry| entry.node == node)
    }

    pub fn changes_for(&self, node: NodeRef) -> &[NodeChange] {
        self.node(node).map_or(&[], |entry| entry.changes.as_slice())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.nodes.iter().map(|entry| entry.changes.len()).sum()
    }

    /// Whether any group or change value mentions `node`.
    pub fn references(&self, node: NodeRef) -> bool {
        self.nodes
            .iter()
            .any(|entry| entry.node == node || entry.changes.iter().any(|change| mentions(change, node)))
    }
}

fn mentions(change: &NodeChange, node: NodeRef) -> bool {
    let is_node = |value: &Value| value.as_node() == Some(node);
    if change.new_values().iter().any(is_node) {
        return true;
    }
    match change {
        NodeChange::Remove(change) => change.value.nodes().any(|owned| owned == node),
        NodeChange::ListRemove(change) => is_node(&change.value),
        NodeChange::ListReplace(change) => is_node(&change.old_value),
        _ => false,
    }
}

#[derive(Default)]
pub struct TransactionLogOptimizer {
    config: OptimizerConfig,
}

impl TransactionLogOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// # Panics
    ///
    /// When the log is internally inconsistent, e.g. a list change refers to
    /// an index the list never had.
    pub fn optimize(&self, log: &ChangeLog) -> OptimizedLog {
        let ephemeral: HashSet<NodeRef> = log
            .nodes()
            .iter()
            .filter(|entry| entry.start_id == UNATTACHED && entry.end_id == UNATTACHED)
            .map(|entry| entry.node)
            .collect();

        let mut nodes = Vec::new();
        for entry in log.nodes() {
            if entry.end_id == UNATTACHED {
                continue;
            }
            let created = entry.is_created();
            let changes = if created {
                creation_changes(entry)
            } else {
                self.node_changes(entry, &ephemeral)
            };
            if !created && changes.is_empty() {
                continue;
            }
            nodes.push(OptimizedNode {
                node: entry.node,
                id: entry.end_id,
                created,
                changes,
                server_only: entry.server_only,
                computed_server_only: entry.computed_server_only,
            });
        }
        log::trace!(
            "optimized {} logged nodes into {} groups ({} elided)",
            log.len(),
            nodes.len(),
            ephemeral.len()
        );
        OptimizedLog { nodes }
    }

    fn node_changes(&self, entry: &NodeLog, ephemeral: &HashSet<NodeRef>) -> Vec<NodeChange> {
        let mut by_key: IndexMap<Key, Vec<&NodeChange>> = IndexMap::default();
        for change in &entry.changes {
            if let Some(key) = change.key() {
                by_key.entry(key.clone()).or_default().push(change);
            }
        }
        let mut out = Vec::new();
        for (key, ops) in by_key {
            let final_len = entry.list_length(&key);
            self.key_changes(&key, &ops, final_len, ephemeral, &mut out);
        }
        out
    }

    fn key_changes(
        &self,
        key: &Key,
        ops: &[&NodeChange],
        final_len: Option<usize>,
        ephemeral: &HashSet<NodeRef>,
        out: &mut Vec<NodeChange>,
    ) {
        let last_slot = ops
            .iter()
            .rposition(|change| matches!(change, NodeChange::Put(_) | NodeChange::Remove(_)));
        let Some(last_slot) = last_slot else {
            push_range_bounds(key, ops, out);
            let list_ops: Vec<&NodeChange> = ops.iter().copied().filter(|op| op.is_list_op()).collect();
            if !list_ops.is_empty() {
                let final_len = final_len.unwrap_or_else(|| {
                    panic!("list changes for {key} were logged without a final length")
                });
                let lazy = ops
                    .iter()
                    .any(|op| matches!(op, NodeChange::RangeStart(_) | NodeChange::RangeEnd(_)));
                self.coalesce_list(key, &list_ops, final_len, lazy, out);
            }
            return;
        };

        match ops[last_slot] {
            NodeChange::Remove(last) => {
                let existed = !matches!(ops[0], NodeChange::Put(_));
                if existed {
                    let original = ops
                        .iter()
                        .position(|op| matches!(op, NodeChange::Remove(_)))
                        .map_or_else(
                            || last.value.clone(),
                            |first| pre_transaction_value(key, ops, first),
                        );
                    out.push(NodeChange::Remove(RemoveChange {
                        value: original,
                        ..last.clone()
                    }));
                } else if self.config.remove_new_keys
                    && !last.value.nodes().any(|node| ephemeral.contains(&node))
                {
                    out.push(NodeChange::Remove(last.clone()));
                }
            }
            NodeChange::Put(last) => {
                let tail = &ops[last_slot + 1..];
                match &last.value {
                    SlotValue::Value(_) => {
                        debug_assert!(tail.is_empty(), "single value {key} changed as a list");
                        out.push(NodeChange::Put(last.clone()));
                    }
                    SlotValue::List(items) => {
                        let mut items = items.clone();
                        replay(key, &mut items, tail);
                        out.push(NodeChange::Put(PutChange {
                            value: SlotValue::List(items),
                            ..last.clone()
                        }));
                    }
                    SlotValue::LazyList => {
                        out.push(NodeChange::Put(last.clone()));
                        push_range_bounds(key, tail, out);
                        let mut items = Vec::new();
                        replay(key, &mut items, tail);
                        if !items.is_empty() {
                            out.push(NodeChange::ListInsertMany(ListInsertManyChange {
                                key: key.clone(),
                                index: 0,
                                values: items,
                            }));
                        }
                    }
                }
            }
            _ => unreachable!("last slot change is a put or remove"),
        }
    }

    /// Rewrites the list changes of one key in terms of the entries the list
    /// held before them.
    /// Inserted runs of lazy lists are always reported as one multi-insert.
    fn coalesce_list(
        &self,
        key: &Key,
        ops: &[&NodeChange],
        final_len: usize,
        lazy: bool,
        out: &mut Vec<NodeChange>,
    ) {
        let (inserted, removed) = ops.iter().fold((0, 0), |(inserted, removed), op| match op {
            NodeChange::ListInsert(_) => (inserted + 1, removed),
            NodeChange::ListInsertMany(change) => (inserted + change.values.len(), removed),
            NodeChange::ListRemove(_) => (inserted, removed + 1),
            _ => (inserted, removed),
        });
        let initial_len = (final_len + removed).checked_sub(inserted).unwrap_or_else(|| {
            panic!("list {key} ends with {final_len} entries after {inserted} inserts and {removed} removes")
        });

        let mut model: Vec<Entry> = (0..initial_len)
            .map(|index| Entry::Original {
                index,
                replaced: None,
            })
            .collect();
        let mut removed_originals: Vec<(usize, Value)> = Vec::new();
        let mut seq = 0;
        for op in ops {
            match op {
                NodeChange::ListInsert(change) => {
                    check_index(key, change.index, model.len() + 1);
                    model.insert(change.index, Entry::Inserted { seq, value: change.value.clone() });
                    seq += 1;
                }
                NodeChange::ListInsertMany(change) => {
                    check_index(key, change.index, model.len() + 1);
                    for (offset, value) in change.values.iter().enumerate() {
                        model.insert(change.index + offset, Entry::Inserted { seq, value: value.clone() });
                        seq += 1;
                    }
                }
                NodeChange::ListRemove(change) => {
                    check_index(key, change.index, model.len());
                    if let Entry::Original { index, replaced } = model.remove(change.index) {
                        let original = replaced.map_or_else(|| change.value.clone(), |(old, _)| old);
                        removed_originals.push((index, original));
                    }
                }
                NodeChange::ListReplace(change) => {
                    check_index(key, change.index, model.len());
                    match &mut model[change.index] {
                        Entry::Original {
                            replaced: Some((_, current)),
                            ..
                        } => *current = change.new_value.clone(),
                        Entry::Original { replaced, .. } => {
                            *replaced = Some((change.old_value.clone(), change.new_value.clone()))
                        }
                        Entry::Inserted { value, .. } => *value = change.new_value.clone(),
                    }
                }
                _ => {}
            }
        }
        assert_eq!(model.len(), final_len, "replaying list {key} does not reach its final length");

        removed_originals.sort_by_key(|(index, _)| *index);
        for (removed, (index, value)) in removed_originals.into_iter().enumerate() {
            out.push(NodeChange::ListRemove(ListRemoveChange {
                key: key.clone(),
                index: index - removed,
                value,
            }));
        }

        let mut survivor = 0;
        for entry in &model {
            if let Entry::Original { replaced, .. } = entry {
                if let Some((old_value, new_value)) = replaced {
                    // A node put back in place was re-attached under a new id.
                    if old_value != new_value || new_value.as_node().is_some() {
                        out.push(NodeChange::ListReplace(ListReplaceChange {
                            key: key.clone(),
                            index: survivor,
                            old_value: old_value.clone(),
                            new_value: new_value.clone(),
                        }));
                    }
                }
                survivor += 1;
            }
        }

        let mut run: Vec<Value> = Vec::new();
        let mut run_start = 0;
        let mut last_seq = None;
        for (position, entry) in model.iter().enumerate() {
            match entry {
                Entry::Inserted { seq, value } => {
                    let continues = match (self.config.insert_coalescing, last_seq) {
                        (_, None) => false,
                        (InsertCoalescing::Contiguous, Some(_)) => true,
                        (InsertCoalescing::IssueOrder, Some(previous)) => *seq > previous,
                    };
                    if !continues {
                        flush_run(key, run_start, &mut run, lazy, out);
                        run_start = position;
                    }
                    run.push(value.clone());
                    last_seq = Some(*seq);
                }
                Entry::Original { .. } => {
                    flush_run(key, run_start, &mut run, lazy, out);
                    last_seq = None;
                }
            }
        }
        flush_run(key, run_start, &mut run, lazy, out);
    }
}

enum Entry {
    /// Present before the transaction; `replaced` holds its original and
    /// current value once overwritten.
    Original {
        index: usize,
        replaced: Option<(Value, Value)>,
    },
    Inserted {
        seq: usize,
        value: Value,
    },
}

fn check_index(key: &Key, index: usize, bound: usize) {
    assert!(
        index < bound,
        "list change on {key} at index {index} is outside the replayed list"
    );
}

fn flush_run(key: &Key, index: usize, run: &mut Vec<Value>, many: bool, out: &mut Vec<NodeChange>) {
    match run.len() {
        0 => {}
        1 if !many => out.push(NodeChange::ListInsert(ListInsertChange {
            key: key.clone(),
            index,
            value: run.remove(0),
        })),
        _ => out.push(NodeChange::ListInsertMany(ListInsertManyChange {
            key: key.clone(),
            index,
            values: std::mem::take(run),
        })),
    }
}

/// Applies list changes to `items` as the client would.
fn replay(key: &Key, items: &mut Vec<Value>, ops: &[&NodeChange]) {
    for op in ops {
        match op {
            NodeChange::ListInsert(change) => {
                check_index(key, change.index, items.len() + 1);
                items.insert(change.index, change.value.clone());
            }
            NodeChange::ListInsertMany(change) => {
                check_index(key, change.index, items.len() + 1);
                items.splice(change.index..change.index, change.values.iter().cloned());
            }
            NodeChange::ListRemove(change) => {
                check_index(key, change.index, items.len());
                items.remove(change.index);
            }
            NodeChange::ListReplace(change) => {
                check_index(key, change.index, items.len());
                items[change.index] = change.new_value.clone();
            }
            _ => {}
        }
    }
}

/// Value of a key before the transaction, given that `ops[first_remove]` is
/// the first remove logged for it. Only list changes can precede it.
fn pre_transaction_value(key: &Key, ops: &[&NodeChange], first_remove: usize) -> SlotValue {
    let NodeChange::Remove(remove) = ops[first_remove] else {
        unreachable!("{key} has no remove at {first_remove}");
    };
    match &remove.value {
        SlotValue::List(items) => {
            let mut items = items.clone();
            unreplay(key, &mut items, &ops[..first_remove]);
            SlotValue::List(items)
        }
        value => value.clone(),
    }
}

/// Reverts list changes on `items`, last change first.
fn unreplay(key: &Key, items: &mut Vec<Value>, ops: &[&NodeChange]) {
    for op in ops.iter().rev() {
        match op {
            NodeChange::ListInsert(change) => {
                check_index(key, change.index, items.len());
                items.remove(change.index);
            }
            NodeChange::ListInsertMany(change) => {
                check_index(key, change.index + change.values.len(), items.len() + 1);
                items.drain(change.index..change.index + change.values.len());
            }
            NodeChange::ListRemove(change) => {
                check_index(key, change.index, items.len() + 1);
                items.insert(change.index, change.value.clone());
            }
            NodeChange::ListReplace(change) => {
                check_index(key, change.index, items.len());
                items[change.index] = change.old_value.clone();
            }
            _ => {}
        }
    }
}

/// Emits the last range start and end logged in `ops`.
fn push_range_bounds(key: &Key, ops: &[&NodeChange], out: &mut Vec<NodeChange>) {
    let start = ops.iter().rev().find_map(|op| match op {
        NodeChange::RangeStart(change) => Some(change.start),
        _ => None,
    });
    let end = ops.iter().rev().find_map(|op| match op {
        NodeChange::RangeEnd(change) => Some(change.end),
        _ => None,
    });
    if let Some(start) = start {
        out.push(NodeChange::RangeStart(RangeStartChange { key: key.clone(), start }));
    }
    if let Some(end) = end {
        out.push(NodeChange::RangeEnd(RangeEndChange { key: key.clone(), end }));
    }
}

/// Full contents of a node the client has not seen.
fn creation_changes(entry: &NodeLog) -> Vec<NodeChange> {
    let Some(content) = &entry.content else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(content.entries.len());
    for (key, slot) in &content.entries {
        match slot {
            ContentSlot::Value(value) => out.push(NodeChange::put(key, value.clone())),
            ContentSlot::List(items) => out.push(NodeChange::put(key, SlotValue::List(items.clone()))),
            ContentSlot::Lazy { start, end, items } => {
                out.push(NodeChange::put(key, SlotValue::LazyList));
                out.push(NodeChange::RangeStart(RangeStartChange { key: key.clone(), start: *start }));
                out.push(NodeChange::RangeEnd(RangeEndChange { key: key.clone(), end: *end }));
                if !items.is_empty() {
                    out.push(NodeChange::list_insert_many(key, 0, items.clone()));
                }
            }
            ContentSlot::Computed(value) => out.push(NodeChange::Put(PutChange {
                key: key.clone(),
                value: SlotValue::Value(value.clone()),
                computed: true,
            })),
        }
    }
    out
}

#[cfg(test)]
#[path = "tests/optimizer_tests.rs"]
mod tests;
