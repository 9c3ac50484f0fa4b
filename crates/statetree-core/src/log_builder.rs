use crate::change::{NodeChange, NodeChangeVisitor};
use crate::collections::ordered::IndexMap;
use crate::key::Key;
use crate::node::{NodeContent, StateNode};
use crate::value::{NodeId, NodeRef, UNATTACHED};

/// Everything the optimizer needs to know about one node of a commit.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeLog {
    pub node: NodeRef,
    /// Id the client knew the node by before the commit.
    pub start_id: NodeId,
    /// Id after the commit; `0` when the node ended up detached.
    pub end_id: NodeId,
    pub changes: Vec<NodeChange>,
    /// Full contents, captured for nodes that are new to the client.
    pub content: Option<NodeContent>,
    /// Client-visible length of every list key touched by a list change.
    pub list_lengths: Vec<(Key, usize)>,
    pub server_only: bool,
    pub computed_server_only: bool,
}

impl NodeLog {
    /// The client has not seen the node under its final id.
    pub fn is_created(&self) -> bool {
        self.end_id != UNATTACHED && self.start_id != self.end_id
    }

    pub fn list_length(&self, key: &Key) -> Option<usize> {
        self.list_lengths
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, len)| *len)
    }
}

/// Per-node change lists of one or more commit rounds, in first-touched
/// order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeLog {
    pub(crate) nodes: Vec<NodeLog>,
}

impl ChangeLog {
    pub fn nodes(&self) -> &[NodeLog] {
        &self.nodes
    }

    pub fn node(&self, node: NodeRef) -> Option<&NodeLog> {
        self.nodes.iter().find(|log| log.node == node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Visitor collecting committed changes into a [`ChangeLog`].
///
/// Pass it to [`RootNode::commit_with`](crate::RootNode::commit_with); it
/// can stay in place across several commits to accumulate their logs.
#[derive(Default)]
pub struct TransactionLogBuilder {
    nodes: IndexMap<NodeRef, NodeLog>,
}

impl TransactionLogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes_for(&self, node: NodeRef) -> &[NodeChange] {
        self.nodes
            .get(&node)
            .map_or(&[], |log| log.changes.as_slice())
    }

    pub fn touched(&self) -> impl Iterator<Item = NodeRef> + '_ {
        self.nodes.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn build(self) -> ChangeLog {
        ChangeLog {
            nodes: self.nodes.into_values().collect(),
        }
    }
}

impl NodeChangeVisitor for TransactionLogBuilder {
    fn visit_node(&mut self, node: &StateNode, changes: &[NodeChange]) {
        let current_id = node.id();
        let entry = self.nodes.entry(node.node_ref()).or_insert_with(|| {
            let start_id = changes
                .iter()
                .find_map(|change| match change {
                    NodeChange::Id(change) => Some(change.old_id),
                    _ => None,
                })
                .unwrap_or(current_id);
            NodeLog {
                node: node.node_ref(),
                start_id,
                end_id: current_id,
                changes: Vec::new(),
                content: None,
                list_lengths: Vec::new(),
                server_only: false,
                computed_server_only: false,
            }
        });
        entry.changes.extend(changes.iter().cloned());
        entry.end_id = current_id;
        entry.server_only = node.is_server_only();
        entry.computed_server_only = node.is_computed_server_only();

        for change in changes {
            let is_list = change.is_list_op()
                || matches!(change, NodeChange::RangeStart(_) | NodeChange::RangeEnd(_));
            let Some(key) = change.key().filter(|_| is_list) else {
                continue;
            };
            let len = node.list_len(key).unwrap_or(0);
            match entry.list_lengths.iter_mut().find(|(existing, _)| existing == key) {
                Some(known) => known.1 = len,
                None => entry.list_lengths.push((key.clone(), len)),
            }
        }
        entry.content = entry.is_created().then(|| node.content());
    }
}
