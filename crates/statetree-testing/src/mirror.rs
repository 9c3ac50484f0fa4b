//! Client-side replica of a state tree.
//!
//! [`ClientMirror`] applies the change records produced by
//! [`RootNode::encode_changes`] the way a browser would. [`project`] builds
//! the same shape from the server tree, so after every commit the two can be
//! compared with `==`.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value as Json;
use statetree_core::wire::encode_value;
use statetree_core::{ChangeRecord, ChangeType, ContentSlot, NodeId, RootNode, StateNode};

/// Client id of the root node.
pub const ROOT_ID: NodeId = 1;

#[derive(Clone, Debug, PartialEq)]
pub enum ClientSlot {
    Value(Json),
    List(Vec<Json>),
    Lazy {
        start: usize,
        end: usize,
        items: Vec<Json>,
    },
}

pub type ClientNode = BTreeMap<String, ClientSlot>;

/// Nodes reachable from the root, by client id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientTree {
    pub nodes: BTreeMap<NodeId, ClientNode>,
}

impl ClientTree {
    pub fn node(&self, id: NodeId) -> Option<&ClientNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum MirrorError {
    #[error("record refers to unknown node {id}")]
    UnknownNode { id: NodeId },
    #[error("{kind:?} record for node {id} has no {field}")]
    MissingField {
        id: NodeId,
        kind: ChangeType,
        field: &'static str,
    },
    #[error("key {key} of node {id} does not hold a list")]
    NotAList { id: NodeId, key: String },
    #[error("key {key} of node {id} does not hold a lazy list")]
    NotLazy { id: NodeId, key: String },
    #[error("splice of {remove} at {index} does not fit list {key} of length {len}")]
    SpliceBounds {
        key: String,
        index: usize,
        remove: usize,
        len: usize,
    },
    #[error("malformed change records: {0}")]
    Malformed(String),
}

/// What a client knows after applying a sequence of change records.
#[derive(Clone, Debug)]
pub struct ClientMirror {
    nodes: HashMap<NodeId, ClientNode>,
    applied: usize,
}

impl Default for ClientMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientMirror {
    /// A client that has only seen the empty root.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_ID, ClientNode::new());
        Self { nodes, applied: 0 }
    }

    /// Number of records applied so far.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Applies a JSON array of change records.
    pub fn apply_json(&mut self, records: &Json) -> Result<(), MirrorError> {
        let records: Vec<ChangeRecord> = serde_json::from_value(records.clone())
            .map_err(|error| MirrorError::Malformed(error.to_string()))?;
        self.apply_all(&records)
    }

    pub fn apply_all(&mut self, records: &[ChangeRecord]) -> Result<(), MirrorError> {
        records.iter().try_for_each(|record| self.apply(record))
    }

    pub fn apply(&mut self, record: &ChangeRecord) -> Result<(), MirrorError> {
        match record.change_type {
            ChangeType::Create => {
                self.nodes.insert(record.id, ClientNode::new());
            }
            ChangeType::Put => {
                let slot = put_slot(record)?;
                let key = required(record.key.clone(), record, "key")?;
                self.node_mut(record.id)?.insert(key, slot);
            }
            ChangeType::Remove => {
                let key = required(record.key.as_ref(), record, "key")?;
                // Keys put and removed before the client saw them may be
                // reported as removed anyway.
                self.node_mut(record.id)?.remove(key);
            }
            ChangeType::Splice => self.splice(record)?,
            ChangeType::RangeStart | ChangeType::RangeEnd => self.set_range_bound(record)?,
        }
        self.applied += 1;
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&ClientNode> {
        self.nodes.get(&id)
    }

    pub fn get(&self, id: NodeId, key: &str) -> Option<&ClientSlot> {
        self.nodes.get(&id)?.get(key)
    }

    /// Every node the client still holds, reachable or not.
    pub fn known_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// The part of the replica reachable from the root.
    pub fn tree(&self) -> ClientTree {
        let mut tree = ClientTree::default();
        let mut pending = vec![ROOT_ID];
        while let Some(id) = pending.pop() {
            if tree.nodes.contains_key(&id) {
                continue;
            }
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            pending.extend(node.values().flat_map(slot_children));
            tree.nodes.insert(id, node.clone());
        }
        tree
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut ClientNode, MirrorError> {
        self.nodes.get_mut(&id).ok_or(MirrorError::UnknownNode { id })
    }

    fn splice(&mut self, record: &ChangeRecord) -> Result<(), MirrorError> {
        let key = required(record.key.as_ref(), record, "key")?;
        let index = required(record.index, record, "index")?;
        let remove = record.remove.unwrap_or(0);
        let values = match &record.value {
            Some(Json::Array(values)) => values.clone(),
            Some(other) => {
                return Err(MirrorError::Malformed(format!("splice value {other} is not an array")))
            }
            None => Vec::new(),
        };
        let id = record.id;
        let items = match self.node_mut(id)?.get_mut(key.as_str()) {
            Some(ClientSlot::List(items) | ClientSlot::Lazy { items, .. }) => items,
            _ => {
                return Err(MirrorError::NotAList {
                    id,
                    key: key.clone(),
                })
            }
        };
        if index + remove > items.len() {
            return Err(MirrorError::SpliceBounds {
                key: key.clone(),
                index,
                remove,
                len: items.len(),
            });
        }
        items.splice(index..index + remove, values);
        Ok(())
    }

    fn set_range_bound(&mut self, record: &ChangeRecord) -> Result<(), MirrorError> {
        let key = required(record.key.as_ref(), record, "key")?;
        let bound = required(record.value.as_ref().and_then(Json::as_u64), record, "value")? as usize;
        let id = record.id;
        match self.node_mut(id)?.get_mut(key.as_str()) {
            Some(ClientSlot::Lazy { start, end, .. }) => {
                if record.change_type == ChangeType::RangeStart {
                    *start = bound;
                } else {
                    *end = bound;
                }
                Ok(())
            }
            _ => Err(MirrorError::NotLazy {
                id,
                key: key.clone(),
            }),
        }
    }
}

fn required<T>(value: Option<T>, record: &ChangeRecord, field: &'static str) -> Result<T, MirrorError> {
    value.ok_or_else(|| MirrorError::MissingField {
        id: record.id,
        kind: record.change_type.clone(),
        field,
    })
}

fn put_slot(record: &ChangeRecord) -> Result<ClientSlot, MirrorError> {
    if record.lazy == Some(true) {
        return Ok(ClientSlot::Lazy {
            start: 0,
            end: 0,
            items: Vec::new(),
        });
    }
    Ok(match required(record.value.clone(), record, "value")? {
        Json::Array(items) => ClientSlot::List(items),
        value => ClientSlot::Value(value),
    })
}

/// Id inside a `{"node": id}` reference.
pub fn node_reference(value: &Json) -> Option<NodeId> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    object.get("node")?.as_u64().map(|id| id as NodeId)
}

fn slot_children(slot: &ClientSlot) -> Vec<NodeId> {
    match slot {
        ClientSlot::Value(value) => node_reference(value).into_iter().collect(),
        ClientSlot::List(items) | ClientSlot::Lazy { items, .. } => {
            items.iter().filter_map(node_reference).collect()
        }
    }
}

/// What a fully synchronized client should hold for `root`.
///
/// Follows the pruning configured on the tree: server-only nodes are known
/// to the client but empty, server-only keys and opted-out computed values
/// are left out.
pub fn project(root: &RootNode) -> ClientTree {
    let prune = root.config().prune_server_only;
    let resolve = |node| root.id_of(node);
    let mut tree = ClientTree::default();
    let mut pending: Vec<StateNode> = vec![StateNode::clone(root)];
    while let Some(node) = pending.pop() {
        if tree.nodes.contains_key(&node.id()) {
            continue;
        }
        if prune && node.is_server_only() {
            tree.nodes.insert(node.id(), ClientNode::new());
            continue;
        }
        let hide_computed = prune && node.is_computed_server_only();
        let mut client = ClientNode::new();
        for (key, slot) in node.content().entries {
            if prune && key.is_server_only() {
                continue;
            }
            let (slot, children) = match slot {
                ContentSlot::Computed(_) if hide_computed => continue,
                ContentSlot::Value(value) | ContentSlot::Computed(value) => {
                    (ClientSlot::Value(encode_value(&value, &resolve)), vec![value])
                }
                ContentSlot::List(items) => (
                    ClientSlot::List(items.iter().map(|item| encode_value(item, &resolve)).collect()),
                    items,
                ),
                ContentSlot::Lazy { start, end, items } => (
                    ClientSlot::Lazy {
                        start,
                        end,
                        items: items.iter().map(|item| encode_value(item, &resolve)).collect(),
                    },
                    items,
                ),
            };
            pending.extend(
                children
                    .iter()
                    .filter_map(|value| value.as_node())
                    .filter_map(|child| root.node(child)),
            );
            client.insert(key.to_string(), slot);
        }
        tree.nodes.insert(node.id(), client);
    }
    tree
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn records_rebuild_the_tree() {
        let mut mirror = ClientMirror::new();
        mirror
            .apply_json(&json!([
                {"type": "create", "id": 2},
                {"type": "put", "id": 2, "key": "tag", "value": "li"},
                {"type": "put", "id": 1, "key": "items", "value": [{"node": 2}, 7]},
                {"type": "splice", "id": 1, "key": "items", "index": 1, "remove": 1, "value": [8, 9]},
                {"type": "put", "id": 1, "key": "rows", "lazy": true},
                {"type": "rangeStart", "id": 1, "key": "rows", "value": 5},
                {"type": "rangeEnd", "id": 1, "key": "rows", "value": 6},
            ]))
            .unwrap();

        assert_eq!(mirror.applied(), 7);
        assert_eq!(
            mirror.get(ROOT_ID, "items"),
            Some(&ClientSlot::List(vec![json!({"node": 2}), json!(8), json!(9)]))
        );
        assert_eq!(
            mirror.get(ROOT_ID, "rows"),
            Some(&ClientSlot::Lazy {
                start: 5,
                end: 6,
                items: Vec::new()
            })
        );
        assert_eq!(mirror.tree().len(), 2);

        mirror
            .apply_json(&json!([{"type": "splice", "id": 1, "key": "items", "index": 0, "remove": 1}]))
            .unwrap();
        assert_eq!(mirror.tree().len(), 1);
        assert_eq!(mirror.known_nodes(), 2);
    }

    #[test]
    fn bad_records_are_reported() {
        let mut mirror = ClientMirror::new();
        assert_eq!(
            mirror.apply_json(&json!([{"type": "put", "id": 4, "key": "a", "value": 1}])),
            Err(MirrorError::UnknownNode { id: 4 })
        );
        assert_eq!(
            mirror.apply_json(&json!([{"type": "splice", "id": 1, "key": "a", "index": 0}])),
            Err(MirrorError::NotAList {
                id: 1,
                key: "a".to_owned()
            })
        );
        assert!(matches!(
            mirror.apply_json(&json!([{"type": "rename", "id": 1}])),
            Err(MirrorError::Malformed(_))
        ));
        assert_eq!(mirror.applied(), 0);
    }
}
