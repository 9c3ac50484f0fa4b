//! JSON projection of an [`OptimizedLog`].
//!
//! The log becomes a flat array of change records:
//!
//! ```text
//! {"type":"create","id":3}
//! {"type":"put","id":3,"key":"tag","value":"div"}
//! {"type":"put","id":3,"key":"children","value":[{"node":4}]}
//! {"type":"put","id":3,"key":"rows","lazy":true}
//! {"type":"remove","id":3,"key":"title"}
//! {"type":"splice","id":3,"key":"children","index":1,"remove":1,"value":[{"node":5}]}
//! {"type":"rangeStart","id":3,"key":"rows","value":20}
//! ```
//!
//! A `create` record precedes the first record on or referencing a node the
//! client has not seen. Node values are encoded as `{"node": id}`.

use serde::{Deserialize, Serialize};

use crate::change::NodeChange;
use crate::collections::map::HashSet;
use crate::key::Key;
use crate::optimizer::OptimizedLog;
use crate::value::{NodeId, NodeRef, SlotValue, Value};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeType {
    Create,
    Put,
    Remove,
    Splice,
    RangeStart,
    RangeEnd,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lazy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl ChangeRecord {
    fn new(change_type: ChangeType, id: NodeId) -> Self {
        Self {
            change_type,
            id,
            key: None,
            index: None,
            remove: None,
            lazy: None,
            value: None,
        }
    }

    fn keyed(change_type: ChangeType, id: NodeId, key: &Key) -> Self {
        Self {
            key: Some(key.to_string()),
            ..Self::new(change_type, id)
        }
    }
}

/// Builds the change records for `log`; `resolve` maps nodes to client ids.
pub fn change_records(log: &OptimizedLog, resolve: impl Fn(NodeRef) -> NodeId) -> Vec<ChangeRecord> {
    let created: HashSet<NodeId> = log
        .iter()
        .filter(|entry| entry.created)
        .map(|entry| entry.id)
        .collect();
    let mut announced: HashSet<NodeId> = HashSet::default();
    let mut records = Vec::new();
    let mut announce = |id: NodeId, records: &mut Vec<ChangeRecord>| {
        if created.contains(&id) && announced.insert(id) {
            records.push(ChangeRecord::new(ChangeType::Create, id));
        }
    };

    for entry in log.iter() {
        announce(entry.id, &mut records);
        for change in &entry.changes {
            for node in change.new_values().iter().filter_map(Value::as_node) {
                announce(resolve(node), &mut records);
            }
            if let Some(record) = encode_change(entry.id, change, &resolve) {
                records.push(record);
            }
        }
    }
    records
}

/// Encodes `log` as a JSON array of change records.
pub fn encode_changes(
    log: &OptimizedLog,
    resolve: impl Fn(NodeRef) -> NodeId,
) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(change_records(log, resolve))
}

fn encode_change(id: NodeId, change: &NodeChange, resolve: &impl Fn(NodeRef) -> NodeId) -> Option<ChangeRecord> {
    let record = match change {
        NodeChange::Put(change) => {
            let mut record = ChangeRecord::keyed(ChangeType::Put, id, &change.key);
            match &change.value {
                SlotValue::Value(value) => record.value = Some(encode_value(value, resolve)),
                SlotValue::List(values) => record.value = Some(encode_values(values, resolve)),
                SlotValue::LazyList => record.lazy = Some(true),
            }
            record
        }
        NodeChange::Remove(change) => ChangeRecord::keyed(ChangeType::Remove, id, &change.key),
        NodeChange::ListInsert(change) => ChangeRecord {
            index: Some(change.index),
            value: Some(encode_values(std::slice::from_ref(&change.value), resolve)),
            ..ChangeRecord::keyed(ChangeType::Splice, id, &change.key)
        },
        NodeChange::ListInsertMany(change) => ChangeRecord {
            index: Some(change.index),
            value: Some(encode_values(&change.values, resolve)),
            ..ChangeRecord::keyed(ChangeType::Splice, id, &change.key)
        },
        NodeChange::ListRemove(change) => ChangeRecord {
            index: Some(change.index),
            remove: Some(1),
            ..ChangeRecord::keyed(ChangeType::Splice, id, &change.key)
        },
        NodeChange::ListReplace(change) => ChangeRecord {
            index: Some(change.index),
            remove: Some(1),
            value: Some(encode_values(std::slice::from_ref(&change.new_value), resolve)),
            ..ChangeRecord::keyed(ChangeType::Splice, id, &change.key)
        },
        NodeChange::RangeStart(change) => ChangeRecord {
            value: Some(change.start.into()),
            ..ChangeRecord::keyed(ChangeType::RangeStart, id, &change.key)
        },
        NodeChange::RangeEnd(change) => ChangeRecord {
            value: Some(change.end.into()),
            ..ChangeRecord::keyed(ChangeType::RangeEnd, id, &change.key)
        },
        NodeChange::Parent(_) | NodeChange::Id(_) => return None,
    };
    Some(record)
}

fn encode_values(values: &[Value], resolve: &impl Fn(NodeRef) -> NodeId) -> serde_json::Value {
    serde_json::Value::Array(values.iter().map(|value| encode_value(value, resolve)).collect())
}

pub fn encode_value(value: &Value, resolve: &impl Fn(NodeRef) -> NodeId) -> serde_json::Value {
    match value {
        Value::Bool(value) => (*value).into(),
        Value::Int(value) => (*value).into(),
        Value::Double(value) => serde_json::Number::from_f64(*value)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Str(value) => serde_json::Value::String(value.to_string()),
        Value::Node(node) => serde_json::json!({ "node": resolve(*node) }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::RootNode;

    #[test]
    fn new_child_is_created_before_it_is_referenced() {
        let root = RootNode::new();
        let child = root.create_node();
        child.put("tag", "span").unwrap();
        root.put("child", &child).unwrap();

        let encoded = root.encode_changes().unwrap();
        assert_eq!(
            encoded,
            json!([
                {"type": "create", "id": 2},
                {"type": "put", "id": 2, "key": "tag", "value": "span"},
                {"type": "put", "id": 1, "key": "child", "value": {"node": 2}},
            ])
        );
    }

    #[test]
    fn server_only_node_is_created_empty() {
        let root = RootNode::new();
        let hidden = root.create_node();
        hidden.mark_server_only().unwrap();
        hidden.put("secret", 1).unwrap();
        root.put("hidden", &hidden).unwrap();

        assert_eq!(
            root.encode_changes().unwrap(),
            json!([
                {"type": "create", "id": 2},
                {"type": "put", "id": 1, "key": "hidden", "value": {"node": 2}},
            ])
        );
    }

    #[test]
    fn list_changes_become_splices() {
        let root = RootNode::new();
        let list = root.get_multi_valued("items").unwrap();
        list.add(1).unwrap();
        list.add(2).unwrap();
        root.commit();

        list.remove(0).unwrap();
        list.set(0, 5).unwrap();
        list.add(3).unwrap();
        let encoded = root.encode_changes().unwrap();
        assert_eq!(
            encoded,
            json!([
                {"type": "splice", "id": 1, "key": "items", "index": 0, "remove": 1},
                {"type": "splice", "id": 1, "key": "items", "index": 0, "remove": 1, "value": [5]},
                {"type": "splice", "id": 1, "key": "items", "index": 1, "value": [3]},
            ])
        );
    }

    #[test]
    fn removed_key_and_doubles() {
        let root = RootNode::new();
        root.put("gone", true).unwrap();
        root.commit();
        root.remove("gone").unwrap();
        root.put("ratio", 0.5).unwrap();
        let encoded = root.encode_changes().unwrap();
        assert_eq!(
            encoded,
            json!([
                {"type": "remove", "id": 1, "key": "gone"},
                {"type": "put", "id": 1, "key": "ratio", "value": 0.5},
            ])
        );
    }
}
