use crate::*;
use std::cell::Cell;
use std::rc::Rc;

fn names(node: &StateNode) -> Vec<String> {
    node.keys().iter().map(ToString::to_string).collect()
}

#[test]
fn rollback_restores_values_and_key_order() {
    let root = RootNode::new();
    root.put("a", 1).unwrap();
    root.put("b", 2).unwrap();
    root.put("c", 3).unwrap();
    root.commit();

    root.remove("a").unwrap();
    root.put("b", 20).unwrap();
    root.put("d", 4).unwrap();
    root.rollback().unwrap();

    assert_eq!(names(&root), ["a", "b", "c"]);
    assert_eq!(root.get("a"), Some(Value::Int(1)));
    assert_eq!(root.get("b"), Some(Value::Int(2)));
    assert_eq!(root.get("d"), None);
    assert!(!root.has_pending_changes());
}

#[test]
fn rollback_returns_minted_ids() {
    let root = RootNode::new();
    let first = root.create_node();
    root.put("first", &first).unwrap();
    assert_eq!(first.id(), 2);
    root.rollback().unwrap();

    assert_eq!(first.id(), 0);
    assert_eq!(first.parent(), None);
    assert!(root.node_by_id(2).is_none());

    let second = root.create_node();
    root.put("second", &second).unwrap();
    assert_eq!(second.id(), 2);
}

#[test]
fn rollback_reattaches_detached_subtree_with_old_ids() {
    let root = RootNode::new();
    let parent = root.create_node();
    let child = root.create_node();
    parent.put("child", &child).unwrap();
    root.put("parent", &parent).unwrap();
    root.commit();
    let (parent_id, child_id) = (parent.id(), child.id());

    root.remove("parent").unwrap();
    let other = root.create_node();
    root.put("other", &other).unwrap();
    root.rollback().unwrap();

    assert_eq!(parent.id(), parent_id);
    assert_eq!(child.id(), child_id);
    assert_eq!(root.node_by_id(child_id), Some(child.clone()));
    assert_eq!(parent.parent(), Some(StateNode::clone(&root)));
    assert!(!other.is_attached());
}

#[test]
fn rollback_restores_list_contents() {
    let root = RootNode::new();
    let list = root.get_multi_valued("items").unwrap();
    list.add(1).unwrap();
    list.add(2).unwrap();
    root.commit();

    list.set(0, 10).unwrap();
    list.insert(1, 15).unwrap();
    list.remove(2).unwrap();
    list.add(30).unwrap();
    root.rollback().unwrap();

    assert_eq!(list.to_vec().unwrap(), vec![Value::Int(1), Value::Int(2)]);
}

#[test]
fn rollback_restores_removed_list_under_a_new_view() {
    let root = RootNode::new();
    let list = root.get_multi_valued("items").unwrap();
    list.add("x").unwrap();
    root.commit();

    root.remove("items").unwrap();
    root.rollback().unwrap();

    // The restored slot is a new list; earlier views stay detached.
    assert!(list.len().is_err());
    let restored = root.get_multi_valued("items").unwrap();
    assert_eq!(restored.to_vec().unwrap(), vec![Value::from("x")]);
}

#[test]
fn rollback_restores_computed_memo_without_rerunning() {
    let root = RootNode::new();
    let runs = Rc::new(Cell::new(0));
    let counter = Rc::clone(&runs);
    root.put("source", 1).unwrap();
    root.put_computed("derived", move |node| {
        counter.set(counter.get() + 1);
        node.get_as::<i64>("source").ok().flatten().map(|v| Value::Int(v + 1))
    })
    .unwrap();
    root.commit();
    assert_eq!(runs.get(), 1);

    root.put("source", 5).unwrap();
    assert_eq!(root.get("derived"), Some(Value::Int(6)));
    assert_eq!(runs.get(), 2);
    root.rollback().unwrap();

    assert_eq!(root.get("derived"), Some(Value::Int(2)));
    assert_eq!(runs.get(), 2);
}

#[test]
fn rollback_forgets_new_computed_definitions() {
    let root = RootNode::new();
    root.put_computed("derived", |_| Some(Value::Int(1))).unwrap();
    assert!(root.contains_key("derived"));
    root.rollback().unwrap();
    assert!(!root.contains_key("derived"));
    root.put("derived", 3).unwrap();
}

#[test]
fn rollback_then_commit_delivers_nothing() {
    let root = RootNode::new();
    root.put("x", 1).unwrap();
    root.rollback().unwrap();
    let log = root.collect_changes();
    assert!(log.is_empty());
}

#[test]
fn changes_keep_issue_order_per_node() {
    let root = RootNode::new();
    let node = root.create_node();
    root.put("node", &node).unwrap();
    root.commit();

    node.put("b", 1).unwrap();
    node.put("a", 2).unwrap();
    node.remove("b").unwrap();
    let mut builder = TransactionLogBuilder::new();
    root.commit_with(&mut builder);
    assert_eq!(
        builder.changes_for(node.node_ref()),
        &[
            NodeChange::put("b", 1),
            NodeChange::put("a", 2),
            NodeChange::remove("b", 1),
        ]
    );
}

#[test]
fn builder_tracks_start_and_end_ids() {
    let root = RootNode::new();
    let node = root.create_node();
    root.put("node", &node).unwrap();
    root.commit();

    root.remove("node").unwrap();
    root.put("again", &node).unwrap();
    let log = root.collect_change_log();
    let entry = log.node(node.node_ref()).unwrap();
    assert_eq!(entry.start_id, 2);
    assert_eq!(entry.end_id, 3);
    assert!(entry.is_created());
    assert!(entry.content.is_some());
}
