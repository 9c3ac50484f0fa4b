use super::*;
use crate::{ListView, RootNode, TreeConfig};

fn committed_list(values: &[&str]) -> (RootNode, ListView) {
    let root = RootNode::new();
    let list = root.get_multi_valued("items").unwrap();
    for value in values {
        list.add(*value).unwrap();
    }
    root.commit();
    (root, list)
}

fn optimize_with(root: &RootNode, insert_coalescing: InsertCoalescing) -> OptimizedLog {
    let log = root.collect_change_log();
    TransactionLogOptimizer::new(OptimizerConfig {
        insert_coalescing,
        ..OptimizerConfig::default()
    })
    .optimize(&log)
}

#[test]
fn node_added_and_removed_in_one_transaction_is_never_sent() {
    let (root, list) = committed_list(&[]);
    let first = root.create_node();
    let second = root.create_node();
    list.add(&first).unwrap();
    list.add(&second).unwrap();
    list.remove(0).unwrap();

    let log = root.collect_changes();
    assert_eq!(
        log.changes_for(root.node_ref()),
        &[NodeChange::list_insert("items", 0, &second)]
    );
    assert!(log.node(second.node_ref()).unwrap().created);
    assert!(!log.references(first.node_ref()));
}

#[test]
fn new_key_put_then_removed_becomes_a_remove() {
    let root = RootNode::new();
    root.put("foo", "bar").unwrap();
    root.remove("foo").unwrap();
    let log = root.collect_changes();
    assert_eq!(log.changes_for(root.node_ref()), &[NodeChange::remove("foo", "bar")]);
}

#[test]
fn new_key_put_then_removed_can_be_dropped() {
    let root = RootNode::with_config(TreeConfig {
        optimizer: OptimizerConfig {
            remove_new_keys: false,
            ..OptimizerConfig::default()
        },
        ..TreeConfig::default()
    });
    root.put("foo", "bar").unwrap();
    root.remove("foo").unwrap();
    assert!(root.collect_changes().is_empty());
}

#[test]
fn remove_then_put_becomes_the_put() {
    let root = RootNode::new();
    root.put("a", 1).unwrap();
    root.commit();
    root.remove("a").unwrap();
    root.put("a", 2).unwrap();
    let log = root.collect_changes();
    assert_eq!(log.changes_for(root.node_ref()), &[NodeChange::put("a", 2)]);
}

#[test]
fn removed_existing_key_carries_its_original_value() {
    let root = RootNode::new();
    root.put("a", 1).unwrap();
    root.commit();
    root.put("a", 2).unwrap();
    root.put("a", 3).unwrap();
    root.remove("a").unwrap();
    let log = root.collect_changes();
    assert_eq!(log.changes_for(root.node_ref()), &[NodeChange::remove("a", 1)]);
}

#[test]
fn removed_list_key_carries_the_list_it_started_with() {
    let (root, list) = committed_list(&["a"]);
    list.add("b").unwrap();
    list.set(0, "c").unwrap();
    root.remove("items").unwrap();
    let log = root.collect_changes();
    assert_eq!(
        log.changes_for(root.node_ref()),
        &[NodeChange::remove("items", SlotValue::List(vec!["a".into()]))]
    );
}

#[test]
fn removed_list_key_forgets_nodes_added_in_the_same_transaction() {
    let (root, list) = committed_list(&[]);
    let transient = root.create_node();
    list.add(&transient).unwrap();
    root.remove("items").unwrap();

    let log = root.collect_changes();
    assert_eq!(
        log.changes_for(root.node_ref()),
        &[NodeChange::remove("items", SlotValue::List(Vec::new()))]
    );
    assert!(!log.references(transient.node_ref()));
}

#[test]
fn detached_new_subtree_is_elided() {
    let root = RootNode::new();
    root.commit();
    let child = root.create_node();
    let grandchild = root.create_node();
    child.put("x", 1).unwrap();
    child.put("grandchild", &grandchild).unwrap();
    root.put("child", &child).unwrap();
    grandchild.put("y", 2).unwrap();
    root.remove("child").unwrap();

    let log = root.collect_changes();
    assert!(log.is_empty(), "{log:?}");
}

#[test]
fn issue_order_splits_inserts_made_backwards() {
    let (root, list) = committed_list(&["x"]);
    list.insert(0, "b").unwrap();
    list.insert(0, "a").unwrap();

    let log = optimize_with(&root, InsertCoalescing::IssueOrder);
    assert_eq!(
        log.changes_for(root.node_ref()),
        &[
            NodeChange::list_insert("items", 0, "a"),
            NodeChange::list_insert("items", 1, "b"),
        ]
    );
}

#[test]
fn contiguous_merges_any_adjacent_inserts() {
    let (root, list) = committed_list(&["x"]);
    list.insert(0, "b").unwrap();
    list.insert(0, "a").unwrap();

    let log = optimize_with(&root, InsertCoalescing::Contiguous);
    assert_eq!(
        log.changes_for(root.node_ref()),
        &[NodeChange::list_insert_many("items", 0, vec!["a".into(), "b".into()])]
    );
}

#[test]
fn appended_values_become_one_insert() {
    let (root, list) = committed_list(&[]);
    list.add(1).unwrap();
    list.add(2).unwrap();
    list.add(3).unwrap();
    let log = root.collect_changes();
    assert_eq!(
        log.changes_for(root.node_ref()),
        &[NodeChange::list_insert_many(
            "items",
            0,
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        )]
    );
}

#[test]
fn replacing_an_inserted_entry_folds_into_the_insert() {
    let (root, list) = committed_list(&["x"]);
    list.add("y").unwrap();
    list.set(1, "z").unwrap();
    let log = root.collect_changes();
    assert_eq!(
        log.changes_for(root.node_ref()),
        &[NodeChange::list_insert("items", 1, "z")]
    );
}

#[test]
fn repeated_replaces_keep_first_old_and_last_new_value() {
    let (root, list) = committed_list(&["x"]);
    list.set(0, "y").unwrap();
    list.set(0, "z").unwrap();
    let log = root.collect_changes();
    assert_eq!(
        log.changes_for(root.node_ref()),
        &[NodeChange::list_replace("items", 0, "x", "z")]
    );

    list.set(0, "w").unwrap();
    list.set(0, "z").unwrap();
    assert!(root.collect_changes().is_empty());
}

#[test]
fn node_put_back_in_place_is_replaced_under_its_new_id() {
    let root = RootNode::new();
    let list = root.get_multi_valued("items").unwrap();
    let (x, y) = (root.create_node(), root.create_node());
    list.add(&x).unwrap();
    root.commit();
    assert_eq!(x.id(), 2);

    list.set(0, &y).unwrap();
    list.set(0, &x).unwrap();
    let log = root.collect_changes();
    assert_eq!(x.id(), 4);
    assert_eq!(
        log.changes_for(root.node_ref()),
        &[NodeChange::list_replace("items", 0, &x, &x)]
    );
    assert!(log.node(x.node_ref()).unwrap().created);
    assert!(log.node(y.node_ref()).is_none());
}

#[test]
fn removes_are_reported_in_original_order() {
    let (root, list) = committed_list(&["a", "b", "c", "d"]);
    list.remove(2).unwrap();
    list.remove(0).unwrap();
    let log = root.collect_changes();
    assert_eq!(
        log.changes_for(root.node_ref()),
        &[
            NodeChange::list_remove("items", 0, "a"),
            NodeChange::list_remove("items", 1, "c"),
        ]
    );
}

#[test]
fn new_node_is_described_by_its_final_contents() {
    let root = RootNode::new();
    root.commit();
    let node = root.create_node();
    node.put("a", 0).unwrap();
    node.get_multi_valued("list").unwrap().add(2).unwrap();
    node.put("a", 1).unwrap();
    root.put("node", &node).unwrap();

    let log = root.collect_changes();
    let group = log.node(node.node_ref()).unwrap();
    assert!(group.created);
    assert_eq!(group.id, node.id());
    assert_eq!(
        group.changes,
        vec![
            NodeChange::put("a", 1),
            NodeChange::put("list", SlotValue::List(vec![Value::Int(2)])),
        ]
    );
    assert_eq!(log.changes_for(root.node_ref()), &[NodeChange::put("node", &node)]);
}

#[test]
fn moved_node_is_created_again_under_its_new_id() {
    let root = RootNode::new();
    let node = root.create_node();
    node.put("x", 1).unwrap();
    root.put("a", &node).unwrap();
    root.commit();

    root.remove("a").unwrap();
    root.put("b", &node).unwrap();
    let log = root.collect_changes();

    let group = log.node(node.node_ref()).unwrap();
    assert!(group.created);
    assert_eq!(group.id, 3);
    assert_eq!(group.changes, vec![NodeChange::put("x", 1)]);
    assert_eq!(
        log.changes_for(root.node_ref()),
        &[NodeChange::remove("a", &node), NodeChange::put("b", &node)]
    );
}

#[test]
#[should_panic(expected = "outside the replayed list")]
fn inconsistent_list_log_panics() {
    let root = RootNode::new();
    let log = ChangeLog {
        nodes: vec![NodeLog {
            node: root.node_ref(),
            start_id: 1,
            end_id: 1,
            changes: vec![NodeChange::list_remove("items", 3, 1)],
            content: None,
            list_lengths: vec![(Key::name("items"), 0)],
            server_only: false,
            computed_server_only: false,
        }],
    };
    TransactionLogOptimizer::default().optimize(&log);
}
