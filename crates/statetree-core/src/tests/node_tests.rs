use crate::*;
use std::rc::Rc;
use test_case::test_case;

fn names(node: &StateNode) -> Vec<String> {
    node.keys().iter().map(ToString::to_string).collect()
}

#[test]
fn put_returns_previous_value() {
    let root = RootNode::new();
    assert_eq!(root.put("name", "a").unwrap(), None);
    assert_eq!(root.put("name", "b").unwrap(), Some(Value::from("a")));
    assert_eq!(root.get("name"), Some(Value::from("b")));
    assert_eq!(root.get_as::<String>("name").unwrap(), Some("b".to_owned()));
}

#[test]
fn putting_an_equal_value_records_nothing() {
    let root = RootNode::new();
    root.put("flag", true).unwrap();
    root.commit();
    root.put("flag", true).unwrap();
    assert!(!root.has_pending_changes());
}

#[test]
fn typed_read_of_other_type_is_illegal_argument() {
    let root = RootNode::new();
    root.put("count", "many").unwrap();
    let error = root.get_as::<i64>("count").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::IllegalArgument);
    assert_eq!(root.get_or("missing", 7i64).unwrap(), 7);
    assert_eq!(root.get_as::<f64>("missing").unwrap(), None);
}

#[test]
fn replacing_a_key_keeps_its_position() {
    let root = RootNode::new();
    root.put("a", 1).unwrap();
    root.put("b", 2).unwrap();
    root.put("c", 3).unwrap();
    root.put("a", 4).unwrap();
    assert_eq!(names(&root), ["a", "b", "c"]);
    root.remove("b").unwrap();
    assert_eq!(names(&root), ["a", "c"]);
}

#[test]
fn string_keys_skip_type_keys() {
    struct Hidden;
    let root = RootNode::new();
    root.put(Key::of::<Hidden>(), 1).unwrap();
    root.put("shown", 2).unwrap();
    assert_eq!(root.string_keys(), vec![Rc::<str>::from("shown")]);
    assert!(root.contains_key(Key::of::<Hidden>()));
}

#[test]
fn owned_node_cannot_get_a_second_parent() {
    let root = RootNode::new();
    let child = root.create_node();
    root.put("first", &child).unwrap();
    let error = root.put("second", &child).unwrap_err();
    assert_eq!(error, TreeError::AlreadyOwned { node: child.node_ref() });
    assert_eq!(error.kind(), ErrorKind::IllegalState);
    assert_eq!(child.parent(), Some(StateNode::clone(&root)));
}

#[test]
fn cycles_are_rejected() {
    let root = RootNode::new();
    let parent = root.create_node();
    let child = root.create_node();
    parent.put("child", &child).unwrap();
    let error = child.put("parent", &parent).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::IllegalState);
    assert!(child.has_ancestor(&parent));
    assert!(!parent.has_ancestor(&child));
    assert!(parent.put("self", &parent).is_err());
}

#[test]
fn root_and_foreign_nodes_cannot_be_attached() {
    let root = RootNode::new();
    let node = root.create_node();
    assert_eq!(node.put("root", &*root).unwrap_err(), TreeError::RootAsChild);

    let other = RootNode::new();
    let foreign = other.create_node();
    let error = root.put("foreign", &foreign).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::IllegalArgument);
}

#[test]
fn removing_a_child_detaches_its_subtree() {
    let root = RootNode::new();
    let parent = root.create_node();
    let child = root.create_node();
    parent.put("child", &child).unwrap();
    root.put("parent", &parent).unwrap();
    assert!(child.is_attached());

    let removed = root.remove("parent").unwrap();
    assert_eq!(removed, Some(SlotValue::from(parent.node_ref())));
    assert!(!parent.is_attached());
    assert!(!child.is_attached());
    assert_eq!(parent.parent(), None);
    assert_eq!(child.parent(), Some(parent.clone()));
}

#[test]
fn list_operations() {
    let root = RootNode::new();
    let list = root.get_multi_valued("items").unwrap();
    list.add("a").unwrap();
    list.add("c").unwrap();
    list.insert(1, "b").unwrap();
    assert_eq!(list.to_vec().unwrap(), vec![Value::from("a"), "b".into(), "c".into()]);

    assert_eq!(list.set(0, "z").unwrap(), Value::from("a"));
    assert_eq!(list.index_of(&"c".into()).unwrap(), Some(2));
    assert!(list.remove_value("b").unwrap());
    assert!(!list.remove_value("missing").unwrap());
    assert_eq!(list.remove(0).unwrap(), Value::from("z"));
    assert_eq!(list.len().unwrap(), 1);

    let error = list.insert(5, "x").unwrap_err();
    assert_eq!(error, TreeError::IndexOutOfBounds { index: 5, len: 1 });
    list.clear().unwrap();
    assert!(list.is_empty().unwrap());
}

#[test]
fn clear_logs_one_remove_per_element_from_index_zero() {
    let root = RootNode::new();
    let list = root.get_multi_valued("items").unwrap();
    list.add(1).unwrap();
    list.add(2).unwrap();
    root.commit();

    list.clear().unwrap();
    let mut builder = TransactionLogBuilder::new();
    root.commit_with(&mut builder);
    assert_eq!(
        builder.changes_for(root.node_ref()),
        &[
            NodeChange::list_remove("items", 0, 1),
            NodeChange::list_remove("items", 0, 2),
        ]
    );
}

#[test]
fn multi_valued_wraps_existing_single_value() {
    let root = RootNode::new();
    root.put("tags", "first").unwrap();
    let list = root.get_multi_valued("tags").unwrap();
    assert_eq!(list.to_vec().unwrap(), vec![Value::from("first")]);
    assert_eq!(root.get("tags"), None);
    assert!(root.contains_key("tags"));
}

#[test]
fn list_view_detaches_when_slot_is_overwritten() {
    let root = RootNode::new();
    let list = root.get_multi_valued("items").unwrap();
    list.add(1).unwrap();
    root.put("items", "scalar").unwrap();
    let error = list.len().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::IllegalState);
    assert!(matches!(list.add(2), Err(TreeError::DetachedList { .. })));
}

#[test]
fn list_children_are_attached_and_detached() {
    let root = RootNode::new();
    let list = root.get_multi_valued("children").unwrap();
    let child = root.create_node();
    list.add(&child).unwrap();
    assert_eq!(child.id(), 2);
    assert_eq!(list.get_node(0).unwrap(), Some(child.clone()));

    let replacement = root.create_node();
    list.set(0, &replacement).unwrap();
    assert!(!child.is_attached());
    assert_eq!(replacement.id(), 3);
    assert_eq!(replacement.parent(), Some(StateNode::clone(&root)));
}

#[test]
fn schema_keys_are_typed_and_permanent() {
    let root = RootNode::new();
    let schema = Schema::new()
        .field("count", ValueKind::Int)
        .field("label", ValueKind::Str);
    let node = root.create_node_with_schema(schema.clone());

    assert!(node.contains_key("count"));
    assert_eq!(names(&node), ["count", "label"]);
    assert_eq!(node.get("count"), None);

    node.put("count", 3).unwrap();
    let error = node.put("count", "three").unwrap_err();
    assert_eq!(
        error,
        TreeError::TypeMismatch {
            key: Key::name("count"),
            expected: ValueKind::Int,
            actual: ValueKind::Str,
        }
    );
    assert_eq!(error.kind(), ErrorKind::IllegalArgument);

    let error = node.remove("count").unwrap_err();
    assert_eq!(error.kind(), ErrorKind::IllegalArgument);

    node.put("extra", true).unwrap();
    assert_eq!(node.remove("extra").unwrap(), Some(SlotValue::from(true)));

    let twin = root.create_node_with_schema(schema);
    assert!(Rc::ptr_eq(&node.schema().unwrap(), &twin.schema().unwrap()));
}

#[test_case(ValueKind::Bool, Value::Bool(true) ; "bool")]
#[test_case(ValueKind::Int, Value::Int(3) ; "int")]
#[test_case(ValueKind::Double, Value::Double(0.5) ; "double")]
#[test_case(ValueKind::Str, Value::from("s") ; "string")]
#[test_case(ValueKind::Any, Value::Int(1) ; "any")]
fn schema_accepts_matching_kind(kind: ValueKind, value: Value) {
    let root = RootNode::new();
    let node = root.create_node_with_schema(Schema::new().field("field", kind));
    node.put("field", value.clone()).unwrap();
    assert_eq!(node.get("field"), Some(value));
}

#[test]
fn server_only_is_inherited() {
    let root = RootNode::new();
    let hidden = root.create_node();
    let child = root.create_node();
    hidden.put("child", &child).unwrap();
    hidden.mark_server_only().unwrap();
    assert!(hidden.is_server_only());
    assert!(child.is_server_only());
    assert!(!root.is_server_only());
}

#[test]
fn content_lists_stored_then_computed_values() {
    let root = RootNode::new();
    let node = root.create_node();
    node.put("a", 1).unwrap();
    node.get_multi_valued("list").unwrap().add(2).unwrap();
    node.put_computed("double", |node| {
        node.get_as::<i64>("a").ok().flatten().map(|a| Value::Int(a * 2))
    })
    .unwrap();
    assert_eq!(node.get("double"), Some(Value::Int(2)));

    assert_eq!(
        node.content().entries,
        vec![
            (Key::name("a"), ContentSlot::Value(Value::Int(1))),
            (Key::name("list"), ContentSlot::List(vec![Value::Int(2)])),
            (Key::name("double"), ContentSlot::Computed(Value::Int(2))),
        ]
    );
}
