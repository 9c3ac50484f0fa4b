use super::*;
use crate::{Key, NodeChange, TreeConfig, Value};
use std::cell::Cell;

type Seen = Rc<RefCell<Vec<(&'static str, NodeId, usize)>>>;

struct Recorder {
    name: &'static str,
    seen: Seen,
}

impl NodeChangeVisitor for Recorder {
    fn visit_node(&mut self, node: &StateNode, changes: &[NodeChange]) {
        self.seen.borrow_mut().push((self.name, node.id(), changes.len()));
    }
}

fn recorder(name: &'static str, seen: &Seen) -> Rc<RefCell<Recorder>> {
    Rc::new(RefCell::new(Recorder {
        name,
        seen: Rc::clone(seen),
    }))
}

#[test]
fn root_has_id_one_and_first_child_two() {
    let root = RootNode::new();
    assert_eq!(root.id(), 1);
    assert!(root.is_root());

    let parent = root.create_node();
    let child = root.create_node();
    parent.put("child", &child).unwrap();
    assert_eq!(child.id(), 0);

    root.put("parent", &parent).unwrap();
    assert_eq!(parent.id(), 2);
    assert_eq!(child.id(), 3);
    assert_eq!(root.node_by_id(3), Some(child.clone()));
    assert_eq!(root.node_by_id(1), Some(StateNode::clone(&root)));
    assert_eq!(root.node_by_id(0), None);
}

#[test]
fn reattaching_mints_a_new_id() {
    let root = RootNode::new();
    let node = root.create_node();
    root.put("a", &node).unwrap();
    root.commit();
    assert_eq!(node.id(), 2);

    root.remove("a").unwrap();
    assert_eq!(node.id(), 0);
    assert!(root.node_by_id(2).is_none());

    root.put("b", &node).unwrap();
    assert_eq!(node.id(), 3);
    assert!(root.node_by_id(2).is_none());
    assert_eq!(root.node_by_id(3), Some(node.clone()));
    assert_eq!(root.id_of(node.node_ref()), 3);
}

#[test]
fn id_of_foreign_node_is_unattached() {
    let root = RootNode::new();
    let other = RootNode::new();
    assert_eq!(root.id_of(other.node_ref()), UNATTACHED);
    assert!(root.node(other.node_ref()).is_none());
}

#[test]
fn pending_changes_are_cleared_by_commit() {
    let root = RootNode::new();
    assert!(!root.has_pending_changes());
    root.put("x", 1).unwrap();
    assert!(root.has_pending_changes());
    root.commit();
    assert!(!root.has_pending_changes());
}

#[test]
fn visitors_run_in_registration_order_until_dropped() {
    let root = RootNode::new();
    let seen: Seen = Rc::default();
    let first = root.add_commit_visitor(recorder("first", &seen));
    let _second = root.add_commit_visitor(recorder("second", &seen));

    root.put("x", 1).unwrap();
    root.commit();
    assert_eq!(*seen.borrow(), vec![("first", 1, 1), ("second", 1, 1)]);

    drop(first);
    seen.borrow_mut().clear();
    root.put("x", 2).unwrap();
    root.commit();
    // remove of the old value plus the new put
    assert_eq!(*seen.borrow(), vec![("second", 1, 2)]);
}

#[test]
fn cancelled_registration_stops_delivery() {
    let root = RootNode::new();
    let seen: Seen = Rc::default();
    let registration = root.add_commit_visitor(recorder("only", &seen));
    registration.cancel();
    root.put("x", 1).unwrap();
    root.commit();
    assert!(seen.borrow().is_empty());
}

#[test]
fn nodes_are_delivered_in_first_touched_order() {
    let root = RootNode::new();
    let a = root.create_node();
    let b = root.create_node();
    root.put("b", &b).unwrap();
    root.put("a", &a).unwrap();
    b.put("value", 1).unwrap();
    root.commit();

    let seen: Seen = Rc::default();
    let _registration = root.add_commit_visitor(recorder("v", &seen));
    a.put("value", 1).unwrap();
    b.put("value", 2).unwrap();
    a.put("other", 1).unwrap();
    root.commit();
    assert_eq!(*seen.borrow(), vec![("v", 3, 2), ("v", 2, 2)]);
}

#[test]
fn listener_changes_are_committed_in_a_second_round() {
    let root = RootNode::new();
    let rounds = Rc::new(Cell::new(0));
    let counter = Rc::clone(&rounds);
    let _registration = root.add_commit_visitor(Rc::new(RefCell::new(CountingVisitor(counter))));

    root.add_change_listener(|node, changes| {
        let touched_count = changes
            .iter()
            .any(|change| change.key() == Some(&Key::name("count")));
        if touched_count {
            node.put("seen", true).unwrap();
        }
    });

    root.put("count", 1).unwrap();
    root.commit();
    assert_eq!(rounds.get(), 2);
    assert_eq!(root.get("seen"), Some(Value::Bool(true)));
    assert!(!root.has_pending_changes());
}

#[test]
fn listener_added_during_delivery_starts_with_the_next_round() {
    let root = RootNode::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let added = Cell::new(false);
    root.add_change_listener(move |node, _| {
        if !added.replace(true) {
            let sink = Rc::clone(&sink);
            node.add_change_listener(move |_, changes| sink.borrow_mut().push(changes.len()));
            node.put("late", true).unwrap();
        }
    });
    root.put("early", 1).unwrap();
    root.commit();
    assert_eq!(*seen.borrow(), [1]);
}

struct CountingVisitor(Rc<Cell<usize>>);

impl NodeChangeVisitor for CountingVisitor {
    fn visit_node(&mut self, _node: &StateNode, _changes: &[NodeChange]) {
        self.0.set(self.0.get() + 1);
    }
}

#[test]
fn removed_listener_is_not_called() {
    let root = RootNode::new();
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let id = root.add_change_listener(move |_, _| counter.set(counter.get() + 1));
    root.put("x", 1).unwrap();
    root.commit();
    assert!(root.remove_change_listener(id));
    assert!(!root.remove_change_listener(id));
    root.put("x", 2).unwrap();
    root.commit();
    assert_eq!(calls.get(), 1);
}

#[test]
#[should_panic(expected = "did not settle")]
fn runaway_listener_panics() {
    let root = RootNode::with_config(TreeConfig {
        max_commit_rounds: 3,
        ..TreeConfig::default()
    });
    root.add_change_listener(|node, _| {
        let next = node.get_or("n", 0i64).unwrap() + 1;
        node.put("n", next).unwrap();
    });
    root.put("n", 0).unwrap();
    root.commit();
}

struct Reentrant(RootNode);

impl NodeChangeVisitor for Reentrant {
    fn visit_node(&mut self, _node: &StateNode, _changes: &[NodeChange]) {
        self.0.commit();
    }
}

#[test]
#[should_panic(expected = "while a commit is in progress")]
fn nested_commit_panics() {
    let root = RootNode::new();
    root.put("x", 1).unwrap();
    let mut visitor = Reentrant(root.clone());
    root.commit_with(&mut visitor);
}

#[test]
fn commit_with_sees_every_round() {
    let root = RootNode::new();
    root.add_change_listener(|node, changes| {
        if changes.iter().any(|change| change.key() == Some(&Key::name("a"))) {
            node.put("b", 2).unwrap();
        }
    });
    root.put("a", 1).unwrap();
    let rounds = Rc::new(Cell::new(0));
    let mut visitor = CountingVisitor(Rc::clone(&rounds));
    root.commit_with(&mut visitor);
    assert_eq!(rounds.get(), 2);
}
