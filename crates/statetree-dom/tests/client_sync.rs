use serde_json::json;
use statetree_core::{RootNode, StateNode};
use statetree_dom::{ElementTemplate, Template};
use statetree_testing::{ClientSlot, SyncHarness};

fn todo(root: &RootNode, text: &str) -> StateNode {
    let node = root.create_node();
    node.put("text", text).unwrap();
    node
}

#[test]
fn bound_view_reaches_the_client() {
    let mut harness = SyncHarness::new();
    let root = harness.root().clone();
    let model = root.create_node();
    model.put("title", "Todo").unwrap();
    let todos = model.get_multi_valued("todos").unwrap();
    todos.add(&todo(&root, "write")).unwrap();
    root.put("model", &model).unwrap();
    harness.sync().unwrap();

    let template = Template::new(
        ElementTemplate::new("section")
            .child(ElementTemplate::new("h1").bind_text("title"))
            .child(
                ElementTemplate::new("ul")
                    .class("todo-list")
                    .for_each("todos", ElementTemplate::new("li").bind_text("text")),
            ),
    )
    .unwrap();
    let section = template.bind(&model).unwrap().element().clone();
    root.put("view", section.node()).unwrap();
    harness.sync().unwrap();
    harness.assert_in_sync();

    todos.add(&todo(&root, "test")).unwrap();
    todos.remove(0).unwrap();
    model.put("title", "Done").unwrap();
    harness.sync().unwrap();
    harness.assert_in_sync();

    assert_eq!(
        section.outer_html(),
        "<section><h1>Done</h1><ul class=\"todo-list\"><li>test</li></ul></section>"
    );
    let ul = section.child(1).unwrap();
    let li = ul.child(0).unwrap();
    assert_eq!(
        harness.mirror().get(ul.node().id(), "CHILDREN"),
        Some(&ClientSlot::List(vec![json!({"node": li.node().id()})]))
    );
    assert_eq!(
        harness.mirror().get(ul.node().id(), "CLASS_LIST"),
        Some(&ClientSlot::List(vec![json!("todo-list")]))
    );
}
