use super::*;
use crate::CHILDREN;
use statetree_core::{LazyList, ListView};

fn item(root: &RootNode, name: &str) -> StateNode {
    let node = root.create_node();
    node.put("name", name).unwrap();
    node
}

fn list_template() -> Template {
    Template::new(
        ElementTemplate::new("ul")
            .bind_attribute("title", "title")
            .for_each("items", ElementTemplate::new("li").bind_text("name")),
    )
    .unwrap()
}

fn mounted(root: &RootNode) -> (StateNode, ListView, Element) {
    let model = root.create_node();
    model.put("title", "T").unwrap();
    let items = model.get_multi_valued("items").unwrap();
    items.add(&item(root, "a")).unwrap();
    items.add(&item(root, "b")).unwrap();
    root.put("model", &model).unwrap();
    root.commit();

    let bound = list_template().bind(&model).unwrap();
    let ul = bound.element().clone();
    root.put("view", ul.node()).unwrap();
    root.commit();
    (model, items, ul)
}

fn texts(element: &Element) -> Vec<String> {
    element
        .children()
        .unwrap()
        .iter()
        .map(Element::text_content)
        .collect()
}

#[test]
fn binding_renders_model() {
    let root = RootNode::new();
    let (_model, _items, ul) = mounted(&root);
    assert_eq!(ul.outer_html(), "<ul title=\"T\"><li>a</li><li>b</li></ul>");
}

#[test]
fn list_changes_map_onto_children() {
    let root = RootNode::new();
    let (_model, items, ul) = mounted(&root);
    let first = ul.child(0).unwrap();

    items.insert(1, &item(&root, "c")).unwrap();
    items.remove(0).unwrap();
    let log = root.collect_changes();

    assert_eq!(texts(&ul), ["c", "b"]);
    let added = ul.child(0).unwrap();
    assert_eq!(
        log.changes_for(ul.node().node_ref()),
        &[
            NodeChange::list_remove(CHILDREN, 0, first.node()),
            NodeChange::list_insert(CHILDREN, 0, added.node()),
        ]
    );
    assert!(log.node(added.node().node_ref()).unwrap().created);
    assert!(!first.node().is_attached());
}

#[test]
fn replaced_item_replaces_its_child() {
    let root = RootNode::new();
    let (_model, items, ul) = mounted(&root);
    let first = ul.child(0).unwrap();

    items.set(0, &item(&root, "z")).unwrap();
    let log = root.collect_changes();
    let replacement = ul.child(0).unwrap();
    assert_eq!(texts(&ul), ["z", "b"]);
    assert_eq!(
        log.changes_for(ul.node().node_ref()),
        &[NodeChange::list_replace(CHILDREN, 0, first.node(), replacement.node())]
    );
}

#[test]
fn attribute_binding_follows_model() {
    let root = RootNode::new();
    let (model, _items, ul) = mounted(&root);
    model.put("title", "U").unwrap();
    let log = root.collect_changes();

    assert_eq!(ul.attribute("title").as_deref(), Some("U"));
    assert_eq!(
        log.changes_for(ul.node().node_ref()),
        &[NodeChange::Put(PutChange {
            key: Key::name("title"),
            value: SlotValue::from("U"),
            computed: true,
        })]
    );
}

#[test]
fn item_text_follows_item_node() {
    let root = RootNode::new();
    let (model, _items, ul) = mounted(&root);
    let first = model
        .get_multi_valued("items")
        .unwrap()
        .get_node(0)
        .unwrap()
        .unwrap();
    first.put("name", "renamed").unwrap();
    root.commit();
    assert_eq!(texts(&ul), ["renamed", "b"]);
}

#[test]
fn binding_replays_changes_made_before_it() {
    let root = RootNode::new();
    let model = root.create_node();
    model.put("title", "T").unwrap();
    model
        .get_multi_valued("items")
        .unwrap()
        .add(&item(&root, "a"))
        .unwrap();

    let bound = list_template().bind(&model).unwrap();
    let ul = bound.element().clone();
    assert_eq!(ul.child_count(), 0);

    root.put("model", &model).unwrap();
    root.put("view", ul.node()).unwrap();
    let log = root.collect_changes();

    assert_eq!(ul.outer_html(), "<ul title=\"T\"><li>a</li></ul>");
    let li = ul.child(0).unwrap();
    let group = log.node(ul.node().node_ref()).unwrap();
    assert!(group.created);
    assert!(group
        .changes
        .contains(&NodeChange::put(CHILDREN, SlotValue::List(vec![Value::from(li.node())]))));
}

#[test]
fn static_children_keep_their_place() {
    let root = RootNode::new();
    let template = Template::new(
        ElementTemplate::new("div")
            .child(ElementTemplate::new("h1").text("Title"))
            .for_each("items", ElementTemplate::new("p").bind_text("name"))
            .child(ElementTemplate::new("footer").text("end")),
    )
    .unwrap();
    let model = root.create_node();
    let items = model.get_multi_valued("items").unwrap();
    items.add(&item(&root, "a")).unwrap();
    root.put("model", &model).unwrap();
    root.commit();

    let div = template.bind(&model).unwrap().element().clone();
    root.put("view", div.node()).unwrap();
    items.add(&item(&root, "b")).unwrap();
    root.commit();

    assert_eq!(
        div.outer_html(),
        "<div><h1>Title</h1><p>a</p><p>b</p><footer>end</footer></div>"
    );
}

#[test]
fn plain_values_become_text_nodes() {
    let root = RootNode::new();
    let template = Template::new(
        ElementTemplate::new("div").for_each("tags", ElementTemplate::new("span")),
    )
    .unwrap();
    let model = root.create_node();
    let tags = model.get_multi_valued("tags").unwrap();
    tags.add("x").unwrap();
    tags.add(1).unwrap();
    root.commit();

    let div = template.bind(&model).unwrap().element().clone();
    assert_eq!(div.outer_html(), "<div>x1</div>");
    assert!(div.children().unwrap().iter().all(Element::is_text_node));
}

#[test]
fn nested_loops_follow_their_item() {
    let root = RootNode::new();
    let template = Template::new(ElementTemplate::new("ul").for_each(
        "items",
        ElementTemplate::new("li").for_each("tags", ElementTemplate::new("span")),
    ))
    .unwrap();
    let model = root.create_node();
    let entry = root.create_node();
    entry.get_multi_valued("tags").unwrap().add("x").unwrap();
    let items = model.get_multi_valued("items").unwrap();
    items.add(&entry).unwrap();
    root.put("model", &model).unwrap();
    root.commit();

    let ul = template.bind(&model).unwrap().element().clone();
    root.put("view", ul.node()).unwrap();
    root.commit();
    let li = ul.child(0).unwrap();

    entry.get_multi_valued("tags").unwrap().add("y").unwrap();
    root.commit();
    assert_eq!(li.text_content(), "xy");

    items.remove(0).unwrap();
    root.commit();
    entry.get_multi_valued("tags").unwrap().add("z").unwrap();
    root.commit();
    assert_eq!(ul.child_count(), 0);
    assert_eq!(li.text_content(), "xy");
}

#[test]
fn unbind_stops_mirroring() {
    let root = RootNode::new();
    let model = root.create_node();
    let items = model.get_multi_valued("items").unwrap();
    root.put("model", &model).unwrap();
    root.commit();

    let bound = list_template().bind(&model).unwrap();
    let ul = bound.element().clone();
    items.add(&item(&root, "a")).unwrap();
    root.commit();
    assert_eq!(ul.child_count(), 1);

    bound.unbind();
    items.add(&item(&root, "b")).unwrap();
    root.commit();
    assert_eq!(ul.child_count(), 1);
}

#[test]
fn invalid_templates_are_rejected() {
    let two_loops = ElementTemplate::new("div")
        .for_each("a", ElementTemplate::new("p"))
        .for_each("b", ElementTemplate::new("p"));
    assert_eq!(
        Template::new(two_loops).unwrap_err(),
        DomError::MultipleForEach { tag: "div".to_owned() }
    );

    let nested_class = ElementTemplate::new("div")
        .child(ElementTemplate::new("span").attribute("class", "x"));
    assert!(matches!(
        Template::new(nested_class),
        Err(DomError::ReservedAttribute { .. })
    ));

    let classes = Template::new(ElementTemplate::new("div").class("a b")).unwrap();
    let root = RootNode::new();
    let div = classes.bind(&root.create_node()).unwrap().element().clone();
    assert_eq!(div.classes(), ["a", "b"]);
}

#[test]
fn failed_list_sync_is_reported() {
    let root = RootNode::new();
    let model = root.create_node();
    let items = model.get_multi_valued("items").unwrap();
    items.add(&item(&root, "a")).unwrap();
    root.put("model", &model).unwrap();
    root.commit();

    let bound = list_template().bind(&model).unwrap();
    let ul = bound.element().clone();
    assert!(!bound.has_errors());

    ul.remove_all_children().unwrap();
    items.add(&item(&root, "b")).unwrap();
    root.commit();

    assert!(bound.has_errors());
    assert_eq!(
        bound.take_errors(),
        [DomError::ChildIndex { index: 1, count: 0 }]
    );
    assert!(!bound.has_errors());
}

#[test]
fn lazy_list_items_follow_the_window() {
    let root = RootNode::new();
    let model = root.create_node();
    root.put("model", &model).unwrap();
    let rows = model
        .put_lazy_list(
            "rows",
            LazyList::new(
                |index: usize, count: usize| -> Vec<i64> {
                    (index..(index + count).min(10)).map(|i| i as i64).collect()
                },
                |value: &i64, node: &StateNode| node.put("value", *value).map(drop),
            )
            .with_active_range(0..3),
        )
        .unwrap();
    root.commit();

    let template = Template::new(
        ElementTemplate::new("ul").for_each("rows", ElementTemplate::new("li").bind_text("value")),
    )
    .unwrap();
    let bound = template.bind(&model).unwrap();
    let ul = bound.element().clone();
    assert_eq!(texts(&ul), ["0", "1", "2"]);

    rows.set_active_range(1..4).unwrap();
    root.commit();
    assert_eq!(texts(&ul), ["1", "2", "3"]);
    assert!(!bound.has_errors());
}
