//! Data-bound element trees.
//!
//! A [`Template`] describes a static element shape. Binding it to a model
//! node instantiates the elements: attribute and text bindings become
//! computed properties of the element nodes reading the model, and a
//! for-each binding keeps one child element per entry of a model list.
//!
//! List changes of the model reach the for-each binding through a change
//! listener during commit and are mirrored one to one on the children of
//! the bound element, so an insert into the model list becomes an insert
//! into the children list in the follow-up commit round.

use std::cell::RefCell;
use std::rc::Rc;

use statetree_core::{
    ContentSlot, Key, ListenerId, NodeChange, NodeRef, PutChange, RemoveChange, RootNode, SlotValue,
    StateNode, Value,
};

use crate::element::{is_reserved_attribute, Element, TEXT_CONTENT, TEXT_TAG};
use crate::error::DomError;

#[derive(Clone, PartialEq, Debug)]
pub enum Binding {
    Static(Value),
    /// Value of the model key with this name.
    Model(Rc<str>),
}

#[derive(Clone, Debug)]
pub enum TemplateNode {
    Element(ElementTemplate),
    Text(Binding),
    /// One `item` element per entry of the model list `key`.
    ForEach {
        key: Rc<str>,
        item: Rc<ElementTemplate>,
    },
}

#[derive(Clone, Debug)]
pub struct ElementTemplate {
    tag: Rc<str>,
    attributes: Vec<(Rc<str>, Binding)>,
    classes: Vec<Rc<str>>,
    children: Vec<TemplateNode>,
}

impl ElementTemplate {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: Rc::from(tag),
            attributes: Vec::new(),
            classes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn children(&self) -> &[TemplateNode] {
        &self.children
    }

    pub fn attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes
            .push((Rc::from(name), Binding::Static(value.into())));
        self
    }

    pub fn bind_attribute(mut self, name: &str, model_key: &str) -> Self {
        self.attributes
            .push((Rc::from(name), Binding::Model(Rc::from(model_key))));
        self
    }

    pub fn class(mut self, name: &str) -> Self {
        self.classes.push(Rc::from(name));
        self
    }

    pub fn child(mut self, child: ElementTemplate) -> Self {
        self.children.push(TemplateNode::Element(child));
        self
    }

    pub fn text(mut self, content: &str) -> Self {
        self.children
            .push(TemplateNode::Text(Binding::Static(Value::from(content))));
        self
    }

    pub fn bind_text(mut self, model_key: &str) -> Self {
        self.children
            .push(TemplateNode::Text(Binding::Model(Rc::from(model_key))));
        self
    }

    pub fn for_each(mut self, list_key: &str, item: ElementTemplate) -> Self {
        self.children.push(TemplateNode::ForEach {
            key: Rc::from(list_key),
            item: Rc::new(item),
        });
        self
    }

    fn validate(&self) -> Result<(), DomError> {
        for (name, binding) in &self.attributes {
            if is_reserved_attribute(name) {
                return Err(DomError::ReservedAttribute {
                    name: name.to_string(),
                });
            }
            if matches!(binding, Binding::Static(Value::Node(_))) {
                return Err(DomError::NodeAttribute {
                    name: name.to_string(),
                });
            }
        }
        let loops = self
            .children
            .iter()
            .filter(|child| matches!(child, TemplateNode::ForEach { .. }))
            .count();
        if loops > 1 {
            return Err(DomError::MultipleForEach {
                tag: self.tag.to_string(),
            });
        }
        for child in &self.children {
            match child {
                TemplateNode::Element(child) => child.validate()?,
                TemplateNode::ForEach { item, .. } => item.validate()?,
                TemplateNode::Text(_) => {}
            }
        }
        Ok(())
    }
}

/// Validated element shape that can be bound to model nodes.
#[derive(Clone, Debug)]
pub struct Template {
    root: Rc<ElementTemplate>,
}

impl Template {
    pub fn new(root: ElementTemplate) -> Result<Self, DomError> {
        root.validate()?;
        Ok(Self {
            root: Rc::new(root),
        })
    }

    pub fn root(&self) -> &ElementTemplate {
        &self.root
    }

    /// Instantiates the template for `model`.
    ///
    /// The elements are created unattached; put the returned element into
    /// the tree to send it to the client. For-each bindings start from the
    /// list as of the last commit and replay the changes made since then in
    /// the next commit.
    pub fn bind(&self, model: &StateNode) -> Result<BoundTemplate, DomError> {
        let root = model.root();
        let mut scope = Scope::new(ErrorSink::default());
        let element = instantiate(&self.root, &root, model, &mut scope)?;
        Ok(BoundTemplate {
            element,
            model: model.clone(),
            scope,
        })
    }
}

/// Result of [`Template::bind`]. Bindings stay active until
/// [`BoundTemplate::unbind`] is called, also after this value is dropped.
pub struct BoundTemplate {
    element: Element,
    model: StateNode,
    scope: Scope,
}

impl BoundTemplate {
    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn model(&self) -> &StateNode {
        &self.model
    }

    /// Errors raised while mirroring model list changes since the last call,
    /// oldest first. A for-each binding that failed may no longer match its
    /// model list.
    pub fn take_errors(&self) -> Vec<DomError> {
        std::mem::take(&mut *self.scope.errors.borrow_mut())
    }

    pub fn has_errors(&self) -> bool {
        !self.scope.errors.borrow().is_empty()
    }

    /// Stops mirroring model list changes into the elements. Attribute and
    /// text bindings keep reading the model.
    pub fn unbind(self) {
        self.scope.release(&self.model);
    }
}

/// Failures of for-each listeners, shared by every scope of one binding.
type ErrorSink = Rc<RefCell<Vec<DomError>>>;

/// Listeners registered for one instantiated element tree.
struct Scope {
    listeners: Vec<(NodeRef, ListenerId)>,
    loops: Vec<Rc<ForEachBinding>>,
    errors: ErrorSink,
}

impl Scope {
    fn new(errors: ErrorSink) -> Self {
        Self {
            listeners: Vec::new(),
            loops: Vec::new(),
            errors,
        }
    }

    fn release(&self, via: &StateNode) {
        for (node, id) in &self.listeners {
            if let Some(node) = via.resolve(*node) {
                node.remove_change_listener(*id);
            }
        }
        for binding in &self.loops {
            let items = std::mem::take(&mut *binding.items.borrow_mut());
            for item in items {
                item.release(via);
            }
        }
    }
}

fn instantiate(
    template: &ElementTemplate,
    root: &RootNode,
    model: &StateNode,
    scope: &mut Scope,
) -> Result<Element, DomError> {
    let element = Element::create(root, &template.tag)?;
    for class in &template.classes {
        element.add_class(class)?;
    }
    for (name, binding) in &template.attributes {
        match binding {
            Binding::Static(value) => element.set_attribute(name, value.clone())?,
            Binding::Model(key) => bind_value(element.node(), name, model, key)?,
        }
    }
    for child in &template.children {
        match child {
            TemplateNode::Element(child) => {
                let child = instantiate(child, root, model, scope)?;
                element.append_child(&child)?;
            }
            TemplateNode::Text(Binding::Static(value)) => {
                let text = Element::create_text(root, &value.to_string())?;
                element.append_child(&text)?;
            }
            TemplateNode::Text(Binding::Model(key)) => {
                let text = Element::create(root, TEXT_TAG)?;
                bind_value(text.node(), TEXT_CONTENT, model, key)?;
                element.append_child(&text)?;
            }
            TemplateNode::ForEach { key, item } => {
                let (binding, listener) =
                    ForEachBinding::attach(&element, model, key, item, &scope.errors)?;
                scope.listeners.push((model.node_ref(), listener));
                scope.loops.push(binding);
            }
        }
    }
    Ok(element)
}

fn bind_value(node: &StateNode, name: &str, model: &StateNode, key: &Rc<str>) -> Result<(), DomError> {
    let model = model.node_ref();
    let key = Key::from(Rc::clone(key));
    node.put_computed(name, move |node| node.resolve(model)?.get(key.clone()))?;
    Ok(())
}

struct ForEachBinding {
    parent: NodeRef,
    /// Static children preceding the bound ones.
    offset: usize,
    key: Key,
    item: Rc<ElementTemplate>,
    items: RefCell<Vec<Scope>>,
    errors: ErrorSink,
}

impl ForEachBinding {
    fn attach(
        parent: &Element,
        model: &StateNode,
        key: &Rc<str>,
        item: &Rc<ElementTemplate>,
        errors: &ErrorSink,
    ) -> Result<(Rc<Self>, ListenerId), DomError> {
        let binding = Rc::new(Self {
            parent: parent.node().node_ref(),
            offset: parent.child_count(),
            key: Key::from(Rc::clone(key)),
            item: Rc::clone(item),
            items: RefCell::default(),
            errors: Rc::clone(errors),
        });
        for (index, value) in committed_items(model, &binding.key).iter().enumerate() {
            binding.insert(model, parent, index, value)?;
        }
        let listener = Rc::clone(&binding);
        let id = model.add_change_listener(move |model, changes| {
            if let Err(error) = listener.apply(model, changes) {
                log::warn!("for-each binding over {} failed: {error}", listener.key);
                listener.errors.borrow_mut().push(error);
            }
        });
        log::debug!(
            "bound <{}> items to list {} starting at child {}",
            binding.item.tag,
            binding.key,
            binding.offset
        );
        Ok((binding, id))
    }

    fn apply(&self, model: &StateNode, changes: &[NodeChange]) -> Result<(), DomError> {
        let Some(parent) = model.resolve(self.parent).and_then(Element::from_node) else {
            return Ok(());
        };
        for change in changes.iter().filter(|change| change.key() == Some(&self.key)) {
            match change {
                NodeChange::ListInsert(change) => {
                    self.insert(model, &parent, change.index, &change.value)?;
                }
                NodeChange::ListInsertMany(change) => {
                    for (offset, value) in change.values.iter().enumerate() {
                        self.insert(model, &parent, change.index + offset, value)?;
                    }
                }
                NodeChange::ListRemove(change) => self.remove(model, &parent, change.index)?,
                NodeChange::ListReplace(change) => {
                    self.replace(model, &parent, change.index, &change.new_value)?;
                }
                NodeChange::Put(PutChange {
                    value: SlotValue::List(values),
                    ..
                }) => {
                    self.clear(model, &parent)?;
                    for (index, value) in values.iter().enumerate() {
                        self.insert(model, &parent, index, value)?;
                    }
                }
                NodeChange::Put(_) | NodeChange::Remove(_) => self.clear(model, &parent)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn instantiate_item(&self, model: &StateNode, value: &Value) -> Result<(Element, Scope), DomError> {
        let root = model.root();
        let mut scope = Scope::new(Rc::clone(&self.errors));
        let element = match value.as_node().and_then(|node| model.resolve(node)) {
            Some(item) => instantiate(&self.item, &root, &item, &mut scope)?,
            None => Element::create_text(&root, &value.to_string())?,
        };
        Ok((element, scope))
    }

    fn insert(&self, model: &StateNode, parent: &Element, index: usize, value: &Value) -> Result<(), DomError> {
        let (element, scope) = self.instantiate_item(model, value)?;
        parent.insert_child(self.offset + index, &element)?;
        let mut items = self.items.borrow_mut();
        let index = index.min(items.len());
        items.insert(index, scope);
        Ok(())
    }

    fn remove(&self, model: &StateNode, parent: &Element, index: usize) -> Result<(), DomError> {
        parent.remove_child_at(self.offset + index)?;
        let removed = {
            let mut items = self.items.borrow_mut();
            (index < items.len()).then(|| items.remove(index))
        };
        if let Some(scope) = removed {
            scope.release(model);
        }
        Ok(())
    }

    fn replace(&self, model: &StateNode, parent: &Element, index: usize, value: &Value) -> Result<(), DomError> {
        let (element, scope) = self.instantiate_item(model, value)?;
        parent.set_child(self.offset + index, &element)?;
        let previous = self
            .items
            .borrow_mut()
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, scope));
        if let Some(previous) = previous {
            previous.release(model);
        }
        Ok(())
    }

    fn clear(&self, model: &StateNode, parent: &Element) -> Result<(), DomError> {
        let count = self.items.borrow().len();
        for _ in 0..count {
            self.remove(model, parent, 0)?;
        }
        Ok(())
    }
}

/// Entries `key` of `model` held at the last commit, reconstructed by
/// undoing the pending changes of that key. Lazy lists contribute the items
/// described to the client.
fn committed_items(model: &StateNode, key: &Key) -> Vec<Value> {
    let mut items = model
        .content()
        .entries
        .into_iter()
        .find(|(entry, _)| entry == key)
        .and_then(|(_, slot)| match slot {
            ContentSlot::List(items) | ContentSlot::Lazy { items, .. } => Some(items),
            _ => None,
        })
        .unwrap_or_default();
    let pending = model.pending_changes();
    for change in pending.iter().rev().filter(|change| change.key() == Some(key)) {
        match change {
            NodeChange::ListInsert(change) if change.index < items.len() => {
                items.remove(change.index);
            }
            NodeChange::ListInsertMany(change) => {
                let end = (change.index + change.values.len()).min(items.len());
                items.drain(change.index.min(end)..end);
            }
            NodeChange::ListRemove(change) if change.index <= items.len() => {
                items.insert(change.index, change.value.clone());
            }
            NodeChange::ListReplace(change) if change.index < items.len() => {
                items[change.index] = change.old_value.clone();
            }
            NodeChange::Put(_) => items.clear(),
            NodeChange::Remove(RemoveChange { value, .. }) => {
                items = match value {
                    SlotValue::List(values) => values.clone(),
                    _ => Vec::new(),
                };
            }
            _ => {}
        }
    }
    items
}

#[cfg(test)]
#[path = "tests/template_tests.rs"]
mod tests;
