//! DOM element view over a [`StateNode`].
//!
//! An element is a node with a `TAG` value. Attributes are the node's other
//! string keys; children, classes and the `is` name live in reserved keys so
//! the client receives every DOM change as an ordinary node change.

use std::fmt;

use statetree_core::{Key, ListView, RootNode, StateNode, TreeError, Value};

use crate::error::DomError;

pub const TAG: &str = "TAG";
pub const CHILDREN: &str = "CHILDREN";
pub const CLASS_LIST: &str = "CLASS_LIST";
pub const IS: &str = "is";
pub const TEXT_TAG: &str = "#text";
pub const TEXT_CONTENT: &str = "content";

const CLASS: &str = "class";
const STYLE: &str = "style";

/// Names that cannot be set with [`Element::set_attribute`].
pub fn is_reserved_attribute(name: &str) -> bool {
    matches!(name, TAG | CHILDREN | CLASS_LIST | IS | CLASS)
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Element {
    node: StateNode,
}

impl Element {
    pub fn create(root: &RootNode, tag: &str) -> Result<Self, DomError> {
        let node = root.create_node();
        node.put(TAG, tag)?;
        Ok(Self { node })
    }

    /// Customized built-in element, rendered as `<tag is="name">`.
    pub fn create_with_is(root: &RootNode, tag: &str, is: &str) -> Result<Self, DomError> {
        let element = Self::create(root, tag)?;
        element.node.put(IS, is)?;
        Ok(element)
    }

    pub fn create_text(root: &RootNode, content: &str) -> Result<Self, DomError> {
        let element = Self::create(root, TEXT_TAG)?;
        element.node.put(TEXT_CONTENT, content)?;
        Ok(element)
    }

    /// Element view of `node`, if it carries a tag.
    pub fn from_node(node: StateNode) -> Option<Self> {
        matches!(node.get(TAG), Some(Value::Str(_))).then_some(Self { node })
    }

    pub fn node(&self) -> &StateNode {
        &self.node
    }

    pub fn tag(&self) -> String {
        self.node.get_as::<String>(TAG).ok().flatten().unwrap_or_default()
    }

    pub fn is(&self) -> Option<String> {
        self.node.get_as::<String>(IS).ok().flatten()
    }

    pub fn is_text_node(&self) -> bool {
        self.tag() == TEXT_TAG
    }

    /// Sets an attribute. `false` removes it, `true` renders it without a
    /// value.
    pub fn set_attribute(&self, name: &str, value: impl Into<Value>) -> Result<(), DomError> {
        self.check_attribute(name)?;
        match value.into() {
            Value::Bool(false) => self.remove_attribute(name),
            Value::Node(_) => Err(DomError::NodeAttribute {
                name: name.to_owned(),
            }),
            value => {
                self.node.put(name, value)?;
                Ok(())
            }
        }
    }

    pub fn remove_attribute(&self, name: &str) -> Result<(), DomError> {
        self.check_attribute(name)?;
        self.node.remove(name)?;
        Ok(())
    }

    fn check_attribute(&self, name: &str) -> Result<(), DomError> {
        if is_reserved_attribute(name) {
            return Err(DomError::ReservedAttribute {
                name: name.to_owned(),
            });
        }
        if self.is_text_node() && name != TEXT_CONTENT {
            return Err(DomError::TextNodeAttribute {
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    /// Attribute value as stored; `class` yields the joined class names.
    pub fn raw_attribute(&self, name: &str) -> Option<Value> {
        match name {
            CLASS => {
                let names = self.class_names();
                (!names.is_empty()).then(|| Value::from(names))
            }
            TAG | CHILDREN | CLASS_LIST => None,
            _ => self.node.get(name),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.raw_attribute(name).and_then(|value| format_attribute(&value))
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.raw_attribute(name).is_some()
    }

    /// Attribute names in the order they were first set.
    pub fn attribute_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for key in self.node.keys() {
            let Some(name) = key.as_str() else {
                continue;
            };
            match name {
                TAG | CHILDREN => {}
                CLASS_LIST => {
                    if !self.classes().is_empty() {
                        names.push(CLASS.to_owned());
                    }
                }
                _ => {
                    if self.node.get(name).is_some() {
                        names.push(name.to_owned());
                    }
                }
            }
        }
        names
    }

    fn existing_list(&self, key: &str) -> Result<Option<ListView>, DomError> {
        if self.node.list_len(&Key::from(key)).is_none() {
            return Ok(None);
        }
        Ok(Some(self.node.get_multi_valued(key)?))
    }

    pub fn child_count(&self) -> usize {
        self.node.list_len(&Key::from(CHILDREN)).unwrap_or(0)
    }

    pub fn child(&self, index: usize) -> Result<Element, DomError> {
        let list = self
            .existing_list(CHILDREN)?
            .ok_or(TreeError::IndexOutOfBounds { index, len: 0 })?;
        list.get_node(index)?
            .and_then(Element::from_node)
            .ok_or(DomError::NotAnElement { index })
    }

    pub fn children(&self) -> Result<Vec<Element>, DomError> {
        (0..self.child_count()).map(|index| self.child(index)).collect()
    }

    fn child_elements(&self) -> Vec<Element> {
        (0..self.child_count())
            .filter_map(|index| self.child(index).ok())
            .collect()
    }

    pub fn child_index(&self, child: &Element) -> Result<Option<usize>, DomError> {
        match self.existing_list(CHILDREN)? {
            Some(list) => Ok(list.index_of(&Value::from(&child.node))?),
            None => Ok(None),
        }
    }

    /// Element holding this one in its children.
    pub fn parent(&self) -> Option<Element> {
        let parent = Element::from_node(self.node.parent()?)?;
        parent.child_index(self).ok().flatten().map(|_| parent)
    }

    /// Inserts `child` at `index`, moving it out of its current parent
    /// first.
    pub fn insert_child(&self, index: usize, child: &Element) -> Result<(), DomError> {
        if self.is_text_node() {
            return Err(DomError::TextNodeChildren);
        }
        let count = self.child_count();
        if index > count {
            return Err(DomError::ChildIndex { index, count });
        }
        let mut index = index;
        if let Some(parent) = child.parent() {
            let current = parent.child_index(child)?.ok_or(DomError::NotAChild)?;
            if parent == *self && current < index {
                index -= 1;
            }
            parent.remove_child_at(current)?;
        }
        self.node
            .get_multi_valued(CHILDREN)?
            .insert(index, &child.node)?;
        Ok(())
    }

    pub fn append_child(&self, child: &Element) -> Result<(), DomError> {
        self.insert_child(self.child_count(), child)
    }

    /// Replaces the child at `index`; `index == child_count()` appends.
    pub fn set_child(&self, index: usize, child: &Element) -> Result<(), DomError> {
        let count = self.child_count();
        if index == count {
            return self.append_child(child);
        }
        if index > count {
            return Err(DomError::ChildIndex { index, count });
        }
        let mut index = index;
        if let Some(parent) = child.parent() {
            let current = parent.child_index(child)?.ok_or(DomError::NotAChild)?;
            if parent == *self {
                if current == index {
                    return Ok(());
                }
                if current < index {
                    index -= 1;
                }
            }
            parent.remove_child_at(current)?;
        }
        self.node.get_multi_valued(CHILDREN)?.set(index, &child.node)?;
        Ok(())
    }

    pub fn remove_child(&self, child: &Element) -> Result<(), DomError> {
        let index = self.child_index(child)?.ok_or(DomError::NotAChild)?;
        self.remove_child_at(index)
    }

    pub fn remove_child_at(&self, index: usize) -> Result<(), DomError> {
        let list = self
            .existing_list(CHILDREN)?
            .ok_or(TreeError::IndexOutOfBounds { index, len: 0 })?;
        list.remove(index)?;
        Ok(())
    }

    pub fn remove_all_children(&self) -> Result<(), DomError> {
        if let Some(list) = self.existing_list(CHILDREN)? {
            list.clear()?;
        }
        Ok(())
    }

    /// No-op for elements without a parent element.
    pub fn remove_from_parent(&self) -> Result<(), DomError> {
        match self.parent() {
            Some(parent) => parent.remove_child(self),
            None => Ok(()),
        }
    }

    /// Adds whitespace separated class names not present yet.
    pub fn add_class(&self, class_name: &str) -> Result<(), DomError> {
        if class_name.split_whitespace().next().is_none() {
            return Ok(());
        }
        if self.is_text_node() {
            return Err(DomError::TextNodeAttribute {
                name: CLASS.to_owned(),
            });
        }
        let list = self.node.get_multi_valued(CLASS_LIST)?;
        for name in class_name.split_whitespace() {
            let name = Value::from(name);
            if !list.contains(&name)? {
                list.add(name)?;
            }
        }
        Ok(())
    }

    pub fn remove_class(&self, class_name: &str) -> Result<(), DomError> {
        if let Some(list) = self.existing_list(CLASS_LIST)? {
            list.remove_value(class_name)?;
        }
        Ok(())
    }

    pub fn set_class(&self, class_name: &str, enabled: bool) -> Result<(), DomError> {
        if enabled {
            self.add_class(class_name)
        } else {
            self.remove_class(class_name)
        }
    }

    pub fn has_class(&self, class_name: &str) -> bool {
        self.classes().iter().any(|name| name == class_name)
    }

    pub fn classes(&self) -> Vec<String> {
        let Ok(Some(list)) = self.existing_list(CLASS_LIST) else {
            return Vec::new();
        };
        list.to_vec()
            .unwrap_or_default()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    pub fn class_names(&self) -> String {
        self.classes().join(" ")
    }

    pub fn remove_all_classes(&self) -> Result<(), DomError> {
        if let Some(list) = self.existing_list(CLASS_LIST)? {
            list.clear()?;
        }
        Ok(())
    }

    fn styles(&self) -> Vec<(String, String)> {
        let Some(style) = self.attribute(STYLE) else {
            return Vec::new();
        };
        style
            .split(';')
            .filter_map(|declaration| {
                let (property, value) = declaration.split_once(':')?;
                Some((property.trim().to_owned(), value.trim().to_owned()))
            })
            .collect()
    }

    fn write_styles(&self, styles: &[(String, String)]) -> Result<(), DomError> {
        if styles.is_empty() {
            return self.remove_attribute(STYLE);
        }
        let style = styles
            .iter()
            .map(|(property, value)| format!("{property}:{value}"))
            .collect::<Vec<_>>()
            .join(";");
        self.set_attribute(STYLE, style)
    }

    /// Sets one inline style property, keeping the others in place.
    pub fn set_style(&self, property: &str, value: &str) -> Result<(), DomError> {
        let mut styles = self.styles();
        match styles.iter_mut().find(|(existing, _)| existing == property) {
            Some(entry) => entry.1 = value.to_owned(),
            None => styles.push((property.to_owned(), value.to_owned())),
        }
        self.write_styles(&styles)
    }

    pub fn style(&self, property: &str) -> Option<String> {
        self.styles()
            .into_iter()
            .find(|(existing, _)| existing == property)
            .map(|(_, value)| value)
    }

    pub fn has_style(&self, property: &str) -> bool {
        self.style(property).is_some()
    }

    pub fn remove_style(&self, property: &str) -> Result<(), DomError> {
        let mut styles = self.styles();
        let before = styles.len();
        styles.retain(|(existing, _)| existing != property);
        if styles.len() == before {
            return Ok(());
        }
        self.write_styles(&styles)
    }

    /// Replaces all children with a single text node. Text nodes get their
    /// content replaced instead.
    pub fn set_text_content(&self, text: &str) -> Result<(), DomError> {
        if self.is_text_node() {
            self.node.put(TEXT_CONTENT, text)?;
            return Ok(());
        }
        self.remove_all_children()?;
        if !text.is_empty() {
            let text = Element::create_text(&self.node.root(), text)?;
            self.append_child(&text)?;
        }
        Ok(())
    }

    /// Concatenated content of all descendant text nodes.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.write_text(&mut out);
        out
    }

    fn write_text(&self, out: &mut String) {
        if self.is_text_node() {
            if let Some(content) = self.attribute(TEXT_CONTENT) {
                out.push_str(&content);
            }
            return;
        }
        for child in self.child_elements() {
            child.write_text(out);
        }
    }

    pub fn outer_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        if self.is_text_node() {
            if let Some(content) = self.attribute(TEXT_CONTENT) {
                out.push_str(&escape(&content, false));
            }
            return;
        }
        let tag = self.tag();
        out.push('<');
        out.push_str(&tag);
        if let Some(is) = self.is() {
            push_attribute(out, IS, &is);
        }
        for name in self.attribute_names() {
            match self.raw_attribute(&name) {
                _ if name == IS => {}
                Some(Value::Bool(true)) => {
                    out.push(' ');
                    out.push_str(&name);
                }
                Some(value) => {
                    if let Some(text) = format_attribute(&value) {
                        push_attribute(out, &name, &text);
                    }
                }
                None => {}
            }
        }
        out.push('>');
        for child in self.child_elements() {
            child.write_html(out);
        }
        out.push_str("</");
        out.push_str(&tag);
        out.push('>');
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("tag", &self.tag())
            .field("node", &self.node)
            .finish()
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.outer_html())
    }
}

/// Integral doubles print without a fraction, `true` as an empty value and
/// `false` as no value at all.
fn format_attribute(value: &Value) -> Option<String> {
    match value {
        Value::Bool(true) => Some(String::new()),
        Value::Bool(false) => None,
        Value::Double(number) if number.is_finite() && number.fract() == 0.0 => {
            Some(format!("{}", *number as i64))
        }
        other => Some(other.to_string()),
    }
}

fn push_attribute(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    out.push_str(&escape(value, true));
    out.push('"');
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
#[path = "tests/element_tests.rs"]
mod tests;
