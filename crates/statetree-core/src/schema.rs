use crate::key::Key;
use crate::value::ValueKind;

/// Fixed set of typed keys for a node created with
/// [`RootNode::create_node_with_schema`](crate::RootNode::create_node_with_schema).
///
/// Declared keys are always reported as present, reject values of another
/// kind and cannot be removed. Other keys behave as on a plain node. Equal
/// schemas are shared between nodes of the same tree.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Schema {
    fields: Vec<(Key, ValueKind)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `key`; redeclaring a key replaces its kind.
    pub fn field(mut self, key: impl Into<Key>, kind: ValueKind) -> Self {
        let key = key.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == key) {
            Some(field) => field.1 = kind,
            None => self.fields.push((key, kind)),
        }
        self
    }

    pub fn kind_of(&self, key: &Key) -> Option<ValueKind> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, kind)| *kind)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.fields.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
