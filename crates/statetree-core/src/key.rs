use std::any::TypeId;
use std::fmt;
use std::rc::Rc;

/// Key of a slot in a [`StateNode`](crate::StateNode).
///
/// String keys are visible to the client. Type-token and marker keys only
/// exist on the server and are pruned before changes leave the process.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Name(Rc<str>),
    Type(TypeKey),
    Marker(Marker),
}

/// Key identified by a Rust type, see [`Key::of`].
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn type_name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Framework markers stored on nodes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Marker {
    /// The node and its whole subtree never reach the client.
    ServerOnly,
    /// Computed properties of the node are not transmitted.
    ComputedServerOnly,
}

impl Key {
    pub fn name(name: impl Into<Rc<str>>) -> Self {
        Key::Name(name.into())
    }

    /// Type-token key for `T`.
    pub fn of<T: 'static>() -> Self {
        Key::Type(TypeKey {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Whether changes under this key stay on the server.
    pub fn is_server_only(&self) -> bool {
        !matches!(self, Key::Name(_))
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Name(Rc::from(value))
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Name(Rc::from(value))
    }
}

impl From<&String> for Key {
    fn from(value: &String) -> Self {
        Key::Name(Rc::from(value.as_str()))
    }
}

impl From<Rc<str>> for Key {
    fn from(value: Rc<str>) -> Self {
        Key::Name(value)
    }
}

impl From<&Key> for Key {
    fn from(value: &Key) -> Self {
        value.clone()
    }
}

impl From<Marker> for Key {
    fn from(value: Marker) -> Self {
        Key::Marker(value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => f.write_str(name),
            Key::Type(ty) => write!(f, "<{}>", ty.name),
            Key::Marker(marker) => write!(f, "<{marker:?}>"),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => write!(f, "{name:?}"),
            other => fmt::Display::fmt(other, f),
        }
    }
}
