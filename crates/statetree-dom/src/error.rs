use statetree_core::{ErrorKind, TreeError};

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum DomError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("attribute {name} is reserved")]
    ReservedAttribute { name: String },
    #[error("text nodes only have a content attribute, got {name}")]
    TextNodeAttribute { name: String },
    #[error("text nodes cannot have children")]
    TextNodeChildren,
    #[error("attribute {name} cannot hold a node")]
    NodeAttribute { name: String },
    #[error("child {index} is not an element")]
    NotAnElement { index: usize },
    #[error("the element is not a child of this element")]
    NotAChild,
    #[error("cannot set child {index} of an element with {count} children")]
    ChildIndex { index: usize, count: usize },
    #[error("<{tag}> has more than one for-each binding")]
    MultipleForEach { tag: String },
}

impl DomError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomError::Tree(error) => error.kind(),
            DomError::NotAChild | DomError::TextNodeChildren => ErrorKind::IllegalState,
            _ => ErrorKind::IllegalArgument,
        }
    }
}
