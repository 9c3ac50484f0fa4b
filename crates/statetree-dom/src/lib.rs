#![doc = r"Element and template views over a statetree node model."]

mod element;
mod error;
mod template;

pub use element::{
    is_reserved_attribute, Element, CHILDREN, CLASS_LIST, IS, TAG, TEXT_CONTENT, TEXT_TAG,
};
pub use error::DomError;
pub use template::{Binding, BoundTemplate, ElementTemplate, Template, TemplateNode};
