//! # Child descriptions
//!
//! Immutable descriptions of the children a declared type can have. A
//! description is identified by its [`DescriptionKey`] (kind plus name), so
//! descriptions built twice for the same child compare equal.

use crate::declaration::TypeKey;
use crate::name::XmlName;
use crate::value::ValueType;
use markbind_tree::{split_name, ElementStub, MarkupFile, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DescriptionKind {
    Attribute,
    Fixed,
    Collection,
    Custom,
}

/// Structural identity of a description
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DescriptionKey {
    pub kind: DescriptionKind,
    /// Child name, or for custom descriptions the element type name
    pub name: String,
}

impl fmt::Display for DescriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DescriptionKind::Attribute => write!(f, "@{}", self.name),
            DescriptionKind::Fixed => write!(f, "{}", self.name),
            DescriptionKind::Collection => write!(f, "{}*", self.name),
            DescriptionKind::Custom => write!(f, "<{}>", self.name),
        }
    }
}

/// Facts about a tag handed to custom matchers and extenders. Built from the
/// tree or from a stub, whichever backs the tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TagInfo {
    pub qualified_name: String,
    pub namespace: Option<String>,
    pub attributes: Vec<(String, String)>,
}

impl TagInfo {
    pub fn from_tree(file: &MarkupFile, tag: NodeId) -> Self {
        Self {
            qualified_name: file.name(tag).unwrap_or_default().to_string(),
            namespace: file.namespace(tag),
            attributes: file
                .attributes(tag)
                .iter()
                .filter_map(|a| Some((file.name(*a)?.to_string(), file.text_value(*a)?)))
                .collect(),
        }
    }

    pub fn from_stub(element: &ElementStub) -> Self {
        Self {
            qualified_name: element.name.clone(),
            namespace: element.namespace.clone(),
            attributes: element.attributes.iter().map(|a| (a.name.clone(), a.value.clone())).collect(),
        }
    }

    pub fn local_name(&self) -> &str {
        split_name(&self.qualified_name).1
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }
}

/// Caller-supplied predicate for custom children
#[derive(Clone)]
pub struct CustomMatcher(Arc<dyn Fn(&TagInfo) -> bool + Send + Sync>);

impl CustomMatcher {
    pub fn new(matcher: impl Fn(&TagInfo) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(matcher))
    }

    /// Matches every tag not claimed by another description
    pub fn any() -> Self {
        Self::new(|_| true)
    }

    pub fn matches(&self, tag: &TagInfo) -> bool {
        (self.0)(tag)
    }
}

impl fmt::Debug for CustomMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomMatcher")
    }
}

#[derive(Debug, Clone)]
pub struct AttributeDescription {
    pub name: XmlName,
    pub value_type: ValueType,
    pub converter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FixedDescription {
    pub name: XmlName,
    /// Number of positional instances
    pub count: usize,
    pub element_type: TypeKey,
}

#[derive(Debug, Clone)]
pub struct CollectionDescription {
    pub name: XmlName,
    pub element_type: TypeKey,
}

#[derive(Debug, Clone)]
pub struct CustomDescription {
    pub element_type: TypeKey,
    pub matcher: CustomMatcher,
}

#[derive(Debug, Clone)]
pub enum ChildDescription {
    Attribute(AttributeDescription),
    Fixed(FixedDescription),
    Collection(CollectionDescription),
    Custom(CustomDescription),
}

impl ChildDescription {
    pub fn kind(&self) -> DescriptionKind {
        match self {
            ChildDescription::Attribute(_) => DescriptionKind::Attribute,
            ChildDescription::Fixed(_) => DescriptionKind::Fixed,
            ChildDescription::Collection(_) => DescriptionKind::Collection,
            ChildDescription::Custom(_) => DescriptionKind::Custom,
        }
    }

    pub fn key(&self) -> DescriptionKey {
        let name = match self {
            ChildDescription::Attribute(d) => d.name.to_string(),
            ChildDescription::Fixed(d) => d.name.to_string(),
            ChildDescription::Collection(d) => d.name.to_string(),
            ChildDescription::Custom(d) => d.element_type.to_string(),
        };
        DescriptionKey { kind: self.kind(), name }
    }

    pub fn xml_name(&self) -> Option<&XmlName> {
        match self {
            ChildDescription::Attribute(d) => Some(&d.name),
            ChildDescription::Fixed(d) => Some(&d.name),
            ChildDescription::Collection(d) => Some(&d.name),
            ChildDescription::Custom(_) => None,
        }
    }

    /// Declared type of child elements; attributes have none
    pub fn element_type(&self) -> Option<&TypeKey> {
        match self {
            ChildDescription::Attribute(_) => None,
            ChildDescription::Fixed(d) => Some(&d.element_type),
            ChildDescription::Collection(d) => Some(&d.element_type),
            ChildDescription::Custom(d) => Some(&d.element_type),
        }
    }

    /// Fixed children and attributes always exist logically, even before
    /// their tree node does
    pub fn is_always_present(&self) -> bool {
        matches!(self, ChildDescription::Attribute(_) | ChildDescription::Fixed(_))
    }
}

impl PartialEq for ChildDescription {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ChildDescription {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_structural() {
        let a = ChildDescription::Collection(CollectionDescription {
            name: XmlName::new("item"),
            element_type: TypeKey::new("Item"),
        });
        let b = ChildDescription::Collection(CollectionDescription {
            name: XmlName::new("item"),
            element_type: TypeKey::new("Other"),
        });
        let c = ChildDescription::Fixed(FixedDescription {
            name: XmlName::new("item"),
            count: 1,
            element_type: TypeKey::new("Item"),
        });

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.key().to_string(), "item*");
    }

    #[test]
    fn test_tag_info_from_tree_and_stub_agree() {
        let file = MarkupFile::parse("/t.xml", r#"<root><x:item xmlns:x="urn:x" id="a"/></root>"#).unwrap();
        let root = file.root_tag().unwrap();
        let item = file.sub_tags(root)[0];

        let from_tree = TagInfo::from_tree(&file, item);
        let stub = file.stub().unwrap();
        let stub_item = stub.children(stub.root().unwrap())[0];
        let from_stub = TagInfo::from_stub(stub.element(stub_item).unwrap());

        assert_eq!(from_tree, from_stub);
        assert_eq!(from_tree.local_name(), "item");
        assert_eq!(from_tree.attribute("id"), Some("a"));
    }
}
