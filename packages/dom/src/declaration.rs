//! # Type declarations
//!
//! A declared type is described explicitly at registration: its operations,
//! their parameter and return shapes, and optional binding metadata that pins
//! an operation to a specific child. The schema builder classifies every
//! operation from this description.
//!
//! ```text
//! TypeDeclaration::builder("Module")
//!     .attribute("get_id", "id", ValueType::String)
//!     .fixed_child("get_source", "source", "Source")
//!     .collection("get_dependencies", "dependency", "Dependency")
//!     .adder("add_dependency", "dependency", "Dependency")
//!     .name_from("get_id")
//!     .build()
//! ```

use crate::description::CustomMatcher;
use crate::name::XmlName;
use crate::value::ValueType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Name of a declared type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TypeKey(Arc<str>);

impl TypeKey {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TypeKey {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<TypeKey> for String {
    fn from(key: TypeKey) -> Self {
        key.0.to_string()
    }
}

impl From<&str> for TypeKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    Value(ValueType),
    Element(TypeKey),
    /// Insertion position of an adder
    Index,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnType {
    Void,
    Value(ValueType),
    /// Handle of an attribute carrying a value of the given type
    Attribute(ValueType),
    Element(TypeKey),
    Elements(TypeKey),
}

/// Explicit child binding attached to an operation
#[derive(Clone)]
pub enum Binding {
    Attribute { name: XmlName, converter: Option<String> },
    SubTag { name: XmlName, index: usize },
    SubTagList { name: XmlName },
    /// Several collections merged in document order
    SubTagsList { names: Vec<XmlName> },
    /// Adder into a merged collection, creating tags named `tag`
    SubTagsAdder { names: Vec<XmlName>, tag: XmlName },
    CustomChildren { matcher: CustomMatcher },
    /// Tag value read or written through a specific converter
    TagValue { converter: Option<String> },
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Attribute { name, .. } => write!(f, "Attribute({})", name),
            Binding::SubTag { name, index } => write!(f, "SubTag({}, {})", name, index),
            Binding::SubTagList { name } => write!(f, "SubTagList({})", name),
            Binding::SubTagsList { names } => write!(f, "SubTagsList({:?})", names),
            Binding::SubTagsAdder { tag, .. } => write!(f, "SubTagsAdder({})", tag),
            Binding::CustomChildren { .. } => f.write_str("CustomChildren"),
            Binding::TagValue { converter } => write!(f, "TagValue({:?})", converter),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationDecl {
    pub name: String,
    pub params: Vec<ParamType>,
    pub returns: ReturnType,
    pub binding: Option<Binding>,
}

#[derive(Debug, Clone)]
pub struct TypeDeclaration {
    key: TypeKey,
    extends: Vec<TypeKey>,
    operations: Vec<OperationDecl>,
    name_operation: Option<String>,
}

impl TypeDeclaration {
    pub fn builder(name: &str) -> TypeDeclarationBuilder {
        TypeDeclarationBuilder {
            declaration: TypeDeclaration {
                key: TypeKey::new(name),
                extends: Vec::new(),
                operations: Vec::new(),
                name_operation: None,
            },
        }
    }

    pub fn key(&self) -> &TypeKey {
        &self.key
    }

    pub fn extends(&self) -> &[TypeKey] {
        &self.extends
    }

    pub fn operations(&self) -> &[OperationDecl] {
        &self.operations
    }

    pub fn name_operation(&self) -> Option<&str> {
        self.name_operation.as_deref()
    }
}

pub struct TypeDeclarationBuilder {
    declaration: TypeDeclaration,
}

impl TypeDeclarationBuilder {
    pub fn extends(mut self, parent: &str) -> Self {
        self.declaration.extends.push(TypeKey::new(parent));
        self
    }

    /// Operation classified by name and signature alone
    pub fn operation(mut self, name: &str, params: Vec<ParamType>, returns: ReturnType) -> Self {
        self.push(name, params, returns, None);
        self
    }

    /// Operation with explicit binding metadata
    pub fn bound(mut self, name: &str, params: Vec<ParamType>, returns: ReturnType, binding: Binding) -> Self {
        self.push(name, params, returns, Some(binding));
        self
    }

    pub fn attribute(self, operation: &str, xml_name: impl Into<XmlName>, value_type: ValueType) -> Self {
        self.bound(
            operation,
            Vec::new(),
            ReturnType::Attribute(value_type),
            Binding::Attribute {
                name: xml_name.into(),
                converter: None,
            },
        )
    }

    pub fn attribute_with_converter(self, operation: &str, xml_name: impl Into<XmlName>, value_type: ValueType, converter: &str) -> Self {
        self.bound(
            operation,
            Vec::new(),
            ReturnType::Attribute(value_type),
            Binding::Attribute {
                name: xml_name.into(),
                converter: Some(converter.to_string()),
            },
        )
    }

    pub fn fixed_child(self, operation: &str, xml_name: impl Into<XmlName>, element_type: &str) -> Self {
        self.fixed_child_at(operation, xml_name, 0, element_type)
    }

    pub fn fixed_child_at(self, operation: &str, xml_name: impl Into<XmlName>, index: usize, element_type: &str) -> Self {
        self.bound(
            operation,
            Vec::new(),
            ReturnType::Element(TypeKey::new(element_type)),
            Binding::SubTag {
                name: xml_name.into(),
                index,
            },
        )
    }

    pub fn collection(self, operation: &str, xml_name: impl Into<XmlName>, element_type: &str) -> Self {
        self.bound(
            operation,
            Vec::new(),
            ReturnType::Elements(TypeKey::new(element_type)),
            Binding::SubTagList { name: xml_name.into() },
        )
    }

    /// Appending adder
    pub fn adder(self, operation: &str, xml_name: impl Into<XmlName>, element_type: &str) -> Self {
        self.bound(
            operation,
            Vec::new(),
            ReturnType::Element(TypeKey::new(element_type)),
            Binding::SubTagList { name: xml_name.into() },
        )
    }

    /// Adder taking the insertion position
    pub fn indexed_adder(self, operation: &str, xml_name: impl Into<XmlName>, element_type: &str) -> Self {
        self.bound(
            operation,
            vec![ParamType::Index],
            ReturnType::Element(TypeKey::new(element_type)),
            Binding::SubTagList { name: xml_name.into() },
        )
    }

    pub fn composite(self, operation: &str, xml_names: &[&str], element_type: &str) -> Self {
        self.bound(
            operation,
            Vec::new(),
            ReturnType::Elements(TypeKey::new(element_type)),
            Binding::SubTagsList {
                names: xml_names.iter().map(|n| XmlName::new(*n)).collect(),
            },
        )
    }

    pub fn composite_adder(self, operation: &str, xml_names: &[&str], tag: &str, element_type: &str) -> Self {
        self.bound(
            operation,
            vec![ParamType::Index],
            ReturnType::Element(TypeKey::new(element_type)),
            Binding::SubTagsAdder {
                names: xml_names.iter().map(|n| XmlName::new(*n)).collect(),
                tag: XmlName::new(tag),
            },
        )
    }

    pub fn custom_children(self, operation: &str, element_type: &str, matcher: CustomMatcher) -> Self {
        self.bound(
            operation,
            Vec::new(),
            ReturnType::Elements(TypeKey::new(element_type)),
            Binding::CustomChildren { matcher },
        )
    }

    /// Tag value getter
    pub fn value(self, operation: &str, value_type: ValueType) -> Self {
        self.operation(operation, Vec::new(), ReturnType::Value(value_type))
    }

    /// Tag value setter
    pub fn value_setter(self, operation: &str, value_type: ValueType) -> Self {
        self.operation(operation, vec![ParamType::Value(value_type)], ReturnType::Void)
    }

    /// Mark the operation producing the presentable name
    pub fn name_from(mut self, operation: &str) -> Self {
        self.declaration.name_operation = Some(operation.to_string());
        self
    }

    pub fn build(self) -> TypeDeclaration {
        self.declaration
    }

    fn push(&mut self, name: &str, params: Vec<ParamType>, returns: ReturnType, binding: Option<Binding>) {
        self.declaration.operations.push(OperationDecl {
            name: name.to_string(),
            params,
            returns,
            binding,
        });
    }
}
