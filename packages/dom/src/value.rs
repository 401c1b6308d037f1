use crate::declaration::TypeKey;
use crate::element::DomElement;
use std::fmt;
use std::sync::Arc;

/// Closed set of accepted strings
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumType {
    name: Arc<str>,
    variants: Arc<[String]>,
}

impl EnumType {
    pub fn new(name: &str, variants: &[&str]) -> Self {
        Self {
            name: Arc::from(name),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variants(&self) -> &[String] {
        &self.variants
    }

    pub fn contains(&self, text: &str) -> bool {
        self.variants.iter().any(|v| v == text)
    }
}

/// Declared type of a text value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    Boolean,
    Integer,
    Enum(EnumType),
    /// Text naming another element of the given type
    Element(TypeKey),
    /// Domain type handled by a registered converter
    Custom(String),
}

impl ValueType {
    /// Key under which type-level converters are registered
    pub fn registry_key(&self) -> String {
        match self {
            ValueType::String => "string".to_string(),
            ValueType::Boolean => "boolean".to_string(),
            ValueType::Integer => "integer".to_string(),
            ValueType::Enum(e) => format!("enum:{}", e.name()),
            ValueType::Element(key) => format!("element:{}", key),
            ValueType::Custom(name) => name.clone(),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.registry_key())
    }
}

/// Typed value produced or consumed by converters
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Boolean(bool),
    Integer(i64),
    Enum(String),
    Element(DomElement),
    Custom(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) | Value::Custom(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_element(&self) -> Option<&DomElement> {
        match self {
            Value::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Enum(_) => "enum",
            Value::Element(_) => "element",
            Value::Custom(_) => "custom",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<DomElement> for Value {
    fn from(e: DomElement) -> Self {
        Value::Element(e)
    }
}
