//! # Converters
//!
//! Marshaling between raw text and typed [`Value`]s. Plain converters only
//! translate; resolving converters also offer completion variants and can
//! locate the tree node a value refers to.
//!
//! Lookup order for a value: the converter named by the operation, then the
//! converter registered for the value type, then the structural default for
//! the value type. Custom value types have no structural default.

use crate::declaration::TypeKey;
use crate::error::ConfigError;
use crate::value::{EnumType, Value, ValueType};
use markbind_tree::{MarkupFile, NodeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Where the text being converted lives
#[derive(Clone, Copy)]
pub struct ConvertContext<'a> {
    pub file: &'a MarkupFile,
    /// Tag or attribute holding the text, when it exists in the tree
    pub node: Option<NodeId>,
    pub value_type: &'a ValueType,
}

/// Failed resolution; the diagnostic is only built when asked for
#[derive(Clone)]
pub struct Unresolved {
    text: String,
    message: Arc<dyn Fn() -> String + Send + Sync>,
}

impl Unresolved {
    pub fn new(text: impl Into<String>, message: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self {
            text: text.into(),
            message: Arc::new(message),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn message(&self) -> String {
        (self.message)()
    }
}

impl fmt::Debug for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unresolved").field("text", &self.text).finish()
    }
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Resolved(Value),
    Unresolved(Unresolved),
}

impl Resolution {
    pub fn value(self) -> Option<Value> {
        match self {
            Resolution::Resolved(v) => Some(v),
            Resolution::Unresolved(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }
}

pub trait Converter: Send + Sync {
    fn from_text(&self, text: &str, context: &ConvertContext<'_>) -> Resolution;

    /// `None` when the value is not of a kind this converter writes
    fn to_text(&self, value: &Value, context: &ConvertContext<'_>) -> Option<String>;
}

pub trait ResolvingConverter: Converter {
    /// Candidate texts for completion
    fn variants(&self, context: &ConvertContext<'_>) -> Vec<String>;

    /// Tree node the text refers to
    fn resolve_target(&self, text: &str, context: &ConvertContext<'_>) -> Option<NodeId>;
}

#[derive(Clone)]
pub enum ConverterRef {
    Plain(Arc<dyn Converter>),
    Resolving(Arc<dyn ResolvingConverter>),
    /// Text names another element; resolved by the engine through handles
    ElementReference(TypeKey),
}

impl fmt::Debug for ConverterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConverterRef::Plain(_) => f.write_str("Plain"),
            ConverterRef::Resolving(_) => f.write_str("Resolving"),
            ConverterRef::ElementReference(key) => write!(f, "ElementReference({})", key),
        }
    }
}

fn unresolved(text: &str, expected: &'static str) -> Resolution {
    let owned = text.to_string();
    Resolution::Unresolved(Unresolved::new(text, move || format!("Cannot convert '{}' to {}", owned, expected)))
}

pub struct StringConverter;

impl Converter for StringConverter {
    fn from_text(&self, text: &str, _: &ConvertContext<'_>) -> Resolution {
        Resolution::Resolved(Value::String(text.to_string()))
    }

    fn to_text(&self, value: &Value, _: &ConvertContext<'_>) -> Option<String> {
        value.as_str().map(str::to_string)
    }
}

pub struct BooleanConverter;

impl Converter for BooleanConverter {
    fn from_text(&self, text: &str, _: &ConvertContext<'_>) -> Resolution {
        match text.trim() {
            "true" => Resolution::Resolved(Value::Boolean(true)),
            "false" => Resolution::Resolved(Value::Boolean(false)),
            _ => unresolved(text, "a boolean"),
        }
    }

    fn to_text(&self, value: &Value, _: &ConvertContext<'_>) -> Option<String> {
        value.as_bool().map(|b| b.to_string())
    }
}

pub struct IntegerConverter;

impl Converter for IntegerConverter {
    fn from_text(&self, text: &str, _: &ConvertContext<'_>) -> Resolution {
        match text.trim().parse::<i64>() {
            Ok(i) => Resolution::Resolved(Value::Integer(i)),
            Err(_) => unresolved(text, "an integer"),
        }
    }

    fn to_text(&self, value: &Value, _: &ConvertContext<'_>) -> Option<String> {
        value.as_integer().map(|i| i.to_string())
    }
}

pub struct EnumConverter(pub EnumType);

impl Converter for EnumConverter {
    fn from_text(&self, text: &str, _: &ConvertContext<'_>) -> Resolution {
        let trimmed = text.trim();
        if self.0.contains(trimmed) {
            return Resolution::Resolved(Value::Enum(trimmed.to_string()));
        }
        let owned = text.to_string();
        let enum_type = self.0.clone();
        Resolution::Unresolved(Unresolved::new(text, move || {
            format!(
                "'{}' is not one of {}: {}",
                owned,
                enum_type.name(),
                enum_type.variants().join(", ")
            )
        }))
    }

    fn to_text(&self, value: &Value, _: &ConvertContext<'_>) -> Option<String> {
        match value {
            Value::Enum(s) | Value::String(s) if self.0.contains(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl ResolvingConverter for EnumConverter {
    fn variants(&self, _: &ConvertContext<'_>) -> Vec<String> {
        self.0.variants().to_vec()
    }

    fn resolve_target(&self, _: &str, _: &ConvertContext<'_>) -> Option<NodeId> {
        None
    }
}

/// Resolves text to the tag in the same file whose `attribute` has that value
pub struct IdReferenceConverter {
    attribute: String,
}

impl IdReferenceConverter {
    pub fn new(attribute: &str) -> Self {
        Self {
            attribute: attribute.to_string(),
        }
    }

    fn tags_with_attribute(&self, file: &MarkupFile) -> Vec<(NodeId, String)> {
        let mut result = Vec::new();
        let mut stack: Vec<NodeId> = file.root_tag().into_iter().collect();
        while let Some(tag) = stack.pop() {
            if let Some(value) = file.attribute_value(tag, &self.attribute) {
                result.push((tag, value.to_string()));
            }
            stack.extend(file.sub_tags(tag).into_iter().rev());
        }
        result
    }
}

impl Converter for IdReferenceConverter {
    fn from_text(&self, text: &str, context: &ConvertContext<'_>) -> Resolution {
        if self.resolve_target(text, context).is_some() {
            return Resolution::Resolved(Value::String(text.to_string()));
        }
        let owned = text.to_string();
        let attribute = self.attribute.clone();
        Resolution::Unresolved(Unresolved::new(text, move || {
            format!("No element with {}=\"{}\"", attribute, owned)
        }))
    }

    fn to_text(&self, value: &Value, _: &ConvertContext<'_>) -> Option<String> {
        value.as_str().map(str::to_string)
    }
}

impl ResolvingConverter for IdReferenceConverter {
    fn variants(&self, context: &ConvertContext<'_>) -> Vec<String> {
        self.tags_with_attribute(context.file).into_iter().map(|(_, v)| v).collect()
    }

    fn resolve_target(&self, text: &str, context: &ConvertContext<'_>) -> Option<NodeId> {
        self.tags_with_attribute(context.file)
            .into_iter()
            .find(|(_, value)| value == text)
            .map(|(tag, _)| tag)
    }
}

/// Converters by id and by value type
#[derive(Default)]
pub(crate) struct ConverterRegistry {
    by_id: HashMap<String, ConverterRef>,
    by_type: HashMap<String, ConverterRef>,
}

impl ConverterRegistry {
    pub fn register(&mut self, id: &str, converter: ConverterRef) {
        self.by_id.insert(id.to_string(), converter);
    }

    pub fn register_for_type(&mut self, value_type: &ValueType, converter: ConverterRef) {
        self.by_type.insert(value_type.registry_key(), converter);
    }

    pub fn lookup(&self, value_type: &ValueType, override_id: Option<&str>) -> Result<ConverterRef, ConfigError> {
        if let Some(id) = override_id {
            return self
                .by_id
                .get(id)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownConverter(id.to_string()));
        }
        if let Some(converter) = self.by_type.get(&value_type.registry_key()) {
            return Ok(converter.clone());
        }
        structural_default(value_type)
    }
}

fn structural_default(value_type: &ValueType) -> Result<ConverterRef, ConfigError> {
    Ok(match value_type {
        ValueType::String => ConverterRef::Plain(Arc::new(StringConverter)),
        ValueType::Boolean => ConverterRef::Plain(Arc::new(BooleanConverter)),
        ValueType::Integer => ConverterRef::Plain(Arc::new(IntegerConverter)),
        ValueType::Enum(e) => ConverterRef::Resolving(Arc::new(EnumConverter(e.clone()))),
        ValueType::Element(key) => ConverterRef::ElementReference(key.clone()),
        ValueType::Custom(name) => return Err(ConfigError::NoConverter(name.clone())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_context<R>(value_type: &ValueType, f: impl FnOnce(&ConvertContext<'_>) -> R) -> R {
        let file = MarkupFile::parse("/c.xml", r#"<root><item id="a"/><item id="b"/></root>"#).unwrap();
        let context = ConvertContext {
            file: &file,
            node: None,
            value_type,
        };
        f(&context)
    }

    #[test]
    fn test_boolean_round_trip() {
        with_context(&ValueType::Boolean, |context| {
            for b in [true, false] {
                let text = BooleanConverter.to_text(&Value::Boolean(b), context).unwrap();
                let back = BooleanConverter.from_text(&text, context).value();
                assert_eq!(back, Some(Value::Boolean(b)));
            }
            let bad = BooleanConverter.from_text("yes", context);
            match bad {
                Resolution::Unresolved(u) => assert!(u.message().contains("yes")),
                Resolution::Resolved(v) => panic!("resolved {:?}", v),
            }
        });
    }

    #[test]
    fn test_integer_round_trip() {
        with_context(&ValueType::Integer, |context| {
            let text = IntegerConverter.to_text(&Value::Integer(-42), context).unwrap();
            assert_eq!(IntegerConverter.from_text(&text, context).value(), Some(Value::Integer(-42)));
            assert!(!IntegerConverter.from_text("4x", context).is_resolved());
            assert_eq!(IntegerConverter.to_text(&Value::Boolean(true), context), None);
        });
    }

    #[test]
    fn test_enum_round_trip() {
        let scope = EnumType::new("Scope", &["compile", "test"]);
        let value_type = ValueType::Enum(scope.clone());
        with_context(&value_type, |context| {
            let converter = EnumConverter(scope);
            let text = converter.to_text(&Value::Enum("test".into()), context).unwrap();
            assert_eq!(converter.from_text(&text, context).value(), Some(Value::Enum("test".into())));
            assert!(!converter.from_text("runtime", context).is_resolved());
            assert_eq!(converter.variants(context), vec!["compile", "test"]);
        });
    }

    #[test]
    fn test_id_reference_resolves_target() {
        with_context(&ValueType::String, |context| {
            let converter = IdReferenceConverter::new("id");
            assert_eq!(converter.variants(context), vec!["a", "b"]);
            let target = converter.resolve_target("b", context).unwrap();
            assert_eq!(context.file.attribute_value(target, "id"), Some("b"));
            assert!(!converter.from_text("c", context).is_resolved());
        });
    }

    #[test]
    fn test_lookup_order() {
        let mut registry = ConverterRegistry::default();
        let custom = ValueType::Custom("Version".into());
        assert_eq!(
            registry.lookup(&custom, None).unwrap_err(),
            ConfigError::NoConverter("Version".into())
        );

        registry.register_for_type(&custom, ConverterRef::Plain(Arc::new(StringConverter)));
        assert!(matches!(registry.lookup(&custom, None), Ok(ConverterRef::Plain(_))));

        registry.register("ids", ConverterRef::Resolving(Arc::new(IdReferenceConverter::new("id"))));
        assert!(matches!(registry.lookup(&custom, Some("ids")), Ok(ConverterRef::Resolving(_))));
        assert!(registry.lookup(&custom, Some("missing")).is_err());
        assert!(matches!(
            registry.lookup(&ValueType::Element(TypeKey::new("Module")), None),
            Ok(ConverterRef::ElementReference(_))
        ));
    }
}
