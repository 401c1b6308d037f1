//! # Dispatch
//!
//! A call on a handle is routed in two steps. Universal operations shared by
//! every handle are looked up in a fixed table. Anything else is a declared
//! operation: its behavior object is built from the schema on first use and
//! cached per (type, operation), so later calls skip the schema entirely.

use crate::declaration::TypeKey;
use crate::description::ChildDescription;
use crate::element::DomElement;
use crate::error::{ConfigError, DomError, DomResult};
use crate::name::XmlName;
use crate::schema::{OperationKind, TypeRegistry};
use crate::state::{DomState, ElementRef};
use crate::value::{Value, ValueType};
use markbind_tree::NodeId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Result of a dynamically dispatched call
#[derive(Debug, Clone)]
pub enum InvocationResult {
    Unit,
    Bool(bool),
    Text(Option<String>),
    Value(Option<Value>),
    Element(DomElement),
    OptionalElement(Option<DomElement>),
    Elements(Vec<DomElement>),
    Node(Option<NodeId>),
    Descriptions(Vec<Arc<ChildDescription>>),
}

impl InvocationResult {
    pub fn into_value(self) -> DomResult<Option<Value>> {
        match self {
            InvocationResult::Value(value) => Ok(value),
            _ => Err(DomError::UnexpectedResult { expected: "a value" }),
        }
    }

    pub fn into_element(self) -> DomResult<DomElement> {
        match self {
            InvocationResult::Element(element) => Ok(element),
            _ => Err(DomError::UnexpectedResult { expected: "an element" }),
        }
    }

    pub fn into_optional_element(self) -> DomResult<Option<DomElement>> {
        match self {
            InvocationResult::OptionalElement(element) => Ok(element),
            InvocationResult::Element(element) => Ok(Some(element)),
            _ => Err(DomError::UnexpectedResult { expected: "an optional element" }),
        }
    }

    pub fn into_elements(self) -> DomResult<Vec<DomElement>> {
        match self {
            InvocationResult::Elements(elements) => Ok(elements),
            _ => Err(DomError::UnexpectedResult { expected: "a list of elements" }),
        }
    }

    pub fn into_bool(self) -> DomResult<bool> {
        match self {
            InvocationResult::Bool(b) => Ok(b),
            _ => Err(DomError::UnexpectedResult { expected: "a boolean" }),
        }
    }

    pub fn into_text(self) -> DomResult<Option<String>> {
        match self {
            InvocationResult::Text(text) => Ok(text),
            _ => Err(DomError::UnexpectedResult { expected: "text" }),
        }
    }

    pub fn into_node(self) -> DomResult<Option<NodeId>> {
        match self {
            InvocationResult::Node(node) => Ok(node),
            _ => Err(DomError::UnexpectedResult { expected: "a tree node" }),
        }
    }
}

/// Behavior implementing one declared operation
pub(crate) trait Invocation: Send + Sync {
    fn invoke(&self, state: &mut DomState, element: ElementRef, args: &[Value]) -> DomResult<InvocationResult>;
}

fn optional_index(operation: &str, args: &[Value]) -> DomResult<Option<usize>> {
    match args.first() {
        None => Ok(None),
        Some(Value::Integer(i)) => usize::try_from(*i)
            .map(Some)
            .map_err(|_| DomError::invalid_argument(operation, format!("negative index {}", i))),
        Some(other) => Err(DomError::invalid_argument(
            operation,
            format!("expected an index, got {}", other.kind_name()),
        )),
    }
}

struct GetValueInvocation {
    value_type: ValueType,
    converter: Option<String>,
}

impl Invocation for GetValueInvocation {
    fn invoke(&self, state: &mut DomState, element: ElementRef, _: &[Value]) -> DomResult<InvocationResult> {
        state.check_access(element)?;
        let resolution = state.resolve_value_as(element, &self.value_type, self.converter.as_deref())?;
        Ok(InvocationResult::Value(resolution.and_then(|r| r.value())))
    }
}

struct SetValueInvocation {
    value_type: ValueType,
    converter: Option<String>,
}

impl Invocation for SetValueInvocation {
    fn invoke(&self, state: &mut DomState, element: ElementRef, args: &[Value]) -> DomResult<InvocationResult> {
        let text = match args.first() {
            Some(value) => Some(state.format_value_as(element, value, &self.value_type, self.converter.as_deref())?),
            None => None,
        };
        state.set_string_guarded(element, text.as_deref())?;
        Ok(InvocationResult::Unit)
    }
}

struct GetChildInvocation {
    description: Arc<ChildDescription>,
    index: usize,
}

impl Invocation for GetChildInvocation {
    fn invoke(&self, state: &mut DomState, element: ElementRef, _: &[Value]) -> DomResult<InvocationResult> {
        state.check_access(element)?;
        let child = state.child_at(element, &self.description, self.index)?;
        Ok(InvocationResult::Element(state.wrap(child)?))
    }
}

struct GetChildrenInvocation {
    description: Arc<ChildDescription>,
}

impl Invocation for GetChildrenInvocation {
    fn invoke(&self, state: &mut DomState, element: ElementRef, _: &[Value]) -> DomResult<InvocationResult> {
        state.check_access(element)?;
        let children = state.children_of(element, &self.description)?;
        Ok(InvocationResult::Elements(state.wrap_all(children)?))
    }
}

struct AddChildInvocation {
    description: Arc<ChildDescription>,
    indexed: bool,
}

impl Invocation for AddChildInvocation {
    fn invoke(&self, state: &mut DomState, element: ElementRef, args: &[Value]) -> DomResult<InvocationResult> {
        let index = if self.indexed { optional_index("add", args)? } else { None };
        let description = self.description.clone();
        let child = state.add_guarded(element, |s| s.insert_child(element, &description, index))?;
        Ok(InvocationResult::Element(state.wrap(child)?))
    }
}

struct GetCompositeInvocation {
    descriptions: Vec<Arc<ChildDescription>>,
}

impl Invocation for GetCompositeInvocation {
    fn invoke(&self, state: &mut DomState, element: ElementRef, _: &[Value]) -> DomResult<InvocationResult> {
        state.check_access(element)?;
        let children = state.composite_children(element, &self.descriptions)?;
        Ok(InvocationResult::Elements(state.wrap_all(children)?))
    }
}

struct AddCompositeInvocation {
    descriptions: Vec<Arc<ChildDescription>>,
    tag: Arc<ChildDescription>,
}

impl Invocation for AddCompositeInvocation {
    fn invoke(&self, state: &mut DomState, element: ElementRef, args: &[Value]) -> DomResult<InvocationResult> {
        let index = optional_index("add", args)?;
        let child = state.add_guarded(element, |s| {
            s.insert_composite_child(element, &self.descriptions, &self.tag, index)
        })?;
        Ok(InvocationResult::Element(state.wrap(child)?))
    }
}

/// Behavior object for a classified operation
pub(crate) fn create_invocation(kind: &OperationKind) -> Arc<dyn Invocation> {
    match kind.clone() {
        OperationKind::GetValue { value_type, converter } => Arc::new(GetValueInvocation { value_type, converter }),
        OperationKind::SetValue { value_type, converter } => Arc::new(SetValueInvocation { value_type, converter }),
        OperationKind::GetAttribute { description } => Arc::new(GetChildInvocation { description, index: 0 }),
        OperationKind::GetFixed { description, index } => Arc::new(GetChildInvocation { description, index }),
        OperationKind::GetCollection { description } | OperationKind::GetCustom { description } => {
            Arc::new(GetChildrenInvocation { description })
        }
        OperationKind::AddCollection { description, indexed } => Arc::new(AddChildInvocation { description, indexed }),
        OperationKind::GetComposite { descriptions } => Arc::new(GetCompositeInvocation { descriptions }),
        OperationKind::AddComposite { descriptions, tag } => Arc::new(AddCompositeInvocation { descriptions, tag }),
    }
}

/// Behaviors per declared type, keyed by operation name
#[derive(Default)]
pub(crate) struct InvocationCaches {
    by_type: HashMap<TypeKey, HashMap<String, Arc<dyn Invocation>>>,
}

impl InvocationCaches {
    pub fn get_or_create(
        &mut self,
        types: &mut TypeRegistry,
        type_key: &TypeKey,
        operation: &str,
    ) -> Result<Arc<dyn Invocation>, ConfigError> {
        if let Some(invocation) = self.by_type.get(type_key).and_then(|ops| ops.get(operation)) {
            return Ok(invocation.clone());
        }
        let info = types.static_info(type_key)?;
        let kind = info.operation(operation).ok_or_else(|| ConfigError::UnsupportedOperation {
            type_name: type_key.to_string(),
            operation: operation.to_string(),
            reason: "no such operation is declared".to_string(),
        })?;
        trace!("Resolved {}::{} as {}", type_key, operation, kind.label());

        let invocation = create_invocation(kind);
        self.by_type
            .entry(type_key.clone())
            .or_default()
            .insert(operation.to_string(), invocation.clone());
        Ok(invocation)
    }

    pub fn clear(&mut self) {
        self.by_type.clear();
    }
}

/// Operations every handle supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniversalOp {
    IsValid,
    CheckValidity,
    Parent,
    XmlTag,
    Exists,
    StringValue,
    SetStringValue,
    Value,
    SetValue,
    Undefine,
    EnsureTagExists,
    ChildrenNamed,
    AddChildNamed,
    ChildrenDescriptions,
    StaticChildrenDescriptions,
    PresentableName,
    DebugPath,
}

impl UniversalOp {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "is_valid" => UniversalOp::IsValid,
            "check_validity" => UniversalOp::CheckValidity,
            "parent" => UniversalOp::Parent,
            "xml_tag" => UniversalOp::XmlTag,
            "exists" => UniversalOp::Exists,
            "string_value" => UniversalOp::StringValue,
            "set_string_value" => UniversalOp::SetStringValue,
            "value" => UniversalOp::Value,
            "set_value" => UniversalOp::SetValue,
            "undefine" => UniversalOp::Undefine,
            "ensure_tag_exists" => UniversalOp::EnsureTagExists,
            "children_named" => UniversalOp::ChildrenNamed,
            "add_child_named" => UniversalOp::AddChildNamed,
            "children_descriptions" => UniversalOp::ChildrenDescriptions,
            "static_children_descriptions" => UniversalOp::StaticChildrenDescriptions,
            "presentable_name" => UniversalOp::PresentableName,
            "debug_path" => UniversalOp::DebugPath,
            _ => return None,
        })
    }
}

fn name_argument(operation: &str, args: &[Value]) -> DomResult<XmlName> {
    args.first()
        .and_then(Value::as_str)
        .map(XmlName::from)
        .ok_or_else(|| DomError::invalid_argument(operation, "expected a child name"))
}

impl DomState {
    /// Dispatch an operation by name
    pub fn invoke(&mut self, r: ElementRef, operation: &str, args: &[Value]) -> DomResult<InvocationResult> {
        if let Some(universal) = UniversalOp::from_name(operation) {
            return self.invoke_universal(r, universal, args);
        }
        let type_key = self.record(r)?.type_key.clone().ok_or_else(|| ConfigError::UnsupportedOperation {
            type_name: "attribute".to_string(),
            operation: operation.to_string(),
            reason: "attribute handles only support universal operations".to_string(),
        })?;
        let invocation = self.invocations.get_or_create(&mut self.types, &type_key, operation)?;
        invocation.invoke(self, r, args)
    }

    pub fn invoke_universal(&mut self, r: ElementRef, operation: UniversalOp, args: &[Value]) -> DomResult<InvocationResult> {
        Ok(match operation {
            UniversalOp::IsValid => InvocationResult::Bool(self.check_validity(r)?.is_none()),
            UniversalOp::CheckValidity => InvocationResult::Text(self.check_validity(r)?),
            UniversalOp::Parent => {
                let parent = self.record(r)?.parent.map(|p| self.wrap(r.with(p))).transpose()?;
                InvocationResult::OptionalElement(parent)
            }
            UniversalOp::XmlTag => {
                self.check_access(r)?;
                self.ensure_tree(r.file)?;
                InvocationResult::Node(self.xml_node(r)?)
            }
            UniversalOp::Exists => InvocationResult::Bool(self.exists(r)?),
            UniversalOp::StringValue => {
                self.check_access(r)?;
                InvocationResult::Text(self.string_value(r)?)
            }
            UniversalOp::SetStringValue => {
                let text = match args.first() {
                    None => None,
                    Some(value) => Some(
                        value
                            .as_str()
                            .ok_or_else(|| DomError::invalid_argument("set_string_value", "expected text"))?
                            .to_string(),
                    ),
                };
                self.set_string_guarded(r, text.as_deref())?;
                InvocationResult::Unit
            }
            UniversalOp::Value => {
                self.check_access(r)?;
                InvocationResult::Value(self.read_value(r)?)
            }
            UniversalOp::SetValue => {
                self.set_value_guarded(r, args.first())?;
                InvocationResult::Unit
            }
            UniversalOp::Undefine => {
                self.undefine_guarded(r)?;
                InvocationResult::Unit
            }
            UniversalOp::EnsureTagExists => InvocationResult::Node(self.ensure_tag_guarded(r)?),
            UniversalOp::ChildrenNamed => {
                self.check_access(r)?;
                let name = name_argument("children_named", args)?;
                let description = self.dynamic_info(r)?.holder().find(&name).cloned();
                let children = match description {
                    Some(description) => self.children_of(r, &description)?,
                    None => Vec::new(),
                };
                InvocationResult::Elements(self.wrap_all(children)?)
            }
            UniversalOp::AddChildNamed => {
                let name = name_argument("add_child_named", args)?;
                let child = self.add_guarded(r, |s| s.insert_named_child(r, &name))?;
                InvocationResult::Element(self.wrap(child)?)
            }
            UniversalOp::ChildrenDescriptions => InvocationResult::Descriptions(self.dynamic_info(r)?.descriptions()),
            UniversalOp::StaticChildrenDescriptions => {
                let type_key = self
                    .record(r)?
                    .type_key
                    .clone()
                    .ok_or_else(|| DomError::invalid_argument("static_children_descriptions", "attributes have no children"))?;
                InvocationResult::Descriptions(self.types.static_info(&type_key)?.descriptions())
            }
            UniversalOp::PresentableName => {
                self.check_access(r)?;
                InvocationResult::Text(self.presentable_name(r)?)
            }
            UniversalOp::DebugPath => InvocationResult::Text(Some(self.debug_path(r))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::TypeDeclaration;

    #[test]
    fn test_invocations_are_cached_per_type() {
        let mut types = TypeRegistry::default();
        types.register(
            TypeDeclaration::builder("Module")
                .attribute("get_id", "id", ValueType::String)
                .build(),
        );
        let mut caches = InvocationCaches::default();
        let key = TypeKey::new("Module");

        let first = caches.get_or_create(&mut types, &key, "get_id").unwrap();
        let second = caches.get_or_create(&mut types, &key, "get_id").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_unknown_operation_is_a_config_error() {
        let mut types = TypeRegistry::default();
        types.register(TypeDeclaration::builder("Empty").build());
        let mut caches = InvocationCaches::default();

        let error = caches
            .get_or_create(&mut types, &TypeKey::new("Empty"), "get_missing")
            .err()
            .unwrap();
        assert!(matches!(error, ConfigError::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_universal_table() {
        assert_eq!(UniversalOp::from_name("ensure_tag_exists"), Some(UniversalOp::EnsureTagExists));
        assert_eq!(UniversalOp::from_name("get_id"), None);
    }

    #[test]
    fn test_optional_index() {
        assert_eq!(optional_index("add", &[]).unwrap(), None);
        assert_eq!(optional_index("add", &[Value::Integer(2)]).unwrap(), Some(2));
        assert!(optional_index("add", &[Value::Integer(-1)]).is_err());
        assert!(optional_index("add", &[Value::from("x")]).is_err());
    }
}
