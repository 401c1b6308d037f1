//! Typed handle surface

use crate::converter::Resolution;
use crate::copy::CancellationSignal;
use crate::declaration::TypeKey;
use crate::description::ChildDescription;
use crate::error::{DomError, DomResult};
use crate::handler::HandlerKind;
use crate::interface::DomInterface;
use crate::invocation::{InvocationResult, UniversalOp};
use crate::manager::{run, DomManager, Shared};
use crate::state::{DomState, ElementRef};
use crate::value::Value;
use markbind_tree::{FileId, NodeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::Arc;

/// Handle on a logical element: a tag, an attribute or a file root.
///
/// Equality is logical. Two handles are equal when they reach the same
/// place through the same parent, description and position, even if the
/// tag behind them was replaced by a reparse.
#[derive(Clone)]
pub struct DomElement {
    shared: Arc<Shared>,
    reference: ElementRef,
}

impl DomElement {
    pub(crate) fn new(shared: Arc<Shared>, reference: ElementRef) -> Self {
        Self { shared, reference }
    }

    pub(crate) fn reference(&self) -> ElementRef {
        self.reference
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    fn run<R>(&self, f: impl FnOnce(&mut DomState, ElementRef) -> DomResult<R>) -> DomResult<R> {
        let reference = self.reference;
        run(&self.shared, |state| f(state, reference))
    }

    fn universal(&self, operation: UniversalOp, args: &[Value]) -> DomResult<InvocationResult> {
        self.run(|state, r| state.invoke_universal(r, operation, args))
    }

    pub fn manager(&self) -> DomManager {
        DomManager::from_shared(self.shared.clone())
    }

    pub fn file_id(&self) -> FileId {
        self.reference.file
    }

    /// Dispatch a declared or universal operation by name
    pub fn invoke(&self, operation: &str, args: &[Value]) -> DomResult<InvocationResult> {
        self.run(|state, r| state.invoke(r, operation, args))
    }

    pub fn type_key(&self) -> DomResult<Option<TypeKey>> {
        self.run(|state, r| Ok(state.record(r)?.type_key.clone()))
    }

    pub fn is_attribute(&self) -> bool {
        self.run(|state, r| Ok(state.record(r)?.kind == HandlerKind::Attribute))
            .unwrap_or(false)
    }

    pub fn is_valid(&self) -> bool {
        self.check_validity().is_none()
    }

    /// `None` when valid, otherwise why not
    pub fn check_validity(&self) -> Option<String> {
        match self.universal(UniversalOp::CheckValidity, &[]).and_then(InvocationResult::into_text) {
            Ok(reason) => reason,
            Err(e) => Some(e.to_string()),
        }
    }

    pub fn parent(&self) -> DomResult<Option<DomElement>> {
        self.universal(UniversalOp::Parent, &[])?.into_optional_element()
    }

    /// The backing tag or attribute node, loading the tree if needed
    pub fn xml_tag(&self) -> DomResult<Option<NodeId>> {
        self.universal(UniversalOp::XmlTag, &[])?.into_node()
    }

    pub fn exists(&self) -> DomResult<bool> {
        self.universal(UniversalOp::Exists, &[])?.into_bool()
    }

    pub fn string_value(&self) -> DomResult<Option<String>> {
        self.universal(UniversalOp::StringValue, &[])?.into_text()
    }

    pub fn set_string_value(&self, value: Option<&str>) -> DomResult<()> {
        let args: Vec<Value> = value.map(Value::from).into_iter().collect();
        self.universal(UniversalOp::SetStringValue, &args).map(|_| ())
    }

    pub fn value(&self) -> DomResult<Option<Value>> {
        self.universal(UniversalOp::Value, &[])?.into_value()
    }

    pub fn set_value(&self, value: Option<Value>) -> DomResult<()> {
        let args: Vec<Value> = value.into_iter().collect();
        self.universal(UniversalOp::SetValue, &args).map(|_| ())
    }

    /// Conversion outcome of the current text, including failures
    pub fn resolve_value(&self) -> DomResult<Option<Resolution>> {
        self.run(|state, r| {
            state.check_access(r)?;
            state.resolve_value(r)
        })
    }

    /// Completion candidates offered by the value's converter
    pub fn value_variants(&self) -> DomResult<Vec<String>> {
        self.run(|state, r| {
            state.check_access(r)?;
            state.value_variants(r)
        })
    }

    /// Tree node the value refers to, for resolving converters
    pub fn resolve_target(&self) -> DomResult<Option<NodeId>> {
        self.run(|state, r| {
            state.check_access(r)?;
            state.resolve_target(r)
        })
    }

    pub fn undefine(&self) -> DomResult<()> {
        self.universal(UniversalOp::Undefine, &[]).map(|_| ())
    }

    pub fn ensure_tag_exists(&self) -> DomResult<Option<NodeId>> {
        self.universal(UniversalOp::EnsureTagExists, &[])?.into_node()
    }

    pub fn children_named(&self, name: &str) -> DomResult<Vec<DomElement>> {
        self.universal(UniversalOp::ChildrenNamed, &[Value::from(name)])?.into_elements()
    }

    pub fn add_child_named(&self, name: &str) -> DomResult<DomElement> {
        self.universal(UniversalOp::AddChildNamed, &[Value::from(name)])?.into_element()
    }

    /// Static and dynamically contributed child descriptions
    pub fn children_descriptions(&self) -> DomResult<Vec<Arc<ChildDescription>>> {
        match self.universal(UniversalOp::ChildrenDescriptions, &[])? {
            InvocationResult::Descriptions(descriptions) => Ok(descriptions),
            _ => Err(DomError::UnexpectedResult { expected: "descriptions" }),
        }
    }

    pub fn static_children_descriptions(&self) -> DomResult<Vec<Arc<ChildDescription>>> {
        match self.universal(UniversalOp::StaticChildrenDescriptions, &[])? {
            InvocationResult::Descriptions(descriptions) => Ok(descriptions),
            _ => Err(DomError::UnexpectedResult { expected: "descriptions" }),
        }
    }

    pub fn presentable_name(&self) -> DomResult<Option<String>> {
        self.universal(UniversalOp::PresentableName, &[])?.into_text()
    }

    /// Path for diagnostics, e.g. `Project/module[1]@id`
    pub fn debug_path(&self) -> String {
        self.run(|state, r| Ok(state.debug_path(r)))
            .unwrap_or_else(|e| format!("<{}>", e))
    }

    /// Source range of the backing node as last parsed
    pub fn text_range(&self) -> DomResult<Option<Range<usize>>> {
        self.run(|state, r| {
            let node = state.xml_node(r)?;
            let file = &state.file_state(r.file)?.file;
            Ok(node.and_then(|n| file.text_range(n)))
        })
    }

    /// Replace this element's content with a deep copy of `source`. The copy
    /// is one atomic change; when `cancel` fires it is rolled back.
    pub fn copy_from(&self, source: &DomElement, cancel: &dyn CancellationSignal) -> DomResult<()> {
        if !Arc::ptr_eq(&self.shared, &source.shared) {
            return Err(DomError::ForeignElement);
        }
        let source = source.reference;
        self.run(|state, r| state.copy_from(r, source, cancel))
    }

    /// Logical equality, reporting a broken engine invariant as an error
    pub fn try_eq(&self, other: &DomElement) -> DomResult<bool> {
        if !Arc::ptr_eq(&self.shared, &other.shared) {
            return Ok(false);
        }
        let other = other.reference;
        self.run(|state, r| state.logical_eq(r, other))
    }

    /// View this element through a typed interface
    pub fn cast<T: DomInterface>(&self) -> DomResult<T> {
        let target = T::type_key();
        let assignable = self.run(|state, r| {
            let actual = state.record(r)?.type_key.clone();
            Ok(actual.is_some_and(|actual| state.types.is_assignable(&actual, &target)))
        })?;
        if assignable {
            Ok(T::wrap(self.clone()))
        } else {
            Err(DomError::UnexpectedResult { expected: T::TYPE_NAME })
        }
    }
}

impl PartialEq for DomElement {
    fn eq(&self, other: &Self) -> bool {
        match self.try_eq(other) {
            Ok(equal) => equal,
            Err(DomError::InvariantViolation(message)) => panic!("{}", message),
            Err(_) => false,
        }
    }
}

impl Eq for DomElement {}

/// Hashes the logical path, so handles that compare equal hash alike
impl Hash for DomElement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.reference.file.hash(state);
        self.reference.generation.hash(state);
        if let Ok(steps) = self.run(|state, r| state.path_steps(r)) {
            steps.hash(state);
        }
    }
}

impl fmt::Debug for DomElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomElement")
            .field("file", &self.reference.file)
            .field("handler", &self.reference.handler.index())
            .finish()
    }
}
