//! Value reads and conversion
//!
//! Raw text comes from an attribute or a tag's own text, answered from the
//! stub when the tree is not loaded. Typed values go through the converter
//! chosen for the accessor.

use crate::converter::{ConvertContext, ConverterRef, Resolution, Unresolved};
use crate::declaration::TypeKey;
use crate::description::{ChildDescription, DescriptionKind};
use crate::element::DomElement;
use crate::error::{DomError, DomResult};
use crate::handler::HandlerKind;
use crate::schema::OperationKind;
use crate::state::{DomState, ElementRef, Source};
use crate::strategy::ParentStrategy;
use crate::stub_index;
use crate::value::{Value, ValueType};
use markbind_tree::{FileId, NodeId};
use std::sync::Arc;

impl DomState {
    /// Raw text of an attribute or tag; `None` when there is no node
    pub fn string_value(&mut self, r: ElementRef) -> DomResult<Option<String>> {
        self.refresh(r)?;
        if self.record(r)?.kind == HandlerKind::Attribute {
            return self.attribute_text(r);
        }
        match self.source(r)? {
            Source::Tree(node) => Ok(self.file_state(r.file)?.file.text_value(node)),
            Source::Stub(stub) => {
                let text = self
                    .file_state(r.file)?
                    .file
                    .stub()
                    .and_then(|s| stub_index::text(s, stub));
                match text {
                    Some(text) => Ok(text),
                    None => {
                        self.ensure_tree(r.file)?;
                        self.string_value(r)
                    }
                }
            }
            Source::Missing => Ok(None),
        }
    }

    fn attribute_text(&mut self, r: ElementRef) -> DomResult<Option<String>> {
        let record = self.record(r)?;
        let (strategy, name) = (record.strategy, record.name.clone());
        let fs = self.file_state(r.file)?;
        Ok(match strategy {
            ParentStrategy::Physical(node) => fs.file.text_value(node),
            ParentStrategy::Stub(owner) => {
                let policies = fs.policies();
                fs.file
                    .stub()
                    .and_then(|s| stub_index::find_attribute(s, owner, &name, &policies))
                    .map(|a| a.value.clone())
            }
            _ => None,
        })
    }

    /// Value type and converter override of an attribute or tag value
    pub fn value_type_of(&mut self, r: ElementRef) -> DomResult<(ValueType, Option<String>)> {
        let record = self.record(r)?;
        if let Some(ChildDescription::Attribute(attribute)) = record.description.as_deref() {
            return Ok((attribute.value_type.clone(), attribute.converter.clone()));
        }
        let type_key = record
            .type_key
            .clone()
            .ok_or_else(|| DomError::InvariantViolation(format!("{} has no type", self.debug_path(r))))?;
        let info = self.types.static_info(&type_key)?;
        Ok((info.value_type().clone(), info.value_converter().map(str::to_string)))
    }

    fn converter_of(&mut self, r: ElementRef) -> DomResult<(ValueType, ConverterRef)> {
        let (value_type, override_id) = self.value_type_of(r)?;
        let converter = self.converters.lookup(&value_type, override_id.as_deref())?;
        Ok((value_type, converter))
    }

    /// Convert the current text; `None` when there is no node
    pub fn resolve_value(&mut self, r: ElementRef) -> DomResult<Option<Resolution>> {
        let (value_type, override_id) = self.value_type_of(r)?;
        self.resolve_value_as(r, &value_type, override_id.as_deref())
    }

    /// Convert the current text as an explicitly given value type
    pub fn resolve_value_as(&mut self, r: ElementRef, value_type: &ValueType, override_id: Option<&str>) -> DomResult<Option<Resolution>> {
        let Some(text) = self.string_value(r)? else {
            return Ok(None);
        };
        let converter = self.converters.lookup(value_type, override_id)?;
        let value_type = value_type.clone();
        let resolution = match converter {
            ConverterRef::Plain(converter) => {
                let node = self.xml_node(r)?;
                let file = &self.file_state(r.file)?.file;
                converter.from_text(&text, &ConvertContext { file, node, value_type: &value_type })
            }
            ConverterRef::Resolving(converter) => {
                self.ensure_tree(r.file)?;
                let node = self.xml_node(r)?;
                let file = &self.file_state(r.file)?.file;
                converter.from_text(&text, &ConvertContext { file, node, value_type: &value_type })
            }
            ConverterRef::ElementReference(target) => self.resolve_element_reference(r.file, &target, &text)?,
        };
        Ok(Some(resolution))
    }

    pub fn read_value(&mut self, r: ElementRef) -> DomResult<Option<Value>> {
        Ok(self.resolve_value(r)?.and_then(Resolution::value))
    }

    /// Text a value is written as
    pub fn format_value(&mut self, r: ElementRef, value: &Value) -> DomResult<String> {
        let (value_type, override_id) = self.value_type_of(r)?;
        self.format_value_as(r, value, &value_type, override_id.as_deref())
    }

    pub fn format_value_as(
        &mut self,
        r: ElementRef,
        value: &Value,
        value_type: &ValueType,
        override_id: Option<&str>,
    ) -> DomResult<String> {
        let converter = self.converters.lookup(value_type, override_id)?;
        let value_type = value_type.clone();
        let text = match converter {
            ConverterRef::Plain(converter) => {
                let file = &self.file_state(r.file)?.file;
                converter.to_text(value, &ConvertContext { file, node: None, value_type: &value_type })
            }
            ConverterRef::Resolving(converter) => {
                let file = &self.file_state(r.file)?.file;
                converter.to_text(value, &ConvertContext { file, node: None, value_type: &value_type })
            }
            ConverterRef::ElementReference(_) => match value {
                Value::Element(element) => {
                    if !self.owns(element) {
                        return Err(DomError::ForeignElement);
                    }
                    self.presentable_name(element.reference())?
                }
                Value::String(name) => Some(name.clone()),
                _ => None,
            },
        };
        text.ok_or_else(|| {
            DomError::invalid_argument("set_value", format!("a {} value cannot be written as {}", value.kind_name(), value_type))
        })
    }

    /// Completion candidates for the current value
    pub fn value_variants(&mut self, r: ElementRef) -> DomResult<Vec<String>> {
        let (value_type, converter) = self.converter_of(r)?;
        match converter {
            ConverterRef::Plain(_) => Ok(Vec::new()),
            ConverterRef::Resolving(converter) => {
                self.ensure_tree(r.file)?;
                let file = &self.file_state(r.file)?.file;
                Ok(converter.variants(&ConvertContext { file, node: None, value_type: &value_type }))
            }
            ConverterRef::ElementReference(target) => {
                let mut names = Vec::new();
                for element in self.elements_of_type(r.file, &target)? {
                    names.extend(self.presentable_name(element)?);
                }
                Ok(names)
            }
        }
    }

    /// Tree node the current value refers to
    pub fn resolve_target(&mut self, r: ElementRef) -> DomResult<Option<NodeId>> {
        let Some(text) = self.string_value(r)? else {
            return Ok(None);
        };
        let (value_type, converter) = self.converter_of(r)?;
        match converter {
            ConverterRef::Plain(_) => Ok(None),
            ConverterRef::Resolving(converter) => {
                self.ensure_tree(r.file)?;
                let node = self.xml_node(r)?;
                let file = &self.file_state(r.file)?.file;
                Ok(converter.resolve_target(&text, &ConvertContext { file, node, value_type: &value_type }))
            }
            ConverterRef::ElementReference(target) => {
                match self.find_named_element(r.file, &target, &text)? {
                    Some(element) => {
                        self.ensure_tree(r.file)?;
                        self.xml_node(element)
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Text of the type's name accessor
    pub fn presentable_name(&mut self, r: ElementRef) -> DomResult<Option<String>> {
        let Some(type_key) = self.record(r)?.type_key.clone() else {
            return self.string_value(r);
        };
        let info = self.types.static_info(&type_key)?;
        let Some(operation) = info.name_operation().and_then(|name| info.operation(name)).cloned() else {
            return Ok(None);
        };
        match operation {
            OperationKind::GetValue { .. } => self.string_value(r),
            OperationKind::GetAttribute { description } => {
                let attribute = self.child_at(r, &description, 0)?;
                self.string_value(attribute)
            }
            OperationKind::GetFixed { description, index } => {
                let child = self.child_at(r, &description, index)?;
                self.string_value(child)
            }
            _ => Ok(None),
        }
    }

    /// Existing elements of a file whose type is usable as `target`, in
    /// document order
    pub fn elements_of_type(&mut self, file: FileId, target: &TypeKey) -> DomResult<Vec<ElementRef>> {
        let Some(root) = self.file_root(file)? else {
            return Ok(Vec::new());
        };
        let mut result = Vec::new();
        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            let record = self.record(current)?;
            let Some(type_key) = record.type_key.clone() else { continue };
            if self.types.is_assignable(&type_key, target) {
                result.push(current);
            }

            let mut children = Vec::new();
            for description in self.dynamic_info(current)?.descriptions() {
                if description.kind() == DescriptionKind::Attribute {
                    continue;
                }
                for child in self.children_of(current, &description)? {
                    if self.exists(child)? {
                        children.push(child);
                    }
                }
            }
            stack.extend(children.into_iter().rev());
        }
        Ok(result)
    }

    fn find_named_element(&mut self, file: FileId, target: &TypeKey, name: &str) -> DomResult<Option<ElementRef>> {
        for element in self.elements_of_type(file, target)? {
            if self.presentable_name(element)?.as_deref() == Some(name) {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }

    fn resolve_element_reference(&mut self, file: FileId, target: &TypeKey, text: &str) -> DomResult<Resolution> {
        match self.find_named_element(file, target, text)? {
            Some(element) => Ok(Resolution::Resolved(Value::Element(self.wrap(element)?))),
            None => {
                let owned = text.to_string();
                let target = target.clone();
                Ok(Resolution::Unresolved(Unresolved::new(text, move || {
                    format!("No {} named '{}'", target, owned)
                })))
            }
        }
    }

    /// Whether an element belongs to this engine
    pub fn owns(&self, element: &DomElement) -> bool {
        std::ptr::eq(self.shared.as_ptr(), Arc::as_ptr(element.shared()))
    }
}
