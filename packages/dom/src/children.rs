//! Child enumeration and handler reuse
//!
//! Children are listed from whatever backs the parent: its tree node when
//! the tree is loaded, its stub element otherwise. Each match is paired with
//! a handler record, reusing the record that already owns the node or the
//! logical path before creating a new one.

use crate::description::{ChildDescription, CustomMatcher, DescriptionKind, TagInfo};
use crate::dynamic::{DynamicGenericInfo, ExtensionContext};
use crate::error::{DomError, DomResult};
use crate::handler::{ChildKey, HandlerKind, HandlerRecord};
use crate::name::{EvaluatedXmlName, NameFacts, NamespacePolicies};
use crate::state::{DomState, ElementRef, Source};
use crate::strategy::ParentStrategy;
use crate::stub_index;
use markbind_tree::{MarkupFile, NodeId};
use std::sync::Arc;
use tracing::trace;

fn node_facts(file: &MarkupFile, node: NodeId) -> Option<NameFacts<'_>> {
    Some(NameFacts {
        qualified_name: file.name(node)?,
        namespace: None,
    })
}

/// Tags a custom description must leave alone: those named by the parent's
/// other descriptions and those matched by custom descriptions registered
/// before it.
#[derive(Default)]
pub(crate) struct Claims {
    pub names: Vec<EvaluatedXmlName>,
    pub preceding: Vec<CustomMatcher>,
}

impl Claims {
    pub fn owns(&self, tag: &TagInfo, named: impl Fn(&EvaluatedXmlName) -> bool) -> bool {
        self.names.iter().any(named) || self.preceding.iter().any(|m| m.matches(tag))
    }
}

/// Tree children of `parent` matching a description, in document order
fn tree_matching(
    file: &MarkupFile,
    parent: NodeId,
    description: &ChildDescription,
    name: &EvaluatedXmlName,
    claims: &Claims,
    policies: &NamespacePolicies,
) -> Vec<ParentStrategy> {
    let suitable = |evaluated: &EvaluatedXmlName, node: NodeId| {
        let namespace = file.namespace(node);
        node_facts(file, node).is_some_and(|facts| {
            evaluated.is_name_suitable(
                NameFacts {
                    namespace: namespace.as_deref(),
                    ..facts
                },
                policies,
            )
        })
    };

    match description {
        ChildDescription::Attribute(_) => file
            .attributes(parent)
            .iter()
            .copied()
            .find(|a| suitable(name, *a))
            .map(ParentStrategy::Physical)
            .into_iter()
            .collect(),
        ChildDescription::Custom(custom) => file
            .sub_tags(parent)
            .into_iter()
            .filter(|tag| {
                let info = TagInfo::from_tree(file, *tag);
                !claims.owns(&info, |c| suitable(c, *tag)) && custom.matcher.matches(&info)
            })
            .map(ParentStrategy::Physical)
            .collect(),
        ChildDescription::Fixed(_) | ChildDescription::Collection(_) => file
            .sub_tags(parent)
            .into_iter()
            .filter(|tag| suitable(name, *tag))
            .map(ParentStrategy::Physical)
            .collect(),
    }
}

impl DomState {
    /// Name a child of `parent` is matched and created under
    pub fn child_name(&self, parent: ElementRef, description: &ChildDescription) -> DomResult<EvaluatedXmlName> {
        let parent_name = &self.record(parent)?.name;
        Ok(match description {
            ChildDescription::Attribute(d) => EvaluatedXmlName::evaluate_attribute(&d.name),
            ChildDescription::Fixed(d) => parent_name.evaluate_child(&d.name),
            ChildDescription::Collection(d) => parent_name.evaluate_child(&d.name),
            ChildDescription::Custom(_) => parent_name.clone(),
        })
    }

    /// Facts about the tag backing `r`, from the tree or the stub
    pub fn tag_info(&mut self, r: ElementRef) -> DomResult<Option<TagInfo>> {
        let source = self.source(r)?;
        let file = &self.file_state(r.file)?.file;
        Ok(match source {
            Source::Tree(node) if file.is_tag(node) => Some(TagInfo::from_tree(file, node)),
            Source::Stub(stub) => file.stub().and_then(|s| s.element(stub)).map(TagInfo::from_stub),
            _ => None,
        })
    }

    /// Static schema of `r` plus whatever extenders contribute for it
    pub fn dynamic_info(&mut self, r: ElementRef) -> DomResult<Arc<DynamicGenericInfo>> {
        let modification_count = self.file_state(r.file)?.file.modification_count();
        let record = self.record(r)?;
        if let Some(dynamic) = record.dynamic.as_ref().filter(|d| d.stamp() == modification_count) {
            return Ok(dynamic.clone());
        }
        let type_key = record
            .type_key
            .clone()
            .ok_or_else(|| DomError::invalid_argument("children", "attributes have no children"))?;

        let info = self.types.static_info(&type_key)?;
        let extenders = self.types.extenders_for(&type_key);
        let dynamic = if extenders.is_empty() {
            DynamicGenericInfo::unextended(&info, modification_count)
        } else {
            let context = ExtensionContext {
                type_key: type_key.clone(),
                tag: self.tag_info(r)?,
                file_path: self.file_state(r.file)?.file.path().to_string(),
            };
            DynamicGenericInfo::extend(&info, &context, &extenders, modification_count)
        };

        let dynamic = Arc::new(dynamic);
        self.record_mut(r)?.dynamic = Some(dynamic.clone());
        Ok(dynamic)
    }

    /// Backings of the children of `parent` that match `description`
    pub fn matching_children(&mut self, parent: ElementRef, description: &ChildDescription) -> DomResult<Vec<ParentStrategy>> {
        let name = self.child_name(parent, description)?;
        let claims = if description.kind() == DescriptionKind::Custom {
            let dynamic = self.dynamic_info(parent)?;
            let names = dynamic
                .holder()
                .named()
                .iter()
                .filter(|d| d.kind() != DescriptionKind::Attribute)
                .map(|d| self.child_name(parent, d))
                .collect::<DomResult<Vec<_>>>()?;
            let key = description.key();
            let preceding = dynamic
                .holder()
                .custom()
                .iter()
                .take_while(|d| d.key() != key)
                .filter_map(|d| match d.as_ref() {
                    ChildDescription::Custom(c) => Some(c.matcher.clone()),
                    _ => None,
                })
                .collect();
            Claims { names, preceding }
        } else {
            Claims::default()
        };

        let source = self.source(parent)?;
        let fs = self.file_state(parent.file)?;
        let policies = fs.policies();
        Ok(match source {
            Source::Tree(node) => tree_matching(&fs.file, node, description, &name, &claims, &policies),
            Source::Stub(stub) => match fs.file.stub() {
                Some(file_stub) => stub_index::matching_children(file_stub, stub, description, &name, &claims, &policies),
                None => Vec::new(),
            },
            Source::Missing => Vec::new(),
        })
    }

    /// Handles of the children of `parent` for one description. Fixed
    /// descriptions always yield `count` handles and attributes one, virtual
    /// where no node exists.
    pub fn children_of(&mut self, parent: ElementRef, description: &Arc<ChildDescription>) -> DomResult<Vec<ElementRef>> {
        let bindings = self.matching_children(parent, description)?;
        match description.as_ref() {
            ChildDescription::Fixed(fixed) => (0..fixed.count)
                .map(|i| self.child_handler(parent, description, i, bindings.get(i).copied()))
                .collect(),
            ChildDescription::Attribute(_) => Ok(vec![self.child_handler(parent, description, 0, bindings.first().copied())?]),
            ChildDescription::Collection(_) | ChildDescription::Custom(_) => bindings
                .into_iter()
                .enumerate()
                .map(|(i, binding)| self.child_handler(parent, description, i, Some(binding)))
                .collect(),
        }
    }

    /// One child handle at a known position
    pub fn child_at(&mut self, parent: ElementRef, description: &Arc<ChildDescription>, ordinal: usize) -> DomResult<ElementRef> {
        let bindings = self.matching_children(parent, description)?;
        self.child_handler(parent, description, ordinal, bindings.get(ordinal).copied())
    }

    /// Find or create the record for a child. The record owning the node is
    /// preferred, then the record at the same logical path.
    pub fn child_handler(
        &mut self,
        parent: ElementRef,
        description: &Arc<ChildDescription>,
        ordinal: usize,
        binding: Option<ParentStrategy>,
    ) -> DomResult<ElementRef> {
        let binding = binding.unwrap_or(ParentStrategy::Virtual);
        let key = description.key();
        let fs = self.file_state_mut(parent.file)?;

        if let ParentStrategy::Physical(node) = binding {
            if let Some(owner) = fs.slot_handler(node) {
                let reusable = fs.handlers.get(owner).is_some_and(|record| {
                    record.invalid.is_none()
                        && record.parent == Some(parent.handler)
                        && record.description_key().as_ref() == Some(&key)
                });
                if reusable {
                    if fs.handlers.get(owner).map(|r| r.ordinal) != Some(ordinal) {
                        fs.handlers.set_ordinal(owner, ordinal);
                    }
                    let r = parent.with(owner);
                    self.bind(r, binding)?;
                    return Ok(r);
                }
            }
        }

        let child_key = ChildKey {
            parent: parent.handler,
            description: key,
            ordinal,
        };
        if let Some(existing) = fs.handlers.by_path(&child_key) {
            let reusable = fs.handlers.get(existing).is_some_and(|record| {
                let bound_elsewhere = match record.strategy {
                    ParentStrategy::Physical(node) => fs.file.is_valid(node) && binding.physical_node() != Some(node),
                    _ => false,
                };
                record.invalid.is_none() && !bound_elsewhere
            });
            if reusable {
                let r = parent.with(existing);
                self.bind(r, binding)?;
                return Ok(r);
            }
        }

        let name = self.child_name(parent, description)?;
        let fs = self.file_state_mut(parent.file)?;
        let stamp = fs.stamp();
        let kind = match description.kind() {
            DescriptionKind::Attribute => HandlerKind::Attribute,
            _ => HandlerKind::Element,
        };
        let handler = fs.handlers.insert(HandlerRecord {
            kind,
            type_key: description.element_type().cloned(),
            parent: Some(parent.handler),
            description: Some(description.clone()),
            name,
            ordinal,
            strategy: binding,
            stamp,
            invalid: None,
            dynamic: None,
        });
        trace!("New handler {} for {} at {}", handler.index(), child_key.description, binding);

        let r = parent.with(handler);
        self.bind(r, binding)?;
        Ok(r)
    }

    /// Description of `parent` that a tree node under it falls under
    pub fn find_children_description(&mut self, parent: ElementRef, node: NodeId) -> DomResult<Option<Arc<ChildDescription>>> {
        let dynamic = self.dynamic_info(parent)?;
        let fs = self.file_state(parent.file)?;
        let file = &fs.file;
        let policies = fs.policies();
        let Some(facts) = node_facts(file, node) else {
            return Ok(None);
        };
        let namespace = file.namespace(node);
        let facts = NameFacts {
            namespace: namespace.as_deref(),
            ..facts
        };
        let is_attribute = file.is_attribute(node);
        let tag_info = (!is_attribute).then(|| TagInfo::from_tree(file, node));

        for description in dynamic.holder().named() {
            if (description.kind() == DescriptionKind::Attribute) != is_attribute {
                continue;
            }
            if self.child_name(parent, &description)?.is_name_suitable(facts, &policies) {
                return Ok(Some(description));
            }
        }
        let Some(tag_info) = tag_info else {
            return Ok(None);
        };
        Ok(dynamic
            .holder()
            .custom()
            .into_iter()
            .find(|d| matches!(d.as_ref(), ChildDescription::Custom(c) if c.matcher.matches(&tag_info))))
    }

    /// Children of several descriptions merged in document order
    pub fn composite_children(&mut self, parent: ElementRef, descriptions: &[Arc<ChildDescription>]) -> DomResult<Vec<ElementRef>> {
        let mut children = Vec::new();
        for description in descriptions {
            children.extend(self.children_of(parent, description)?);
        }

        let source = self.source(parent)?;
        let fs = self.file_state(parent.file)?;
        let position = |r: &ElementRef| -> usize {
            let strategy = fs.handlers.get(r.handler).map(|record| record.strategy);
            match (source, strategy) {
                (Source::Tree(node), Some(ParentStrategy::Physical(child))) => {
                    fs.file.children(node).iter().position(|c| *c == child)
                }
                (Source::Stub(stub), Some(ParentStrategy::Stub(child))) => fs
                    .file
                    .stub()
                    .and_then(|s| s.children(stub).iter().position(|c| *c == child)),
                _ => None,
            }
            .unwrap_or(usize::MAX)
        };
        children.sort_by_key(position);
        Ok(children)
    }
}
