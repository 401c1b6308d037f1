//! # Writes
//!
//! Tree edits made on behalf of typed handles. The primitives here assume
//! the caller holds the change guard; the `*_guarded` entry points take it,
//! drain the tree journal of the engine's own edits and record one change
//! for the logical write.
//!
//! New tags are placed in schema order: after the last sibling whose
//! description comes no later than theirs, else before the first sibling of
//! a later description, else appended.

use crate::description::{ChildDescription, DescriptionKind};
use crate::error::{DomError, DomResult};
use crate::events::DomEventKind;
use crate::handler::HandlerKind;
use crate::name::{EvaluatedXmlName, XmlName};
use crate::state::{DomState, ElementRef};
use crate::strategy::ParentStrategy;
use crate::value::Value;
use markbind_tree::{FileId, NodeId};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Where a new tag goes among its parent's children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Insertion {
    Before(NodeId),
    After(NodeId),
    SchemaOrder,
}

impl DomState {
    /// Run `f` under the change guard, dropping the journal of its edits
    pub fn guarded<R>(&mut self, file: FileId, f: impl FnOnce(&mut Self) -> DomResult<R>) -> DomResult<R> {
        self.changes.guard.enter()?;
        let result = f(self);
        if let Ok(fs) = self.file_state_mut(file) {
            fs.file.drain_changes();
        }
        self.changes.guard.exit();
        result
    }

    /// Element a change to `r` is reported on
    fn change_target(&self, r: ElementRef) -> DomResult<ElementRef> {
        let record = self.record(r)?;
        Ok(match (record.kind, record.parent) {
            (HandlerKind::Attribute, Some(parent)) => r.with(parent),
            _ => r,
        })
    }

    /// Make sure the tag (or attribute) of `r` exists, creating missing
    /// ancestors on the way
    pub fn ensure_tag(&mut self, r: ElementRef) -> DomResult<NodeId> {
        self.ensure_tree(r.file)?;
        if let Some(node) = self.xml_node(r)? {
            return Ok(node);
        }
        let record = self.record(r)?;
        if let Some(reason) = &record.invalid {
            return Err(self.invalid_error(r, reason.clone()));
        }
        let (kind, parent, description, name, ordinal) = (
            record.kind,
            record.parent,
            record.description.clone(),
            record.name.clone(),
            record.ordinal,
        );

        let node = match (kind, parent, description) {
            (HandlerKind::Root, _, _) => {
                let fs = self.file_state_mut(r.file)?;
                let tag_name = name.tag_name_for_creation(&fs.file, None, &fs.policies());
                let tag = fs.file.create_root_tag(&tag_name)?;
                debug!("Created root tag <{}> in {}", tag_name, fs.file.path());
                return Ok(tag);
            }
            (HandlerKind::Attribute, Some(parent), Some(_)) => {
                let owner = self.ensure_tag(r.with(parent))?;
                let fs = self.file_state_mut(r.file)?;
                let attribute_name = name.tag_name_for_creation(&fs.file, Some(owner), &fs.policies());
                fs.file
                    .set_attribute(owner, &attribute_name, Some(""))?
                    .ok_or_else(|| DomError::InvariantViolation(format!("attribute {} was not created", attribute_name)))?
            }
            (HandlerKind::Element, Some(parent), Some(description)) if description.kind() == DescriptionKind::Fixed => {
                let owner = self.ensure_tag(r.with(parent))?;
                let existing = self.matching_children(r.with(parent), &description)?;
                let mut last = existing.last().and_then(ParentStrategy::physical_node);
                let mut created = None;
                for _ in existing.len()..=ordinal {
                    let insertion = match last {
                        Some(anchor) => Insertion::After(anchor),
                        None => Insertion::SchemaOrder,
                    };
                    let tag = self.create_tag(r.with(parent), owner, &description, &name, insertion)?;
                    last = Some(tag);
                    created = Some(tag);
                }
                created.ok_or_else(|| self.invalid_error(r, "its fixed instance exists but is not bound"))?
            }
            _ => return Err(self.invalid_error(r, "its tag was removed and cannot be recreated")),
        };

        self.bind(r, ParentStrategy::Physical(node))?;
        Ok(node)
    }

    /// Create a tag for `description` under the tag `owner` of `parent`
    fn create_tag(
        &mut self,
        parent: ElementRef,
        owner: NodeId,
        description: &Arc<ChildDescription>,
        name: &EvaluatedXmlName,
        insertion: Insertion,
    ) -> DomResult<NodeId> {
        let insertion = match insertion {
            Insertion::SchemaOrder => self.schema_insertion(parent, owner, description)?,
            other => other,
        };
        let fs = self.file_state_mut(parent.file)?;
        let tag_name = name.tag_name_for_creation(&fs.file, Some(owner), &fs.policies());
        let tag = match insertion {
            Insertion::Before(anchor) => fs.file.add_before(anchor, &tag_name)?,
            Insertion::After(anchor) => fs.file.add_after(anchor, &tag_name)?,
            Insertion::SchemaOrder => fs.file.add_child(owner, &tag_name)?,
        };
        trace!("Created <{}> ({:?})", tag_name, insertion);
        Ok(tag)
    }

    fn schema_insertion(&mut self, parent: ElementRef, owner: NodeId, description: &ChildDescription) -> DomResult<Insertion> {
        let order = self.dynamic_info(parent)?.descriptions();
        let Some(position) = order.iter().position(|d| d.key() == description.key()) else {
            return Ok(Insertion::SchemaOrder);
        };

        let siblings = self.file_state(parent.file)?.file.sub_tags(owner);
        let mut after = None;
        let mut before = None;
        for sibling in siblings {
            let Some(sibling_description) = self.find_children_description(parent, sibling)? else {
                continue;
            };
            let Some(index) = order.iter().position(|d| d.key() == sibling_description.key()) else {
                continue;
            };
            if index <= position {
                after = Some(sibling);
            } else if before.is_none() {
                before = Some(sibling);
            }
        }
        Ok(match (after, before) {
            (Some(anchor), _) => Insertion::After(anchor),
            (None, Some(anchor)) => Insertion::Before(anchor),
            (None, None) => Insertion::SchemaOrder,
        })
    }

    /// Handle of the child of `parent` backed by `node`
    pub fn handle_for_node(&mut self, parent: ElementRef, description: &Arc<ChildDescription>, node: NodeId) -> DomResult<ElementRef> {
        let bindings = self.matching_children(parent, description)?;
        let ordinal = bindings
            .iter()
            .position(|b| b.physical_node() == Some(node))
            .ok_or_else(|| DomError::InvariantViolation(format!("new tag does not match {}", description.key())))?;
        self.child_handler(parent, description, ordinal, Some(ParentStrategy::Physical(node)))
    }

    /// Write raw text. `None` removes an attribute or clears a tag's text but
    /// never creates a tag. Returns whether the tree was edited.
    pub fn write_string(&mut self, r: ElementRef, value: Option<&str>) -> DomResult<bool> {
        let current = self.string_value(r)?;
        if current.as_deref() == value {
            return Ok(false);
        }
        let kind = self.record(r)?.kind;

        match (kind, value) {
            (HandlerKind::Attribute, Some(text)) => {
                let node = self.ensure_tag(r)?;
                let fs = self.file_state_mut(r.file)?;
                let (Some(owner), Some(name)) = (fs.file.parent(node), fs.file.name(node).map(str::to_string)) else {
                    return Err(self.invalid_error(r, "its attribute has no owner"));
                };
                fs.file.set_attribute(owner, &name, Some(text))?;
            }
            (HandlerKind::Attribute, None) => {
                if let Some(node) = self.xml_node(r)? {
                    self.file_state_mut(r.file)?.file.delete(node)?;
                    self.unbind(r)?;
                }
            }
            (_, Some(text)) => {
                let node = self.ensure_tag(r)?;
                self.file_state_mut(r.file)?.file.set_text_value(node, text)?;
            }
            (_, None) => {
                if current.as_deref().map_or(true, str::is_empty) {
                    return Ok(false);
                }
                self.ensure_tree(r.file)?;
                let Some(node) = self.xml_node(r)? else {
                    return Ok(false);
                };
                self.file_state_mut(r.file)?.file.set_text_value(node, "")?;
            }
        }
        Ok(true)
    }

    /// Add a child for `description`, at `index` among its siblings of that
    /// description when given, after the last of them otherwise
    pub fn insert_child(
        &mut self,
        parent: ElementRef,
        description: &Arc<ChildDescription>,
        index: Option<usize>,
    ) -> DomResult<ElementRef> {
        let owner = self.ensure_tag(parent)?;
        let existing: Vec<NodeId> = self
            .matching_children(parent, description)?
            .iter()
            .filter_map(ParentStrategy::physical_node)
            .collect();
        let insertion = insertion_among(&existing, index, "add")?;
        let name = self.child_name(parent, description)?;
        let node = self.create_tag(parent, owner, description, &name, insertion)?;
        self.handle_for_node(parent, description, node)
    }

    /// Add a child for `tag` among the merged children of `descriptions`
    pub fn insert_composite_child(
        &mut self,
        parent: ElementRef,
        descriptions: &[Arc<ChildDescription>],
        tag: &Arc<ChildDescription>,
        index: Option<usize>,
    ) -> DomResult<ElementRef> {
        let owner = self.ensure_tag(parent)?;
        let mut existing = Vec::new();
        for child in self.composite_children(parent, descriptions)? {
            existing.extend(self.xml_node(child)?);
        }
        let insertion = insertion_among(&existing, index, "add")?;
        let name = self.child_name(parent, tag)?;
        let node = self.create_tag(parent, owner, tag, &name, insertion)?;
        self.handle_for_node(parent, tag, node)
    }

    /// Add a child by name: a new collection entry, or the first missing
    /// instance of a fixed child
    pub fn insert_named_child(&mut self, parent: ElementRef, name: &XmlName) -> DomResult<ElementRef> {
        let description = self
            .dynamic_info(parent)?
            .holder()
            .find(name)
            .cloned()
            .ok_or_else(|| DomError::invalid_argument("add_child_named", format!("no child named {}", name)))?;
        match description.kind() {
            DescriptionKind::Collection => self.insert_child(parent, &description, None),
            DescriptionKind::Fixed => {
                for child in self.children_of(parent, &description)? {
                    if !self.exists(child)? {
                        self.ensure_tag(child)?;
                        return Ok(child);
                    }
                }
                Err(DomError::invalid_argument(
                    "add_child_named",
                    format!("every instance of {} already exists", name),
                ))
            }
            _ => Err(DomError::invalid_argument("add_child_named", format!("{} is not a child tag", name))),
        }
    }

    /// Remove the node of `r`. Attributes and fixed children fall back to
    /// virtual handles; other handles become invalid.
    pub fn undefine(&mut self, r: ElementRef) -> DomResult<bool> {
        self.ensure_tree(r.file)?;
        let Some(node) = self.xml_node(r)? else {
            return Ok(false);
        };
        self.file_state_mut(r.file)?.file.delete(node)?;

        let record = self.record(r)?;
        let keeps_handle = record.kind == HandlerKind::Root
            || record.description.as_ref().is_some_and(|d| d.is_always_present());
        if keeps_handle {
            if record.kind != HandlerKind::Root {
                self.unbind(r)?;
            }
        } else {
            self.invalidate(r, "it was undefined")?;
        }
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Guarded entry points
    // ---------------------------------------------------------------------

    /// Outcome of a guarded setter. Refused tree edits are logged and the
    /// write becomes a no-op.
    fn settle<R>(&mut self, r: ElementRef, operation: &str, result: DomResult<R>, refused: R) -> DomResult<R> {
        match result {
            Err(DomError::Tree(e)) => {
                warn!("{} of {} refused: {}", operation, self.debug_path(r), e);
                Ok(refused)
            }
            other => other,
        }
    }

    pub fn set_string_guarded(&mut self, r: ElementRef, value: Option<&str>) -> DomResult<()> {
        self.check_access(r)?;
        let result = self.guarded(r.file, |state| state.write_string(r, value));
        if self.settle(r, "set_string_value", result, false)? {
            let target = self.change_target(r)?;
            self.record_change(target, DomEventKind::ValueChanged);
        }
        Ok(())
    }

    pub fn set_value_guarded(&mut self, r: ElementRef, value: Option<&Value>) -> DomResult<()> {
        self.check_access(r)?;
        let text = value.map(|v| self.format_value(r, v)).transpose()?;
        self.set_string_guarded(r, text.as_deref())
    }

    pub fn ensure_tag_guarded(&mut self, r: ElementRef) -> DomResult<Option<NodeId>> {
        self.check_access(r)?;
        let existed = self.exists(r)?;
        let result = self.guarded(r.file, |state| state.ensure_tag(r).map(Some));
        let node = self.settle(r, "ensure_tag_exists", result, None)?;
        if node.is_some() && !existed {
            let target = self.record(r)?.parent.map_or(r, |parent| r.with(parent));
            self.record_change(target, DomEventKind::Structural);
        }
        Ok(node)
    }

    pub fn undefine_guarded(&mut self, r: ElementRef) -> DomResult<()> {
        self.check_access(r)?;
        let target = self.record(r)?.parent.map_or(r, |parent| r.with(parent));
        let result = self.guarded(r.file, |state| state.undefine(r));
        if self.settle(r, "undefine", result, false)? {
            self.record_change(target, DomEventKind::Structural);
        }
        Ok(())
    }

    /// Adders report refused edits as errors; there is no handle to return
    pub fn add_guarded(
        &mut self,
        parent: ElementRef,
        add: impl FnOnce(&mut Self) -> DomResult<ElementRef>,
    ) -> DomResult<ElementRef> {
        self.check_access(parent)?;
        let child = self.guarded(parent.file, add)?;
        self.record_change(parent, DomEventKind::Structural);
        Ok(child)
    }
}

fn insertion_among(existing: &[NodeId], index: Option<usize>, operation: &str) -> DomResult<Insertion> {
    match index {
        Some(i) if i > existing.len() => Err(DomError::invalid_argument(
            operation,
            format!("index {} is out of bounds for {} children", i, existing.len()),
        )),
        Some(i) if i < existing.len() => Ok(Insertion::Before(existing[i])),
        _ => Ok(existing.last().copied().map_or(Insertion::SchemaOrder, Insertion::After)),
    }
}
