//! # Markup Tree
//!
//! Arena-backed tree of tags, attributes and text for a single file.
//!
//! ## Node lifecycle
//!
//! ```text
//! Alive ──delete──→ Deleted
//!   │
//!   └──reparse──→ Replaced (a fresh node now stands in the same place)
//! ```
//!
//! Node ids are never reused, so a stale id can always be told apart from a
//! live one. Every structural or value edit advances the file's modification
//! counter and appends a [`TreeChange`] to the journal, which observers drain.

use crate::error::{ParseResult, TreeError, TreeResult};
use crate::id_generator::{get_file_id, FileId};
use crate::parser::Parser;
use crate::stub::FileStub;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

/// Index of a node inside its file's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Liveness of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    /// Removed by an edit
    Deleted,
    /// Superseded by an equivalent node from a reparse
    Replaced,
}

/// Node payload
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Tag {
        name: String,
        attributes: Vec<NodeId>,
        children: Vec<NodeId>,
    },
    Attribute {
        name: String,
        value: String,
    },
    Text {
        value: String,
    },
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    state: NodeState,
    span: Option<Range<usize>>,
    handler_slot: Option<u64>,
}

/// A single edit recorded in the journal
#[derive(Debug, Clone, PartialEq)]
pub enum TreeChange {
    AttributeChanged { tag: NodeId, name: String },
    ChildAdded { parent: Option<NodeId>, child: NodeId },
    ChildRemoved { parent: Option<NodeId>, child: NodeId },
    TextChanged { tag: NodeId },
    Reparsed,
    Restored,
}

/// Saved copy of the arena, used to roll back a canceled multi-step edit
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    nodes: Vec<Node>,
    root: Option<NodeId>,
    journal_len: usize,
}

/// Editable markup file
#[derive(Debug)]
pub struct MarkupFile {
    id: FileId,
    path: String,
    source: String,
    nodes: Vec<Node>,
    root: Option<NodeId>,
    tree_loaded: bool,
    modification_count: u64,
    read_only: bool,
    stub: Option<Arc<FileStub>>,
    journal: Vec<TreeChange>,
}

impl MarkupFile {
    /// Create an empty, loaded file with no root tag
    pub fn empty(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: get_file_id(&path),
            path,
            source: String::new(),
            nodes: Vec::new(),
            root: None,
            tree_loaded: true,
            modification_count: 0,
            read_only: false,
            stub: None,
            journal: Vec::new(),
        }
    }

    /// Parse source into a loaded tree; the stub index is built as a side effect
    pub fn parse(path: impl Into<String>, source: impl Into<String>) -> ParseResult<Self> {
        let mut file = Self::empty(path);
        file.source = source.into();
        file.read_tree()?;
        file.stub = Some(Arc::new(FileStub::build(&file)));
        Ok(file)
    }

    /// Parse source only to build the stub index, leaving the tree unloaded
    pub fn lazy(path: impl Into<String>, source: impl Into<String>) -> ParseResult<Self> {
        let mut file = Self::parse(path, source)?;
        file.nodes.clear();
        file.root = None;
        file.tree_loaded = false;
        Ok(file)
    }

    /// Open a file from a previously persisted stub without reading its tree
    pub fn from_persisted_stub(path: impl Into<String>, source: impl Into<String>, stub: FileStub) -> Self {
        let mut file = Self::empty(path);
        file.source = source.into();
        file.tree_loaded = false;
        file.stub = Some(Arc::new(stub));
        file
    }

    fn read_tree(&mut self) -> ParseResult<()> {
        let source = std::mem::take(&mut self.source);
        let result = Parser::new(&source).and_then(|mut parser| parser.parse_into(self));
        self.source = source;
        let root = result?;
        self.root = root;
        self.tree_loaded = true;
        Ok(())
    }

    /// Materialize the tree of a stub-only file. Loading is not an edit.
    pub fn load_tree(&mut self) -> ParseResult<()> {
        if self.tree_loaded {
            return Ok(());
        }
        tracing::debug!("Loading tree of {}", self.path);
        self.read_tree()
    }

    /// Replace the tree with a fresh parse of `source`. Existing nodes are
    /// marked [`NodeState::Replaced`].
    pub fn reparse(&mut self, source: impl Into<String>) -> ParseResult<()> {
        let source = source.into();
        let mut scratch = Self::empty(self.path.clone());
        scratch.source = source.clone();
        scratch.read_tree()?;

        for node in &mut self.nodes {
            if node.state == NodeState::Alive {
                node.state = NodeState::Replaced;
            }
        }

        let offset = self.nodes.len() as u32;
        let shift = |id: NodeId| NodeId(id.0 + offset);
        for mut node in scratch.nodes {
            node.parent = node.parent.map(shift);
            if let NodeKind::Tag { attributes, children, .. } = &mut node.kind {
                for id in attributes.iter_mut().chain(children.iter_mut()) {
                    *id = shift(*id);
                }
            }
            self.nodes.push(node);
        }

        self.root = scratch.root.map(shift);
        self.source = source;
        self.tree_loaded = true;
        self.stub = Some(Arc::new(FileStub::build(self)));
        self.touch(TreeChange::Reparsed);
        Ok(())
    }

    pub(crate) fn alloc(&mut self, kind: NodeKind, parent: Option<NodeId>, span: Option<Range<usize>>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            parent,
            state: NodeState::Alive,
            span,
            handler_slot: None,
        });
        id
    }

    pub(crate) fn push_attribute_raw(&mut self, tag: NodeId, attribute: NodeId) {
        if let Some(NodeKind::Tag { attributes, .. }) = self.node_mut(tag).map(|n| &mut n.kind) {
            attributes.push(attribute);
        }
    }

    pub(crate) fn push_child_raw(&mut self, tag: NodeId, child: NodeId) {
        if let Some(NodeKind::Tag { children, .. }) = self.node_mut(tag).map(|n| &mut n.kind) {
            children.push(child);
        }
    }

    pub(crate) fn set_span_end(&mut self, id: NodeId, end: usize) {
        if let Some(node) = self.node_mut(id) {
            if let Some(span) = &mut node.span {
                span.end = end;
            }
        }
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Source text of the last parse
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_tree_loaded(&self) -> bool {
        self.tree_loaded
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn modification_count(&self) -> u64 {
        self.modification_count
    }

    pub fn stub(&self) -> Option<&Arc<FileStub>> {
        self.stub.as_ref()
    }

    pub fn root_tag(&self) -> Option<NodeId> {
        self.root.filter(|id| self.is_valid(*id))
    }

    pub fn state(&self, id: NodeId) -> NodeState {
        self.node(id).map(|n| n.state).unwrap_or(NodeState::Deleted)
    }

    pub fn is_valid(&self, id: NodeId) -> bool {
        self.state(id) == NodeState::Alive
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).map(|n| &n.kind)
    }

    pub fn is_tag(&self, id: NodeId) -> bool {
        matches!(self.kind(id), Some(NodeKind::Tag { .. }))
    }

    pub fn is_attribute(&self, id: NodeId) -> bool {
        matches!(self.kind(id), Some(NodeKind::Attribute { .. }))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Qualified name of a tag or attribute, e.g. `x:item`
    pub fn name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Tag { name, .. } | NodeKind::Attribute { name, .. } => Some(name),
            NodeKind::Text { .. } => None,
        }
    }

    pub fn local_name(&self, id: NodeId) -> Option<&str> {
        self.name(id).map(|name| split_name(name).1)
    }

    pub fn prefix(&self, id: NodeId) -> Option<&str> {
        self.name(id).and_then(|name| split_name(name).0)
    }

    /// Namespace URI of a tag or attribute. Prefixes and the default
    /// namespace are inherited from ancestors; unprefixed attributes have none.
    pub fn namespace(&self, id: NodeId) -> Option<String> {
        match self.kind(id)? {
            NodeKind::Tag { .. } => self.namespace_for_prefix(id, self.prefix(id)),
            NodeKind::Attribute { .. } => {
                let prefix = self.prefix(id)?;
                self.namespace_for_prefix(self.parent(id)?, Some(prefix))
            }
            NodeKind::Text { .. } => None,
        }
    }

    /// Look up the namespace bound to `prefix` in scope at `tag`
    pub fn namespace_for_prefix(&self, tag: NodeId, prefix: Option<&str>) -> Option<String> {
        if prefix == Some("xml") {
            return Some("http://www.w3.org/XML/1998/namespace".to_string());
        }
        let declaration = match prefix {
            Some(prefix) => format!("xmlns:{}", prefix),
            None => "xmlns".to_string(),
        };

        let mut current = Some(tag);
        while let Some(id) = current {
            if let Some(value) = self.attribute_value(id, &declaration) {
                return if value.is_empty() { None } else { Some(value.to_string()) };
            }
            current = self.parent(id);
        }
        None
    }

    pub fn attributes(&self, tag: NodeId) -> &[NodeId] {
        match self.kind(tag) {
            Some(NodeKind::Tag { attributes, .. }) => attributes,
            _ => &[],
        }
    }

    /// Attribute node by qualified name
    pub fn attribute(&self, tag: NodeId, name: &str) -> Option<NodeId> {
        self.attributes(tag)
            .iter()
            .copied()
            .find(|id| self.name(*id) == Some(name))
    }

    pub fn attribute_value(&self, tag: NodeId, name: &str) -> Option<&str> {
        let attribute = self.attribute(tag, name)?;
        match self.kind(attribute)? {
            NodeKind::Attribute { value, .. } => Some(value),
            _ => None,
        }
    }

    /// All content children (tags and text) in document order
    pub fn children(&self, tag: NodeId) -> &[NodeId] {
        match self.kind(tag) {
            Some(NodeKind::Tag { children, .. }) => children,
            _ => &[],
        }
    }

    /// Child tags in document order
    pub fn sub_tags(&self, tag: NodeId) -> Vec<NodeId> {
        self.children(tag)
            .iter()
            .copied()
            .filter(|id| self.is_tag(*id))
            .collect()
    }

    /// Trimmed text of a tag's direct text children, or the value of an
    /// attribute or text node
    pub fn text_value(&self, id: NodeId) -> Option<String> {
        match self.kind(id)? {
            NodeKind::Tag { children, .. } => {
                let mut text = String::new();
                for child in children {
                    if let Some(NodeKind::Text { value }) = self.kind(*child) {
                        text.push_str(value);
                    }
                }
                Some(text.trim().to_string())
            }
            NodeKind::Attribute { value, .. } | NodeKind::Text { value } => Some(value.clone()),
        }
    }

    /// Source range of a node read by the last parse. Nodes created by edits
    /// have no precise range.
    pub fn text_range(&self, id: NodeId) -> Option<Range<usize>> {
        self.node(id).filter(|n| n.state == NodeState::Alive).and_then(|n| n.span.clone())
    }

    /// Ancestors from the parent up to the root tag
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            result.push(parent);
            current = self.parent(parent);
        }
        result
    }

    pub fn handler_slot(&self, id: NodeId) -> Option<u64> {
        self.node(id).and_then(|n| n.handler_slot)
    }

    /// Cache slot for the engine. Writing it is not an edit.
    pub fn set_handler_slot(&mut self, id: NodeId, slot: Option<u64>) {
        if let Some(node) = self.node_mut(id) {
            node.handler_slot = slot;
        }
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    fn check_writable(&self) -> TreeResult<()> {
        if self.read_only {
            return Err(TreeError::ReadOnly { path: self.path.clone() });
        }
        if !self.tree_loaded {
            return Err(TreeError::TreeNotLoaded { path: self.path.clone() });
        }
        Ok(())
    }

    fn check_tag(&self, id: NodeId) -> TreeResult<()> {
        if !self.is_valid(id) {
            return Err(TreeError::InvalidNode(id));
        }
        if !self.is_tag(id) {
            return Err(TreeError::NotATag(id));
        }
        Ok(())
    }

    fn check_name(name: &str) -> TreeResult<()> {
        let valid = name
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false)
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'));
        if valid {
            Ok(())
        } else {
            Err(TreeError::InvalidName(name.to_string()))
        }
    }

    fn touch(&mut self, change: TreeChange) {
        self.modification_count += 1;
        self.journal.push(change);
    }

    /// Set, replace or (with `None`) remove an attribute. Returns the attribute node.
    pub fn set_attribute(&mut self, tag: NodeId, name: &str, value: Option<&str>) -> TreeResult<Option<NodeId>> {
        self.check_writable()?;
        self.check_tag(tag)?;

        let existing = self.attribute(tag, name);
        match (existing, value) {
            (Some(attribute), Some(new_value)) => {
                if let Some(NodeKind::Attribute { value, .. }) = self.node_mut(attribute).map(|n| &mut n.kind) {
                    *value = new_value.to_string();
                }
                self.touch(TreeChange::AttributeChanged { tag, name: name.to_string() });
                Ok(Some(attribute))
            }
            (Some(attribute), None) => {
                self.detach(attribute);
                self.mark_deleted(attribute);
                self.touch(TreeChange::AttributeChanged { tag, name: name.to_string() });
                Ok(None)
            }
            (None, Some(new_value)) => {
                Self::check_name(name)?;
                let attribute = self.alloc(
                    NodeKind::Attribute {
                        name: name.to_string(),
                        value: new_value.to_string(),
                    },
                    Some(tag),
                    None,
                );
                self.push_attribute_raw(tag, attribute);
                self.touch(TreeChange::AttributeChanged { tag, name: name.to_string() });
                Ok(Some(attribute))
            }
            (None, None) => Ok(None),
        }
    }

    /// Create the root tag of an empty file
    pub fn create_root_tag(&mut self, name: &str) -> TreeResult<NodeId> {
        self.check_writable()?;
        Self::check_name(name)?;
        if self.root_tag().is_some() {
            return Err(TreeError::RootExists);
        }
        let tag = self.new_tag(name, None);
        self.root = Some(tag);
        self.touch(TreeChange::ChildAdded { parent: None, child: tag });
        Ok(tag)
    }

    fn new_tag(&mut self, name: &str, parent: Option<NodeId>) -> NodeId {
        self.alloc(
            NodeKind::Tag {
                name: name.to_string(),
                attributes: Vec::new(),
                children: Vec::new(),
            },
            parent,
            None,
        )
    }

    /// Append a new child tag
    pub fn add_child(&mut self, parent: NodeId, name: &str) -> TreeResult<NodeId> {
        self.check_writable()?;
        self.check_tag(parent)?;
        Self::check_name(name)?;
        let tag = self.new_tag(name, Some(parent));
        self.push_child_raw(parent, tag);
        self.touch(TreeChange::ChildAdded { parent: Some(parent), child: tag });
        Ok(tag)
    }

    /// Insert a new tag immediately before `anchor`
    pub fn add_before(&mut self, anchor: NodeId, name: &str) -> TreeResult<NodeId> {
        self.insert_sibling(anchor, name, 0)
    }

    /// Insert a new tag immediately after `anchor`
    pub fn add_after(&mut self, anchor: NodeId, name: &str) -> TreeResult<NodeId> {
        self.insert_sibling(anchor, name, 1)
    }

    fn insert_sibling(&mut self, anchor: NodeId, name: &str, offset: usize) -> TreeResult<NodeId> {
        self.check_writable()?;
        if !self.is_valid(anchor) {
            return Err(TreeError::InvalidNode(anchor));
        }
        Self::check_name(name)?;
        let parent = self.parent(anchor).ok_or(TreeError::RootExists)?;
        let tag = self.new_tag(name, Some(parent));
        if let Some(NodeKind::Tag { children, .. }) = self.node_mut(parent).map(|n| &mut n.kind) {
            let position = children.iter().position(|c| *c == anchor).unwrap_or(children.len());
            children.insert((position + offset).min(children.len()), tag);
        }
        self.touch(TreeChange::ChildAdded { parent: Some(parent), child: tag });
        Ok(tag)
    }

    /// Delete a node and everything below it
    pub fn delete(&mut self, id: NodeId) -> TreeResult<()> {
        self.check_writable()?;
        if !self.is_valid(id) {
            return Err(TreeError::InvalidNode(id));
        }
        let parent = self.parent(id);
        self.detach(id);
        self.mark_deleted(id);
        match self.kind(id) {
            Some(NodeKind::Attribute { name, .. }) => {
                let name = name.clone();
                if let Some(tag) = parent {
                    self.touch(TreeChange::AttributeChanged { tag, name });
                }
            }
            _ => self.touch(TreeChange::ChildRemoved { parent, child: id }),
        }
        Ok(())
    }

    /// Replace a tag's text children with a single text node
    pub fn set_text_value(&mut self, tag: NodeId, value: &str) -> TreeResult<()> {
        self.check_writable()?;
        self.check_tag(tag)?;

        let texts: Vec<NodeId> = self
            .children(tag)
            .iter()
            .copied()
            .filter(|id| matches!(self.kind(*id), Some(NodeKind::Text { .. })))
            .collect();
        for text in texts {
            self.detach(text);
            self.mark_deleted(text);
        }
        if !value.is_empty() {
            let text = self.alloc(NodeKind::Text { value: value.to_string() }, Some(tag), None);
            if let Some(NodeKind::Tag { children, .. }) = self.node_mut(tag).map(|n| &mut n.kind) {
                children.insert(0, text);
            }
        }
        self.touch(TreeChange::TextChanged { tag });
        Ok(())
    }

    fn detach(&mut self, id: NodeId) {
        match self.parent(id) {
            Some(parent) => {
                if let Some(NodeKind::Tag { attributes, children, .. }) = self.node_mut(parent).map(|n| &mut n.kind) {
                    attributes.retain(|c| *c != id);
                    children.retain(|c| *c != id);
                }
            }
            None => {
                if self.root == Some(id) {
                    self.root = None;
                }
            }
        }
    }

    fn mark_deleted(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.node_mut(current) {
                node.state = NodeState::Deleted;
                node.handler_slot = None;
                if let NodeKind::Tag { attributes, children, .. } = &node.kind {
                    stack.extend(attributes.iter().copied());
                    stack.extend(children.iter().copied());
                }
            }
        }
    }

    /// Capture the current arena
    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            nodes: self.nodes.clone(),
            root: self.root,
            journal_len: self.journal.len(),
        }
    }

    /// Roll back to a snapshot. Nodes created after the snapshot become
    /// invalid; the modification counter still advances.
    pub fn restore(&mut self, snapshot: TreeSnapshot) {
        self.nodes = snapshot.nodes;
        self.root = snapshot.root;
        self.journal.truncate(snapshot.journal_len);
        self.touch(TreeChange::Restored);
    }

    /// Take the journal of edits since the last drain
    pub fn drain_changes(&mut self) -> Vec<TreeChange> {
        std::mem::take(&mut self.journal)
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.journal.is_empty()
    }
}

/// Split `prefix:local` into its parts
pub fn split_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MarkupFile {
        MarkupFile::parse(
            "/project.xml",
            r#"<project xmlns="urn:p" xmlns:x="urn:x"><item id="a"/><x:item id="b">text</x:item></project>"#,
        )
        .unwrap()
    }

    #[test]
    fn test_names_and_namespaces() {
        let file = sample();
        let root = file.root_tag().unwrap();
        let items = file.sub_tags(root);

        assert_eq!(file.local_name(root), Some("project"));
        assert_eq!(file.namespace(root).as_deref(), Some("urn:p"));
        assert_eq!(file.namespace(items[0]).as_deref(), Some("urn:p"));
        assert_eq!(file.name(items[1]), Some("x:item"));
        assert_eq!(file.local_name(items[1]), Some("item"));
        assert_eq!(file.namespace(items[1]).as_deref(), Some("urn:x"));

        let id = file.attribute(items[0], "id").unwrap();
        assert_eq!(file.namespace(id), None);
    }

    #[test]
    fn test_edits_advance_counter_and_journal() {
        let mut file = sample();
        let root = file.root_tag().unwrap();
        let before = file.modification_count();

        let added = file.add_child(root, "item").unwrap();
        file.set_attribute(added, "id", Some("c")).unwrap();

        assert_eq!(file.modification_count(), before + 2);
        assert_eq!(file.drain_changes().len(), 2);
        assert!(!file.has_pending_changes());
        assert_eq!(file.sub_tags(root).len(), 3);
    }

    #[test]
    fn test_delete_invalidates_subtree() {
        let mut file = sample();
        let root = file.root_tag().unwrap();
        let second = file.sub_tags(root)[1];
        let id_attr = file.attribute(second, "id").unwrap();

        file.delete(second).unwrap();

        assert_eq!(file.state(second), NodeState::Deleted);
        assert_eq!(file.state(id_attr), NodeState::Deleted);
        assert_eq!(file.sub_tags(root).len(), 1);
        assert_eq!(file.delete(second), Err(TreeError::InvalidNode(second)));
    }

    #[test]
    fn test_reparse_replaces_nodes() {
        let mut file = sample();
        let old_root = file.root_tag().unwrap();

        file.reparse("<project><item id=\"z\"/></project>").unwrap();

        let new_root = file.root_tag().unwrap();
        assert_ne!(old_root, new_root);
        assert_eq!(file.state(old_root), NodeState::Replaced);
        let item = file.sub_tags(new_root)[0];
        assert_eq!(file.attribute_value(item, "id"), Some("z"));
        assert_eq!(file.parent(item), Some(new_root));
    }

    #[test]
    fn test_read_only_refuses_edits() {
        let mut file = sample();
        file.set_read_only(true);
        let root = file.root_tag().unwrap();

        let result = file.add_child(root, "item");
        assert!(matches!(result, Err(TreeError::ReadOnly { .. })));
        assert_eq!(file.modification_count(), 0);
    }

    #[test]
    fn test_text_value_and_set_text() {
        let mut file = sample();
        let root = file.root_tag().unwrap();
        let second = file.sub_tags(root)[1];

        assert_eq!(file.text_value(second).as_deref(), Some("text"));
        file.set_text_value(second, "other").unwrap();
        assert_eq!(file.text_value(second).as_deref(), Some("other"));
        file.set_text_value(second, "").unwrap();
        assert_eq!(file.text_value(second).as_deref(), Some(""));
    }

    #[test]
    fn test_insert_before_and_after() {
        let mut file = sample();
        let root = file.root_tag().unwrap();
        let first = file.sub_tags(root)[0];

        let before = file.add_before(first, "head").unwrap();
        let after = file.add_after(first, "tail").unwrap();

        assert_eq!(file.sub_tags(root)[..3], [before, first, after]);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut file = sample();
        let root = file.root_tag().unwrap();
        let snapshot = file.snapshot();
        let count = file.modification_count();

        let added = file.add_child(root, "extra").unwrap();
        file.restore(snapshot);

        assert!(!file.is_valid(added));
        assert_eq!(file.sub_tags(root).len(), 2);
        assert!(file.modification_count() > count);
    }

    #[test]
    fn test_lazy_file_has_stub_but_no_tree() {
        let mut file = MarkupFile::lazy("/lazy.xml", "<root><item id=\"a\"/></root>").unwrap();
        assert!(!file.is_tree_loaded());
        assert!(file.root_tag().is_none());
        assert!(file.stub().is_some());

        file.load_tree().unwrap();
        let root = file.root_tag().unwrap();
        assert_eq!(file.sub_tags(root).len(), 1);
        assert_eq!(file.modification_count(), 0);
    }

    #[test]
    fn test_handler_slot_is_not_an_edit() {
        let mut file = sample();
        let root = file.root_tag().unwrap();
        file.set_handler_slot(root, Some(7));
        assert_eq!(file.handler_slot(root), Some(7));
        assert_eq!(file.modification_count(), 0);
    }
}
