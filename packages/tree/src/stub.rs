//! # Stub Index
//!
//! Compact structural summary of a file: tag names, sibling ordinals,
//! namespaces, attribute values and leaf text. Built once at parse time and
//! persisted with the file so that structural queries can be answered before
//! the tree is read again.

use crate::tree::{split_name, MarkupFile, NodeId};
use crate::visitor::{walk_tag, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bumped whenever the persisted layout changes
pub const STUB_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StubId(u32);

impl StubId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeStub {
    pub name: String,
    pub namespace: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementStub {
    /// Qualified tag name
    pub name: String,
    pub namespace: Option<String>,
    /// Position among preceding siblings with the same qualified name
    pub index: usize,
    pub attributes: Vec<AttributeStub>,
    pub children: Vec<StubId>,
    pub parent: Option<StubId>,
    /// Trimmed text, only recorded for tags without child tags
    pub text: Option<String>,
}

impl ElementStub {
    pub fn local_name(&self) -> &str {
        split_name(&self.name).1
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeStub> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStub {
    version: u32,
    root: Option<StubId>,
    elements: Vec<ElementStub>,
}

impl FileStub {
    /// Build the stub from a loaded tree
    pub fn build(file: &MarkupFile) -> Self {
        let mut builder = StubBuilder {
            elements: Vec::new(),
            stack: Vec::new(),
            sibling_counts: vec![HashMap::new()],
        };
        builder.visit_file(file);
        let root = if builder.elements.is_empty() { None } else { Some(StubId(0)) };
        tracing::trace!("Built stub for {} with {} elements", file.path(), builder.elements.len());
        Self {
            version: STUB_FORMAT_VERSION,
            root,
            elements: builder.elements,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn root(&self) -> Option<StubId> {
        self.root
    }

    pub fn element(&self, id: StubId) -> Option<&ElementStub> {
        self.elements.get(id.index())
    }

    pub fn children(&self, id: StubId) -> &[StubId] {
        self.element(id).map(|e| e.children.as_slice()).unwrap_or(&[])
    }

    pub fn attribute_value(&self, id: StubId, name: &str) -> Option<&str> {
        self.element(id)?.attribute(name).map(|a| a.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Serialize for persistence alongside the file
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Load a persisted stub; stubs of an older layout are rejected
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Option<Self>> {
        let stub: FileStub = serde_json::from_slice(bytes)?;
        if stub.version != STUB_FORMAT_VERSION {
            tracing::debug!("Discarding stub with format version {}", stub.version);
            return Ok(None);
        }
        Ok(Some(stub))
    }
}

struct StubBuilder {
    elements: Vec<ElementStub>,
    stack: Vec<StubId>,
    /// Per open tag: how many children of each name have been seen
    sibling_counts: Vec<HashMap<String, usize>>,
}

impl Visitor for StubBuilder {
    fn visit_tag(&mut self, file: &MarkupFile, tag: NodeId) {
        let name = file.name(tag).unwrap_or_default().to_string();
        let index = match self.sibling_counts.last_mut() {
            Some(counts) => {
                let count = counts.entry(name.clone()).or_insert(0);
                *count += 1;
                *count - 1
            }
            None => 0,
        };

        let attributes = file
            .attributes(tag)
            .iter()
            .map(|attribute| AttributeStub {
                name: file.name(*attribute).unwrap_or_default().to_string(),
                namespace: file.namespace(*attribute),
                value: file.text_value(*attribute).unwrap_or_default(),
            })
            .collect();

        let text = if file.sub_tags(tag).is_empty() {
            file.text_value(tag).filter(|t| !t.is_empty())
        } else {
            None
        };

        let id = StubId(self.elements.len() as u32);
        let parent = self.stack.last().copied();
        self.elements.push(ElementStub {
            name,
            namespace: file.namespace(tag),
            index,
            attributes,
            children: Vec::new(),
            parent,
            text,
        });
        if let Some(parent) = parent {
            self.elements[parent.index()].children.push(id);
        }

        self.stack.push(id);
        self.sibling_counts.push(HashMap::new());
        walk_tag(self, file, tag);
        self.sibling_counts.pop();
        self.stack.pop();
    }
}
