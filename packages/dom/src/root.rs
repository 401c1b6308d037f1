//! # File roots
//!
//! A file is matched against registered [`DomFileDescription`]s by the
//! local name of its outermost tag. Descriptions naming that tag exactly are
//! tried first, then descriptions accepting any root. The resulting root
//! handle is cached per file until its description is unregistered, the
//! file is reloaded, or the root tag is renamed by an edit or a reparse.

use crate::declaration::TypeKey;
use crate::error::DomResult;
use crate::handler::{HandlerKind, HandlerRecord};
use crate::name::{EvaluatedXmlName, NamespacePolicies, XmlName};
use crate::state::{CachedRoot, DomState, ElementRef};
use crate::strategy::ParentStrategy;
use markbind_tree::{FileId, MarkupFile, NodeId};
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptionId(u32);

/// How files of one kind map onto a root type
#[derive(Debug, Clone)]
pub struct DomFileDescription {
    root_type: TypeKey,
    root_tag_name: String,
    accepts_any_root: bool,
    policies: NamespacePolicies,
    root_namespace_key: Option<String>,
}

impl DomFileDescription {
    pub fn new(root_type: &str, root_tag_name: &str) -> Self {
        Self {
            root_type: TypeKey::new(root_type),
            root_tag_name: root_tag_name.to_string(),
            accepts_any_root: false,
            policies: NamespacePolicies::new(),
            root_namespace_key: None,
        }
    }

    /// Match files whatever their root tag, after exact matches
    pub fn accepting_any_root(mut self) -> Self {
        self.accepts_any_root = true;
        self
    }

    pub fn with_namespace(mut self, key: &str, uris: &[&str]) -> Self {
        self.policies.register(key, uris.iter().map(|u| u.to_string()).collect());
        self
    }

    /// Namespace key of the root tag, inherited by children without one
    pub fn with_root_namespace(mut self, key: &str) -> Self {
        self.root_namespace_key = Some(key.to_string());
        self
    }

    pub fn root_type(&self) -> &TypeKey {
        &self.root_type
    }

    pub fn root_tag_name(&self) -> &str {
        &self.root_tag_name
    }

    pub fn accepts_any_root(&self) -> bool {
        self.accepts_any_root
    }

    pub fn policies(&self) -> &NamespacePolicies {
        &self.policies
    }
}

#[derive(Debug, Default)]
pub(crate) struct RootRegistry {
    descriptions: Vec<(DescriptionId, Arc<DomFileDescription>)>,
    next_id: u32,
}

impl RootRegistry {
    pub fn register(&mut self, description: DomFileDescription) -> DescriptionId {
        let id = DescriptionId(self.next_id);
        self.next_id += 1;
        self.descriptions.push((id, Arc::new(description)));
        id
    }

    pub fn unregister(&mut self, id: DescriptionId) -> bool {
        let before = self.descriptions.len();
        self.descriptions.retain(|(existing, _)| *existing != id);
        self.descriptions.len() != before
    }

    pub fn contains(&self, id: DescriptionId) -> bool {
        self.descriptions.iter().any(|(existing, _)| *existing == id)
    }

    /// First description naming `local_name`, else the first accepting any root
    pub fn find_match(&self, local_name: &str) -> Option<(DescriptionId, Arc<DomFileDescription>)> {
        self.descriptions
            .iter()
            .find(|(_, d)| d.root_tag_name == local_name)
            .or_else(|| self.descriptions.iter().find(|(_, d)| d.accepts_any_root))
            .map(|(id, d)| (*id, d.clone()))
    }
}

/// `BuildFile` → `build-file`
pub(crate) fn kebab_case(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('-');
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

fn root_local_name(file: &MarkupFile) -> Option<String> {
    if file.is_tree_loaded() {
        return file.root_tag().and_then(|tag| file.local_name(tag)).map(str::to_string);
    }
    let stub = file.stub()?;
    stub.element(stub.root()?).map(|e| e.local_name().to_string())
}

impl CachedRoot {
    /// Why the cached root no longer stands for the file, if it does not
    pub fn stale_reason(&self, file: &MarkupFile, roots: &RootRegistry) -> Option<&'static str> {
        if self.description.is_some_and(|d| !roots.contains(d)) {
            return Some("its description was unregistered");
        }
        if self.tag_name.is_some() && root_local_name(file) != self.tag_name {
            return Some("its root tag was renamed");
        }
        None
    }
}

impl DomState {
    fn install_root(
        &mut self,
        file: FileId,
        type_key: TypeKey,
        name: EvaluatedXmlName,
        description: Option<DescriptionId>,
        policies: Arc<NamespacePolicies>,
    ) -> DomResult<ElementRef> {
        let tag_name = description.map(|_| name.local_name().to_string());
        let fs = self.file_state_mut(file)?;
        let stamp = fs.stamp();
        let handler = fs.handlers.insert(HandlerRecord {
            kind: HandlerKind::Root,
            type_key: Some(type_key),
            parent: None,
            description: None,
            name,
            ordinal: 0,
            strategy: ParentStrategy::Root,
            stamp,
            invalid: None,
            dynamic: None,
        });
        fs.root = Some(CachedRoot {
            handler,
            description,
            tag_name,
            policies,
        });
        Ok(ElementRef {
            file,
            generation: fs.generation,
            handler,
        })
    }

    /// Cached root handle of a file, matching it on a cache miss
    #[instrument(skip(self), fields(file = %file))]
    pub fn file_root(&mut self, file: FileId) -> DomResult<Option<ElementRef>> {
        let fs = self.file_state(file)?;
        let generation = fs.generation;
        if let Some(root) = fs.root.clone() {
            let r = ElementRef {
                file,
                generation,
                handler: root.handler,
            };
            let Some(reason) = root.stale_reason(&fs.file, &self.roots) else {
                return Ok(Some(r));
            };
            debug!("Evicting root of {}: {}", fs.file.path(), reason);
            self.invalidate(r, "the root element was evicted")?;
            self.file_state_mut(file)?.root = None;
        }

        let fs = self.file_state(file)?;
        if fs.mock {
            return Ok(None);
        }
        let Some(local_name) = root_local_name(&fs.file) else {
            return Ok(None);
        };
        let Some((id, description)) = self.roots.find_match(&local_name) else {
            debug!("No file description matches root tag {}", local_name);
            return Ok(None);
        };

        let name = EvaluatedXmlName::evaluate(XmlName::new(local_name), description.root_namespace_key.as_deref());
        let r = self.install_root(
            file,
            description.root_type.clone(),
            name,
            Some(id),
            Arc::new(description.policies.clone()),
        )?;
        debug!("Matched {} to {}", self.file_state(file)?.file.path(), description.root_type);
        Ok(Some(r))
    }

    /// Root handle if its type can be used as `declared`
    pub fn file_element(&mut self, file: FileId, declared: &TypeKey) -> DomResult<Option<ElementRef>> {
        let Some(root) = self.file_root(file)? else {
            return Ok(None);
        };
        let assignable = self
            .record(root)?
            .type_key
            .as_ref()
            .is_some_and(|actual| self.types.is_assignable(actual, declared));
        Ok(assignable.then_some(root))
    }

    /// Root of a fresh scratch file. The root tag is created on first write.
    pub fn create_mock(&mut self, type_key: &TypeKey) -> DomResult<ElementRef> {
        self.types.static_info(type_key)?;
        let path = self.scratch.next_path("mock");
        let file = self.install_file(MarkupFile::empty(path), true);
        let name = EvaluatedXmlName::evaluate(XmlName::new(kebab_case(type_key.as_str())), None);
        self.install_root(file, type_key.clone(), name, None, Arc::default())
    }

    /// Handle wrapping a tag or attribute node, found by walking down from
    /// the file's root
    pub fn get_dom_element(&mut self, file: FileId, node: NodeId) -> DomResult<Option<ElementRef>> {
        let fs = self.file_state(file)?;
        if !fs.file.is_tree_loaded() || !fs.file.is_valid(node) {
            return Ok(None);
        }
        let mut chain = fs.file.ancestors(node);
        chain.reverse();
        chain.push(node);
        if chain.first().copied() != fs.file.root_tag() {
            return Ok(None);
        }

        let Some(mut current) = self.file_root(file)? else {
            return Ok(None);
        };
        for step in chain.into_iter().skip(1) {
            let Some(description) = self.find_children_description(current, step)? else {
                return Ok(None);
            };
            let mut found = None;
            for child in self.children_of(current, &description)? {
                if self.xml_node(child)? == Some(step) {
                    found = Some(child);
                    break;
                }
            }
            match found {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}
