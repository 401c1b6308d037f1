//! # Qualified names
//!
//! A declared child name is a local name plus an optional namespace key. The
//! key is resolved to concrete namespace URIs through the file description's
//! [`NamespacePolicies`]. Children that declare no key inherit the key of the
//! parent they are evaluated under.

use markbind_tree::{split_name, MarkupFile, NodeId};
use std::collections::HashMap;
use std::fmt;

/// Declared child name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XmlName {
    local_name: String,
    namespace_key: Option<String>,
}

impl XmlName {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            namespace_key: None,
        }
    }

    pub fn with_namespace(local_name: impl Into<String>, namespace_key: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            namespace_key: Some(namespace_key.into()),
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn namespace_key(&self) -> Option<&str> {
        self.namespace_key.as_deref()
    }
}

impl From<&str> for XmlName {
    fn from(local_name: &str) -> Self {
        Self::new(local_name)
    }
}

impl fmt::Display for XmlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace_key {
            Some(key) => write!(f, "{{{}}}{}", key, self.local_name),
            None => f.write_str(&self.local_name),
        }
    }
}

/// Namespace key → accepted namespace URIs. The first URI of a key is the
/// one used when new tags are created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamespacePolicies {
    policies: HashMap<String, Vec<String>>,
}

impl NamespacePolicies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, uris: Vec<String>) {
        self.policies.insert(key.into(), uris);
    }

    pub fn uris(&self, key: &str) -> &[String] {
        self.policies.get(key).map(|u| u.as_slice()).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// The concrete facts about a tag or attribute that name matching needs
#[derive(Debug, Clone, Copy)]
pub struct NameFacts<'a> {
    pub qualified_name: &'a str,
    pub namespace: Option<&'a str>,
}

impl<'a> NameFacts<'a> {
    pub fn local_name(&self) -> &'a str {
        split_name(self.qualified_name).1
    }
}

/// A declared name bound to the namespace key in effect where it is used
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EvaluatedXmlName {
    name: XmlName,
    namespace_key: Option<String>,
}

impl EvaluatedXmlName {
    /// Evaluate a top-level name; a name without a key takes `inherited`
    pub fn evaluate(name: XmlName, inherited: Option<&str>) -> Self {
        let namespace_key = name
            .namespace_key()
            .map(str::to_string)
            .or_else(|| inherited.map(str::to_string));
        Self { name, namespace_key }
    }

    /// Evaluate a child name under this one
    pub fn evaluate_child(&self, child: &XmlName) -> Self {
        Self::evaluate(child.clone(), self.namespace_key.as_deref())
    }

    /// Attribute names do not inherit namespace keys
    pub fn evaluate_attribute(child: &XmlName) -> Self {
        Self::evaluate(child.clone(), None)
    }

    pub fn local_name(&self) -> &str {
        self.name.local_name()
    }

    /// Local names must agree, either directly or with the declared name
    /// spelling out the node's full `prefix:local` text. With a namespace key
    /// in effect the node's namespace must be one of the key's URIs; a key
    /// with no registered URIs does not restrict.
    pub fn is_name_suitable(&self, facts: NameFacts<'_>, policies: &NamespacePolicies) -> bool {
        let local = self.local_name();
        if local != facts.local_name() && local != facts.qualified_name {
            return false;
        }
        if local == facts.qualified_name && facts.qualified_name.contains(':') {
            return true;
        }
        match &self.namespace_key {
            None => true,
            Some(key) => {
                let uris = policies.uris(key);
                uris.is_empty() || uris.iter().any(|uri| Some(uri.as_str()) == facts.namespace)
            }
        }
    }

    /// Name to give a new tag created under `parent`. The local name is
    /// prefixed when the required namespace is bound to a prefix in scope
    /// and is not the default namespace there.
    pub fn tag_name_for_creation(&self, file: &MarkupFile, parent: Option<NodeId>, policies: &NamespacePolicies) -> String {
        let local = self.local_name().to_string();
        let (Some(key), Some(parent)) = (&self.namespace_key, parent) else {
            return local;
        };
        let Some(uri) = policies.uris(key).first() else {
            return local;
        };
        if file.namespace_for_prefix(parent, None).as_deref() == Some(uri.as_str()) {
            return local;
        }
        match find_prefix(file, parent, uri) {
            Some(prefix) => format!("{}:{}", prefix, local),
            None => local,
        }
    }
}

impl fmt::Display for EvaluatedXmlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace_key {
            Some(key) => write!(f, "{{{}}}{}", key, self.local_name()),
            None => f.write_str(self.local_name()),
        }
    }
}

/// Closest prefix bound to `uri` at `tag`
fn find_prefix(file: &MarkupFile, tag: NodeId, uri: &str) -> Option<String> {
    std::iter::once(tag).chain(file.ancestors(tag)).find_map(|scope| {
        file.attributes(scope).iter().find_map(|attribute| {
            let prefix = file.name(*attribute)?.strip_prefix("xmlns:")?;
            let bound = file.text_value(*attribute)?;
            (bound == uri).then(|| prefix.to_string())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policies() -> NamespacePolicies {
        let mut policies = NamespacePolicies::new();
        policies.register("build", vec!["urn:build".to_string()]);
        policies
    }

    fn facts<'a>(qualified_name: &'a str, namespace: Option<&'a str>) -> NameFacts<'a> {
        NameFacts {
            qualified_name,
            namespace,
        }
    }

    #[test]
    fn test_child_inherits_namespace_key() {
        let root = EvaluatedXmlName::evaluate(XmlName::with_namespace("project", "build"), None);
        let child = root.evaluate_child(&XmlName::new("module"));
        assert_eq!(child.to_string(), "{build}module");

        let attribute = EvaluatedXmlName::evaluate_attribute(&XmlName::new("id"));
        assert_eq!(attribute.to_string(), "id");
    }

    #[test]
    fn test_name_suitability() {
        let policies = policies();
        let name = EvaluatedXmlName::evaluate(XmlName::new("module"), Some("build"));

        assert!(name.is_name_suitable(facts("module", Some("urn:build")), &policies));
        assert!(name.is_name_suitable(facts("b:module", Some("urn:build")), &policies));
        assert!(!name.is_name_suitable(facts("module", Some("urn:other")), &policies));
        assert!(!name.is_name_suitable(facts("module", None), &policies));
        assert!(!name.is_name_suitable(facts("modules", Some("urn:build")), &policies));

        let plain = EvaluatedXmlName::evaluate(XmlName::new("module"), None);
        assert!(plain.is_name_suitable(facts("module", Some("urn:other")), &policies));
    }

    #[test]
    fn test_full_qualified_text_matches() {
        let name = EvaluatedXmlName::evaluate(XmlName::new("x:item"), Some("build"));
        assert!(name.is_name_suitable(facts("x:item", None), &policies()));
    }

    #[test]
    fn test_tag_name_for_creation_uses_bound_prefix() {
        let file = MarkupFile::parse("/n.xml", r#"<project xmlns:b="urn:build"><module/></project>"#).unwrap();
        let root = file.root_tag().unwrap();
        let name = EvaluatedXmlName::evaluate(XmlName::new("module"), Some("build"));
        assert_eq!(name.tag_name_for_creation(&file, Some(root), &policies()), "b:module");

        let file = MarkupFile::parse("/d.xml", r#"<project xmlns="urn:build"/>"#).unwrap();
        let root = file.root_tag().unwrap();
        assert_eq!(name.tag_name_for_creation(&file, Some(root), &policies()), "module");
    }
}
