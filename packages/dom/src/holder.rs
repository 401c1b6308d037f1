use crate::description::{ChildDescription, DescriptionKey};
use crate::name::XmlName;
use indexmap::IndexMap;
use std::sync::Arc;

/// Registry of child descriptions keyed by name, optionally layered over a
/// delegate. Lookups consult the delegate first, so a layer can add names but
/// never shadow the ones below it.
#[derive(Debug, Default)]
pub struct ChildrenDescriptionsHolder {
    delegate: Option<Arc<ChildrenDescriptionsHolder>>,
    named: IndexMap<XmlName, Arc<ChildDescription>>,
    custom: Vec<Arc<ChildDescription>>,
}

impl ChildrenDescriptionsHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layered(delegate: Arc<ChildrenDescriptionsHolder>) -> Self {
        Self {
            delegate: Some(delegate),
            ..Self::default()
        }
    }

    /// Register a description. On a name collision the description already
    /// registered (here or in the delegate) is returned and nothing changes.
    pub fn add(&mut self, description: ChildDescription) -> Result<Arc<ChildDescription>, Arc<ChildDescription>> {
        let description = Arc::new(description);
        match description.xml_name().cloned() {
            Some(name) => {
                if let Some(existing) = self.find(&name) {
                    return Err(existing.clone());
                }
                self.named.insert(name, description.clone());
            }
            None => {
                let key = description.key();
                if let Some(existing) = self.find_by_key(&key) {
                    return Err(existing);
                }
                self.custom.push(description.clone());
            }
        }
        Ok(description)
    }

    pub fn find(&self, name: &XmlName) -> Option<&Arc<ChildDescription>> {
        self.delegate
            .as_ref()
            .and_then(|d| d.find(name))
            .or_else(|| self.named.get(name))
    }

    pub fn find_by_key(&self, key: &DescriptionKey) -> Option<Arc<ChildDescription>> {
        self.all().into_iter().find(|d| &d.key() == key)
    }

    /// Named descriptions, delegate's first, in registration order
    pub fn named(&self) -> Vec<Arc<ChildDescription>> {
        let mut result = self.delegate.as_ref().map(|d| d.named()).unwrap_or_default();
        result.extend(self.named.values().cloned());
        result
    }

    pub fn custom(&self) -> Vec<Arc<ChildDescription>> {
        let mut result = self.delegate.as_ref().map(|d| d.custom()).unwrap_or_default();
        result.extend(self.custom.iter().cloned());
        result
    }

    pub fn all(&self) -> Vec<Arc<ChildDescription>> {
        let mut result = self.named();
        result.extend(self.custom());
        result
    }

    pub fn len(&self) -> usize {
        self.named.len() + self.custom.len() + self.delegate.as_ref().map(|d| d.len()).unwrap_or(0)
    }

}
