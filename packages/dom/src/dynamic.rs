//! # Dynamic extension
//!
//! Extenders contribute children to a type depending on the instance they
//! are asked about. Contributions are layered over the static schema and
//! cached per handle until the owning file's modification counter moves.
//! A contributed name that the static schema already claims is dropped with
//! a warning; the static description stays in charge.

use crate::declaration::TypeKey;
use crate::description::{
    AttributeDescription, ChildDescription, CollectionDescription, CustomDescription, CustomMatcher, FixedDescription, TagInfo,
};
use crate::holder::ChildrenDescriptionsHolder;
use crate::name::XmlName;
use crate::schema::StaticGenericInfo;
use crate::value::ValueType;
use std::sync::Arc;
use tracing::warn;

/// What an extender can see of the instance being extended
#[derive(Debug, Clone)]
pub struct ExtensionContext {
    pub type_key: TypeKey,
    /// The backing tag, when one exists
    pub tag: Option<TagInfo>,
    pub file_path: String,
}

pub trait DomExtender: Send + Sync {
    fn register_extensions(&self, context: &ExtensionContext, registrar: &mut DomExtensionsRegistrar);
}

impl<F> DomExtender for F
where
    F: Fn(&ExtensionContext, &mut DomExtensionsRegistrar) + Send + Sync,
{
    fn register_extensions(&self, context: &ExtensionContext, registrar: &mut DomExtensionsRegistrar) {
        self(context, registrar)
    }
}

/// Collects contributed descriptions
#[derive(Debug, Default)]
pub struct DomExtensionsRegistrar {
    contributed: Vec<ChildDescription>,
}

impl DomExtensionsRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_attribute(&mut self, name: impl Into<XmlName>, value_type: ValueType) -> &mut Self {
        self.contributed.push(ChildDescription::Attribute(AttributeDescription {
            name: name.into(),
            value_type,
            converter: None,
        }));
        self
    }

    pub fn register_fixed_child(&mut self, name: impl Into<XmlName>, element_type: &str) -> &mut Self {
        self.contributed.push(ChildDescription::Fixed(FixedDescription {
            name: name.into(),
            count: 1,
            element_type: TypeKey::new(element_type),
        }));
        self
    }

    pub fn register_collection_child(&mut self, name: impl Into<XmlName>, element_type: &str) -> &mut Self {
        self.contributed.push(ChildDescription::Collection(CollectionDescription {
            name: name.into(),
            element_type: TypeKey::new(element_type),
        }));
        self
    }

    pub fn register_custom_children(&mut self, element_type: &str, matcher: CustomMatcher) -> &mut Self {
        self.contributed.push(ChildDescription::Custom(CustomDescription {
            element_type: TypeKey::new(element_type),
            matcher,
        }));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.contributed.is_empty()
    }
}

/// Static schema plus the layer contributed for one instance
#[derive(Debug)]
pub struct DynamicGenericInfo {
    holder: Arc<ChildrenDescriptionsHolder>,
    stamp: u64,
}

impl DynamicGenericInfo {
    /// No extenders apply; share the static holder
    pub fn unextended(info: &StaticGenericInfo, stamp: u64) -> Self {
        Self {
            holder: info.holder().clone(),
            stamp,
        }
    }

    pub fn extend(
        info: &StaticGenericInfo,
        context: &ExtensionContext,
        extenders: &[Arc<dyn DomExtender>],
        stamp: u64,
    ) -> Self {
        let mut registrar = DomExtensionsRegistrar::new();
        for extender in extenders {
            extender.register_extensions(context, &mut registrar);
        }
        if registrar.is_empty() {
            return Self::unextended(info, stamp);
        }

        let mut layer = ChildrenDescriptionsHolder::layered(info.holder().clone());
        for description in registrar.contributed {
            let key = description.key();
            if let Err(existing) = layer.add(description) {
                warn!(
                    "Extension of {} contributes {} which is already claimed as {}; keeping the existing description",
                    context.type_key,
                    key,
                    existing.key()
                );
            }
        }
        Self {
            holder: Arc::new(layer),
            stamp,
        }
    }

    pub fn holder(&self) -> &Arc<ChildrenDescriptionsHolder> {
        &self.holder
    }

    /// Modification counter the layer was built at
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    pub fn descriptions(&self) -> Vec<Arc<ChildDescription>> {
        self.holder.all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::TypeDeclaration;
    use crate::schema::build_generic_info;

    fn context() -> ExtensionContext {
        ExtensionContext {
            type_key: TypeKey::new("Plugin"),
            tag: None,
            file_path: "/p.xml".to_string(),
        }
    }

    #[test]
    fn test_extension_layers_over_static() {
        let declaration = TypeDeclaration::builder("Plugin")
            .collection("get_items", "item", "Item")
            .build();
        let info = build_generic_info(declaration.key(), declaration.operations(), None).unwrap();

        let extender: Arc<dyn DomExtender> = Arc::new(|_: &ExtensionContext, registrar: &mut DomExtensionsRegistrar| {
            registrar
                .register_collection_child("extra", "Extra")
                .register_fixed_child("item", "Item");
        });
        let dynamic = DynamicGenericInfo::extend(&info, &context(), &[extender], 3);

        let names: Vec<String> = dynamic.descriptions().iter().map(|d| d.key().to_string()).collect();
        assert_eq!(names, vec!["item*", "extra*"]);
        assert_eq!(dynamic.stamp(), 3);
        assert_eq!(info.descriptions().len(), 1);
    }
}
