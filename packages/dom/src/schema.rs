//! # Static generic info
//!
//! Per declared type, the partition of its operations into value accessors,
//! attribute, fixed, collection and custom child accessors, built once from
//! the [`TypeDeclaration`] and shared by every handle of the type.
//!
//! Binding metadata on an operation decides its classification. Without
//! metadata the operation is classified by name and signature:
//!
//! | shape                                   | classification           |
//! |-----------------------------------------|--------------------------|
//! | `get_x() -> Element(T)`                 | fixed child `x`, index 0 |
//! | `get_xs() -> Elements(T)`               | collection `x`           |
//! | `get_x() -> Attribute(V)`               | attribute `x`            |
//! | `add_x()` / `add_x(Index) -> Element(T)`| collection adder `x`     |
//! | `any() -> Value(V)`                     | tag value getter         |
//! | `any(Value(V))`                         | tag value setter         |
//!
//! Operation names are converted to tag names in kebab case
//! (`get_build_file` → `build-file`).

use crate::declaration::{Binding, OperationDecl, ParamType, ReturnType, TypeDeclaration, TypeKey};
use crate::description::{
    AttributeDescription, ChildDescription, CollectionDescription, CustomDescription, CustomMatcher, DescriptionKind,
    FixedDescription,
};
use crate::dynamic::DomExtender;
use crate::error::ConfigError;
use crate::holder::ChildrenDescriptionsHolder;
use crate::name::XmlName;
use crate::value::ValueType;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// What a declared operation does
#[derive(Debug, Clone)]
pub enum OperationKind {
    GetValue {
        value_type: ValueType,
        converter: Option<String>,
    },
    SetValue {
        value_type: ValueType,
        converter: Option<String>,
    },
    GetAttribute {
        description: Arc<ChildDescription>,
    },
    GetFixed {
        description: Arc<ChildDescription>,
        index: usize,
    },
    GetCollection {
        description: Arc<ChildDescription>,
    },
    AddCollection {
        description: Arc<ChildDescription>,
        indexed: bool,
    },
    GetComposite {
        descriptions: Vec<Arc<ChildDescription>>,
    },
    AddComposite {
        descriptions: Vec<Arc<ChildDescription>>,
        tag: Arc<ChildDescription>,
    },
    GetCustom {
        description: Arc<ChildDescription>,
    },
}

impl OperationKind {
    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::GetValue { .. } => "value getter",
            OperationKind::SetValue { .. } => "value setter",
            OperationKind::GetAttribute { .. } => "attribute getter",
            OperationKind::GetFixed { .. } => "fixed child getter",
            OperationKind::GetCollection { .. } => "collection getter",
            OperationKind::AddCollection { .. } => "collection adder",
            OperationKind::GetComposite { .. } => "composite getter",
            OperationKind::AddComposite { .. } => "composite adder",
            OperationKind::GetCustom { .. } => "custom children getter",
        }
    }
}

#[derive(Debug)]
pub struct StaticGenericInfo {
    holder: Arc<ChildrenDescriptionsHolder>,
    operations: IndexMap<String, OperationKind>,
    value_type: ValueType,
    value_converter: Option<String>,
    name_operation: Option<String>,
}

impl StaticGenericInfo {
    pub fn holder(&self) -> &Arc<ChildrenDescriptionsHolder> {
        &self.holder
    }

    pub fn operation(&self, name: &str) -> Option<&OperationKind> {
        self.operations.get(name)
    }

    /// Type of the tag's own text value
    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    pub fn value_converter(&self) -> Option<&str> {
        self.value_converter.as_deref()
    }

    pub fn name_operation(&self) -> Option<&str> {
        self.name_operation.as_deref()
    }

    pub fn descriptions(&self) -> Vec<Arc<ChildDescription>> {
        self.holder.all()
    }

}

/// Intermediate classification before descriptions are shared
enum Classified {
    Attribute {
        name: XmlName,
        value_type: ValueType,
        converter: Option<String>,
    },
    Fixed {
        name: XmlName,
        index: usize,
        element_type: TypeKey,
    },
    CollectionGet {
        name: XmlName,
        element_type: TypeKey,
    },
    CollectionAdd {
        name: XmlName,
        element_type: TypeKey,
        indexed: bool,
    },
    CompositeGet {
        names: Vec<XmlName>,
        element_type: TypeKey,
    },
    CompositeAdd {
        names: Vec<XmlName>,
        tag: XmlName,
        element_type: TypeKey,
    },
    Custom {
        element_type: TypeKey,
        matcher: CustomMatcher,
    },
    GetValue {
        value_type: ValueType,
        converter: Option<String>,
    },
    SetValue {
        value_type: ValueType,
        converter: Option<String>,
    },
}

/// Claim on a child name while the schema is assembled
struct Claim {
    kind: DescriptionKind,
    element_type: Option<TypeKey>,
    value_type: Option<ValueType>,
    converter: Option<String>,
    count: usize,
}

fn unsupported(type_key: &TypeKey, operation: &OperationDecl, reason: &str) -> ConfigError {
    ConfigError::UnsupportedOperation {
        type_name: type_key.to_string(),
        operation: operation.name.clone(),
        reason: reason.to_string(),
    }
}

/// `get_build_file` → `build-file`
pub fn xml_name_of_operation(operation: &str) -> Option<String> {
    let stem = ["get_", "is_", "add_", "set_"]
        .iter()
        .find_map(|prefix| operation.strip_prefix(prefix))?;
    if stem.is_empty() {
        return None;
    }
    Some(stem.replace('_', "-"))
}

/// `dependencies` → `dependency`, `classes` → `class`, `items` → `item`
pub fn unpluralize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        return format!("{}y", stem);
    }
    for suffix in ["sses", "xes", "ches", "shes"] {
        if name.ends_with(suffix) {
            return name[..name.len() - 2].to_string();
        }
    }
    if name.ends_with('s') && !name.ends_with("ss") {
        return name[..name.len() - 1].to_string();
    }
    name.to_string()
}

fn classify(type_key: &TypeKey, operation: &OperationDecl) -> Result<Classified, ConfigError> {
    let params = operation.params.as_slice();
    match &operation.binding {
        Some(binding) => classify_bound(type_key, operation, binding, params),
        None => classify_by_signature(type_key, operation, params),
    }
}

fn adder_params(params: &[ParamType]) -> Option<bool> {
    match params {
        [] => Some(false),
        [ParamType::Index] => Some(true),
        _ => None,
    }
}

fn classify_bound(
    type_key: &TypeKey,
    operation: &OperationDecl,
    binding: &Binding,
    params: &[ParamType],
) -> Result<Classified, ConfigError> {
    let returns = &operation.returns;
    match (binding, returns) {
        (Binding::Attribute { name, converter }, ReturnType::Attribute(value_type)) if params.is_empty() => {
            Ok(Classified::Attribute {
                name: name.clone(),
                value_type: value_type.clone(),
                converter: converter.clone(),
            })
        }
        (Binding::Attribute { .. }, _) => Err(unsupported(type_key, operation, "attribute binding requires `() -> Attribute`")),

        (Binding::SubTag { name, index }, ReturnType::Element(element_type)) if params.is_empty() => Ok(Classified::Fixed {
            name: name.clone(),
            index: *index,
            element_type: element_type.clone(),
        }),
        (Binding::SubTag { .. }, _) => Err(unsupported(type_key, operation, "sub-tag binding requires `() -> Element`")),

        (Binding::SubTagList { name }, ReturnType::Elements(element_type)) if params.is_empty() => {
            Ok(Classified::CollectionGet {
                name: name.clone(),
                element_type: element_type.clone(),
            })
        }
        (Binding::SubTagList { name }, ReturnType::Element(element_type)) => match adder_params(params) {
            Some(indexed) => Ok(Classified::CollectionAdd {
                name: name.clone(),
                element_type: element_type.clone(),
                indexed,
            }),
            None => Err(unsupported(type_key, operation, "adders take no arguments or a single index")),
        },
        (Binding::SubTagList { .. }, _) => Err(unsupported(type_key, operation, "collection binding requires an element return")),

        (Binding::SubTagsList { names }, ReturnType::Elements(element_type)) if params.is_empty() && !names.is_empty() => {
            Ok(Classified::CompositeGet {
                names: names.clone(),
                element_type: element_type.clone(),
            })
        }
        (Binding::SubTagsList { .. }, _) => Err(unsupported(type_key, operation, "composite binding requires `() -> Elements`")),

        (Binding::SubTagsAdder { names, tag }, ReturnType::Element(element_type)) if names.contains(tag) => {
            match adder_params(params) {
                Some(_) => Ok(Classified::CompositeAdd {
                    names: names.clone(),
                    tag: tag.clone(),
                    element_type: element_type.clone(),
                }),
                None => Err(unsupported(type_key, operation, "adders take no arguments or a single index")),
            }
        }
        (Binding::SubTagsAdder { .. }, _) => Err(unsupported(
            type_key,
            operation,
            "composite adder requires an element return and a tag among its names",
        )),

        (Binding::CustomChildren { matcher }, ReturnType::Elements(element_type)) if params.is_empty() => Ok(Classified::Custom {
            element_type: element_type.clone(),
            matcher: matcher.clone(),
        }),
        (Binding::CustomChildren { .. }, _) => Err(unsupported(type_key, operation, "custom children binding requires `() -> Elements`")),

        (Binding::TagValue { converter }, ReturnType::Value(value_type)) if params.is_empty() => Ok(Classified::GetValue {
            value_type: value_type.clone(),
            converter: converter.clone(),
        }),
        (Binding::TagValue { converter }, ReturnType::Void) => match params {
            [ParamType::Value(value_type)] => Ok(Classified::SetValue {
                value_type: value_type.clone(),
                converter: converter.clone(),
            }),
            _ => Err(unsupported(type_key, operation, "value setters take exactly one value")),
        },
        (Binding::TagValue { .. }, _) => Err(unsupported(type_key, operation, "tag value binding requires a value getter or setter")),
    }
}

fn classify_by_signature(type_key: &TypeKey, operation: &OperationDecl, params: &[ParamType]) -> Result<Classified, ConfigError> {
    let name = operation.name.as_str();
    let xml_name = xml_name_of_operation(name);

    match (&operation.returns, params) {
        (ReturnType::Element(element_type), []) if name.starts_with("get_") => Ok(Classified::Fixed {
            name: XmlName::new(xml_name.unwrap_or_default()),
            index: 0,
            element_type: element_type.clone(),
        }),
        (ReturnType::Elements(element_type), []) if name.starts_with("get_") => Ok(Classified::CollectionGet {
            name: XmlName::new(unpluralize(&xml_name.unwrap_or_default())),
            element_type: element_type.clone(),
        }),
        (ReturnType::Attribute(value_type), []) if name.starts_with("get_") => Ok(Classified::Attribute {
            name: XmlName::new(xml_name.unwrap_or_default()),
            value_type: value_type.clone(),
            converter: None,
        }),
        (ReturnType::Element(element_type), _) if name.starts_with("add_") => match adder_params(params) {
            Some(indexed) => Ok(Classified::CollectionAdd {
                name: XmlName::new(xml_name.unwrap_or_default()),
                element_type: element_type.clone(),
                indexed,
            }),
            None => Err(unsupported(type_key, operation, "adders take no arguments or a single index")),
        },
        (ReturnType::Value(value_type), []) => Ok(Classified::GetValue {
            value_type: value_type.clone(),
            converter: None,
        }),
        (ReturnType::Void, [ParamType::Value(value_type)]) => Ok(Classified::SetValue {
            value_type: value_type.clone(),
            converter: None,
        }),
        _ => Err(unsupported(type_key, operation, "no binding and the signature matches no accessor shape")),
    }
}

/// Names a classified operation claims
fn claims_of(classified: &Classified) -> Vec<(XmlName, Claim)> {
    let element = |kind, element_type: &TypeKey, count| Claim {
        kind,
        element_type: Some(element_type.clone()),
        value_type: None,
        converter: None,
        count,
    };
    match classified {
        Classified::Attribute {
            name,
            value_type,
            converter,
        } => vec![(
            name.clone(),
            Claim {
                kind: DescriptionKind::Attribute,
                element_type: None,
                value_type: Some(value_type.clone()),
                converter: converter.clone(),
                count: 1,
            },
        )],
        Classified::Fixed {
            name,
            index,
            element_type,
        } => vec![(name.clone(), element(DescriptionKind::Fixed, element_type, index + 1))],
        Classified::CollectionGet { name, element_type } | Classified::CollectionAdd { name, element_type, .. } => {
            vec![(name.clone(), element(DescriptionKind::Collection, element_type, 0))]
        }
        Classified::CompositeGet { names, element_type } | Classified::CompositeAdd { names, element_type, .. } => names
            .iter()
            .map(|n| (n.clone(), element(DescriptionKind::Collection, element_type, 0)))
            .collect(),
        Classified::Custom { .. } | Classified::GetValue { .. } | Classified::SetValue { .. } => Vec::new(),
    }
}

/// Build the schema of a type from its flattened operation list
pub fn build_generic_info(
    type_key: &TypeKey,
    operations: &[OperationDecl],
    name_operation: Option<&str>,
) -> Result<StaticGenericInfo, ConfigError> {
    let mut classified = Vec::with_capacity(operations.len());
    let mut claims: IndexMap<XmlName, Claim> = IndexMap::new();

    for operation in operations {
        let c = classify(type_key, operation)?;
        for (name, claim) in claims_of(&c) {
            match claims.get_mut(&name) {
                Some(existing) if existing.kind != claim.kind => {
                    return Err(ConfigError::DuplicateName {
                        type_name: type_key.to_string(),
                        name: name.to_string(),
                    });
                }
                Some(existing) => existing.count = existing.count.max(claim.count),
                None => {
                    claims.insert(name, claim);
                }
            }
        }
        classified.push((operation.name.clone(), c));
    }

    let mut holder = ChildrenDescriptionsHolder::new();
    let mut by_name: HashMap<XmlName, Arc<ChildDescription>> = HashMap::new();
    for (name, claim) in claims {
        let element_type = claim.element_type.unwrap_or_else(|| type_key.clone());
        let description = match claim.kind {
            DescriptionKind::Attribute => ChildDescription::Attribute(AttributeDescription {
                name: name.clone(),
                value_type: claim.value_type.unwrap_or(ValueType::String),
                converter: claim.converter,
            }),
            DescriptionKind::Fixed => ChildDescription::Fixed(FixedDescription {
                name: name.clone(),
                count: claim.count,
                element_type,
            }),
            _ => ChildDescription::Collection(CollectionDescription {
                name: name.clone(),
                element_type,
            }),
        };
        let shared = holder.add(description).unwrap_or_else(|existing| existing);
        by_name.insert(name, shared);
    }

    let lookup = |name: &XmlName| -> Result<Arc<ChildDescription>, ConfigError> {
        by_name.get(name).cloned().ok_or_else(|| ConfigError::UnsupportedOperation {
            type_name: type_key.to_string(),
            operation: name.to_string(),
            reason: "child name was not claimed".to_string(),
        })
    };

    let mut kinds = IndexMap::new();
    let mut value_type = None;
    let mut value_converter = None;
    for (operation, c) in classified {
        let kind = match c {
            Classified::Attribute { name, .. } => OperationKind::GetAttribute { description: lookup(&name)? },
            Classified::Fixed { name, index, .. } => OperationKind::GetFixed {
                description: lookup(&name)?,
                index,
            },
            Classified::CollectionGet { name, .. } => OperationKind::GetCollection { description: lookup(&name)? },
            Classified::CollectionAdd { name, indexed, .. } => OperationKind::AddCollection {
                description: lookup(&name)?,
                indexed,
            },
            Classified::CompositeGet { names, .. } => OperationKind::GetComposite {
                descriptions: names.iter().map(&lookup).collect::<Result<_, _>>()?,
            },
            Classified::CompositeAdd { names, tag, .. } => OperationKind::AddComposite {
                descriptions: names.iter().map(&lookup).collect::<Result<_, _>>()?,
                tag: lookup(&tag)?,
            },
            Classified::Custom { element_type, matcher } => {
                let description = ChildDescription::Custom(CustomDescription { element_type, matcher });
                let shared = holder.add(description).unwrap_or_else(|existing| existing);
                OperationKind::GetCustom { description: shared }
            }
            Classified::GetValue { value_type: v, converter } => {
                if value_type.is_none() {
                    value_type = Some(v.clone());
                    value_converter = converter.clone();
                }
                OperationKind::GetValue { value_type: v, converter }
            }
            Classified::SetValue { value_type: v, converter } => {
                if value_type.is_none() {
                    value_type = Some(v.clone());
                    value_converter = converter.clone();
                }
                OperationKind::SetValue { value_type: v, converter }
            }
        };
        kinds.insert(operation, kind);
    }

    if let Some(name_operation) = name_operation {
        match kinds.get(name_operation) {
            Some(OperationKind::GetValue { .. } | OperationKind::GetAttribute { .. } | OperationKind::GetFixed { .. }) => {}
            _ => {
                return Err(ConfigError::UnsupportedOperation {
                    type_name: type_key.to_string(),
                    operation: name_operation.to_string(),
                    reason: "name accessor must be a value, attribute or fixed child getter".to_string(),
                })
            }
        }
    }

    Ok(StaticGenericInfo {
        holder: Arc::new(holder),
        operations: kinds,
        value_type: value_type.unwrap_or(ValueType::String),
        value_converter,
        name_operation: name_operation.map(str::to_string),
    })
}

/// Registered declarations with their lazily built schemas
#[derive(Default)]
pub(crate) struct TypeRegistry {
    declarations: HashMap<TypeKey, Arc<TypeDeclaration>>,
    infos: HashMap<TypeKey, Result<Arc<StaticGenericInfo>, ConfigError>>,
    extenders: HashMap<TypeKey, Vec<Arc<dyn DomExtender>>>,
}

impl TypeRegistry {
    pub fn register(&mut self, declaration: TypeDeclaration) {
        debug!("Registering type {}", declaration.key());
        if self.declarations.contains_key(declaration.key()) {
            warn!("Type {} registered twice; the later declaration wins", declaration.key());
        }
        self.declarations.insert(declaration.key().clone(), Arc::new(declaration));
        // Subtypes flatten their parents, so every cached schema may be stale
        self.infos.clear();
    }

    pub fn register_extender(&mut self, key: TypeKey, extender: Arc<dyn DomExtender>) {
        self.extenders.entry(key).or_default().push(extender);
    }

    /// Extenders of the type and of every type it extends
    pub fn extenders_for(&self, key: &TypeKey) -> Vec<Arc<dyn DomExtender>> {
        let mut result = Vec::new();
        for ancestor in self.lineage(key) {
            if let Some(extenders) = self.extenders.get(&ancestor) {
                result.extend(extenders.iter().cloned());
            }
        }
        result
    }

    /// The type followed by its ancestors, breadth first
    fn lineage(&self, key: &TypeKey) -> Vec<TypeKey> {
        let mut seen = HashSet::new();
        let mut queue = vec![key.clone()];
        let mut result = Vec::new();
        while !queue.is_empty() {
            let current = queue.remove(0);
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(declaration) = self.declarations.get(&current) {
                queue.extend(declaration.extends().iter().cloned());
            }
            result.push(current);
        }
        result
    }

    pub fn is_assignable(&self, sub: &TypeKey, sup: &TypeKey) -> bool {
        self.lineage(sub).contains(sup)
    }

    pub fn static_info(&mut self, key: &TypeKey) -> Result<Arc<StaticGenericInfo>, ConfigError> {
        if let Some(cached) = self.infos.get(key) {
            return cached.clone();
        }
        let built = self.build_info(key);
        if let Err(e) = &built {
            warn!("Type {} is not usable: {}", key, e);
        }
        self.infos.insert(key.clone(), built.clone());
        built
    }

    #[instrument(skip(self), fields(type_name = %key))]
    fn build_info(&self, key: &TypeKey) -> Result<Arc<StaticGenericInfo>, ConfigError> {
        let mut visiting = Vec::new();
        let (operations, name_operation) = self.flatten(key, &mut visiting)?;
        let info = build_generic_info(key, &operations, name_operation.as_deref())?;
        debug!(
            "Built schema for {}: {} operations, {} child descriptions",
            key,
            operations.len(),
            info.holder().len()
        );
        Ok(Arc::new(info))
    }

    /// Operations of a type with inherited ones merged in; the type's own
    /// declaration wins on a name clash
    fn flatten(&self, key: &TypeKey, visiting: &mut Vec<TypeKey>) -> Result<(Vec<OperationDecl>, Option<String>), ConfigError> {
        if visiting.contains(key) {
            return Err(ConfigError::CyclicInheritance(key.to_string()));
        }
        let declaration = self
            .declarations
            .get(key)
            .ok_or_else(|| ConfigError::UnknownType(key.to_string()))?;
        visiting.push(key.clone());

        let mut merged: IndexMap<String, OperationDecl> = IndexMap::new();
        let mut name_operation = None;
        for parent in declaration.extends() {
            let (operations, parent_name) = self.flatten(parent, visiting)?;
            for operation in operations {
                merged.insert(operation.name.clone(), operation);
            }
            name_operation = name_operation.or(parent_name);
        }
        for operation in declaration.operations() {
            merged.insert(operation.name.clone(), operation.clone());
        }

        visiting.pop();
        let name_operation = declaration.name_operation().map(str::to_string).or(name_operation);
        Ok((merged.into_values().collect(), name_operation))
    }
}
