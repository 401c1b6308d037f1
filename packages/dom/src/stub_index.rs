//! Structural queries answered from a file's stub

use crate::children::Claims;
use crate::description::{ChildDescription, TagInfo};
use crate::name::{EvaluatedXmlName, NameFacts, NamespacePolicies};
use crate::strategy::ParentStrategy;
use markbind_tree::{AttributeStub, ElementStub, FileStub, StubId};

fn facts(element: &ElementStub) -> NameFacts<'_> {
    NameFacts {
        qualified_name: &element.name,
        namespace: element.namespace.as_deref(),
    }
}

fn attribute_facts(attribute: &AttributeStub) -> NameFacts<'_> {
    NameFacts {
        qualified_name: &attribute.name,
        namespace: attribute.namespace.as_deref(),
    }
}

/// The attribute of `parent` matching `name`
pub fn find_attribute<'a>(
    stub: &'a FileStub,
    parent: StubId,
    name: &EvaluatedXmlName,
    policies: &NamespacePolicies,
) -> Option<&'a AttributeStub> {
    stub.element(parent)?
        .attributes
        .iter()
        .find(|a| name.is_name_suitable(attribute_facts(a), policies))
}

/// Stub children of `parent` matching a description, in document order.
/// Custom descriptions skip whatever `claims` says another description owns.
pub fn matching_children(
    stub: &FileStub,
    parent: StubId,
    description: &ChildDescription,
    name: &EvaluatedXmlName,
    claims: &Claims,
    policies: &NamespacePolicies,
) -> Vec<ParentStrategy> {
    if let ChildDescription::Attribute(_) = description {
        return find_attribute(stub, parent, name, policies)
            .map(|_| vec![ParentStrategy::Stub(parent)])
            .unwrap_or_default();
    }

    stub.children(parent)
        .iter()
        .copied()
        .filter(|child| {
            let Some(element) = stub.element(*child) else {
                return false;
            };
            match description {
                ChildDescription::Custom(custom) => {
                    let info = TagInfo::from_stub(element);
                    !claims.owns(&info, |c| c.is_name_suitable(facts(element), policies)) && custom.matcher.matches(&info)
                }
                _ => name.is_name_suitable(facts(element), policies),
            }
        })
        .map(ParentStrategy::Stub)
        .collect()
}

/// Text of a stub element, if the stub alone can answer it
pub fn text(stub: &FileStub, element: StubId) -> Option<Option<String>> {
    let element = stub.element(element)?;
    match &element.text {
        Some(text) => Some(Some(text.clone())),
        None if element.children.is_empty() => Some(Some(String::new())),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::TypeKey;
    use crate::description::{CollectionDescription, CustomDescription, CustomMatcher};
    use crate::name::XmlName;
    use markbind_tree::MarkupFile;

    #[test]
    fn test_matching_children_in_order() {
        let file = MarkupFile::lazy("/s.xml", r#"<root><item id="a"/><other/><item id="b"/></root>"#).unwrap();
        let stub = file.stub().unwrap();
        let root = stub.root().unwrap();

        let description = ChildDescription::Collection(CollectionDescription {
            name: XmlName::new("item"),
            element_type: TypeKey::new("Item"),
        });
        let name = EvaluatedXmlName::evaluate(XmlName::new("item"), None);
        let policies = NamespacePolicies::new();

        let matches = matching_children(stub, root, &description, &name, &Claims::default(), &policies);
        let ids: Vec<&str> = matches
            .iter()
            .filter_map(|m| match m {
                ParentStrategy::Stub(id) => stub.attribute_value(*id, "id"),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        let custom = ChildDescription::Custom(CustomDescription {
            element_type: TypeKey::new("Any"),
            matcher: CustomMatcher::any(),
        });
        let claims = Claims {
            names: vec![name.clone()],
            preceding: Vec::new(),
        };
        let unclaimed = matching_children(stub, root, &custom, &name, &claims, &policies);
        assert_eq!(unclaimed.len(), 1);
    }

    #[test]
    fn test_earlier_custom_description_owns_the_tag() {
        let file = MarkupFile::lazy("/c.xml", r#"<root><x/><y/></root>"#).unwrap();
        let stub = file.stub().unwrap();
        let root = stub.root().unwrap();
        let name = EvaluatedXmlName::evaluate(XmlName::new("root"), None);
        let policies = NamespacePolicies::new();

        let later = ChildDescription::Custom(CustomDescription {
            element_type: TypeKey::new("Later"),
            matcher: CustomMatcher::any(),
        });
        let claims = Claims {
            names: Vec::new(),
            preceding: vec![CustomMatcher::new(|tag| tag.qualified_name == "x")],
        };
        let matches = matching_children(stub, root, &later, &name, &claims, &policies);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0], ParentStrategy::Stub(stub.children(root)[1]));
    }

    #[test]
    fn test_text_needs_tree_for_mixed_content() {
        let file = MarkupFile::lazy("/t.xml", "<root><leaf>value</leaf><empty/></root>").unwrap();
        let stub = file.stub().unwrap();
        let root = stub.root().unwrap();
        let children = stub.children(root);

        assert_eq!(text(stub, children[0]), Some(Some("value".to_string())));
        assert_eq!(text(stub, children[1]), Some(Some(String::new())));
        assert_eq!(text(stub, root), None);
    }
}
