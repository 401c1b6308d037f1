use markbind_tree::{parse, serialize, FileStub, MarkupFile, NodeState, ParseError};

const PROJECT: &str = r#"
<project name="demo" xmlns:x="urn:ext">
    <!-- settings come first -->
    <settings mode="debug"/>
    <module id="core">
        <source>src/core</source>
    </module>
    <module id="util"/>
    <x:plugin level="2"/>
</project>
"#;

#[test]
fn test_parse_edit_serialize_reparse() {
    let mut file = parse("/project.xml", PROJECT).unwrap();
    let root = file.root_tag().unwrap();
    let modules: Vec<_> = file
        .sub_tags(root)
        .into_iter()
        .filter(|t| file.local_name(*t) == Some("module"))
        .collect();
    assert_eq!(modules.len(), 2);

    let added = file.add_after(modules[1], "module").unwrap();
    file.set_attribute(added, "id", Some("log")).unwrap();
    file.set_attribute(modules[1], "id", None).unwrap();

    let text = serialize(&file);
    let reread = MarkupFile::parse("/project.xml", text).unwrap();
    let root = reread.root_tag().unwrap();
    let ids: Vec<_> = reread
        .sub_tags(root)
        .into_iter()
        .filter(|t| reread.local_name(*t) == Some("module"))
        .map(|t| reread.attribute_value(t, "id").map(str::to_string))
        .collect();
    assert_eq!(ids, vec![Some("core".to_string()), None, Some("log".to_string())]);
}

#[test]
fn test_prefixed_tags_resolve_namespace() {
    let file = parse("/project.xml", PROJECT).unwrap();
    let root = file.root_tag().unwrap();
    let plugin = *file.sub_tags(root).last().unwrap();

    assert_eq!(file.prefix(plugin), Some("x"));
    assert_eq!(file.namespace(plugin).as_deref(), Some("urn:ext"));
    assert_eq!(file.namespace(root), None);
}

#[test]
fn test_lazy_stub_matches_loaded_tree() {
    let mut lazy = MarkupFile::lazy("/project.xml", PROJECT).unwrap();
    let stub = lazy.stub().cloned().unwrap();
    let stub_root = stub.root().unwrap();
    let stub_names: Vec<_> = stub
        .children(stub_root)
        .iter()
        .map(|id| stub.element(*id).unwrap().name.clone())
        .collect();

    lazy.load_tree().unwrap();
    let root = lazy.root_tag().unwrap();
    let tree_names: Vec<_> = lazy
        .sub_tags(root)
        .into_iter()
        .map(|t| lazy.name(t).unwrap().to_string())
        .collect();
    assert_eq!(stub_names, tree_names);
}

#[test]
fn test_persisted_stub_reopens_without_tree() {
    let file = parse("/project.xml", PROJECT).unwrap();
    let bytes = file.stub().unwrap().to_bytes().unwrap();

    let stub = FileStub::from_bytes(&bytes).unwrap().unwrap();
    let mut reopened = MarkupFile::from_persisted_stub("/project.xml", PROJECT, stub);
    assert!(!reopened.is_tree_loaded());
    assert_eq!(reopened.stub().unwrap().len(), file.stub().unwrap().len());

    reopened.load_tree().unwrap();
    assert!(reopened.root_tag().is_some());
}

#[test]
fn test_reparse_rebuilds_stub_and_replaces_nodes() {
    let mut file = parse("/project.xml", PROJECT).unwrap();
    let old_root = file.root_tag().unwrap();

    file.reparse("<project><module id=\"only\"/></project>").unwrap();

    assert_eq!(file.state(old_root), NodeState::Replaced);
    let stub = file.stub().unwrap();
    assert_eq!(stub.children(stub.root().unwrap()).len(), 1);
}

#[test]
fn test_failed_reparse_keeps_tree() {
    let mut file = parse("/project.xml", PROJECT).unwrap();
    let root = file.root_tag().unwrap();

    let result = file.reparse("<project><module></project>");
    assert!(result.is_err());
    assert!(file.is_valid(root));
    assert_eq!(file.root_tag(), Some(root));
}

#[test]
fn test_unclosed_document_reports_position() {
    let error = parse("/broken.xml", "<project><module id=\"a\">").unwrap_err();
    match error {
        ParseError::UnexpectedEof { pos } | ParseError::InvalidSyntax { pos, .. } => assert!(pos > 0),
        other => panic!("unexpected error: {other:?}"),
    }
}
