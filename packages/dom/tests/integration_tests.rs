//! End-to-end behavior of the binding engine over real markup files

use anyhow::Result;
use markbind_dom::{
    CustomMatcher, DescriptionKind, DomElement, DomError, DomEventKind, DomExtensionsRegistrar, DomFileDescription,
    DomInterface, DomManager, EnumType, ExtensionContext, FileId, NeverCanceled, Resolution, TypeDeclaration, TypeKey,
    Value, ValueType,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const PROJECT: &str = r#"<project name="demo" version="3">
  <settings mode="debug" enabled="true"/>
  <module id="core">
    <source>src/core</source>
    <dependency>log</dependency>
  </module>
  <module id="app">
    <dependency>core</dependency>
  </module>
  <plugin-lint level="strict"/>
</project>"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn mode_type() -> ValueType {
    ValueType::Enum(EnumType::new("Mode", &["debug", "release"]))
}

struct Project(DomElement);

impl DomInterface for Project {
    const TYPE_NAME: &'static str = "Project";

    fn declaration() -> TypeDeclaration {
        TypeDeclaration::builder(Self::TYPE_NAME)
            .attribute("get_name", "name", ValueType::String)
            .attribute("get_version", "version", ValueType::Integer)
            .fixed_child("get_settings", "settings", "Settings")
            .collection("get_modules", "module", "Module")
            .indexed_adder("add_module", "module", "Module")
            .custom_children(
                "get_plugins",
                "Plugin",
                CustomMatcher::new(|tag| tag.qualified_name.starts_with("plugin-")),
            )
            .name_from("get_name")
            .build()
    }

    fn wrap(element: DomElement) -> Self {
        Project(element)
    }

    fn element(&self) -> &DomElement {
        &self.0
    }
}

impl Project {
    fn name(&self) -> Result<DomElement> {
        Ok(self.0.invoke("get_name", &[])?.into_element()?)
    }

    fn version(&self) -> Result<DomElement> {
        Ok(self.0.invoke("get_version", &[])?.into_element()?)
    }

    fn settings(&self) -> Result<DomElement> {
        Ok(self.0.invoke("get_settings", &[])?.into_element()?)
    }

    fn modules(&self) -> Result<Vec<DomElement>> {
        Ok(self.0.invoke("get_modules", &[])?.into_elements()?)
    }

    fn plugins(&self) -> Result<Vec<DomElement>> {
        Ok(self.0.invoke("get_plugins", &[])?.into_elements()?)
    }
}

fn register_types(manager: &DomManager) {
    manager.register::<Project>();
    manager.register_type(
        TypeDeclaration::builder("Settings")
            .attribute("get_mode", "mode", mode_type())
            .attribute("get_enabled", "enabled", ValueType::Boolean)
            .build(),
    );
    manager.register_type(
        TypeDeclaration::builder("Module")
            .attribute("get_id", "id", ValueType::String)
            .fixed_child("get_source", "source", "Source")
            .collection("get_dependencies", "dependency", "Dependency")
            .adder("add_dependency", "dependency", "Dependency")
            .name_from("get_id")
            .build(),
    );
    manager.register_type(TypeDeclaration::builder("Source").value("get_path", ValueType::String).build());
    manager.register_type(
        TypeDeclaration::builder("Dependency")
            .value("get_target", ValueType::Element(TypeKey::new("Module")))
            .build(),
    );
    manager.register_type(
        TypeDeclaration::builder("Plugin")
            .attribute("get_level", "level", ValueType::String)
            .build(),
    );
}

fn setup() -> Result<(DomManager, FileId, Project)> {
    init_tracing();
    let manager = DomManager::new();
    register_types(&manager);
    manager.register_file_description(DomFileDescription::new("Project", "project"));
    let file = manager.open_file("/work/project.xml", PROJECT)?;
    let project = manager
        .file_element::<Project>(file)?
        .ok_or_else(|| anyhow::anyhow!("project root did not match"))?;
    Ok((manager, file, project))
}

fn attribute(element: &DomElement, operation: &str) -> Result<Option<String>> {
    Ok(element.invoke(operation, &[])?.into_element()?.string_value()?)
}

fn record_events(manager: &DomManager) -> Arc<Mutex<Vec<(DomEventKind, String)>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    manager.add_change_listener(move |event| {
        sink.lock().push((event.kind(), event.element().debug_path()));
    });
    events
}

#[test]
fn test_attribute_and_typed_reads() -> Result<()> {
    let (_manager, _file, project) = setup()?;

    assert_eq!(project.name()?.string_value()?.as_deref(), Some("demo"));
    assert_eq!(project.version()?.value()?, Some(Value::Integer(3)));
    assert_eq!(project.element().presentable_name()?.as_deref(), Some("demo"));

    let settings = project.settings()?;
    assert!(settings.exists()?);
    let mode = settings.invoke("get_mode", &[])?.into_element()?;
    assert_eq!(mode.value()?, Some(Value::Enum("debug".to_string())));
    assert_eq!(mode.value_variants()?, vec!["debug".to_string(), "release".to_string()]);
    let enabled = settings.invoke("get_enabled", &[])?.into_element()?;
    assert_eq!(enabled.value()?, Some(Value::Boolean(true)));

    let modules = project.modules()?;
    assert_eq!(modules.len(), 2);
    assert_eq!(attribute(&modules[0], "get_id")?.as_deref(), Some("core"));
    assert_eq!(modules[1].presentable_name()?.as_deref(), Some("app"));
    assert_eq!(modules[0].debug_path(), "Project/module[0]");

    let source = modules[0].invoke("get_source", &[])?.into_element()?;
    assert_eq!(source.invoke("get_path", &[])?.into_value()?, Some(Value::from("src/core")));
    Ok(())
}

#[test]
fn test_idempotent_write_emits_nothing() -> Result<()> {
    let (manager, file, project) = setup()?;
    let events = record_events(&manager);
    let before = manager.read_file(file, |f| f.modification_count())?;

    project.name()?.set_string_value(Some("demo"))?;
    assert!(events.lock().is_empty());
    assert_eq!(manager.read_file(file, |f| f.modification_count())?, before);

    project.name()?.set_string_value(Some("renamed"))?;
    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0], (DomEventKind::ValueChanged, "Project".to_string()));
    Ok(())
}

#[test]
fn test_identity_survives_reparse() -> Result<()> {
    let (manager, file, project) = setup()?;
    let app = project.modules()?[1].clone();

    manager.reparse_file(file, &PROJECT.replace("<dependency>log</dependency>", "<dependency>tracing</dependency>"))?;

    assert!(app.is_valid());
    assert_eq!(attribute(&app, "get_id")?.as_deref(), Some("app"));
    let fresh = project.modules()?;
    assert_eq!(fresh[1], app);
    assert_ne!(fresh[0], app);
    Ok(())
}

#[test]
fn test_reparse_notifies_root_once() -> Result<()> {
    let (manager, file, _project) = setup()?;
    let events = record_events(&manager);

    manager.reparse_file(file, PROJECT)?;
    manager.edit_file(file, |f| {
        let root = f.root_tag().unwrap_or_else(|| unreachable!());
        f.set_attribute(root, "name", Some("edited"))
    })?;

    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|(kind, path)| *kind == DomEventKind::External && path == "Project"));
    Ok(())
}

#[test]
fn test_schema_partition() -> Result<()> {
    let (_manager, _file, project) = setup()?;
    let module = project.modules()?.remove(0);

    let descriptions = module.static_children_descriptions()?;
    assert_eq!(descriptions.len(), 3);
    let kinds: Vec<DescriptionKind> = descriptions.iter().map(|d| d.kind()).collect();
    assert!(kinds.contains(&DescriptionKind::Attribute));
    assert!(kinds.contains(&DescriptionKind::Fixed));
    assert!(kinds.contains(&DescriptionKind::Collection));
    Ok(())
}

#[test]
fn test_conversion_round_trip_and_unresolved_text() -> Result<()> {
    let (_manager, _file, project) = setup()?;
    let version = project.version()?;

    version.set_value(Some(Value::Integer(7)))?;
    assert_eq!(version.string_value()?.as_deref(), Some("7"));
    assert_eq!(version.value()?, Some(Value::Integer(7)));

    version.set_string_value(Some("seven"))?;
    assert_eq!(version.value()?, None);
    match version.resolve_value()? {
        Some(Resolution::Unresolved(unresolved)) => {
            assert_eq!(unresolved.text(), "seven");
            assert!(unresolved.message().contains("seven"));
        }
        other => panic!("expected an unresolved value, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_element_references() -> Result<()> {
    let (_manager, _file, project) = setup()?;
    let modules = project.modules()?;
    let [core, app] = [&modules[0], &modules[1]];

    let on_app = app.invoke("get_dependencies", &[])?.into_elements()?.remove(0);
    let target = on_app.invoke("get_target", &[])?.into_value()?;
    assert_eq!(target, Some(Value::Element(core.clone())));
    assert_eq!(on_app.value_variants()?, vec!["core".to_string(), "app".to_string()]);

    let on_core = core.invoke("get_dependencies", &[])?.into_elements()?.remove(0);
    match on_core.resolve_value()? {
        Some(Resolution::Unresolved(unresolved)) => assert_eq!(unresolved.message(), "No Module named 'log'"),
        other => panic!("expected an unresolved reference, got {:?}", other),
    }

    // Writing an element stores its presentable name
    on_core.set_value(Some(Value::Element(app.clone())))?;
    assert_eq!(on_core.string_value()?.as_deref(), Some("app"));
    Ok(())
}

#[test]
fn test_atomic_copy_into_mock_emits_one_event() -> Result<()> {
    let (manager, _file, project) = setup()?;
    let core = project.modules()?.remove(0);
    let mock = manager.create_mock_element(&TypeKey::new("Module"))?;
    assert!(!mock.exists()?);

    let events = record_events(&manager);
    manager.run_atomic_change(|| mock.copy_from(&core, &NeverCanceled))?;

    assert_eq!(events.lock().len(), 1);
    assert_eq!(attribute(&mock, "get_id")?.as_deref(), Some("core"));
    let source = mock.invoke("get_source", &[])?.into_element()?;
    assert_eq!(source.string_value()?.as_deref(), Some("src/core"));
    let dependencies = mock.invoke("get_dependencies", &[])?.into_elements()?;
    assert_eq!(dependencies.len(), 1);
    assert_eq!(dependencies[0].string_value()?.as_deref(), Some("log"));

    let text = manager.serialize_file(mock.file_id())?;
    assert!(text.starts_with(r#"<module id="core">"#));
    assert!(text.contains("<dependency>log</dependency>"));
    Ok(())
}

#[test]
fn test_canceled_copy_rolls_back() -> Result<()> {
    let (manager, _file, project) = setup()?;
    let core = project.modules()?.remove(0);
    let mock = manager.create_mock_element(&TypeKey::new("Module"))?;
    let events = record_events(&manager);

    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    let cancel = move || counter.fetch_add(1, Ordering::SeqCst) >= 3;
    let result = mock.copy_from(&core, &cancel);

    assert!(matches!(result, Err(DomError::Canceled)));
    assert!(polls.load(Ordering::SeqCst) > 3);
    assert!(!mock.exists()?);
    assert_eq!(attribute(&mock, "get_id")?, None);
    assert!(events.lock().is_empty());
    assert_eq!(manager.serialize_file(mock.file_id())?, "");
    Ok(())
}

#[test]
fn test_copy_into_own_subtree_is_rejected() -> Result<()> {
    let (_manager, _file, project) = setup()?;
    let core = project.modules()?.remove(0);
    let result = core.copy_from(project.element(), &NeverCanceled);
    assert!(matches!(result, Err(DomError::InvalidArgument { .. })));
    Ok(())
}

#[test]
fn test_stub_and_tree_agree() -> Result<()> {
    init_tracing();
    let manager = DomManager::new();
    manager.register_type(
        TypeDeclaration::builder("Root")
            .collection("get_items", "item", "Item")
            .build(),
    );
    manager.register_type(TypeDeclaration::builder("Item").attribute("get_id", "id", ValueType::String).build());
    manager.register_file_description(DomFileDescription::new("Root", "root"));
    let file = manager.open_file_lazy("/work/items.xml", r#"<root><item id="a"/><item id="b"/></root>"#)?;

    let root = manager
        .get_file_element(file, &TypeKey::new("Root"))?
        .ok_or_else(|| anyhow::anyhow!("no root"))?;
    let ids = |items: &[DomElement]| -> Result<Vec<Option<String>>> {
        items.iter().map(|i| attribute(i, "get_id")).collect()
    };

    let from_stub = root.invoke("get_items", &[])?.into_elements()?;
    assert_eq!(ids(&from_stub)?, vec![Some("a".to_string()), Some("b".to_string())]);
    assert!(!manager.read_file(file, |f| f.is_tree_loaded())?);

    // Asking for the tag forces the tree
    assert!(from_stub[0].xml_tag()?.is_some());
    assert!(manager.read_file(file, |f| f.is_tree_loaded())?);

    let from_tree = root.invoke("get_items", &[])?.into_elements()?;
    assert_eq!(ids(&from_tree)?, ids(&from_stub)?);
    assert_eq!(from_tree, from_stub);
    Ok(())
}

#[test]
fn test_persisted_stub_round_trip() -> Result<()> {
    init_tracing();
    let source = r#"<root><item id="a"/></root>"#;
    let stub = markbind_dom::MarkupFile::lazy("/work/persisted.xml", source)?
        .stub()
        .map(|s| s.to_bytes())
        .ok_or_else(|| anyhow::anyhow!("no stub"))??;

    let manager = DomManager::new();
    manager.register_type(TypeDeclaration::builder("Root").collection("get_items", "item", "Item").build());
    manager.register_type(TypeDeclaration::builder("Item").attribute("get_id", "id", ValueType::String).build());
    manager.register_file_description(DomFileDescription::new("Root", "root"));
    let stub = markbind_dom::FileStub::from_bytes(&stub)?.ok_or_else(|| anyhow::anyhow!("stub format changed"))?;
    let file = manager.open_file_with_stub("/work/persisted.xml", source, stub)?;

    let root = manager
        .get_file_element(file, &TypeKey::new("Root"))?
        .ok_or_else(|| anyhow::anyhow!("no root"))?;
    let items = root.invoke("get_items", &[])?.into_elements()?;
    assert_eq!(attribute(&items[0], "get_id")?.as_deref(), Some("a"));
    assert!(!manager.read_file(file, |f| f.is_tree_loaded())?);
    Ok(())
}

#[test]
fn test_dynamic_children() -> Result<()> {
    let (manager, file, project) = setup()?;
    let static_count = project.element().static_children_descriptions()?.len();

    manager.register_extender("Project", |_: &ExtensionContext, registrar: &mut DomExtensionsRegistrar| {
        registrar.register_collection_child("extra", "Module");
    });
    manager.edit_file(file, |f| {
        let root = f.root_tag().unwrap_or_else(|| unreachable!());
        let extra = f.add_child(root, "extra")?;
        f.set_attribute(extra, "id", Some("x")).map(|_| ())
    })?;

    assert_eq!(project.element().children_descriptions()?.len(), static_count + 1);
    assert_eq!(project.element().static_children_descriptions()?.len(), static_count);

    let extras = project.element().children_named("extra")?;
    assert_eq!(extras.len(), 1);
    assert_eq!(attribute(&extras[0], "get_id")?.as_deref(), Some("x"));

    let added = project.element().add_child_named("extra")?;
    assert_eq!(project.element().children_named("extra")?.len(), 2);
    assert_eq!(added.parent()?.as_ref(), Some(project.element()));

    // Contributed names are not custom children
    assert_eq!(project.plugins()?.len(), 1);
    Ok(())
}

#[test]
fn test_read_only_file_refuses_writes() -> Result<()> {
    let (manager, file, project) = setup()?;
    let events = record_events(&manager);
    manager.set_read_only(file, true)?;

    project.name()?.set_string_value(Some("changed"))?;
    assert_eq!(project.name()?.string_value()?.as_deref(), Some("demo"));
    assert!(events.lock().is_empty());

    let added = project.element().invoke("add_module", &[]);
    assert!(matches!(added, Err(DomError::Tree(_))));
    assert_eq!(project.modules()?.len(), 2);
    Ok(())
}

#[test]
fn test_stable_element_survives_reload() -> Result<()> {
    let (manager, _file, project) = setup()?;
    let app = project.modules()?.remove(1);
    let stable = manager.create_stable_copy(&app)?;
    assert_eq!(stable.get()?.as_ref(), Some(&app));

    manager.reload_file("/work/project.xml", &PROJECT.replace(r#"id="app""#, r#"id="web""#))?;
    assert!(!app.is_valid());

    let recovered = stable.get()?.ok_or_else(|| anyhow::anyhow!("stable element was lost"))?;
    assert_eq!(attribute(&recovered, "get_id")?.as_deref(), Some("web"));
    assert!(stable.is_valid());

    let opener = manager.clone();
    let custom = manager.create_stable(move || {
        let file = opener.open_file("/work/other.xml", "<project/>").ok()?;
        opener.get_file_element(file, &TypeKey::new("Project")).ok().flatten()
    });
    assert!(custom.get()?.is_some());
    assert!(custom.path().is_none());
    Ok(())
}

#[test]
fn test_mock_elements() -> Result<()> {
    let (manager, _file, _project) = setup()?;
    let settings = manager.create_mock_element(&TypeKey::new("Settings"))?;
    let mode = settings.invoke("get_mode", &[])?.into_element()?;

    mode.set_value(Some(Value::Enum("release".to_string())))?;
    assert_eq!(mode.string_value()?.as_deref(), Some("release"));
    assert_eq!(manager.serialize_file(settings.file_id())?, "<settings mode=\"release\"/>\n");

    let other = manager.create_mock_element(&TypeKey::new("Settings"))?;
    assert_ne!(other.file_id(), settings.file_id());

    let missing = manager.create_mock_element(&TypeKey::new("Unknown"));
    assert!(matches!(missing, Err(e) if e.is_config()));
    Ok(())
}

#[test]
fn test_unregistering_description_evicts_root() -> Result<()> {
    init_tracing();
    let manager = DomManager::new();
    register_types(&manager);
    let id = manager.register_file_description(DomFileDescription::new("Project", "project"));
    let file = manager.open_file("/work/project.xml", PROJECT)?;
    let root = manager
        .get_file_element(file, &TypeKey::new("Project"))?
        .ok_or_else(|| anyhow::anyhow!("no root"))?;
    assert!(root.is_valid());

    assert!(manager.unregister_file_description(id));
    assert!(!root.is_valid());
    assert!(manager.get_file_element(file, &TypeKey::new("Project"))?.is_none());
    Ok(())
}

#[test]
fn test_get_dom_element_for_attribute() -> Result<()> {
    let (manager, file, project) = setup()?;
    let app = project.modules()?.remove(1);

    let node = manager.read_file(file, |f| {
        let root = f.root_tag()?;
        let tag = f
            .sub_tags(root)
            .into_iter()
            .find(|t| f.attribute_value(*t, "id") == Some("app"))?;
        f.attribute(tag, "id")
    })?;
    let node = node.ok_or_else(|| anyhow::anyhow!("no id attribute"))?;

    let element = manager
        .get_dom_element(file, node)?
        .ok_or_else(|| anyhow::anyhow!("attribute has no element"))?;
    assert!(element.is_attribute());
    assert_eq!(element, app.invoke("get_id", &[])?.into_element()?);
    assert_eq!(element.parent()?.as_ref(), Some(&app));

    let description = manager
        .find_children_description(project.element(), manager.read_file(file, |f| f.parent(node))?.unwrap_or(node))?
        .ok_or_else(|| anyhow::anyhow!("module tag has no description"))?;
    assert_eq!(description.kind(), DescriptionKind::Collection);
    Ok(())
}

#[test]
fn test_undefine_semantics() -> Result<()> {
    let (_manager, _file, project) = setup()?;

    // Collection children become invalid
    let core = project.modules()?.remove(0);
    let dependency = core.invoke("get_dependencies", &[])?.into_elements()?.remove(0);
    dependency.undefine()?;
    assert!(!dependency.is_valid());
    assert!(core.invoke("get_dependencies", &[])?.into_elements()?.is_empty());

    // Fixed children and attributes stay usable
    let settings = project.settings()?;
    settings.undefine()?;
    assert!(settings.is_valid());
    assert!(!settings.exists()?);
    assert_eq!(project.settings()?, settings);

    let version = project.version()?;
    version.undefine()?;
    assert!(version.is_valid());
    assert_eq!(version.string_value()?, None);

    // Writing through a virtual fixed child recreates its tag
    let mode = settings.invoke("get_mode", &[])?.into_element()?;
    mode.set_string_value(Some("release"))?;
    assert!(settings.exists()?);
    Ok(())
}

#[test]
fn test_indexed_insert() -> Result<()> {
    let (manager, file, project) = setup()?;
    let events = record_events(&manager);

    let added = project.element().invoke("add_module", &[Value::Integer(0)])?.into_element()?;
    let modules = project.modules()?;
    assert_eq!(modules.len(), 3);
    assert_eq!(modules[0], added);
    assert_eq!(attribute(&modules[1], "get_id")?.as_deref(), Some("core"));
    assert_eq!(events.lock().as_slice(), &[(DomEventKind::Structural, "Project".to_string())]);

    let out_of_bounds = project.element().invoke("add_module", &[Value::Integer(9)]);
    assert!(matches!(out_of_bounds, Err(DomError::InvalidArgument { .. })));

    // New tags land after the settings tag, in schema order
    let names = manager.read_file(file, |f| {
        f.root_tag()
            .map(|root| f.sub_tags(root).into_iter().filter_map(|t| f.name(t).map(str::to_string)).collect::<Vec<_>>())
            .unwrap_or_default()
    })?;
    assert_eq!(names, vec!["settings", "module", "module", "module", "plugin-lint"]);
    Ok(())
}

#[test]
fn test_composite_children() -> Result<()> {
    init_tracing();
    let manager = DomManager::new();
    manager.register_type(
        TypeDeclaration::builder("Group")
            .composite("get_members", &["a", "b"], "Member")
            .composite_adder("add_member", &["a", "b"], "b", "Member")
            .build(),
    );
    manager.register_type(TypeDeclaration::builder("Member").value("get_text", ValueType::String).build());
    manager.register_file_description(DomFileDescription::new("Group", "group"));
    let file = manager.open_file("/work/group.xml", "<group><a>1</a><b>2</b><a>3</a></group>")?;
    let group = manager
        .get_file_element(file, &TypeKey::new("Group"))?
        .ok_or_else(|| anyhow::anyhow!("no group"))?;

    let texts = |members: Vec<DomElement>| -> Result<Vec<String>> {
        members
            .iter()
            .map(|m| Ok(m.string_value()?.unwrap_or_default()))
            .collect()
    };
    assert_eq!(texts(group.invoke("get_members", &[])?.into_elements()?)?, vec!["1", "2", "3"]);

    let added = group.invoke("add_member", &[Value::Integer(1)])?.into_element()?;
    added.set_string_value(Some("new"))?;
    assert_eq!(
        texts(group.invoke("get_members", &[])?.into_elements()?)?,
        vec!["1", "new", "2", "3"]
    );
    Ok(())
}

#[test]
fn test_custom_children() -> Result<()> {
    let (_manager, _file, project) = setup()?;
    let plugins = project.plugins()?;
    assert_eq!(plugins.len(), 1);
    assert_eq!(attribute(&plugins[0], "get_level")?.as_deref(), Some("strict"));
    assert_eq!(plugins[0].debug_path(), "Project/<Plugin>[0]");
    Ok(())
}

#[test]
fn test_listeners_may_call_back_into_the_engine() -> Result<()> {
    let (manager, _file, project) = setup()?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener = manager.add_change_listener(move |event| {
        let name = event.element().presentable_name().ok().flatten();
        sink.lock().push(name);
    });

    project.name()?.set_string_value(Some("renamed"))?;
    assert_eq!(seen.lock().as_slice(), &[Some("renamed".to_string())]);

    assert!(manager.remove_change_listener(listener));
    project.name()?.set_string_value(Some("again"))?;
    assert_eq!(seen.lock().len(), 1);
    Ok(())
}

#[test]
fn test_handles_are_shared_across_threads() -> Result<()> {
    let (_manager, _file, project) = setup()?;
    let modules = project.modules()?;

    let handles: Vec<_> = modules
        .into_iter()
        .map(|module| std::thread::spawn(move || module.presentable_name().ok().flatten()))
        .collect();
    let names: Vec<Option<String>> = handles.into_iter().map(|h| h.join().unwrap_or(None)).collect();
    assert_eq!(names, vec![Some("core".to_string()), Some("app".to_string())]);
    Ok(())
}

#[test]
fn test_closed_file_invalidates_handles() -> Result<()> {
    let (manager, file, project) = setup()?;
    assert!(manager.close_file(file));
    assert_eq!(project.element().check_validity().as_deref(), Some("its file was closed"));
    Ok(())
}

#[test]
fn test_renamed_root_tag_is_matched_again() -> Result<()> {
    let (manager, file, project) = setup()?;

    manager.reparse_file(file, "<unrelated><x/></unrelated>")?;
    assert!(!project.element().is_valid());
    assert!(manager.get_file_element(file, &TypeKey::new("Project"))?.is_none());

    manager.reparse_file(file, PROJECT)?;
    let again = manager
        .file_element::<Project>(file)?
        .ok_or_else(|| anyhow::anyhow!("project root did not match after the rename was undone"))?;
    assert_eq!(attribute(again.element(), "get_name")?.as_deref(), Some("demo"));
    Ok(())
}

#[test]
fn test_partially_failed_external_edit_is_reported() -> Result<()> {
    let (manager, file, project) = setup()?;
    let events = record_events(&manager);

    let result = manager.edit_file(file, |f| {
        let root = f.root_tag().unwrap_or_else(|| unreachable!());
        f.add_child(root, "module")?;
        f.add_child(root, "bad name")
    });

    assert!(matches!(result, Err(DomError::Tree(_))));
    assert_eq!(project.modules()?.len(), 3);
    assert_eq!(events.lock().as_slice(), &[(DomEventKind::External, "Project".to_string())]);

    // Nothing stale is left in the journal for the next engine write
    project.name()?.set_string_value(Some("after"))?;
    assert_eq!(events.lock().len(), 2);
    assert_eq!(events.lock()[1].0, DomEventKind::ValueChanged);
    Ok(())
}

#[test]
fn test_overlapping_custom_descriptions_share_no_tag() -> Result<()> {
    init_tracing();
    let manager = DomManager::new();
    manager.register_type(
        TypeDeclaration::builder("Root")
            .custom_children("get_a", "A", CustomMatcher::any())
            .custom_children("get_b", "B", CustomMatcher::any())
            .build(),
    );
    manager.register_type(TypeDeclaration::builder("A").value("get_text", ValueType::String).build());
    manager.register_type(TypeDeclaration::builder("B").value("get_text", ValueType::String).build());
    manager.register_file_description(DomFileDescription::new("Root", "root"));
    let file = manager.open_file("/work/root.xml", "<root><x>1</x></root>")?;
    let root = manager
        .get_file_element(file, &TypeKey::new("Root"))?
        .ok_or_else(|| anyhow::anyhow!("no root"))?;

    let a = root.invoke("get_a", &[])?.into_elements()?;
    let b = root.invoke("get_b", &[])?.into_elements()?;
    assert_eq!(a.len(), 1);
    assert!(b.is_empty());
    assert_eq!(a[0].string_value()?.as_deref(), Some("1"));
    assert_eq!(root.invoke("get_a", &[])?.into_elements()?, a);
    Ok(())
}

#[test]
fn test_undefined_children_release_their_slots() -> Result<()> {
    init_tracing();
    let manager = DomManager::new();
    manager.register_type(
        TypeDeclaration::builder("Bag")
            .collection("get_items", "item", "Item")
            .adder("add_item", "item", "Item")
            .build(),
    );
    manager.register_type(TypeDeclaration::builder("Item").value("get_text", ValueType::String).build());
    manager.register_file_description(DomFileDescription::new("Bag", "bag"));
    let file = manager.open_file("/work/bag.xml", "<bag/>")?;
    let bag = manager
        .get_file_element(file, &TypeKey::new("Bag"))?
        .ok_or_else(|| anyhow::anyhow!("no bag"))?;

    let first = bag.invoke("add_item", &[])?.into_element()?;
    first.undefine()?;
    for _ in 0..1000 {
        bag.invoke("add_item", &[])?.into_element()?.undefine()?;
    }
    assert!(manager.handler_slots(file)? <= 3);

    let latest = bag.invoke("add_item", &[])?.into_element()?;
    assert!(latest.is_valid());
    assert!(!first.is_valid());
    assert_ne!(first, latest);
    assert_eq!(bag.invoke("get_items", &[])?.into_elements()?, vec![latest]);
    Ok(())
}

#[test]
fn test_equal_handles_hash_alike() -> Result<()> {
    use std::collections::HashSet;

    let (_manager, _file, project) = setup()?;
    let mut seen = HashSet::new();
    for module in project.modules()? {
        seen.insert(module);
    }
    for module in project.modules()? {
        seen.insert(module);
    }
    assert_eq!(seen.len(), 2);
    assert!(seen.contains(&project.modules()?[1]));
    assert!(!seen.contains(&project.settings()?));
    Ok(())
}
