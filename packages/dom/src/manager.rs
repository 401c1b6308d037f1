//! # Manager
//!
//! [`DomManager`] is the entry point of the engine: it owns the registered
//! types, converters and file descriptions, the open files, and the change
//! listeners. All engine state sits behind one lock. Operations run with the
//! lock held and queue their change events; the events are delivered to
//! listeners once the lock is released, so listeners may call back into the
//! engine freely.

use crate::config::DomConfig;
use crate::converter::{Converter, ConverterRef, ResolvingConverter};
use crate::declaration::{TypeDeclaration, TypeKey};
use crate::description::ChildDescription;
use crate::dynamic::DomExtender;
use crate::element::DomElement;
use crate::error::{DomError, DomResult};
use crate::events::{DomEvent, DomEventKind, ListenerId};
use crate::interface::DomInterface;
use crate::root::{DescriptionId, DomFileDescription};
use crate::stable::StableElement;
use crate::state::{DomState, ElementRef};
use crate::value::ValueType;
use markbind_tree::{serialize, FileId, FileStub, MarkupFile, NodeId, TreeResult};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument};

type Listener = Arc<dyn Fn(&DomEvent) + Send + Sync>;

pub(crate) struct Shared {
    pub state: Mutex<DomState>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl Shared {
    fn fire(&self, events: Vec<DomEvent>, log_events: bool) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<Listener> = self.listeners.read().iter().map(|(_, l)| l.clone()).collect();
        for event in &events {
            if log_events {
                debug!("{} event on {}", event.kind(), event.element().debug_path());
            }
            for listener in &listeners {
                listener(event);
            }
        }
    }
}

/// Run `f` under the engine lock, then deliver the events it produced
pub(crate) fn run<R>(shared: &Arc<Shared>, f: impl FnOnce(&mut DomState) -> DomResult<R>) -> DomResult<R> {
    let (result, events, log_events) = {
        let mut state = shared.state.lock();
        state.reclaim_handlers();
        let result = f(&mut state);
        let events = state.changes.take_ready();
        (result, events, state.config.log_events)
    };
    shared.fire(events, log_events);
    result
}

/// Closes an atomic scope even when the scope's closure panics
struct AtomicScope<'a>(&'a Arc<Shared>);

impl Drop for AtomicScope<'_> {
    fn drop(&mut self) {
        let _ = run(self.0, |state| {
            state.end_atomic();
            Ok(())
        });
    }
}

#[derive(Clone)]
pub struct DomManager {
    shared: Arc<Shared>,
}

impl Default for DomManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DomManager {
    pub fn new() -> Self {
        Self::with_config(DomConfig::default())
    }

    pub fn with_config(config: DomConfig) -> Self {
        let shared = Arc::new_cyclic(|weak| Shared {
            state: Mutex::new(DomState::new(weak.clone(), config)),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        });
        Self { shared }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    fn run<R>(&self, f: impl FnOnce(&mut DomState) -> DomResult<R>) -> DomResult<R> {
        run(&self.shared, f)
    }

    fn wrap(&self, r: Option<ElementRef>) -> Option<DomElement> {
        r.map(|r| DomElement::new(self.shared.clone(), r))
    }

    pub fn config(&self) -> DomConfig {
        self.shared.state.lock().config.clone()
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Register or replace a type. Schemas are rebuilt lazily on next use.
    pub fn register_type(&self, declaration: TypeDeclaration) {
        let mut state = self.shared.state.lock();
        debug!("Registering type {}", declaration.key());
        state.types.register(declaration);
        state.invocations.clear();
    }

    pub fn register<T: DomInterface>(&self) {
        self.register_type(T::declaration());
    }

    /// Contribute dynamic children to every element of `type_name` and its
    /// subtypes
    pub fn register_extender(&self, type_name: &str, extender: impl DomExtender + 'static) {
        let mut state = self.shared.state.lock();
        state.types.register_extender(TypeKey::new(type_name), Arc::new(extender));
    }

    /// Register a converter that operations select by id
    pub fn register_converter(&self, id: &str, converter: impl Converter + 'static) {
        let mut state = self.shared.state.lock();
        state.converters.register(id, ConverterRef::Plain(Arc::new(converter)));
    }

    pub fn register_resolving_converter(&self, id: &str, converter: impl ResolvingConverter + 'static) {
        let mut state = self.shared.state.lock();
        state.converters.register(id, ConverterRef::Resolving(Arc::new(converter)));
    }

    /// Default converter for every value of `value_type`
    pub fn register_type_converter(&self, value_type: &ValueType, converter: ConverterRef) {
        let mut state = self.shared.state.lock();
        state.converters.register_for_type(value_type, converter);
    }

    pub fn register_file_description(&self, description: DomFileDescription) -> DescriptionId {
        let mut state = self.shared.state.lock();
        info!("Registering file description for <{}>", description.root_tag_name());
        state.roots.register(description)
    }

    /// Unregister a description. Roots matched through it are evicted on
    /// their next access.
    pub fn unregister_file_description(&self, id: DescriptionId) -> bool {
        self.shared.state.lock().roots.unregister(id)
    }

    // ---------------------------------------------------------------------
    // Files
    // ---------------------------------------------------------------------

    /// Open a file with its tree parsed up front
    pub fn open_file(&self, path: &str, source: &str) -> DomResult<FileId> {
        let file = MarkupFile::parse(path, source)?;
        self.run(|state| Ok(state.install_file(file, false)))
    }

    /// Open a file from its stub only; the tree is parsed on first need
    pub fn open_file_lazy(&self, path: &str, source: &str) -> DomResult<FileId> {
        let file = MarkupFile::lazy(path, source)?;
        self.run(|state| Ok(state.install_file(file, false)))
    }

    /// Open a file from a previously persisted stub
    pub fn open_file_with_stub(&self, path: &str, source: &str, stub: FileStub) -> DomResult<FileId> {
        let file = MarkupFile::from_persisted_stub(path, source, stub);
        self.run(|state| Ok(state.install_file(file, false)))
    }

    /// Replace an open file with a new generation. Every handle into the old
    /// one becomes invalid.
    #[instrument(skip(self, source))]
    pub fn reload_file(&self, path: &str, source: &str) -> DomResult<FileId> {
        let file = MarkupFile::parse(path, source)?;
        self.run(|state| {
            let id = state.install_file(file, false);
            if let Some(root) = state.file_root(id)? {
                state.record_change(root, DomEventKind::External);
            }
            Ok(id)
        })
    }

    /// Reparse a file in place. Handles re-locate their tags by logical path.
    #[instrument(skip(self, source), fields(file = %file))]
    pub fn reparse_file(&self, file: FileId, source: &str) -> DomResult<()> {
        self.run(|state| {
            let fs = state.file_state_mut(file)?;
            fs.file.reparse(source)?;
            fs.file.drain_changes();
            fs.tree_epoch += 1;
            state.record_external(file)
        })
    }

    /// Edit a file's tree directly, bypassing the engine. The cached root
    /// is notified once if anything changed, even when `f` fails after some
    /// of its edits went through.
    pub fn edit_file<R>(&self, file: FileId, f: impl FnOnce(&mut MarkupFile) -> TreeResult<R>) -> DomResult<R> {
        self.run(|state| {
            state.ensure_tree(file)?;
            let fs = state.file_state_mut(file)?;
            let result = f(&mut fs.file);
            if !fs.file.drain_changes().is_empty() {
                state.record_external(file)?;
            }
            Ok(result?)
        })
    }

    pub fn read_file<R>(&self, file: FileId, f: impl FnOnce(&MarkupFile) -> R) -> DomResult<R> {
        self.run(|state| Ok(f(&state.file_state(file)?.file)))
    }

    /// Handler records allocated for a file, slots awaiting reuse included
    pub fn handler_slots(&self, file: FileId) -> DomResult<usize> {
        self.run(|state| Ok(state.file_state(file)?.handlers.len()))
    }

    pub fn close_file(&self, file: FileId) -> bool {
        self.shared.state.lock().files.remove(&file).is_some()
    }

    pub fn set_read_only(&self, file: FileId, read_only: bool) -> DomResult<()> {
        self.run(|state| {
            state.file_state_mut(file)?.file.set_read_only(read_only);
            Ok(())
        })
    }

    pub fn serialize_file(&self, file: FileId) -> DomResult<String> {
        self.run(|state| {
            state.ensure_tree(file)?;
            Ok(serialize(&state.file_state(file)?.file))
        })
    }

    // ---------------------------------------------------------------------
    // Elements
    // ---------------------------------------------------------------------

    /// Root element of a file, if it matches a description and its type can
    /// be used as `declared`
    pub fn get_file_element(&self, file: FileId, declared: &TypeKey) -> DomResult<Option<DomElement>> {
        let root = self.run(|state| state.file_element(file, declared))?;
        Ok(self.wrap(root))
    }

    pub fn file_element<T: DomInterface>(&self, file: FileId) -> DomResult<Option<T>> {
        Ok(self.get_file_element(file, &T::type_key())?.map(T::wrap))
    }

    /// Element bound to a tag or attribute node of a file
    pub fn get_dom_element(&self, file: FileId, node: NodeId) -> DomResult<Option<DomElement>> {
        let r = self.run(|state| state.get_dom_element(file, node))?;
        Ok(self.wrap(r))
    }

    /// Description under which `node` would be a child of `parent`
    pub fn find_children_description(&self, parent: &DomElement, node: NodeId) -> DomResult<Option<Arc<ChildDescription>>> {
        self.check_owned(parent)?;
        let parent = parent.reference();
        self.run(|state| state.find_children_description(parent, node))
    }

    /// Element of a fresh scratch file, detached from every open file
    pub fn create_mock_element(&self, type_key: &TypeKey) -> DomResult<DomElement> {
        let r = self.run(|state| state.create_mock(type_key))?;
        Ok(DomElement::new(self.shared.clone(), r))
    }

    pub fn mock<T: DomInterface>(&self) -> DomResult<T> {
        Ok(T::wrap(self.create_mock_element(&T::type_key())?))
    }

    fn check_owned(&self, element: &DomElement) -> DomResult<()> {
        if Arc::ptr_eq(&self.shared, element.shared()) {
            Ok(())
        } else {
            Err(DomError::ForeignElement)
        }
    }

    // ---------------------------------------------------------------------
    // Changes
    // ---------------------------------------------------------------------

    pub fn add_change_listener(&self, listener: impl Fn(&DomEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed));
        self.shared.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_change_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Run `f` as one change. Events of the changes made inside collapse
    /// into one event per file, delivered when the outermost scope ends.
    pub fn run_atomic_change<R>(&self, f: impl FnOnce() -> R) -> R {
        self.shared.state.lock().begin_atomic();
        let _scope = AtomicScope(&self.shared);
        f()
    }

    // ---------------------------------------------------------------------
    // Stable handles
    // ---------------------------------------------------------------------

    /// Handle that follows `element`'s logical path across reloads
    pub fn create_stable_copy(&self, element: &DomElement) -> DomResult<StableElement> {
        self.check_owned(element)?;
        let r = element.reference();
        let path = self.run(|state| {
            state.check_access(r)?;
            state.path_of(r)
        })?;
        Ok(StableElement::from_path(self.shared.clone(), path, Some(element.clone())))
    }

    /// Handle recovered through `recover` whenever the last result went stale
    pub fn create_stable(&self, recover: impl Fn() -> Option<DomElement> + Send + Sync + 'static) -> StableElement {
        StableElement::from_closure(self.shared.clone(), Arc::new(recover))
    }
}

impl DomState {
    /// Notify the cached root of an edit made outside the engine
    fn record_external(&mut self, file: FileId) -> DomResult<()> {
        let fs = self.file_state(file)?;
        if let Some(root) = &fs.root {
            let r = ElementRef {
                file,
                generation: fs.generation,
                handler: root.handler,
            };
            self.record_change(r, DomEventKind::External);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_listener_registration() {
        let manager = DomManager::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = manager.add_change_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(manager.remove_change_listener(id));
        assert!(!manager.remove_change_listener(id));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_atomic_scope_closes_on_return() {
        let manager = DomManager::new();
        let value = manager.run_atomic_change(|| manager.run_atomic_change(|| 7));
        assert_eq!(value, 7);
        assert!(!manager.shared.state.lock().changes.in_atomic());
    }

    #[test]
    fn test_unknown_file() {
        let manager = DomManager::new();
        let missing = markbind_tree::get_file_id("/missing.xml");
        assert!(matches!(manager.serialize_file(missing), Err(DomError::FileNotFound(_))));
        assert!(!manager.close_file(missing));
    }
}
