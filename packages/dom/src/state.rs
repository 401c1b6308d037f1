//! # Engine state
//!
//! Everything the manager guards with its lock: registered types and
//! converters, file descriptions, open files with their handler arenas, and
//! the change tracker.
//!
//! ## Reconciliation
//!
//! A handler record remembers the file [`Stamp`] it was last checked at.
//! When the stamp moved, [`DomState::refresh`] reconciles the record with
//! the tree before the handle is used:
//!
//! ```text
//! Physical(node) ──node deleted──→ Virtual (attribute, fixed)  |  invalid (collection, custom)
//!      │
//!      └──node replaced by reparse──→ re-located by (parent, description, ordinal)
//!
//! Virtual ──node appeared──→ Physical
//! Stub    ──tree loaded───→ Physical / Virtual / invalid
//! ```

use crate::changes::ChangeTracker;
use crate::config::DomConfig;
use crate::converter::ConverterRegistry;
use crate::description::{DescriptionKey, DescriptionKind};
use crate::element::DomElement;
use crate::error::{DomError, DomResult};
use crate::handler::{HandlerArena, HandlerId, HandlerKind, HandlerRecord, Stamp};
use crate::invocation::InvocationCaches;
use crate::manager::Shared;
use crate::name::NamespacePolicies;
use crate::root::{DescriptionId, RootRegistry};
use crate::schema::TypeRegistry;
use crate::strategy::ParentStrategy;
use markbind_tree::{FileId, MarkupFile, NodeId, NodeState, ScratchPaths, StubId};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace};

const DISCARDED: &str = "it was invalidated and discarded";

/// Handle address: file, file generation and handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ElementRef {
    pub file: FileId,
    pub generation: u32,
    pub handler: HandlerId,
}

impl ElementRef {
    pub fn with(&self, handler: HandlerId) -> Self {
        Self { handler, ..*self }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CachedRoot {
    pub handler: HandlerId,
    /// `None` for mock files, which match no description
    pub description: Option<DescriptionId>,
    /// Local name of the root tag the description was matched against
    pub tag_name: Option<String>,
    pub policies: Arc<NamespacePolicies>,
}

pub(crate) struct FileState {
    pub file: MarkupFile,
    pub generation: u32,
    pub tree_epoch: u32,
    pub handlers: HandlerArena,
    pub root: Option<CachedRoot>,
    pub mock: bool,
}

impl FileState {
    pub fn new(file: MarkupFile, generation: u32) -> Self {
        Self {
            file,
            generation,
            tree_epoch: 0,
            handlers: HandlerArena::default(),
            root: None,
            mock: false,
        }
    }

    pub fn stamp(&self) -> Stamp {
        Stamp {
            modification_count: self.file.modification_count(),
            tree_epoch: self.tree_epoch,
        }
    }

    pub fn policies(&self) -> Arc<NamespacePolicies> {
        self.root
            .as_ref()
            .map(|r| r.policies.clone())
            .unwrap_or_default()
    }

    pub fn slot_handler(&self, node: NodeId) -> Option<HandlerId> {
        self.file.handler_slot(node).map(HandlerId::from_slot)
    }
}

/// Where the children of a handle are read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Tree(NodeId),
    Stub(StubId),
    Missing,
}

pub(crate) struct DomState {
    pub shared: Weak<Shared>,
    pub config: DomConfig,
    pub types: TypeRegistry,
    pub invocations: InvocationCaches,
    pub converters: ConverterRegistry,
    pub roots: RootRegistry,
    pub files: HashMap<FileId, FileState>,
    pub changes: ChangeTracker,
    pub scratch: ScratchPaths,
    next_generation: u32,
}

impl DomState {
    pub fn new(shared: Weak<Shared>, config: DomConfig) -> Self {
        Self {
            shared,
            config,
            types: TypeRegistry::default(),
            invocations: InvocationCaches::default(),
            converters: ConverterRegistry::default(),
            roots: RootRegistry::default(),
            files: HashMap::new(),
            changes: ChangeTracker::default(),
            scratch: ScratchPaths::new(),
            next_generation: 0,
        }
    }

    /// Install a file under a fresh generation, replacing any previous one
    pub fn install_file(&mut self, file: MarkupFile, mock: bool) -> FileId {
        self.next_generation += 1;
        let id = file.id();
        if self.files.contains_key(&id) {
            debug!("Replacing open file {}", file.path());
        }
        let mut state = FileState::new(file, self.next_generation);
        state.mock = mock;
        self.files.insert(id, state);
        id
    }

    pub fn file_state(&self, file: FileId) -> DomResult<&FileState> {
        self.files.get(&file).ok_or(DomError::FileNotFound(file))
    }

    pub fn file_state_mut(&mut self, file: FileId) -> DomResult<&mut FileState> {
        self.files.get_mut(&file).ok_or(DomError::FileNotFound(file))
    }

    pub fn record(&self, r: ElementRef) -> DomResult<&HandlerRecord> {
        let fs = self.file_state(r.file)?;
        if fs.generation != r.generation {
            return Err(DomError::InvalidElement {
                element: format!("{}#{}", r.file, r.handler.index()),
                reason: "its file was reloaded".to_string(),
            });
        }
        match fs.handlers.get(r.handler) {
            Some(record) => Ok(record),
            None if fs.handlers.is_discarded(r.handler) => Err(DomError::InvalidElement {
                element: format!("{}#{}", r.file, r.handler.index()),
                reason: DISCARDED.to_string(),
            }),
            None => Err(DomError::InvariantViolation(format!(
                "unknown handler {} in file {}",
                r.handler.index(),
                r.file
            ))),
        }
    }

    pub fn record_mut(&mut self, r: ElementRef) -> DomResult<&mut HandlerRecord> {
        self.record(r)?;
        let fs = self.file_state_mut(r.file)?;
        fs.handlers
            .get_mut(r.handler)
            .ok_or_else(|| DomError::InvariantViolation(format!("unknown handler {}", r.handler.index())))
    }

    pub fn wrap(&self, r: ElementRef) -> DomResult<DomElement> {
        let shared = self.shared.upgrade().ok_or(DomError::ManagerDropped)?;
        Ok(DomElement::new(shared, r))
    }

    pub fn wrap_all(&self, refs: Vec<ElementRef>) -> DomResult<Vec<DomElement>> {
        refs.into_iter().map(|r| self.wrap(r)).collect()
    }

    /// Materialize the tree of a stub-only file
    pub fn ensure_tree(&mut self, file: FileId) -> DomResult<()> {
        let fs = self.file_state_mut(file)?;
        if !fs.file.is_tree_loaded() {
            fs.file.load_tree()?;
            fs.tree_epoch += 1;
        }
        Ok(())
    }

    pub fn invalid_error(&self, r: ElementRef, reason: impl Into<String>) -> DomError {
        DomError::InvalidElement {
            element: self.debug_path(r),
            reason: reason.into(),
        }
    }

    // ---------------------------------------------------------------------
    // Strategy reconciliation
    // ---------------------------------------------------------------------

    /// Bring a record in line with the current tree
    pub fn refresh(&mut self, r: ElementRef) -> DomResult<()> {
        let stamp = self.file_state(r.file)?.stamp();
        let record = self.record(r)?;
        if record.invalid.is_some() || record.stamp == stamp {
            return Ok(());
        }
        let (kind, parent, strategy) = (record.kind, record.parent, record.strategy);

        if let Some(parent) = parent {
            self.refresh(r.with(parent))?;
        }
        if kind != HandlerKind::Root {
            self.reconcile(r, strategy)?;
        }

        let stamp = self.file_state(r.file)?.stamp();
        self.record_mut(r)?.stamp = stamp;
        Ok(())
    }

    fn reconcile(&mut self, r: ElementRef, strategy: ParentStrategy) -> DomResult<()> {
        let fs = self.file_state(r.file)?;
        let loaded = fs.file.is_tree_loaded();
        match strategy {
            ParentStrategy::Physical(node) => match fs.file.state(node) {
                NodeState::Alive => self.sync_ordinal(r, node),
                NodeState::Deleted => {
                    let always_present = self
                        .record(r)?
                        .description
                        .as_ref()
                        .is_some_and(|d| d.is_always_present());
                    if always_present {
                        self.unbind(r)?;
                        self.relocate(r, None)
                    } else {
                        self.invalidate(r, "its tag was deleted")
                    }
                }
                NodeState::Replaced => self.relocate(r, Some("its tag was replaced and no equivalent was found")),
            },
            ParentStrategy::Virtual => self.relocate(r, None),
            ParentStrategy::Stub(_) if loaded => self.relocate(r, Some("the loaded tree has no counterpart of its stub")),
            ParentStrategy::Stub(_) | ParentStrategy::Root => Ok(()),
        }
    }

    /// Look for the node at the record's logical path and bind to it. When
    /// there is none, fixed children and attributes become Virtual; other
    /// handles are invalidated with `reason`, or stay as they are without one.
    fn relocate(&mut self, r: ElementRef, reason: Option<&str>) -> DomResult<()> {
        let record = self.record(r)?;
        let (Some(parent), Some(description), ordinal) = (record.parent, record.description.clone(), record.ordinal) else {
            return Ok(());
        };

        let bindings = self.matching_children(r.with(parent), &description)?;
        match (bindings.get(ordinal).copied(), reason) {
            (Some(binding), _) => {
                trace!("Re-bound {} to {}", self.debug_path(r), binding);
                self.bind(r, binding)
            }
            (None, _) if description.is_always_present() => self.bind(r, ParentStrategy::Virtual),
            (None, Some(reason)) => self.invalidate(r, reason),
            (None, None) => Ok(()),
        }
    }

    /// Collection and custom children follow their node's position
    fn sync_ordinal(&mut self, r: ElementRef, node: NodeId) -> DomResult<()> {
        let record = self.record(r)?;
        let (Some(parent), Some(description)) = (record.parent, record.description.clone()) else {
            return Ok(());
        };
        if !matches!(description.kind(), DescriptionKind::Collection | DescriptionKind::Custom) {
            return Ok(());
        }
        let bindings = self.matching_children(r.with(parent), &description)?;
        match bindings.iter().position(|b| b.physical_node() == Some(node)) {
            Some(position) if position != self.record(r)?.ordinal => {
                self.file_state_mut(r.file)?.handlers.set_ordinal(r.handler, position);
                Ok(())
            }
            Some(_) => Ok(()),
            None => self.invalidate(r, "its tag no longer matches its description"),
        }
    }

    pub fn bind(&mut self, r: ElementRef, strategy: ParentStrategy) -> DomResult<()> {
        let fs = self.file_state_mut(r.file)?;
        let stamp = fs.stamp();
        if let Some(record) = fs.handlers.get_mut(r.handler) {
            record.strategy = strategy;
            record.stamp = stamp;
        }
        if let ParentStrategy::Physical(node) = strategy {
            fs.file.set_handler_slot(node, Some(r.handler.to_slot()));
        }
        Ok(())
    }

    /// Detach from the current node, releasing its slot
    pub fn unbind(&mut self, r: ElementRef) -> DomResult<()> {
        let fs = self.file_state_mut(r.file)?;
        let Some(record) = fs.handlers.get_mut(r.handler) else {
            return Ok(());
        };
        if let ParentStrategy::Physical(node) = record.strategy {
            if fs.file.handler_slot(node) == Some(r.handler.to_slot()) {
                fs.file.set_handler_slot(node, None);
            }
        }
        record.strategy = ParentStrategy::Virtual;
        Ok(())
    }

    pub fn invalidate(&mut self, r: ElementRef, reason: &str) -> DomResult<()> {
        debug!("Invalidating {}: {}", self.debug_path(r), reason);
        self.unbind(r)?;
        let fs = self.file_state_mut(r.file)?;
        fs.handlers.forget_path(r.handler);
        if let Some(record) = fs.handlers.get_mut(r.handler) {
            if record.invalid.is_none() {
                record.invalid = Some(reason.to_string());
                fs.handlers.retire(r.handler);
            }
        }
        Ok(())
    }

    /// Hand the slots of records invalidated by earlier calls back to their
    /// arenas, together with every record below them. Pending changes of an
    /// open atomic scope may still point at retired records, so nothing is
    /// reclaimed while one is open.
    pub fn reclaim_handlers(&mut self) {
        if self.changes.in_atomic() {
            return;
        }
        for fs in self.files.values_mut() {
            let mut retired = fs.handlers.take_retired();
            if retired.is_empty() {
                continue;
            }
            loop {
                let orphans = fs.handlers.children_of_any(&retired);
                if orphans.is_empty() {
                    break;
                }
                for orphan in &orphans {
                    if let Some(ParentStrategy::Physical(node)) = fs.handlers.get(*orphan).map(|r| r.strategy) {
                        if fs.file.handler_slot(node) == Some(orphan.to_slot()) {
                            fs.file.set_handler_slot(node, None);
                        }
                    }
                    fs.handlers.forget_path(*orphan);
                }
                retired.extend(orphans);
            }
            trace!("Reclaiming {} handler slots of {}", retired.len(), fs.file.path());
            for id in retired {
                fs.handlers.release(id);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Validity and identity
    // ---------------------------------------------------------------------

    /// `None` when valid, otherwise the reason the handle is not
    pub fn check_validity(&mut self, r: ElementRef) -> DomResult<Option<String>> {
        let Some(fs) = self.files.get(&r.file) else {
            return Ok(Some("its file was closed".to_string()));
        };
        if fs.generation != r.generation {
            return Ok(Some("its file was reloaded".to_string()));
        }
        if fs.handlers.is_discarded(r.handler) {
            return Ok(Some(DISCARDED.to_string()));
        }
        self.refresh(r)?;

        let record = self.record(r)?;
        if let Some(reason) = &record.invalid {
            return Ok(Some(reason.clone()));
        }
        let (parent, strategy) = (record.parent, record.strategy);

        match strategy {
            ParentStrategy::Root => {
                let fs = self.file_state(r.file)?;
                let live = fs
                    .root
                    .as_ref()
                    .is_some_and(|root| root.handler == r.handler && root.stale_reason(&fs.file, &self.roots).is_none());
                if !live {
                    return Ok(Some("the root element was evicted".to_string()));
                }
            }
            ParentStrategy::Physical(node) => {
                let fs = self.file_state(r.file)?;
                if !fs.file.is_valid(node) {
                    return Ok(Some("its tag is no longer valid".to_string()));
                }
                if let Some(owner) = fs.slot_handler(node) {
                    if owner != r.handler && !self.logical_eq(r, r.with(owner))? {
                        return Ok(Some("its tag is bound to another element".to_string()));
                    }
                }
            }
            ParentStrategy::Virtual | ParentStrategy::Stub(_) => {}
        }

        if let Some(parent) = parent {
            if let Some(reason) = self.check_validity(r.with(parent))? {
                return Ok(Some(format!("parent is invalid: {}", reason)));
            }
        }
        Ok(None)
    }

    pub fn check_access(&mut self, r: ElementRef) -> DomResult<()> {
        if !self.config.check_validity_on_access {
            return Ok(());
        }
        match self.check_validity(r)? {
            Some(reason) => Err(self.invalid_error(r, reason)),
            None => Ok(()),
        }
    }

    /// Logical identity: same parent, same description, same ordinal. Two
    /// different paths reaching the same tag break an engine invariant.
    pub fn logical_eq(&mut self, a: ElementRef, b: ElementRef) -> DomResult<bool> {
        if a == b {
            return Ok(true);
        }
        if a.file != b.file || a.generation != b.generation {
            return Ok(false);
        }
        self.refresh(a)?;
        self.refresh(b)?;

        let (ra, rb) = (self.record(a)?, self.record(b)?);
        if ra.invalid.is_some() || rb.invalid.is_some() {
            return Ok(false);
        }
        let same_node = match (ra.strategy, rb.strategy) {
            (ParentStrategy::Physical(x), ParentStrategy::Physical(y)) => x == y,
            (ParentStrategy::Root, ParentStrategy::Root) => true,
            _ => false,
        };
        let different_nodes = matches!(
            (ra.strategy, rb.strategy),
            (ParentStrategy::Physical(x), ParentStrategy::Physical(y)) if x != y
        );
        let same_step = ra.kind == rb.kind && ra.description_key() == rb.description_key() && ra.ordinal == rb.ordinal;
        let (pa, pb) = (ra.parent, rb.parent);

        let same_parent = match (pa, pb) {
            (None, None) => true,
            (Some(x), Some(y)) => self.logical_eq(a.with(x), b.with(y))?,
            _ => false,
        };
        let equal = same_step && same_parent;

        if same_node && !equal {
            let message = format!(
                "{} and {} wrap the same tag through different paths",
                self.debug_path(a),
                self.debug_path(b)
            );
            error!("{}", message);
            return Err(DomError::InvariantViolation(message));
        }
        Ok(equal && !different_nodes)
    }

    /// Human readable path of a handle, e.g. `Project/module[1]@id`
    pub fn debug_path(&self, r: ElementRef) -> String {
        let Some(fs) = self
            .files
            .get(&r.file)
            .filter(|fs| fs.generation == r.generation && fs.handlers.get(r.handler).is_some())
        else {
            return format!("<stale {}#{}>", r.file, r.handler.index());
        };
        let mut segments = Vec::new();
        let mut current = Some(r.handler);
        while let Some(id) = current {
            let Some(record) = fs.handlers.get(id) else { break };
            let segment = match (record.kind, record.description.as_deref()) {
                (HandlerKind::Root, _) => record.type_key.as_ref().map(|t| t.to_string()).unwrap_or_default(),
                (HandlerKind::Attribute, _) => format!("@{}", record.name.local_name()),
                (_, Some(description)) if description.kind() == DescriptionKind::Fixed && record.ordinal == 0 => {
                    record.name.local_name().to_string()
                }
                (_, Some(description)) if description.kind() == DescriptionKind::Custom => {
                    format!("<{}>[{}]", description.key().name, record.ordinal)
                }
                _ => format!("{}[{}]", record.name.local_name(), record.ordinal),
            };
            segments.push(segment);
            current = record.parent;
        }
        segments.reverse();

        let mut path = String::new();
        for segment in segments {
            if !path.is_empty() && !segment.starts_with('@') {
                path.push('/');
            }
            path.push_str(&segment);
        }
        path
    }

    /// Description and ordinal of every step from the root down to `r`
    pub fn path_steps(&mut self, r: ElementRef) -> DomResult<Vec<(Option<DescriptionKey>, usize)>> {
        self.refresh(r)?;
        self.lineage(r)?
            .into_iter()
            .map(|handler| {
                let record = self.record(r.with(handler))?;
                Ok((record.description_key(), record.ordinal))
            })
            .collect()
    }

    /// Handler chain from the root down to `r`
    pub fn lineage(&self, r: ElementRef) -> DomResult<Vec<HandlerId>> {
        let mut chain = vec![r.handler];
        let mut current = self.record(r)?.parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.record(r.with(parent))?.parent;
        }
        chain.reverse();
        Ok(chain)
    }

    // ---------------------------------------------------------------------
    // Backing lookups
    // ---------------------------------------------------------------------

    /// Node or stub the children of `r` are read from
    pub fn source(&mut self, r: ElementRef) -> DomResult<Source> {
        if !self.config.use_stubs {
            self.ensure_tree(r.file)?;
        }
        self.refresh(r)?;
        let fs = self.file_state(r.file)?;
        let record = self.record(r)?;
        let file = &fs.file;

        Ok(if file.is_tree_loaded() {
            match record.strategy {
                ParentStrategy::Physical(node) if file.is_valid(node) => Source::Tree(node),
                ParentStrategy::Root => file.root_tag().map(Source::Tree).unwrap_or(Source::Missing),
                _ => Source::Missing,
            }
        } else {
            match record.strategy {
                ParentStrategy::Stub(stub) => Source::Stub(stub),
                ParentStrategy::Root => file.stub().and_then(|s| s.root()).map(Source::Stub).unwrap_or(Source::Missing),
                _ => Source::Missing,
            }
        })
    }

    /// The tree node of a handle, if it has one now
    pub fn xml_node(&mut self, r: ElementRef) -> DomResult<Option<NodeId>> {
        self.refresh(r)?;
        let fs = self.file_state(r.file)?;
        Ok(match self.record(r)?.strategy {
            ParentStrategy::Physical(node) => Some(node).filter(|n| fs.file.is_valid(*n)),
            ParentStrategy::Root => fs.file.root_tag(),
            _ => None,
        })
    }

    /// Whether the handle is backed by a tag, attribute or stub element
    pub fn exists(&mut self, r: ElementRef) -> DomResult<bool> {
        self.refresh(r)?;
        let record = self.record(r)?;
        if record.invalid.is_some() {
            return Ok(false);
        }
        Ok(match record.strategy {
            ParentStrategy::Physical(_) => self.xml_node(r)?.is_some(),
            ParentStrategy::Stub(_) => true,
            ParentStrategy::Root => !matches!(self.source(r)?, Source::Missing),
            ParentStrategy::Virtual => false,
        })
    }
}
