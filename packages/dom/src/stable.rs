//! # Stable handles
//!
//! A [`StableElement`] survives reloads and reparses that invalidate plain
//! handles. It keeps the last element it resolved to and, once that goes
//! stale, recovers a fresh one either by replaying the element's logical
//! path from the file root or through a caller supplied closure.

use crate::declaration::TypeKey;
use crate::description::DescriptionKey;
use crate::element::DomElement;
use crate::error::DomResult;
use crate::handler::HandlerKind;
use crate::manager::{run, Shared};
use crate::state::{DomState, ElementRef};
use markbind_tree::get_file_id;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    Root(TypeKey),
    Child { description: DescriptionKey, ordinal: usize },
}

/// Logical address of an element, independent of handler identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomPath {
    pub file_path: String,
    pub segments: Vec<PathSegment>,
}

impl fmt::Display for DomPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.file_path)?;
        for segment in &self.segments {
            match segment {
                PathSegment::Root(type_key) => write!(f, "/{}", type_key)?,
                PathSegment::Child { description, ordinal } => write!(f, "/{}[{}]", description, ordinal)?,
            }
        }
        Ok(())
    }
}

impl DomState {
    pub fn path_of(&self, r: ElementRef) -> DomResult<DomPath> {
        let file_path = self.file_state(r.file)?.file.path().to_string();
        let mut segments = Vec::new();
        for handler in self.lineage(r)? {
            let record = self.record(r.with(handler))?;
            let segment = match (record.kind, record.description_key()) {
                (HandlerKind::Root, _) => match &record.type_key {
                    Some(type_key) => PathSegment::Root(type_key.clone()),
                    None => return Err(self.invalid_error(r, "its root has no type")),
                },
                (_, Some(description)) => PathSegment::Child {
                    description,
                    ordinal: record.ordinal,
                },
                (_, None) => return Err(self.invalid_error(r, "a step of its path has no description")),
            };
            segments.push(segment);
        }
        Ok(DomPath { file_path, segments })
    }

    /// Replay a path against the currently open files
    pub fn resolve_path(&mut self, path: &DomPath) -> DomResult<Option<ElementRef>> {
        let file = get_file_id(&path.file_path);
        if !self.files.contains_key(&file) {
            return Ok(None);
        }
        let mut segments = path.segments.iter();
        let Some(PathSegment::Root(type_key)) = segments.next() else {
            return Ok(None);
        };
        let Some(mut current) = self.file_element(file, type_key)? else {
            return Ok(None);
        };

        for segment in segments {
            let PathSegment::Child { description, ordinal } = segment else {
                return Ok(None);
            };
            let Some(description) = self.dynamic_info(current)?.holder().find_by_key(description) else {
                trace!("{} has no description {} any more", self.debug_path(current), description);
                return Ok(None);
            };
            match self.children_of(current, &description)?.get(*ordinal) {
                Some(child) => current = *child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

enum Recovery {
    Path(DomPath),
    Custom(Arc<dyn Fn() -> Option<DomElement> + Send + Sync>),
}

/// Handle that re-resolves itself after the element it pointed to went stale
pub struct StableElement {
    shared: Arc<Shared>,
    recovery: Recovery,
    cached: Mutex<Option<DomElement>>,
}

impl StableElement {
    pub(crate) fn from_path(shared: Arc<Shared>, path: DomPath, current: Option<DomElement>) -> Self {
        Self {
            shared,
            recovery: Recovery::Path(path),
            cached: Mutex::new(current),
        }
    }

    pub(crate) fn from_closure(shared: Arc<Shared>, recover: Arc<dyn Fn() -> Option<DomElement> + Send + Sync>) -> Self {
        Self {
            shared,
            recovery: Recovery::Custom(recover),
            cached: Mutex::new(None),
        }
    }

    /// The current element, recovering it when the cached one is stale
    pub fn get(&self) -> DomResult<Option<DomElement>> {
        let mut cached = self.cached.lock();
        if let Some(element) = cached.as_ref().filter(|e| e.is_valid()) {
            return Ok(Some(element.clone()));
        }

        let recovered = match &self.recovery {
            Recovery::Path(path) => run(&self.shared, |state| match state.resolve_path(path)? {
                Some(r) => state.wrap(r).map(Some),
                None => Ok(None),
            })?,
            Recovery::Custom(recover) => recover().filter(DomElement::is_valid),
        };
        if let Some(element) = &recovered {
            trace!("Recovered stable element {}", element.debug_path());
        }
        *cached = recovered.clone();
        Ok(recovered)
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.get(), Ok(Some(_)))
    }

    /// Logical path the handle recovers through, if it was built from one
    pub fn path(&self) -> Option<&DomPath> {
        match &self.recovery {
            Recovery::Path(path) => Some(path),
            Recovery::Custom(_) => None,
        }
    }

    /// Drop the cached element so the next `get` recovers afresh
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }
}

impl fmt::Debug for StableElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("StableElement");
        match &self.recovery {
            Recovery::Path(path) => s.field("path", &path.to_string()),
            Recovery::Custom(_) => s.field("path", &"<custom>"),
        };
        s.finish()
    }
}
