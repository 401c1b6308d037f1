//! # Deep copy
//!
//! Copies one element's content onto another by walking the source's
//! schema: tag text, then attributes and fixed children position by
//! position, then collection and custom children, which replace whatever
//! the target had. The walk runs as one atomic change and polls the
//! cancellation signal before each child; a canceled or failed copy restores
//! the target file and its handles to where they were.

use crate::description::{ChildDescription, DescriptionKind};
use crate::error::{DomError, DomResult};
use crate::events::DomEventKind;
use crate::handler::HandlerKind;
use crate::state::{DomState, ElementRef};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Cooperative cancellation, polled between copy steps
pub trait CancellationSignal {
    fn is_canceled(&self) -> bool;
}

impl<F> CancellationSignal for F
where
    F: Fn() -> bool,
{
    fn is_canceled(&self) -> bool {
        self()
    }
}

pub struct NeverCanceled;

impl CancellationSignal for NeverCanceled {
    fn is_canceled(&self) -> bool {
        false
    }
}

/// Shareable flag another thread can raise
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl CancellationSignal for CancellationFlag {
    fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn poll(cancel: &dyn CancellationSignal) -> DomResult<()> {
    if cancel.is_canceled() {
        Err(DomError::Canceled)
    } else {
        Ok(())
    }
}

impl DomState {
    #[instrument(skip(self, cancel), fields(target = %self.debug_path(target), source = %self.debug_path(source)))]
    pub fn copy_from(&mut self, target: ElementRef, source: ElementRef, cancel: &dyn CancellationSignal) -> DomResult<()> {
        self.check_access(target)?;
        self.check_access(source)?;
        if self.lineage(target)?.contains(&source.handler) && target.file == source.file {
            return Err(DomError::invalid_argument("copy_from", "cannot copy an element into its own subtree"));
        }
        self.ensure_tree(target.file)?;

        let fs = self.file_state(target.file)?;
        let snapshot = fs.file.snapshot();
        let handlers = fs.handlers.clone();
        let mark = self.begin_atomic();

        let result = self.guarded(target.file, |state| state.copy_element(target, source, cancel));
        if let Err(e) = &result {
            debug!("Rolling back copy into {}: {}", self.debug_path(target), e);
            if let Some(fs) = self.files.get_mut(&target.file) {
                fs.file.restore(snapshot);
                fs.file.drain_changes();
                fs.handlers = handlers;
            }
            self.changes.discard_since(mark);
        }
        self.end_atomic();

        match result {
            Err(DomError::Tree(e)) => {
                warn!("Copy into {} refused: {}", self.debug_path(target), e);
                Ok(())
            }
            other => other,
        }
    }

    fn copy_element(&mut self, target: ElementRef, source: ElementRef, cancel: &dyn CancellationSignal) -> DomResult<()> {
        poll(cancel)?;
        if !self.exists(source)? {
            if self.undefine(target)? {
                self.record_change(target, DomEventKind::Structural);
            }
            return Ok(());
        }

        let text = self.string_value(source)?;
        let text = match self.record(target)?.kind {
            HandlerKind::Attribute => text,
            _ => Some(text.unwrap_or_default()),
        };
        if self.write_string(target, text.as_deref())? {
            self.record_change(target, DomEventKind::Structural);
        }
        if self.record(target)?.kind == HandlerKind::Attribute {
            return Ok(());
        }

        let target_info = self.dynamic_info(target)?;
        for description in self.dynamic_info(source)?.descriptions() {
            poll(cancel)?;
            let Some(target_description) = target_info.holder().find_by_key(&description.key()) else {
                continue;
            };
            match description.kind() {
                DescriptionKind::Attribute | DescriptionKind::Fixed => {
                    let sources = self.children_of(source, &description)?;
                    let targets = self.children_of(target, &target_description)?;
                    for (to, from) in targets.into_iter().zip(sources) {
                        self.copy_element(to, from, cancel)?;
                    }
                }
                DescriptionKind::Collection | DescriptionKind::Custom => {
                    for existing in self.children_of(target, &target_description)? {
                        poll(cancel)?;
                        if self.undefine(existing)? {
                            self.record_change(target, DomEventKind::Structural);
                        }
                    }
                    for from in self.children_of(source, &description)? {
                        poll(cancel)?;
                        let to = self.copy_target(target, &target_description, from)?;
                        self.record_change(target, DomEventKind::Structural);
                        self.copy_element(to, from, cancel)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// New target child standing in for `from`
    fn copy_target(&mut self, parent: ElementRef, description: &Arc<ChildDescription>, from: ElementRef) -> DomResult<ElementRef> {
        if description.kind() != DescriptionKind::Custom {
            return self.insert_child(parent, description, None);
        }

        // Custom children keep their tag name and attributes so the matcher
        // accepts the copy
        let info = self
            .tag_info(from)?
            .ok_or_else(|| self.invalid_error(from, "its tag disappeared during the copy"))?;
        let owner = self.ensure_tag(parent)?;
        let fs = self.file_state_mut(parent.file)?;
        let tag = fs.file.add_child(owner, &info.qualified_name)?;
        for (name, value) in &info.attributes {
            fs.file.set_attribute(tag, name, Some(value))?;
        }

        self.handle_for_node(parent, description, tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals() {
        let flag = CancellationFlag::new();
        assert!(!flag.is_canceled());
        flag.clone().cancel();
        assert!(flag.is_canceled());

        assert!(!NeverCanceled.is_canceled());
        assert!((|| true).is_canceled());
        assert!(matches!(poll(&flag), Err(DomError::Canceled)));
    }
}
