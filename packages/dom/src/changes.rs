//! # Change tracking
//!
//! Writes run inside a non-reentrant change guard. Each logical change is
//! recorded against the handle it happened to; outside an atomic scope it
//! becomes an event right away, inside one it waits until the outermost
//! scope ends. At that point the pending changes of each file collapse into
//! a single event on their lowest common ancestor.

use crate::error::{DomError, DomResult};
use crate::events::{DomEvent, DomEventKind};
use crate::handler::HandlerId;
use crate::state::{DomState, ElementRef};
use tracing::{error, trace, warn};

#[derive(Debug, Default)]
pub(crate) struct ChangeGuard {
    changing: bool,
}

impl ChangeGuard {
    pub fn enter(&mut self) -> DomResult<()> {
        if self.changing {
            error!("Change guard entered while a write is in progress");
            return Err(DomError::InvariantViolation("change guard entered twice".to_string()));
        }
        self.changing = true;
        Ok(())
    }

    pub fn exit(&mut self) {
        self.changing = false;
    }

}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingChange {
    pub element: ElementRef,
    pub kind: DomEventKind,
}

#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    pub guard: ChangeGuard,
    atomic_depth: usize,
    pending: Vec<PendingChange>,
    ready: Vec<DomEvent>,
}

impl ChangeTracker {
    pub fn record(&mut self, element: ElementRef, kind: DomEventKind) {
        self.pending.push(PendingChange { element, kind });
    }

    pub fn in_atomic(&self) -> bool {
        self.atomic_depth > 0
    }

    /// Open a scope; the mark lets a failed scope drop what it recorded
    pub fn begin_atomic(&mut self) -> usize {
        self.atomic_depth += 1;
        self.pending.len()
    }

    /// Close a scope, returning true when it was the outermost one
    pub fn end_atomic(&mut self) -> bool {
        self.atomic_depth = self.atomic_depth.saturating_sub(1);
        self.atomic_depth == 0
    }

    pub fn discard_since(&mut self, mark: usize) {
        self.pending.truncate(mark);
    }

    pub fn take_pending(&mut self) -> Vec<PendingChange> {
        std::mem::take(&mut self.pending)
    }

    pub fn push_ready(&mut self, event: DomEvent) {
        self.ready.push(event);
    }

    pub fn take_ready(&mut self) -> Vec<DomEvent> {
        std::mem::take(&mut self.ready)
    }
}

/// Length of the shared prefix of root-first handler chains
fn common_prefix(lineages: &[Vec<HandlerId>]) -> usize {
    let Some(first) = lineages.first() else {
        return 0;
    };
    (0..first.len())
        .take_while(|i| lineages.iter().all(|l| l.get(*i) == first.get(*i)))
        .count()
}

impl DomState {
    /// Record a change, emitting it unless an atomic scope is open
    pub fn record_change(&mut self, element: ElementRef, kind: DomEventKind) {
        self.changes.record(element, kind);
        if !self.changes.in_atomic() {
            self.flush_changes();
        }
    }

    pub fn begin_atomic(&mut self) -> usize {
        self.changes.begin_atomic()
    }

    pub fn end_atomic(&mut self) {
        if self.changes.end_atomic() {
            self.flush_changes();
        }
    }

    /// Collapse pending changes into one event per file
    pub fn flush_changes(&mut self) {
        let pending = self.changes.take_pending();
        let mut groups: Vec<Vec<PendingChange>> = Vec::new();
        for change in pending {
            let group = groups.iter_mut().find(|g| {
                g.first()
                    .is_some_and(|c| c.element.file == change.element.file && c.element.generation == change.element.generation)
            });
            match group {
                Some(group) => group.push(change),
                None => groups.push(vec![change]),
            }
        }

        for group in groups {
            let Some(first) = group.first().copied() else { continue };
            let lineages: Vec<Vec<HandlerId>> = group.iter().filter_map(|c| self.lineage(c.element).ok()).collect();
            let shared = common_prefix(&lineages);
            let Some(target) = lineages.first().and_then(|l| shared.checked_sub(1).and_then(|i| l.get(i))).copied() else {
                trace!("Dropping {} changes of a closed or reloaded file", group.len());
                continue;
            };
            let kind = if group.iter().all(|c| c.kind == first.kind) {
                first.kind
            } else {
                DomEventKind::Structural
            };

            match self.wrap(first.element.with(target)) {
                Ok(element) => self.changes.push_ready(DomEvent::new(element, kind)),
                Err(e) => warn!("Cannot deliver change event: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_is_not_reentrant() {
        let mut guard = ChangeGuard::default();
        guard.enter().unwrap();
        assert!(matches!(guard.enter(), Err(DomError::InvariantViolation(_))));
        guard.exit();
        assert!(guard.enter().is_ok());
    }

    #[test]
    fn test_common_prefix() {
        let ids = |xs: &[u32]| -> Vec<HandlerId> {
            xs.iter().map(|x| HandlerId::from_slot(u64::from(*x))).collect()
        };
        assert_eq!(common_prefix(&[ids(&[0, 1, 2]), ids(&[0, 1, 3]), ids(&[0, 1])]), 2);
        assert_eq!(common_prefix(&[ids(&[0, 4])]), 2);
        assert_eq!(common_prefix(&[]), 0);
    }

    #[test]
    fn test_nested_scopes() {
        let mut tracker = ChangeTracker::default();
        let outer = tracker.begin_atomic();
        let inner = tracker.begin_atomic();
        assert_eq!((outer, inner), (0, 0));
        assert!(!tracker.end_atomic());
        assert!(tracker.in_atomic());
        assert!(tracker.end_atomic());
        assert!(!tracker.in_atomic());
    }
}
