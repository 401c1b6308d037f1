use crate::element::DomElement;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomEventKind {
    /// A tag value or attribute of the element changed
    ValueChanged,
    /// Children were added, removed or replaced somewhere below the element
    Structural,
    /// The file was edited or reparsed outside the engine
    External,
}

impl fmt::Display for DomEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomEventKind::ValueChanged => f.write_str("value changed"),
            DomEventKind::Structural => f.write_str("structural"),
            DomEventKind::External => f.write_str("external"),
        }
    }
}

/// Change notification delivered to listeners after the engine lock is
/// released
#[derive(Debug, Clone)]
pub struct DomEvent {
    element: DomElement,
    kind: DomEventKind,
}

impl DomEvent {
    pub(crate) fn new(element: DomElement, kind: DomEventKind) -> Self {
        Self { element, kind }
    }

    pub fn element(&self) -> &DomElement {
        &self.element
    }

    pub fn kind(&self) -> DomEventKind {
        self.kind
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);
