use markbind_tree::{NodeId, StubId};
use std::fmt;

/// How a handle finds its tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParentStrategy {
    /// Bound to a node that existed when last checked
    Physical(NodeId),
    /// No node yet; created on the first write
    Virtual,
    /// Bound to a stub element of a file whose tree is not loaded. For
    /// attribute handles this is the owning element's stub.
    Stub(StubId),
    /// The file's root tag, whatever node currently holds that role
    Root,
}

impl ParentStrategy {
    pub fn physical_node(&self) -> Option<NodeId> {
        match self {
            ParentStrategy::Physical(node) => Some(*node),
            _ => None,
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, ParentStrategy::Virtual)
    }
}

impl fmt::Display for ParentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentStrategy::Physical(node) => write!(f, "physical({})", node.index()),
            ParentStrategy::Virtual => f.write_str("virtual"),
            ParentStrategy::Stub(stub) => write!(f, "stub({})", stub.index()),
            ParentStrategy::Root => f.write_str("root"),
        }
    }
}
