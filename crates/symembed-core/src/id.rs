//! Stable id newtype for scope graph nodes.
//!
//! A single newtype wrapper over `u32`, bridging to petgraph's
//! `NodeIndex<u32>` the same way a dual-graph program representation would
//! bridge its own entity ids -- `NodeId` is what the rest of this crate
//! (and `symembed`) pass around; `NodeIndex` stays an implementation detail
//! of [`crate::scope::ScopeGraph`].

use std::fmt;

use petgraph::graph::NodeIndex;

/// Stable scope-node identifier. Maps to a petgraph `NodeIndex<u32>`.
///
/// Assigned in strictly increasing order as nodes are created (see
/// [`crate::scope::ScopeGraph`]), so `NodeId` doubles as the `node_id`
/// component of an SSA name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<NodeIndex<u32>> for NodeId {
    fn from(idx: NodeIndex<u32>) -> Self {
        NodeId(idx.index() as u32)
    }
}

impl From<NodeId> for NodeIndex<u32> {
    fn from(id: NodeId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_to_node_index_roundtrip() {
        let idx = NodeIndex::<u32>::new(7);
        let id = NodeId::from(idx);
        assert_eq!(id.0, 7);
        let back: NodeIndex<u32> = id.into();
        assert_eq!(back.index(), 7);
    }

    #[test]
    fn node_id_display() {
        assert_eq!(format!("{}", NodeId(42)), "42");
    }
}
