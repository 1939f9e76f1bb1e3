// id.rs — Stable identifiers for graph nodes and pins
//
// IDs are allocated monotonically by the owning `Graph`, so nodes spawned
// during lowering always sort after the nodes they were spawned from. Ordered
// containers keyed by these IDs give deterministic iteration everywhere.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for a node in a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Stable identifier for a pin (connection point) on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Allocator for stable IDs. Produces monotonically increasing IDs in
/// allocation order, ensuring deterministic assignment.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next_node: u32,
    next_pin: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    pub fn alloc_pin(&mut self) -> PinId {
        let id = PinId(self.next_pin);
        self.next_pin += 1;
        id
    }
}
