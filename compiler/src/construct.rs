// construct.rs — High-level constructs and their lowering capabilities
//
// A construct is a node with no direct runtime meaning: it keeps its pin
// types consistent while the graph is edited (`Typed`) and is rewritten into
// primitives at compile time (`Expandable`). `Construct` is the tagged set of
// constructs this compiler knows how to lower.
//
// Preconditions: none.
// Postconditions: `allocate_default_pins` yields the fixed pin layout for the
//   construct; pins start as wildcard.
// Failure modes: none here; expansion failures are `LowerError`s.
// Side effects: none.

use std::fmt;

use crate::graph::{pn, Graph, PinDecl};
use crate::id::{NodeId, PinId};
use crate::lower::{CompilerContext, Expansion, LowerError};
use crate::types::PinType;

// ── Capabilities ────────────────────────────────────────────────────────────

/// Keeps a construct's pin types in line with what is attached to it.
pub trait Typed {
    /// Called after the graph is reloaded.
    fn post_reconstruct(&self, graph: &mut Graph, node: NodeId);

    /// Called whenever the link list of one of the node's pins changes.
    fn pin_connection_list_changed(&self, graph: &mut Graph, node: NodeId, pin: PinId);
}

/// Rewrites a construct into primitive nodes.
pub trait Expandable {
    fn expand(&self, ctx: &mut CompilerContext<'_>, node: NodeId) -> Result<Expansion, LowerError>;
}

// ── Expansion state ─────────────────────────────────────────────────────────

/// Per-instance lowering progress. There is no way back from `Expanded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpansionState {
    #[default]
    Unexpanded,
    Expanding,
    Expanded,
}

impl fmt::Display for ExpansionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpansionState::Unexpanded => write!(f, "unexpanded"),
            ExpansionState::Expanding => write!(f, "expanding"),
            ExpansionState::Expanded => write!(f, "expanded"),
        }
    }
}

// ── Constructs ──────────────────────────────────────────────────────────────

/// Iterates over the entries of a map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForEachMap {
    pub state: ExpansionState,
}

impl ForEachMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn default_pins() -> Vec<PinDecl> {
        vec![
            PinDecl::exec_in(pn::EXECUTE),
            PinDecl::data_in(pn::MAP, PinType::wildcard_map()),
            PinDecl::exec_out(pn::LOOP_BODY),
            PinDecl::data_out(pn::KEY, PinType::wildcard()),
            PinDecl::data_out(pn::VALUE, PinType::wildcard()),
            PinDecl::exec_out(pn::COMPLETED),
        ]
    }
}

/// The constructs this compiler lowers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Construct {
    ForEachMap(ForEachMap),
}

impl Construct {
    pub fn allocate_default_pins(&self) -> Vec<PinDecl> {
        match self {
            Construct::ForEachMap(_) => ForEachMap::default_pins(),
        }
    }

    pub fn metadata(&self) -> &'static NodeMetadata {
        match self {
            Construct::ForEachMap(_) => &FOR_EACH_MAP_METADATA,
        }
    }

    pub fn state(&self) -> ExpansionState {
        match self {
            Construct::ForEachMap(c) => c.state,
        }
    }

    pub fn set_state(&mut self, state: ExpansionState) {
        match self {
            Construct::ForEachMap(c) => c.state = state,
        }
    }
}

impl Typed for Construct {
    fn post_reconstruct(&self, graph: &mut Graph, node: NodeId) {
        match self {
            Construct::ForEachMap(c) => c.post_reconstruct(graph, node),
        }
    }

    fn pin_connection_list_changed(&self, graph: &mut Graph, node: NodeId, pin: PinId) {
        match self {
            Construct::ForEachMap(c) => c.pin_connection_list_changed(graph, node, pin),
        }
    }
}

impl Expandable for Construct {
    fn expand(&self, ctx: &mut CompilerContext<'_>, node: NodeId) -> Result<Expansion, LowerError> {
        match self {
            Construct::ForEachMap(c) => c.expand(ctx, node),
        }
    }
}

impl fmt::Display for Construct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Construct::ForEachMap(c) => write!(f, "ForEachMap [{}]", c.state),
        }
    }
}

// ── Palette metadata ────────────────────────────────────────────────────────

/// Static text the authoring surface shows for a construct.
#[derive(Debug, PartialEq, Eq)]
pub struct NodeMetadata {
    pub title: &'static str,
    pub tooltip: &'static str,
    pub category: &'static str,
}

pub static FOR_EACH_MAP_METADATA: NodeMetadata = NodeMetadata {
    title: "For Each Map",
    tooltip: "Iterates over map entries",
    category: "Utilities|Map",
};

/// One palette registration: metadata plus a factory for fresh instances.
pub struct PaletteEntry {
    pub metadata: &'static NodeMetadata,
    pub factory: fn() -> Construct,
}

/// Every construct the palette can offer.
pub fn palette() -> Vec<PaletteEntry> {
    vec![PaletteEntry {
        metadata: &FOR_EACH_MAP_METADATA,
        factory: || Construct::ForEachMap(ForEachMap::new()),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PinDirection;

    #[test]
    fn for_each_map_pin_layout() {
        let mut g = Graph::new();
        let node = g.spawn_construct(Construct::ForEachMap(ForEachMap::new()));
        let layout: Vec<(String, PinDirection, String)> = g
            .pins_of(node)
            .map(|p| (p.name.clone(), p.direction, p.pin_type.to_string()))
            .collect();
        let expected = [
            ("execute", PinDirection::Input, "exec"),
            ("Map", PinDirection::Input, "map<wildcard, wildcard>"),
            ("LoopBody", PinDirection::Output, "exec"),
            ("Key", PinDirection::Output, "wildcard"),
            ("Value", PinDirection::Output, "wildcard"),
            ("Completed", PinDirection::Output, "exec"),
        ];
        assert_eq!(layout.len(), expected.len());
        for ((name, dir, ty), (en, ed, et)) in layout.iter().zip(expected.iter()) {
            assert_eq!(name, en);
            assert_eq!(dir, ed);
            assert_eq!(ty, et);
        }
    }

    #[test]
    fn palette_offers_for_each_map() {
        let entries = palette();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.metadata.title, "For Each Map");
        assert_eq!(entry.metadata.category, "Utilities|Map");
        let fresh = (entry.factory)();
        assert_eq!(fresh.state(), ExpansionState::Unexpanded);
        assert_eq!(fresh.metadata(), entry.metadata);
    }

    #[test]
    fn display_includes_state() {
        let mut c = Construct::ForEachMap(ForEachMap::new());
        assert_eq!(c.to_string(), "ForEachMap [unexpanded]");
        c.set_state(ExpansionState::Expanded);
        assert_eq!(c.to_string(), "ForEachMap [expanded]");
    }
}
