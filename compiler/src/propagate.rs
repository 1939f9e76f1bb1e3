// propagate.rs — Type propagation for the For Each Map construct
//
// The construct's `Map` pin is the only source of key/value types. When a
// container is attached, its descriptor fans out to `Map`, `Key` and `Value`;
// when the last link goes away the three pins fall back to wildcard.
//
// The computation is pure (`propagate`, `reset`); `apply` writes the result
// onto the construct's own pins and touches nothing else.
//
// Preconditions: the node carries the For Each Map pin layout.
// Postconditions: Map/Key/Value are all resolved from the first link, or all
//   wildcard.
// Failure modes: none. A node missing its pins is left untouched.
// Side effects: node-changed notification when a container is connected.

use crate::construct::{ForEachMap, Typed};
use crate::graph::{pn, Graph};
use crate::id::{NodeId, PinId};
use crate::types::{ContainerType, PinType};

/// Descriptors for the three typed pins of the construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagatedTypes {
    pub container: PinType,
    pub key: PinType,
    pub value: PinType,
}

/// Fan a container descriptor out to the construct's pins.
pub fn propagate(external: &PinType) -> PropagatedTypes {
    PropagatedTypes {
        container: PinType {
            container: ContainerType::Map,
            value_type: external.value_type.clone(),
            ..external.element()
        },
        key: external.element(),
        value: PinType::from_terminal(&external.value_type),
    }
}

/// The unconstrained state of a disconnected construct.
pub fn reset() -> PropagatedTypes {
    PropagatedTypes {
        container: PinType::wildcard_map(),
        key: PinType::wildcard(),
        value: PinType::wildcard(),
    }
}

struct MapPins {
    map: PinId,
    key: PinId,
    value: PinId,
}

fn map_pins(graph: &Graph, node: NodeId) -> Option<MapPins> {
    Some(MapPins {
        map: graph.find_pin(node, pn::MAP)?,
        key: graph.find_pin(node, pn::KEY)?,
        value: graph.find_pin(node, pn::VALUE)?,
    })
}

/// Write propagated types onto the construct's pins.
pub fn apply(graph: &mut Graph, node: NodeId, types: &PropagatedTypes) {
    let Some(pins) = map_pins(graph, node) else {
        tracing::warn!(%node, "construct is missing its Map/Key/Value pins");
        return;
    };
    graph.set_pin_type(pins.map, types.container.clone());
    graph.set_pin_type(pins.key, types.key.clone());
    graph.set_pin_type(pins.value, types.value.clone());
}

/// Type of the first pin linked to the container input, if any. Extra
/// links are ignored; the validation pass reports them.
fn first_container_type(graph: &Graph, map_pin: PinId) -> Option<PinType> {
    let linked = graph.linked_to(map_pin);
    if linked.len() > 1 {
        tracing::debug!(
            pin = %graph.describe_pin(map_pin),
            links = linked.len(),
            "container input has several links, using the first"
        );
    }
    let first = *linked.first()?;
    graph.pin(first).map(|p| p.pin_type.clone())
}

impl Typed for ForEachMap {
    fn post_reconstruct(&self, graph: &mut Graph, node: NodeId) {
        let Some(pins) = map_pins(graph, node) else {
            return;
        };
        if let Some(external) = first_container_type(graph, pins.map) {
            apply(graph, node, &propagate(&external));
        }
    }

    fn pin_connection_list_changed(&self, graph: &mut Graph, node: NodeId, pin: PinId) {
        let Some(pins) = map_pins(graph, node) else {
            return;
        };
        if pin != pins.map {
            return;
        }
        match first_container_type(graph, pins.map) {
            Some(external) => {
                let types = propagate(&external);
                tracing::debug!(%node, container = %types.container, "propagated container type");
                apply(graph, node, &types);
                graph.notify_node_changed(node);
            }
            None => {
                tracing::debug!(%node, "container disconnected, pins reset to wildcard");
                apply(graph, node, &reset());
            }
        }
    }
}
