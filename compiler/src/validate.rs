// validate.rs — Post-lowering graph check
//
// The type check the host runs on a lowered graph before handing it to an
// execution engine.
//
// Preconditions: constructs have been expanded and pruned.
// Postconditions: none (read-only).
// Failure modes: returns diagnostics
//   E0201 linked data pin left as wildcard,
//   E0202 link between incompatible pins,
//   E0203 construct left in the graph,
//   E0204 by-reference input fed by something other than a variable,
//   E0205 generic pin types that never settled,
//   W0102 data input with more than one link (the first one wins).
// Side effects: none.

use crate::diag::{codes, Diagnostic, Location};
use crate::graph::{Graph, NodeKind, PinDirection};
use crate::id::PinId;

/// W0102 for a data input carrying more than one link.
pub fn extra_links(graph: &Graph, pin: PinId) -> Option<Diagnostic> {
    let p = graph.pin(pin)?;
    if p.is_exec() || p.direction != PinDirection::Input {
        return None;
    }
    let linked = graph.linked_to(pin);
    if linked.len() < 2 {
        return None;
    }
    Some(
        Diagnostic::warning(
            Location::pin(p.owner, pin),
            format!(
                "{} has {} links; only {} is used",
                graph.describe_pin(pin),
                linked.len(),
                graph.describe_pin(linked[0])
            ),
        )
        .with_code(codes::W0102),
    )
}

fn feeds_storage(graph: &Graph, pin: PinId) -> bool {
    graph.owner(pin).and_then(|n| graph.node(n)).is_some_and(|n| {
        matches!(
            n.kind,
            NodeKind::VariableGet { .. } | NodeKind::TemporaryVariable { .. }
        )
    })
}

pub fn validate(graph: &Graph) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    for node in graph.nodes() {
        if let NodeKind::Construct(c) = &node.kind {
            diags.push(
                Diagnostic::error(
                    Location::node(node.id),
                    format!("construct '{}' was not lowered", c),
                )
                .with_code(codes::E0203),
            );
        }
    }

    for node in graph.nodes() {
        for pin in graph.pins_of(node.id) {
            if pin.is_exec() {
                continue;
            }
            let linked = graph.linked_to(pin.id);
            if linked.is_empty() {
                continue;
            }
            if pin.pin_type.is_wildcard() {
                diags.push(
                    Diagnostic::error(
                        Location::pin(node.id, pin.id),
                        format!("{} has no concrete type", graph.describe_pin(pin.id)),
                    )
                    .with_code(codes::E0201)
                    .with_hint("connect a typed container to the loop's Map input"),
                );
            }
            diags.extend(extra_links(graph, pin.id));
            if pin.by_ref && !linked.iter().all(|&peer| feeds_storage(graph, peer)) {
                diags.push(
                    Diagnostic::error(
                        Location::pin(node.id, pin.id),
                        format!(
                            "{} is written through and must be linked to a variable",
                            graph.describe_pin(pin.id)
                        ),
                    )
                    .with_code(codes::E0204),
                );
            }
        }
    }

    for node in graph.unsettled() {
        diags.push(
            Diagnostic::error(
                Location::node(node),
                format!("generic pin types of {node} did not settle"),
            )
            .with_code(codes::E0205),
        );
    }

    for link in graph.links() {
        let (Some(from), Some(to)) = (graph.pin(link.from), graph.pin(link.to)) else {
            continue;
        };
        if !from.pin_type.is_compatible(&to.pin_type) {
            diags.push(
                Diagnostic::error(
                    Location::pin(to.owner, to.id),
                    format!(
                        "{} ({}) is linked to incompatible {} ({})",
                        graph.describe_pin(from.id),
                        from.pin_type,
                        graph.describe_pin(to.id),
                        to.pin_type
                    ),
                )
                .with_code(codes::E0202),
            );
        }
    }

    diags
}
