// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's lowering passes (document loading is outside the
// runner), their dependency edges, and the artifacts they produce. Used by the
// pipeline runner to compute the minimal pass subset for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass. Document loading happens before the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Reconstruct,
    Expand,
    Prune,
    Validate,
}

/// Machine-readable artifact identifiers. Each maps to a field of the
/// compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Typed,      // Graph with construct pins propagated
    Expansions, // Vec<Expansion>
    Lowered,    // Graph with no constructs
    Report,     // validation diagnostics
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Reconstruct => PassDescriptor {
            name: "reconstruct",
            inputs: &[],
            outputs: &[ArtifactId::Typed],
            invalidation_key: "document",
            invariants: "construct Map/Key/Value pins agree with their first container link",
        },
        PassId::Expand => PassDescriptor {
            name: "expand",
            inputs: &[PassId::Reconstruct],
            outputs: &[ArtifactId::Expansions],
            invalidation_key: "document + registry",
            invariants: "every construct expanded once and severed",
        },
        PassId::Prune => PassDescriptor {
            name: "prune",
            inputs: &[PassId::Expand],
            outputs: &[ArtifactId::Lowered],
            invalidation_key: "document + registry",
            invariants: "no construct nodes remain",
        },
        PassId::Validate => PassDescriptor {
            name: "validate",
            inputs: &[PassId::Prune],
            outputs: &[ArtifactId::Report],
            invalidation_key: "document + registry",
            invariants: "linked data pins resolved, links type-compatible",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 4] = [
    PassId::Reconstruct,
    PassId::Expand,
    PassId::Prune,
    PassId::Validate,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
