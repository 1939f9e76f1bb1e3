// pipeline.rs — Compilation state and pass orchestration
//
// Holds the source graph, the working graph and the per-pass artifacts, and
// runs the minimal set of passes for a given terminal PassId. Every compile
// works on a clone of the source graph, so the source is never touched and a
// second compile starts from unexpanded constructs again.
//
// Preconditions: the source graph and registry are set before run_pipeline.
// Postconditions: artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics (fatal lowering
//   errors are surfaced as E0301).
// Side effects: calls on_pass_complete after each pass; `tracing` timing events.

use std::time::{Duration, Instant};

use crate::diag::{codes, Diagnostic, Location};
use crate::graph::Graph;
use crate::id::NodeId;
use crate::lower::{CompilerContext, Expansion};
use crate::pass::{descriptor, required_passes, PassId};
use crate::registry::Registry;

// ── Options ────────────────────────────────────────────────────────────────

/// Knobs that change how a compile behaves, independent of what is emitted.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Treat warnings as errors.
    pub deny_warnings: bool,
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Outputs of the passes that have run.
#[derive(Debug, Default)]
pub struct Artifacts {
    /// The working graph: the output of the last completed pass.
    pub graph: Option<Graph>,
    pub expansions: Option<Vec<Expansion>>,
    pub pruned: Option<Vec<NodeId>>,
    /// Diagnostics produced by the validate pass.
    pub report: Option<Vec<Diagnostic>>,
}

/// Provenance metadata for reproducible builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw graph document text.
/// `registry_fingerprint`: SHA-256 of canonical compact JSON from `Registry::canonical_json()`.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub registry_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the registry fingerprint (64 characters).
    pub fn registry_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.registry_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"source_hash\": \"{}\",\n  \"registry_fingerprint\": \"{}\",\n  \"manifest_schema_version\": {},\n  \"compiler_version\": \"{}\"\n}}\n",
            self.source_hash_hex(),
            self.registry_fingerprint_hex(),
            crate::registry::MANIFEST_SCHEMA_VERSION,
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from document text and registry.
///
/// The registry fingerprint is computed from `Registry::canonical_json()`
/// (compact JSON, name order) so it does not depend on load order.
pub fn compute_provenance(source: &str, registry: &Registry) -> Provenance {
    Provenance {
        source_hash: sha256(source.as_bytes()),
        registry_fingerprint: sha256(registry.canonical_json().as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

/// Holds the inputs, all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub registry: Registry,
    pub source: Graph,
    pub options: CompileOptions,
    pub artifacts: Artifacts,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(source: Graph, registry: Registry) -> Self {
        Self {
            registry,
            source,
            options: CompileOptions::default(),
            artifacts: Artifacts::default(),
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    /// The lowered graph, once the prune pass has run.
    pub fn lowered(&self) -> Option<&Graph> {
        self.artifacts
            .pruned
            .as_ref()
            .and(self.artifacts.graph.as_ref())
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} pass failed", descriptor(self.failing_pass).name)
    }
}

impl std::error::Error for PipelineError {}

// ── Per-pass bookkeeping ───────────────────────────────────────────────────

/// Per-pass post-processing: callback, accumulate, timing, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let deny = state.options.deny_warnings;
    let is_err = diags.iter().any(|d| d.is_error() || deny);
    state.diagnostics.extend(diags);
    tracing::info!(
        pass = descriptor(pass_id).name,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "pass complete"
    );
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

fn take_graph(state: &mut CompilationState) -> Graph {
    state
        .artifacts
        .graph
        .take()
        .unwrap_or_else(|| state.source.clone())
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → timing → error check.
///
/// Preconditions: `state.source` and `state.registry` are set.
/// Postconditions: artifacts for all passes in `required_passes(terminal)` are
///   populated, or `state.has_error` is true.
/// Failure modes: any pass producing error-level diagnostics.
/// Side effects: calls `on_pass_complete` after each pass.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    state.artifacts = Artifacts::default();

    for pass_id in required_passes(terminal) {
        match pass_id {
            PassId::Reconstruct => {
                let t = Instant::now();
                let mut graph = state.source.clone();
                graph.reconstruct_all();
                let elapsed = t.elapsed();
                state.artifacts.graph = Some(graph);
                finish_pass(state, pass_id, Vec::new(), elapsed, &mut on_pass_complete)?;
            }
            PassId::Expand => {
                let t = Instant::now();
                let graph = take_graph(state);
                let mut ctx = CompilerContext::new(graph, &state.registry);
                let result = crate::lower::expand_all(&mut ctx);
                let elapsed = t.elapsed();
                let CompilerContext {
                    graph,
                    mut diagnostics,
                    ..
                } = ctx;
                match result {
                    Ok(expansions) => state.artifacts.expansions = Some(expansions),
                    Err(err) => diagnostics.push(
                        Diagnostic::error(Location::default(), format!("lowering failed: {}", err))
                            .with_code(codes::E0301)
                            .with_hint("the primitive registry does not match this compiler's lowering rules"),
                    ),
                }
                state.artifacts.graph = Some(graph);
                finish_pass(state, pass_id, diagnostics, elapsed, &mut on_pass_complete)?;
            }
            PassId::Prune => {
                let t = Instant::now();
                let mut graph = take_graph(state);
                let pruned = crate::lower::prune_expanded(&mut graph);
                let elapsed = t.elapsed();
                tracing::debug!(removed = pruned.len(), "pruned expanded constructs");
                state.artifacts.graph = Some(graph);
                state.artifacts.pruned = Some(pruned);
                finish_pass(state, pass_id, Vec::new(), elapsed, &mut on_pass_complete)?;
            }
            PassId::Validate => {
                let t = Instant::now();
                let report = match &state.artifacts.graph {
                    Some(graph) => crate::validate::validate(graph),
                    None => Vec::new(),
                };
                let elapsed = t.elapsed();
                state.artifacts.report = Some(report.clone());
                finish_pass(state, pass_id, report, elapsed, &mut on_pass_complete)?;
            }
        }
    }
    Ok(())
}
