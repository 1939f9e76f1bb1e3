use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use fmc::pass::PassId;
use fmc::pipeline::{compute_provenance, run_pipeline, CompilationState, CompileOptions};
use fmc::registry::Registry;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    /// Text listing of the lowered graph
    Graph,
    /// Graphviz DOT of the lowered graph
    Dot,
    /// Lowered graph as a JSON document
    Json,
    /// Provenance (source hash, registry fingerprint) as JSON
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "fmc",
    version,
    about = "For-each-Map Compiler: lowers For Each Map nodes in graph documents to primitive loops"
)]
struct Cli {
    /// Input graph document (.json)
    source: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Additional primitive manifest (repeatable)
    #[arg(long = "primitives")]
    primitives: Vec<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Graph)]
    emit: EmitStage,

    /// Treat warnings as errors
    #[arg(long)]
    deny_warnings: bool,

    /// Log passes, propagation and wiring (overridden by RUST_LOG)
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            deny_warnings: self.deny_warnings,
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "fmc=debug" } else { "fmc=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn write_output(cli: &Cli, text: &str) -> std::io::Result<()> {
    match &cli.output {
        Some(path) => std::fs::write(path, text),
        None => std::io::stdout().write_all(text.as_bytes()),
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    tracing::debug!(source = %cli.source.display(), emit = ?cli.emit, "starting");

    // ── Load primitive registry ──
    let mut registry = Registry::builtin();
    for path in &cli.primitives {
        match registry.load_manifest(path) {
            Ok(n) => tracing::debug!(count = n, path = %path.display(), "loaded primitives"),
            Err(e) => {
                eprintln!("fmc: error: {}", e);
                std::process::exit(2);
            }
        }
    }

    // ── Read and load the graph document ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("fmc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };
    let loaded = match fmc::document::load(&source, &registry) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("fmc: error: {}: {}", cli.source.display(), e);
            std::process::exit(1);
        }
    };

    let provenance = compute_provenance(&source, &registry);
    let build_info = provenance.to_json();

    // ── Lower ──
    let mut state =
        CompilationState::new(loaded.graph, registry).with_options(cli.compile_options());
    state.provenance = Some(provenance);
    let result = run_pipeline(&mut state, PassId::Validate, |_, diags| {
        for d in diags {
            eprintln!("fmc: {}", d);
        }
    });
    if let Err(e) = result {
        eprintln!("fmc: {}", e);
        std::process::exit(1);
    }

    let Some(lowered) = state.lowered() else {
        eprintln!("fmc: internal error: no lowered graph");
        std::process::exit(1);
    };
    let text = match cli.emit {
        EmitStage::Graph => lowered.to_string(),
        EmitStage::Dot => fmc::dot::emit_dot(lowered),
        EmitStage::Json => match fmc::document::to_json(lowered) {
            Ok(mut json) => {
                json.push('\n');
                json
            }
            Err(e) => {
                eprintln!("fmc: error: {}", e);
                std::process::exit(1);
            }
        },
        EmitStage::BuildInfo => build_info,
    };
    if let Err(e) = write_output(&cli, &text) {
        eprintln!("fmc: error: {}", e);
        std::process::exit(2);
    }
}
