// fmc — For-each-Map Compiler
//
// Library root. Lowers For Each Map constructs in node graphs into
// primitive loop subgraphs.

pub mod builder;
pub mod construct;
pub mod diag;
pub mod document;
pub mod dot;
pub mod expand;
pub mod graph;
pub mod id;
pub mod lower;
pub mod pass;
pub mod pipeline;
pub mod propagate;
pub mod registry;
pub mod types;
pub mod validate;
