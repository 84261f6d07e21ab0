//! Analysis core for Koreo resources
//!
//! This crate turns a multi-document Koreo YAML stream into a semantic model
//! and answers editor questions about it. It knows the four Koreo resource
//! kinds (`ValueFunction`, `ResourceFunction`, `Workflow`, `FunctionTest`),
//! their schema, the embedded `=`-prefixed expression language, and how to
//! run FunctionTests against the functions they target.
//!
//! # Architecture
//!
//! - `source`: positions, ranges and byte/position conversion
//! - `yaml`: multi-document loading with spans
//! - `expression`: tokenizer, parser and evaluator for Koreo expressions
//! - `schema`: field tables per resource kind
//! - `extractor`: schema walk producing resources, anchors and diagnostics
//! - `model`: resource definitions, anchors and symbol identifiers
//! - `index` / `workflow`: semantic index and step dependency graphs
//! - `diagnostics`: the per-document analysis entry point
//! - `workspace`: cross-document symbol table and stored test runs
//! - `function_test`: dry-run evaluation of functions and the test runner
//! - providers: `completion`, `hover`, `go_to_definition`, `references`,
//!   `semantic_tokens`, `code_lens`, `inlay_hints`
//!
//! # Design Principles
//!
//! - **Stateless**: providers are functions over immutable analysis snapshots
//! - **Protocol-free**: ranges are byte/line based; the server converts to LSP
//! - **Total**: malformed input yields diagnostics, never a panic
//!
//! # Usage
//!
//! ```rust,ignore
//! use koreo_analysis::diagnostics::analyze_document;
//! use koreo_analysis::semantic_tokens::collect_semantic_tokens;
//!
//! let analysis = analyze_document(text);
//! for diagnostic in &analysis.diagnostics {
//!     println!("{}: {}", diagnostic.code.as_str(), diagnostic.message);
//! }
//! let tokens = collect_semantic_tokens(&analysis);
//! ```

// Core model
pub mod expression;
pub mod extractor;
pub mod index;
pub mod model;
pub mod schema;
pub mod source;
pub mod workflow;
pub mod yaml;

// Analysis and evaluation
pub mod diagnostics;
pub mod function_test;
pub mod workspace;

// Editor features
pub mod code_lens;
pub mod completion;
pub mod go_to_definition;
pub mod hover;
pub mod inlay_hints;
pub mod references;
pub mod semantic_tokens;

// Test support (available in tests and as dev-dependency)
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
