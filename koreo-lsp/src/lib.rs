//! Language Server Protocol (LSP) implementation for Koreo
//!
//!     This crate serves the analysis in `koreo-analysis` to editors over stdio and offers the
//!     same checks as a batch command for CI (`koreo-lsp check`).
//!
//! Architecture
//!
//!     The server is built on tower-lsp. Handlers are thin: they look up the stored analysis
//!     for a document, lock the shared workspace for reading and delegate to a
//!     `FeatureProvider`. The provider trait is the seam tests use to observe calls without a
//!     real client; `LspClient` plays the same role for outgoing notifications.
//!
//!     Parsing and test execution are CPU bound and run on tokio's blocking pool. Each edit
//!     bumps a per-document generation and only the analysis matching the latest generation is
//!     stored and published, so a slow parse of an old revision never overwrites a newer one.
//!
//! Feature Set
//!
//!     Editing:
//!         1. Diagnostics: YAML and expression syntax, schema violations, unresolved
//!            references, step ordering, FunctionTest failures
//!         2. Semantic Tokens (textDocument/semanticTokens/full)
//!         3. Completion (textDocument/completion): field names, step labels, inputs and
//!            resource names
//!
//!     Navigation:
//!         4. Hover (textDocument/hover): resource summaries, step outcomes, test results
//!         5. Go to Definition (textDocument/definition)
//!         6. Find References (textDocument/references)
//!
//!     FunctionTests:
//!         7. Run on open and save, or via `koreo.runFunctionTests`
//!         8. Code Lens (textDocument/codeLens): replace a failing expectation with the actual
//!            result through `koreo.applyTestCorrection`
//!
//! Configuration
//!
//!     Settings arrive under the `koreo` key of `initializationOptions` or
//!     `workspace/didChangeConfiguration`:
//!
//!         runTestsOnSave        bool   (default true)
//!         maxCompletionItems    number (default 200)
//!         unknownFieldWarnings  bool   (default true)
//!
//!     Logging goes to stderr and is filtered with the `KOREO_LOG` environment variable using
//!     `tracing_subscriber::EnvFilter` syntax.

pub mod check;
pub mod features;
pub mod server;

pub use server::KoreoLanguageServer;
