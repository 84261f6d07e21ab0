// LSP-specific features (command payloads, diagnostic conversion, file discovery)
pub mod commands;
pub mod diagnostics;
pub mod files;

// Re-export analysis features from koreo-analysis
pub use koreo_analysis::{
    code_lens, completion, go_to_definition, hover, inlay_hints, references, semantic_tokens,
};
