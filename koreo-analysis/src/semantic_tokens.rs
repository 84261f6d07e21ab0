//! Semantic token collector for Koreo documents.
//!
//! Tokens are derived from the semantic index: resource kinds, names and
//! references, step labels and mentions, schema keys, and the lexical tokens
//! of every expression. The legend uses Koreo's own terminology; editor
//! plugins map these names onto their theme scopes.
//!
//! Anchors nest (an expression contains its tokens, a `${label}` token
//! contains the label mention), but semantic tokens may not overlap. The
//! collector keeps the outermost token of any nested pair, except that a step
//! mention replaces a plain identifier covering exactly the same text.

use crate::diagnostics::DocumentAnalysis;
use crate::expression::TokenKind;
use crate::model::{AnchorRole, SemanticAnchor};
use crate::source::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KoreoSemanticTokenKind {
    ResourceKind,
    ResourceName,
    ResourceReference,
    StepLabel,
    StepReference,
    FieldKey,
    Keyword,
    Variable,
    Function,
    Number,
    String,
    Operator,
}

impl KoreoSemanticTokenKind {
    /// Returns the semantic token type string for LSP.
    pub fn as_str(self) -> &'static str {
        match self {
            KoreoSemanticTokenKind::ResourceKind => "ResourceKind",
            KoreoSemanticTokenKind::ResourceName => "ResourceName",
            KoreoSemanticTokenKind::ResourceReference => "ResourceReference",
            KoreoSemanticTokenKind::StepLabel => "StepLabel",
            KoreoSemanticTokenKind::StepReference => "StepReference",
            KoreoSemanticTokenKind::FieldKey => "FieldKey",
            KoreoSemanticTokenKind::Keyword => "Keyword",
            KoreoSemanticTokenKind::Variable => "Variable",
            KoreoSemanticTokenKind::Function => "Function",
            KoreoSemanticTokenKind::Number => "Number",
            KoreoSemanticTokenKind::String => "String",
            KoreoSemanticTokenKind::Operator => "Operator",
        }
    }

    fn for_anchor(anchor: &SemanticAnchor) -> Option<Self> {
        Some(match anchor.role {
            AnchorRole::ResourceKind => KoreoSemanticTokenKind::ResourceKind,
            AnchorRole::ResourceNameDef => KoreoSemanticTokenKind::ResourceName,
            AnchorRole::ResourceRefUse => KoreoSemanticTokenKind::ResourceReference,
            AnchorRole::StepLabelDef => KoreoSemanticTokenKind::StepLabel,
            AnchorRole::StepRefUse => KoreoSemanticTokenKind::StepReference,
            AnchorRole::ResourceField => KoreoSemanticTokenKind::FieldKey,
            AnchorRole::ExpressionToken(kind) => match kind {
                TokenKind::Keyword => KoreoSemanticTokenKind::Keyword,
                TokenKind::Identifier => KoreoSemanticTokenKind::Variable,
                TokenKind::FunctionName => KoreoSemanticTokenKind::Function,
                TokenKind::Number => KoreoSemanticTokenKind::Number,
                TokenKind::String => KoreoSemanticTokenKind::String,
                TokenKind::Operator | TokenKind::Punctuation => KoreoSemanticTokenKind::Operator,
                TokenKind::StepReference => KoreoSemanticTokenKind::StepReference,
                TokenKind::Error => return None,
            },
            AnchorRole::Expression | AnchorRole::SchemaViolation => return None,
        })
    }
}

pub const SEMANTIC_TOKEN_KINDS: &[KoreoSemanticTokenKind] = &[
    KoreoSemanticTokenKind::ResourceKind,
    KoreoSemanticTokenKind::ResourceName,
    KoreoSemanticTokenKind::ResourceReference,
    KoreoSemanticTokenKind::StepLabel,
    KoreoSemanticTokenKind::StepReference,
    KoreoSemanticTokenKind::FieldKey,
    KoreoSemanticTokenKind::Keyword,
    KoreoSemanticTokenKind::Variable,
    KoreoSemanticTokenKind::Function,
    KoreoSemanticTokenKind::Number,
    KoreoSemanticTokenKind::String,
    KoreoSemanticTokenKind::Operator,
];

#[derive(Debug, Clone, PartialEq)]
pub struct KoreoSemanticToken {
    pub kind: KoreoSemanticTokenKind,
    pub range: Range,
}

pub fn collect_semantic_tokens(analysis: &DocumentAnalysis) -> Vec<KoreoSemanticToken> {
    let mut collector = TokenCollector::new();
    for anchor in analysis.index.anchors() {
        if let Some(kind) = KoreoSemanticTokenKind::for_anchor(anchor) {
            collector.push_range(&anchor.range, kind);
        }
    }
    collector.finish()
}

struct TokenCollector {
    tokens: Vec<KoreoSemanticToken>,
}

impl TokenCollector {
    fn new() -> Self {
        Self { tokens: Vec::new() }
    }

    fn push_range(&mut self, range: &Range, kind: KoreoSemanticTokenKind) {
        if range.span.start < range.span.end {
            self.tokens.push(KoreoSemanticToken {
                kind,
                range: range.clone(),
            });
        }
    }

    fn finish(mut self) -> Vec<KoreoSemanticToken> {
        self.tokens.sort_by(|a, b| {
            (a.range.span.start, std::cmp::Reverse(a.range.span.end))
                .cmp(&(b.range.span.start, std::cmp::Reverse(b.range.span.end)))
        });

        let mut kept: Vec<KoreoSemanticToken> = Vec::with_capacity(self.tokens.len());
        for token in self.tokens {
            match kept.last_mut() {
                Some(last) if last.range.span == token.range.span => {
                    if token.kind == KoreoSemanticTokenKind::StepReference {
                        last.kind = token.kind;
                    }
                }
                Some(last) if token.range.span.start < last.range.span.end => {}
                _ => kept.push(token),
            }
        }
        kept
    }
}
