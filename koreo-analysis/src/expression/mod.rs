//! Koreo expressions: YAML string scalars whose first character is `=`.
//!
//! - `lexer`: lazy tokenizer with error recovery
//! - `parser`: Pratt parser producing an [`Expr`] tree
//! - `eval`: dry evaluator over `serde_json::Value`

pub mod eval;
pub mod lexer;
pub mod parser;

use serde_json::Value;

pub use eval::{evaluate, Bindings, EvalError};
pub use lexer::{tokenize, tokenize_expression, LexError, Lexed, Token, TokenKind, Tokenizer};
pub use parser::{parse, Expr, ExprKind, ParseError};

pub fn is_expression(value: &str) -> bool {
    value.starts_with('=')
}

/// Body of an expression scalar, i.e. everything after the leading `=`.
pub fn expression_body(value: &str) -> Option<&str> {
    value.strip_prefix('=')
}

/// Why an expression could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    Lexical(Vec<LexError>),
    Syntax(ParseError),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Lexical(errors) => {
                let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
                write!(f, "{}", messages.join("; "))
            }
            CompileError::Syntax(error) => write!(f, "{}", error.message),
        }
    }
}

impl std::error::Error for CompileError {}

/// A parsed expression ready for evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    pub source: String,
    pub ast: Expr,
}

impl CompiledExpression {
    pub fn evaluate(&self, bindings: &Bindings) -> Result<Value, EvalError> {
        evaluate(&self.ast, bindings)
    }
}

/// Compiles a full expression scalar (with its leading `=`).
pub fn compile(expression: &str) -> Result<CompiledExpression, CompileError> {
    let body = expression_body(expression).unwrap_or(expression);
    let lexed = tokenize(body);
    if !lexed.errors.is_empty() {
        return Err(CompileError::Lexical(lexed.errors));
    }
    let ast = parse(&lexed.tokens, body.len()).map_err(CompileError::Syntax)?;
    Ok(CompiledExpression {
        source: expression.to_string(),
        ast,
    })
}

/// A step named inside an expression, through `${label}` or `steps.label`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepMention {
    pub label: String,
    pub start: usize,
    pub end: usize,
}

/// Finds step mentions in a token stream. Offsets cover the label itself.
pub fn step_mentions(tokens: &[Token]) -> Vec<StepMention> {
    let mut mentions = Vec::new();
    for (idx, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::StepReference => {
                let inner = &token.lexeme[2..token.lexeme.len() - 1];
                let leading = inner.len() - inner.trim_start().len();
                let label = inner.trim().split('.').next().unwrap_or_default();
                let start = token.start + 2 + leading;
                mentions.push(StepMention {
                    label: label.to_string(),
                    start,
                    end: start + label.len(),
                });
            }
            TokenKind::Identifier if token.lexeme == "steps" => {
                let preceded_by_dot = idx > 0 && tokens[idx - 1].is_operator(".");
                let (Some(dot), Some(name)) = (tokens.get(idx + 1), tokens.get(idx + 2)) else {
                    continue;
                };
                if preceded_by_dot || !dot.is_operator(".") {
                    continue;
                }
                if matches!(name.kind, TokenKind::Identifier | TokenKind::FunctionName) {
                    mentions.push(StepMention {
                        label: name.lexeme.clone(),
                        start: name.start,
                        end: name.end,
                    });
                }
            }
            _ => {}
        }
    }
    mentions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_reports_lexical_before_syntax() {
        assert!(matches!(compile("='abc"), Err(CompileError::Lexical(_))));
        assert!(matches!(compile("=(a"), Err(CompileError::Syntax(_))));
        assert!(compile("=inputs.a + 1").is_ok());
    }

    #[test]
    fn finds_step_mentions_in_both_forms() {
        let body = "${build.image_url} + steps.deploy.name + other.steps.x";
        let mentions = step_mentions(&tokenize(body).tokens);
        let labels: Vec<&str> = mentions.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(labels, vec!["build", "deploy"]);
        assert_eq!(&body[mentions[0].start..mentions[0].end], "build");
        assert_eq!(&body[mentions[1].start..mentions[1].end], "deploy");
    }
}
