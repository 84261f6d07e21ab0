//! Pratt parser over the token stream.
//!
//! The parser exists to surface structural mistakes while editing (unbalanced
//! brackets, missing operands, `=` used as a comparison) and to give the
//! evaluator a tree. It stops at the first structural error in an expression.

use std::ops::Range;

use super::lexer::{Token, TokenKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }

    fn binding_power(self) -> u8 {
        match self {
            BinaryOp::Or => 2,
            BinaryOp::And => 3,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::In => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 6,
        }
    }
}

const TERNARY_POWER: u8 = 1;
const PREFIX_POWER: u8 = 7;

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Ident(String),
    /// `${step.path}`; the segments of the dotted path.
    StepRef(Vec<String>),
    Member {
        target: Box<Expr>,
        field: String,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        function: String,
        args: Vec<Expr>,
    },
    MethodCall {
        target: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Range<usize>,
}

impl Expr {
    fn new(kind: ExprKind, span: Range<usize>) -> Self {
        Self { kind, span }
    }

    /// First-level keys read from `root`, e.g. `inputs.name` and `inputs['name']`
    /// both report `name` for root `inputs`.
    pub fn root_keys(&self, root: &str) -> Vec<String> {
        let mut keys = Vec::new();
        self.visit(&mut |expr| match &expr.kind {
            ExprKind::Member { target, field } => {
                if matches!(&target.kind, ExprKind::Ident(name) if name == root) {
                    keys.push(field.clone());
                }
            }
            ExprKind::Index { target, index } => {
                if let (ExprKind::Ident(name), ExprKind::Literal(Literal::String(key))) =
                    (&target.kind, &index.kind)
                {
                    if name == root {
                        keys.push(key.clone());
                    }
                }
            }
            _ => {}
        });
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn visit(&self, visitor: &mut impl FnMut(&Expr)) {
        visitor(self);
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Ident(_) | ExprKind::StepRef(_) => {}
            ExprKind::Member { target, .. } => target.visit(visitor),
            ExprKind::Index { target, index } => {
                target.visit(visitor);
                index.visit(visitor);
            }
            ExprKind::Call { args, .. } => args.iter().for_each(|arg| arg.visit(visitor)),
            ExprKind::MethodCall { target, args, .. } => {
                target.visit(visitor);
                args.iter().for_each(|arg| arg.visit(visitor));
            }
            ExprKind::Unary { operand, .. } => operand.visit(visitor),
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.visit(visitor);
                rhs.visit(visitor);
            }
            ExprKind::Ternary {
                condition,
                then,
                otherwise,
            } => {
                condition.visit(visitor);
                then.visit(visitor);
                otherwise.visit(visitor);
            }
            ExprKind::List(items) => items.iter().for_each(|item| item.visit(visitor)),
            ExprKind::Map(entries) => {
                for (key, value) in entries {
                    key.visit(visitor);
                    value.visit(visitor);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub start: usize,
    pub end: usize,
}

impl ParseError {
    fn at(token: &Token, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            start: token.start,
            end: token.end,
        }
    }
}

/// Parses a token stream. Error tokens are skipped; lexical problems are
/// reported by the tokenizer.
pub fn parse(tokens: &[Token], source_len: usize) -> Result<Expr, ParseError> {
    let tokens: Vec<&Token> = tokens
        .iter()
        .filter(|token| token.kind != TokenKind::Error)
        .collect();
    let mut parser = Parser {
        tokens,
        position: 0,
        source_len,
    };
    if parser.tokens.is_empty() {
        return Err(ParseError {
            message: "empty expression".into(),
            start: 0,
            end: source_len,
        });
    }
    let expr = parser.expression(0)?;
    if let Some(token) = parser.peek() {
        let message = if token.is_punctuation(")")
            || token.is_punctuation("]")
            || token.is_punctuation("}")
        {
            format!("unmatched closing '{}'", token.lexeme)
        } else {
            misplaced_operator_hint(token)
                .unwrap_or_else(|| format!("unexpected '{}' after complete expression", token.lexeme))
        };
        return Err(ParseError::at(token, message));
    }
    Ok(expr)
}

fn misplaced_operator_hint(token: &Token) -> Option<String> {
    let hint = match (token.kind, token.lexeme.as_str()) {
        (TokenKind::Identifier, "and") => "use '&&' instead of 'and'",
        (TokenKind::Identifier, "or") => "use '||' instead of 'or'",
        (TokenKind::Operator, "=") => "single '=' is not a comparison, use '=='",
        (TokenKind::Operator, "&") => "use '&&' for logical and",
        (TokenKind::Operator, "|") => "use '||' for logical or",
        _ => return None,
    };
    Some(hint.to_string())
}

struct Parser<'t> {
    tokens: Vec<&'t Token>,
    position: usize,
    source_len: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.position).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<&'t Token> {
        self.tokens.get(self.position + ahead).copied()
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.peek();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn end_error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            start: self.source_len,
            end: self.source_len,
        }
    }

    fn expect_punctuation(&mut self, punct: &str, opened: &Token) -> Result<&'t Token, ParseError> {
        match self.peek() {
            Some(token) if token.is_punctuation(punct) => {
                self.position += 1;
                Ok(token)
            }
            Some(token) => Err(ParseError::at(
                token,
                format!(
                    "expected '{punct}' to close '{}', found '{}'",
                    opened.lexeme, token.lexeme
                ),
            )),
            None => Err(ParseError::at(
                opened,
                format!("unmatched opening '{}'", opened.lexeme),
            )),
        }
    }

    fn expression(&mut self, min_power: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.prefix()?;

        loop {
            let Some(token) = self.peek() else {
                break;
            };

            if token.is_operator("?") {
                if TERNARY_POWER < min_power {
                    break;
                }
                self.position += 1;
                let then = self.expression(0)?;
                match self.peek() {
                    Some(colon) if colon.is_punctuation(":") => self.position += 1,
                    Some(other) => {
                        return Err(ParseError::at(
                            other,
                            format!("expected ':' in conditional, found '{}'", other.lexeme),
                        ))
                    }
                    None => return Err(ParseError::at(token, "conditional is missing ':' branch")),
                }
                let otherwise = self.expression(TERNARY_POWER)?;
                let span = lhs.span.start..otherwise.span.end;
                lhs = Expr::new(
                    ExprKind::Ternary {
                        condition: Box::new(lhs),
                        then: Box::new(then),
                        otherwise: Box::new(otherwise),
                    },
                    span,
                );
                continue;
            }

            let Some(op) = binary_op(token) else {
                if let Some(hint) = misplaced_operator_hint(token) {
                    return Err(ParseError::at(token, hint));
                }
                break;
            };
            let power = op.binding_power();
            if power <= min_power {
                break;
            }
            self.position += 1;
            if self.peek().is_none() {
                return Err(ParseError::at(
                    token,
                    format!("operator '{}' is missing its right operand", token.lexeme),
                ));
            }
            let rhs = self.expression(power)?;
            let span = lhs.span.start..rhs.span.end;
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, ParseError> {
        let Some(token) = self.advance() else {
            return Err(self.end_error("expression ended where an operand was expected"));
        };

        if token.is_operator("!") || token.is_operator("-") {
            let op = if token.is_operator("!") {
                UnaryOp::Not
            } else {
                UnaryOp::Negate
            };
            let operand = self.expression(PREFIX_POWER)?;
            let span = token.start..operand.span.end;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            ));
        }

        let primary = self.primary(token)?;
        self.postfix(primary)
    }

    fn primary(&mut self, token: &'t Token) -> Result<Expr, ParseError> {
        let span = token.start..token.end;
        let kind = match token.kind {
            TokenKind::Number => ExprKind::Literal(parse_number(token)?),
            TokenKind::String => ExprKind::Literal(Literal::String(unquote(&token.lexeme))),
            TokenKind::Keyword => match token.lexeme.as_str() {
                "true" => ExprKind::Literal(Literal::Bool(true)),
                "false" => ExprKind::Literal(Literal::Bool(false)),
                "null" => ExprKind::Literal(Literal::Null),
                _ => {
                    return Err(ParseError::at(
                        token,
                        format!("'{}' cannot start an expression", token.lexeme),
                    ))
                }
            },
            TokenKind::StepReference => {
                let inner = token
                    .lexeme
                    .trim_start_matches("${")
                    .trim_end_matches('}')
                    .trim();
                ExprKind::StepRef(inner.split('.').map(str::to_string).collect())
            }
            TokenKind::Identifier => {
                if let Some(next) = self.peek() {
                    let starts_operand = matches!(
                        next.kind,
                        TokenKind::Identifier
                            | TokenKind::FunctionName
                            | TokenKind::Number
                            | TokenKind::String
                            | TokenKind::StepReference
                    );
                    if starts_operand && token.lexeme == "not" {
                        return Err(ParseError::at(token, "use '!' instead of 'not'"));
                    }
                    if starts_operand && token.lexeme == "if" {
                        return Err(ParseError::at(
                            token,
                            "use the conditional operator 'cond ? a : b' instead of 'if'",
                        ));
                    }
                }
                ExprKind::Ident(token.lexeme.clone())
            }
            TokenKind::FunctionName => {
                let open = self
                    .advance()
                    .ok_or_else(|| self.end_error("expected '(' after function name"))?;
                let (args, close) = self.arguments(open)?;
                return Ok(Expr::new(
                    ExprKind::Call {
                        function: token.lexeme.clone(),
                        args,
                    },
                    token.start..close.end,
                ));
            }
            TokenKind::Punctuation if token.lexeme == "(" => {
                if self.peek().is_some_and(|next| next.is_punctuation(")")) {
                    return Err(ParseError::at(token, "empty parentheses"));
                }
                let inner = self.expression(0)?;
                let close = self.expect_punctuation(")", token)?;
                return Ok(Expr::new(inner.kind, token.start..close.end));
            }
            TokenKind::Punctuation if token.lexeme == "[" => {
                let mut items = Vec::new();
                let close = loop {
                    if let Some(close) = self.peek().filter(|next| next.is_punctuation("]")) {
                        self.position += 1;
                        break close;
                    }
                    items.push(self.expression(0)?);
                    match self.peek() {
                        Some(next) if next.is_punctuation(",") => self.position += 1,
                        _ => break self.expect_punctuation("]", token)?,
                    }
                };
                return Ok(Expr::new(ExprKind::List(items), token.start..close.end));
            }
            TokenKind::Punctuation if token.lexeme == "{" => {
                let mut entries = Vec::new();
                let close = loop {
                    if let Some(close) = self.peek().filter(|next| next.is_punctuation("}")) {
                        self.position += 1;
                        break close;
                    }
                    let key = self.expression(0)?;
                    match self.peek() {
                        Some(colon) if colon.is_punctuation(":") => self.position += 1,
                        Some(other) => {
                            return Err(ParseError::at(
                                other,
                                format!("expected ':' after map key, found '{}'", other.lexeme),
                            ))
                        }
                        None => {
                            return Err(ParseError::at(
                                token,
                                format!("unmatched opening '{}'", token.lexeme),
                            ))
                        }
                    }
                    let value = self.expression(0)?;
                    entries.push((key, value));
                    match self.peek() {
                        Some(next) if next.is_punctuation(",") => self.position += 1,
                        _ => break self.expect_punctuation("}", token)?,
                    }
                };
                return Ok(Expr::new(ExprKind::Map(entries), token.start..close.end));
            }
            TokenKind::Punctuation => {
                let message = match token.lexeme.as_str() {
                    ")" | "]" | "}" => format!("unmatched closing '{}'", token.lexeme),
                    _ => format!("unexpected '{}'", token.lexeme),
                };
                return Err(ParseError::at(token, message));
            }
            TokenKind::Operator => {
                let message = if token.lexeme == "." {
                    "expression cannot start with '.', did you mean 'inputs.' or 'self.'?"
                        .to_string()
                } else {
                    format!("operator '{}' is missing its left operand", token.lexeme)
                };
                return Err(ParseError::at(token, message));
            }
            TokenKind::Error => {
                return Err(ParseError::at(token, "invalid token"));
            }
        };
        Ok(Expr::new(kind, span))
    }

    fn postfix(&mut self, mut expr: Expr) -> Result<Expr, ParseError> {
        while let Some(token) = self.peek() {
            if token.is_operator(".") {
                self.position += 1;
                let Some(name) = self.advance() else {
                    return Err(ParseError::at(token, "expected field name after '.'"));
                };
                match name.kind {
                    TokenKind::Identifier | TokenKind::Keyword => {
                        let span = expr.span.start..name.end;
                        expr = Expr::new(
                            ExprKind::Member {
                                target: Box::new(expr),
                                field: name.lexeme.clone(),
                            },
                            span,
                        );
                    }
                    TokenKind::FunctionName => {
                        let open = self
                            .advance()
                            .ok_or_else(|| self.end_error("expected '(' after method name"))?;
                        let (args, close) = self.arguments(open)?;
                        let span = expr.span.start..close.end;
                        expr = Expr::new(
                            ExprKind::MethodCall {
                                target: Box::new(expr),
                                method: name.lexeme.clone(),
                                args,
                            },
                            span,
                        );
                    }
                    _ => {
                        return Err(ParseError::at(
                            name,
                            format!("expected field name after '.', found '{}'", name.lexeme),
                        ))
                    }
                }
            } else if token.is_punctuation("[") {
                self.position += 1;
                let index = self.expression(0)?;
                let close = self.expect_punctuation("]", token)?;
                let span = expr.span.start..close.end;
                expr = Expr::new(
                    ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn arguments(&mut self, open: &'t Token) -> Result<(Vec<Expr>, &'t Token), ParseError> {
        if !open.is_punctuation("(") {
            return Err(ParseError::at(open, "expected '(' after function name"));
        }
        let mut args = Vec::new();
        loop {
            if let Some(close) = self.peek().filter(|next| next.is_punctuation(")")) {
                self.position += 1;
                return Ok((args, close));
            }
            args.push(self.expression(0)?);
            match self.peek() {
                Some(next) if next.is_punctuation(",") => {
                    self.position += 1;
                    if self.peek_at(0).is_some_and(|t| t.is_punctuation(")")) {
                        return Err(ParseError::at(next, "trailing ',' in argument list"));
                    }
                }
                _ => return Ok((args, self.expect_punctuation(")", open)?)),
            }
        }
    }
}

fn binary_op(token: &Token) -> Option<BinaryOp> {
    let op = match (token.kind, token.lexeme.as_str()) {
        (TokenKind::Operator, "||") => BinaryOp::Or,
        (TokenKind::Operator, "&&") => BinaryOp::And,
        (TokenKind::Operator, "==") => BinaryOp::Eq,
        (TokenKind::Operator, "!=") => BinaryOp::Ne,
        (TokenKind::Operator, "<") => BinaryOp::Lt,
        (TokenKind::Operator, "<=") => BinaryOp::Le,
        (TokenKind::Operator, ">") => BinaryOp::Gt,
        (TokenKind::Operator, ">=") => BinaryOp::Ge,
        (TokenKind::Keyword, "in") => BinaryOp::In,
        (TokenKind::Operator, "+") => BinaryOp::Add,
        (TokenKind::Operator, "-") => BinaryOp::Sub,
        (TokenKind::Operator, "*") => BinaryOp::Mul,
        (TokenKind::Operator, "/") => BinaryOp::Div,
        (TokenKind::Operator, "%") => BinaryOp::Rem,
        _ => return None,
    };
    Some(op)
}

fn parse_number(token: &Token) -> Result<Literal, ParseError> {
    let text = token.lexeme.trim_end_matches(['u', 'U']);
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok().map(Literal::Int)
    } else if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>().ok().map(Literal::Float)
    } else {
        text.parse::<i64>().ok().map(Literal::Int)
    };
    parsed.ok_or_else(|| ParseError::at(token, format!("number '{}' is out of range", token.lexeme)))
}

/// Strips quotes and resolves escapes of a string token's lexeme.
pub fn unquote(lexeme: &str) -> String {
    let (raw, body) = match lexeme.strip_prefix(['r', 'R']) {
        Some(rest) => (true, rest),
        None => (false, lexeme),
    };
    let quote_len = if body.starts_with("\"\"\"") || body.starts_with("'''") {
        3
    } else {
        1
    };
    let inner = if body.len() >= quote_len * 2 {
        &body[quote_len..body.len() - quote_len]
    } else {
        ""
    };
    if raw {
        return inner.to_string();
    }

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('a') => out.push('\u{07}'),
            Some('b') => out.push('\u{08}'),
            Some('f') => out.push('\u{0c}'),
            Some('v') => out.push('\u{0b}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::lexer::tokenize;

    fn parse_body(body: &str) -> Result<Expr, ParseError> {
        parse(&tokenize(body).tokens, body.len())
    }

    #[test]
    fn parses_precedence() {
        let expr = parse_body("a + b * c == d").unwrap();
        let ExprKind::Binary { op, lhs, .. } = expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Eq);
        let ExprKind::Binary { op, rhs, .. } = lhs.kind else {
            panic!("expected addition");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn parses_ternary_and_macros() {
        let expr = parse_body("size(inputs.values) > 0 ? inputs.values.map(v, v.amount) : []")
            .unwrap();
        assert!(matches!(expr.kind, ExprKind::Ternary { .. }));
    }

    #[test]
    fn parses_literals_and_maps() {
        let expr = parse_body("{'a': [1, 2.5, true, null], \"b\": -3}").unwrap();
        let ExprKind::Map(entries) = expr.kind else {
            panic!("expected map");
        };
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn reports_unbalanced_brackets() {
        let err = parse_body("size(inputs.values").unwrap_err();
        assert!(err.message.contains("unmatched opening '('"), "{}", err.message);
        assert_eq!((err.start, err.end), (4, 5));

        let err = parse_body("inputs.a)").unwrap_err();
        assert!(err.message.contains("unmatched closing ')'"));
    }

    #[test]
    fn reports_assignment_and_word_operators() {
        assert!(parse_body("inputs.a = 1").unwrap_err().message.contains("'=='"));
        assert!(parse_body("a and b").unwrap_err().message.contains("'&&'"));
        assert!(parse_body("a or b").unwrap_err().message.contains("'||'"));
        assert!(parse_body("not a").unwrap_err().message.contains("'!'"));
    }

    #[test]
    fn reports_missing_operand() {
        let err = parse_body("inputs.a +").unwrap_err();
        assert!(err.message.contains("right operand"));
        let err = parse_body("* 2").unwrap_err();
        assert!(err.message.contains("left operand"));
    }

    #[test]
    fn collects_root_keys() {
        let expr = parse_body("inputs.name + inputs['zone'] + string(inputs.name.size())")
            .unwrap();
        assert_eq!(expr.root_keys("inputs"), vec!["name", "zone"]);
    }

    #[test]
    fn unquotes_strings() {
        assert_eq!(unquote(r#""a\"b\n""#), "a\"b\n");
        assert_eq!(unquote("'plain'"), "plain");
        assert_eq!(unquote(r"r'\d+'"), r"\d+");
        assert_eq!(unquote("'''multi'''"), "multi");
    }
}
