//! Tokenizer for Koreo expressions.
//!
//! The lexer works on the expression body, the text after the leading `=`. Token
//! offsets are byte offsets into that body. Lexing never stops early: an
//! unrecognised character becomes a one-character error token, an unterminated
//! string or step reference becomes an error token running to the end of input,
//! and every problem is also recorded as a [`LexError`].

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Keyword,
    Identifier,
    FunctionName,
    Number,
    String,
    Operator,
    Punctuation,
    StepReference,
    Error,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Keyword => "keyword",
            TokenKind::Identifier => "identifier",
            TokenKind::FunctionName => "function-name",
            TokenKind::Number => "number",
            TokenKind::String => "string",
            TokenKind::Operator => "operator",
            TokenKind::Punctuation => "punctuation",
            TokenKind::StepReference => "step-reference",
            TokenKind::Error => "error",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn is_operator(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.lexeme == op
    }

    pub fn is_punctuation(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punctuation && self.lexeme == punct
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub start: usize,
    pub end: usize,
}

pub const KEYWORDS: &[&str] = &["true", "false", "null", "in"];

// Longest first so `==` wins over `=` and `&&` over `&`.
const OPERATORS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "<", ">", "!", "?", ".", "=",
    "&", "|",
];

const PUNCTUATION: &[char] = &['(', ')', '[', ']', '{', '}', ',', ':'];

/// Lazy token stream over one expression body.
///
/// Cloning a tokenizer, or calling [`Tokenizer::restart`], replays the same
/// sequence from the beginning.
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    source: &'a str,
    offset: usize,
    previous: Option<TokenKind>,
    previous_closes: bool,
    errors: Vec<LexError>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            offset: 0,
            previous: None,
            previous_closes: false,
            errors: Vec::new(),
        }
    }

    pub fn restart(&mut self) {
        self.offset = 0;
        self.previous = None;
        self.previous_closes = false;
        self.errors.clear();
    }

    /// Errors seen so far. Complete once the iterator is exhausted.
    pub fn errors(&self) -> &[LexError] {
        &self.errors
    }

    fn rest(&self) -> &'a str {
        &self.source[self.offset..]
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn char_at(&self, offset: usize) -> Option<char> {
        self.source.get(offset..).and_then(|rest| rest.chars().next())
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek_char() {
            if !ch.is_whitespace() {
                break;
            }
            self.offset += ch.len_utf8();
        }
    }

    fn emit(&mut self, kind: TokenKind, start: usize) -> Token {
        let lexeme = self.source[start..self.offset].to_string();
        self.previous = Some(kind);
        self.previous_closes = matches!(
            kind,
            TokenKind::Identifier
                | TokenKind::Number
                | TokenKind::String
                | TokenKind::StepReference
                | TokenKind::Keyword
        ) || lexeme == ")"
            || lexeme == "]";
        Token {
            kind,
            lexeme,
            start,
            end: self.offset,
        }
    }

    fn error(&mut self, start: usize, message: impl Into<String>) -> Token {
        self.errors.push(LexError {
            message: message.into(),
            start,
            end: self.offset,
        });
        self.emit(TokenKind::Error, start)
    }

    fn lex_identifier(&mut self, start: usize) -> Token {
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.offset += 1;
            } else {
                break;
            }
        }
        let word = &self.source[start..self.offset];
        if KEYWORDS.contains(&word) {
            return self.emit(TokenKind::Keyword, start);
        }
        let after = self.rest().trim_start();
        if after.starts_with('(') {
            self.emit(TokenKind::FunctionName, start)
        } else {
            self.emit(TokenKind::Identifier, start)
        }
    }

    fn consume_digits(&mut self, radix: u32) -> usize {
        let mut count = 0;
        while let Some(ch) = self.peek_char() {
            if ch.is_digit(radix) {
                self.offset += 1;
                count += 1;
            } else {
                break;
            }
        }
        count
    }

    fn lex_number(&mut self, start: usize) -> Token {
        if self.rest().starts_with("0x") || self.rest().starts_with("0X") {
            self.offset += 2;
            if self.consume_digits(16) == 0 {
                return self.error(start, "hexadecimal literal has no digits");
            }
            if matches!(self.peek_char(), Some('u' | 'U')) {
                self.offset += 1;
            }
            return self.emit(TokenKind::Number, start);
        }

        let integer_digits = self.consume_digits(10);
        let mut is_float = false;
        if self.peek_char() == Some('.') {
            let next = self.char_at(self.offset + 1);
            let trailing_dot_ok = integer_digits > 0
                && !matches!(next, Some(ch) if ch.is_ascii_alphabetic() || ch == '_');
            if matches!(next, Some(ch) if ch.is_ascii_digit()) || trailing_dot_ok {
                self.offset += 1;
                self.consume_digits(10);
                is_float = true;
            }
        }

        if matches!(self.peek_char(), Some('e' | 'E')) {
            self.offset += 1;
            if matches!(self.peek_char(), Some('+' | '-')) {
                self.offset += 1;
            }
            if self.consume_digits(10) == 0 {
                // Swallow the rest of a word-like tail so `1ex` is one bad token.
                while matches!(self.peek_char(), Some(ch) if ch.is_ascii_alphanumeric() || ch == '_')
                {
                    self.offset += 1;
                }
                return self.error(start, "malformed exponent in number literal");
            }
            is_float = true;
        }

        if !is_float && matches!(self.peek_char(), Some('u' | 'U')) {
            self.offset += 1;
        }

        if matches!(self.peek_char(), Some(ch) if ch.is_ascii_alphabetic() || ch == '_') {
            while matches!(self.peek_char(), Some(ch) if ch.is_ascii_alphanumeric() || ch == '_') {
                self.offset += 1;
            }
            return self.error(start, "malformed number literal");
        }

        self.emit(TokenKind::Number, start)
    }

    fn lex_string(&mut self, start: usize, raw: bool) -> Token {
        let Some(quote) = self.peek_char() else {
            return self.error(start, "unterminated string literal");
        };
        let triple: String = std::iter::repeat(quote).take(3).collect();
        let is_triple = self.rest().starts_with(&triple);
        self.offset += if is_triple { 3 } else { 1 };

        loop {
            let Some(ch) = self.peek_char() else {
                return self.error(start, "unterminated string literal");
            };
            if is_triple {
                if self.rest().starts_with(&triple) {
                    self.offset += 3;
                    break;
                }
            } else if ch == quote {
                self.offset += 1;
                break;
            } else if ch == '\n' {
                // Single-quoted literals do not span lines.
                self.offset = self.source.len();
                return self.error(start, "unterminated string literal");
            }

            if ch == '\\' && !raw {
                let escape_start = self.offset;
                self.offset += 1;
                match self.peek_char() {
                    Some('n' | 't' | 'r' | '\\' | '\'' | '"' | '0' | 'a' | 'b' | 'f' | 'v') => {
                        self.offset += 1;
                    }
                    Some('u') => {
                        self.offset += 1;
                        if self.consume_digits(16) != 4 {
                            self.errors.push(LexError {
                                message: "\\u escape expects four hexadecimal digits".into(),
                                start: escape_start,
                                end: self.offset,
                            });
                        }
                    }
                    Some(other) => {
                        self.offset += other.len_utf8();
                        self.errors.push(LexError {
                            message: format!("unknown escape sequence '\\{other}'"),
                            start: escape_start,
                            end: self.offset,
                        });
                    }
                    None => {
                        return self.error(start, "unterminated string literal");
                    }
                }
                continue;
            }
            self.offset += ch.len_utf8();
        }
        self.emit(TokenKind::String, start)
    }

    fn lex_step_reference(&mut self, start: usize) -> Token {
        self.offset += 2;
        let Some(close) = self.rest().find('}') else {
            self.offset = self.source.len();
            return self.error(start, "unterminated step reference, expected '}'");
        };
        let inner = &self.rest()[..close];
        self.offset += close + 1;
        if is_dotted_path(inner.trim()) {
            self.emit(TokenKind::StepReference, start)
        } else {
            self.error(
                start,
                format!("step reference '{inner}' is not a dotted identifier path"),
            )
        }
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.skip_whitespace();
        let start = self.offset;
        let ch = self.peek_char()?;

        if ch == '$' && self.rest().starts_with("${") {
            return Some(self.lex_step_reference(start));
        }
        if (ch == 'r' || ch == 'R') && matches!(self.char_at(start + 1), Some('"' | '\'')) {
            self.offset += 1;
            return Some(self.lex_string(start, true));
        }
        if ch.is_ascii_alphabetic() || ch == '_' {
            return Some(self.lex_identifier(start));
        }
        if ch.is_ascii_digit() {
            return Some(self.lex_number(start));
        }
        if ch == '.'
            && !self.previous_closes
            && matches!(self.char_at(start + 1), Some(next) if next.is_ascii_digit())
        {
            return Some(self.lex_number(start));
        }
        if ch == '"' || ch == '\'' {
            return Some(self.lex_string(start, false));
        }
        if let Some(op) = OPERATORS.iter().find(|op| self.rest().starts_with(**op)) {
            self.offset += op.len();
            return Some(self.emit(TokenKind::Operator, start));
        }
        if PUNCTUATION.contains(&ch) {
            self.offset += 1;
            return Some(self.emit(TokenKind::Punctuation, start));
        }

        self.offset += ch.len_utf8();
        Some(self.error(start, format!("unexpected character '{ch}'")))
    }
}

fn is_dotted_path(text: &str) -> bool {
    !text.is_empty()
        && text.split('.').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
                && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        })
}

/// Fully lexed expression body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lexed {
    pub tokens: Vec<Token>,
    pub errors: Vec<LexError>,
}

/// Tokenizes an expression body (without the leading `=`).
pub fn tokenize(body: &str) -> Lexed {
    let mut tokenizer = Tokenizer::new(body);
    let tokens: Vec<Token> = tokenizer.by_ref().collect();
    Lexed {
        tokens,
        errors: tokenizer.errors,
    }
}

/// Tokenizes a full expression scalar such as `=inputs.name`.
///
/// Offsets stay relative to the body, i.e. the text after `=`.
pub fn tokenize_expression(expression: &str) -> Lexed {
    tokenize(expression.strip_prefix('=').unwrap_or(expression))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(body: &str) -> Vec<TokenKind> {
        tokenize(body).tokens.iter().map(|token| token.kind).collect()
    }

    #[test]
    fn classifies_member_arithmetic() {
        let lexed = tokenize_expression("=inputs.value * 2 + 3.14159");
        assert!(lexed.errors.is_empty());
        let summary: Vec<(TokenKind, &str, usize, usize)> = lexed
            .tokens
            .iter()
            .map(|token| (token.kind, token.lexeme.as_str(), token.start, token.end))
            .collect();
        assert_eq!(
            summary,
            vec![
                (TokenKind::Identifier, "inputs", 0, 6),
                (TokenKind::Operator, ".", 6, 7),
                (TokenKind::Identifier, "value", 7, 12),
                (TokenKind::Operator, "*", 13, 14),
                (TokenKind::Number, "2", 15, 16),
                (TokenKind::Operator, "+", 17, 18),
                (TokenKind::Number, "3.14159", 19, 26),
            ]
        );
    }

    #[test]
    fn retokenizing_is_deterministic() {
        let body = "size(inputs.values) > 0 ? 'yes' : ${build.image}";
        assert_eq!(tokenize(body), tokenize(body));

        let mut tokenizer = Tokenizer::new(body);
        let first: Vec<Token> = tokenizer.by_ref().collect();
        tokenizer.restart();
        let second: Vec<Token> = tokenizer.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn keywords_and_function_names() {
        assert_eq!(
            kinds("has (x) && true in null"),
            vec![
                TokenKind::FunctionName,
                TokenKind::Punctuation,
                TokenKind::Identifier,
                TokenKind::Punctuation,
                TokenKind::Operator,
                TokenKind::Keyword,
                TokenKind::Keyword,
                TokenKind::Keyword,
            ]
        );
    }

    #[test]
    fn operators_match_longest_first() {
        let lexed = tokenize("a==b&&c||d<=e!=f");
        let ops: Vec<&str> = lexed
            .tokens
            .iter()
            .filter(|token| token.kind == TokenKind::Operator)
            .map(|token| token.lexeme.as_str())
            .collect();
        assert_eq!(ops, vec!["==", "&&", "||", "<=", "!="]);
    }

    #[test]
    fn number_forms() {
        for body in ["1", "1.5", "1.23e-4", "6E+2", ".5", "5.", "0x1F", "42u"] {
            let lexed = tokenize(body);
            assert_eq!(lexed.tokens.len(), 1, "{body}");
            assert_eq!(lexed.tokens[0].kind, TokenKind::Number, "{body}");
            assert!(lexed.errors.is_empty(), "{body}");
        }
    }

    #[test]
    fn malformed_exponent_is_an_error_token() {
        let lexed = tokenize("1e + 2");
        assert_eq!(lexed.tokens[0].kind, TokenKind::Error);
        assert_eq!(lexed.tokens[0].lexeme, "1e");
        assert_eq!(lexed.errors.len(), 1);
        assert_eq!(lexed.tokens.last().map(|t| t.kind), Some(TokenKind::Number));
    }

    #[test]
    fn member_access_on_index_is_not_a_number() {
        assert_eq!(
            kinds("items[0].name"),
            vec![
                TokenKind::Identifier,
                TokenKind::Punctuation,
                TokenKind::Number,
                TokenKind::Punctuation,
                TokenKind::Operator,
                TokenKind::Identifier,
            ]
        );
    }

    #[test]
    fn strings_with_escapes() {
        let lexed = tokenize(r#""a\"b" + 'c\'d' + '\n\t\\'"#);
        assert!(lexed.errors.is_empty());
        assert_eq!(
            lexed
                .tokens
                .iter()
                .filter(|t| t.kind == TokenKind::String)
                .count(),
            3
        );
    }

    #[test]
    fn unterminated_string_runs_to_end() {
        let body = "inputs.name + 'abc";
        let lexed = tokenize(body);
        let last = lexed.tokens.last().unwrap();
        assert_eq!(last.kind, TokenKind::Error);
        assert_eq!(last.end, body.len());
        assert_eq!(lexed.errors.len(), 1);
    }

    #[test]
    fn unknown_escape_is_reported_but_string_survives() {
        let lexed = tokenize(r"'a\qb'");
        assert_eq!(lexed.tokens[0].kind, TokenKind::String);
        assert_eq!(lexed.errors.len(), 1);
        assert_eq!((lexed.errors[0].start, lexed.errors[0].end), (2, 4));
    }

    #[test]
    fn step_references() {
        let lexed = tokenize("${build.image_url} + ${deploy}");
        assert_eq!(lexed.tokens[0].kind, TokenKind::StepReference);
        assert_eq!(lexed.tokens[0].lexeme, "${build.image_url}");
        assert_eq!(lexed.tokens[2].kind, TokenKind::StepReference);

        let bad = tokenize("${build.1x}");
        assert_eq!(bad.tokens[0].kind, TokenKind::Error);
        assert_eq!(bad.errors.len(), 1);

        let open = tokenize("${build");
        assert_eq!(open.tokens.len(), 1);
        assert_eq!(open.tokens[0].end, 7);
    }

    #[test]
    fn recovers_after_unknown_characters() {
        let lexed = tokenize("a # b @ c");
        assert_eq!(
            lexed
                .tokens
                .iter()
                .map(|t| t.kind)
                .collect::<Vec<_>>(),
            vec![
                TokenKind::Identifier,
                TokenKind::Error,
                TokenKind::Identifier,
                TokenKind::Error,
                TokenKind::Identifier,
            ]
        );
        assert_eq!(lexed.errors.len(), 2);
        assert_eq!(lexed.tokens[1].end - lexed.tokens[1].start, 1);
    }
}
