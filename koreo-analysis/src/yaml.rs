//! Span-aware YAML loading.
//!
//! `marked-yaml` gives every node a start marker; this module turns those
//! markers into absolute byte spans over the whole stream, recovers scalar
//! styles from the source text (the loader keeps every scalar as a string) and
//! coerces plain scalars into JSON values.

use std::ops;
use std::sync::OnceLock;

use marked_yaml::types::{MarkedScalarNode, Marker, Node};
use regex::Regex;
use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("{message}")]
    Syntax {
        message: String,
        span: ops::Range<usize>,
    },
}

impl LoadError {
    pub fn span(&self) -> ops::Range<usize> {
        match self {
            LoadError::Syntax { span, .. } => span.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarStyle {
    Plain,
    SingleQuoted,
    DoubleQuoted,
    Literal,
    Folded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scalar {
    pub text: String,
    pub style: ScalarStyle,
    /// `(text offset, source offset)` pairs, one per contiguous run of text
    /// copied verbatim from the source. Escapes and folded line breaks start
    /// a new run.
    segments: Vec<(usize, usize)>,
}

impl Scalar {
    /// Absolute source offset of a byte offset into `text`.
    pub fn source_offset(&self, text_offset: usize) -> usize {
        let idx = self
            .segments
            .partition_point(|(start, _)| *start <= text_offset)
            .saturating_sub(1);
        match self.segments.get(idx) {
            Some((start, source)) => source + (text_offset - start),
            None => text_offset,
        }
    }

    /// JSON value of the scalar; only plain scalars are coerced.
    pub fn value(&self) -> Value {
        match self.style {
            ScalarStyle::Plain => coerce_plain(&self.text),
            _ => Value::String(self.text.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: String,
    pub key_span: ops::Range<usize>,
    pub value: YamlNode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Scalar(Scalar),
    Mapping(Vec<Entry>),
    Sequence(Vec<YamlNode>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct YamlNode {
    pub kind: NodeKind,
    pub span: ops::Range<usize>,
}

impl YamlNode {
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match &self.kind {
            NodeKind::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().map(|scalar| scalar.text.as_str())
    }

    pub fn as_mapping(&self) -> Option<&[Entry]> {
        match &self.kind {
            NodeKind::Mapping(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[YamlNode]> {
        match &self.kind {
            NodeKind::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn entry(&self, key: &str) -> Option<&Entry> {
        self.as_mapping()?.iter().find(|entry| entry.key == key)
    }

    pub fn get(&self, key: &str) -> Option<&YamlNode> {
        self.entry(key).map(|entry| &entry.value)
    }

    pub fn shape_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Scalar(_) => "scalar",
            NodeKind::Mapping(_) => "mapping",
            NodeKind::Sequence(_) => "sequence",
        }
    }

    pub fn to_json(&self) -> Value {
        match &self.kind {
            NodeKind::Scalar(scalar) => scalar.value(),
            NodeKind::Mapping(entries) => {
                let mut map = Map::new();
                for entry in entries {
                    map.insert(entry.key.clone(), entry.value.to_json());
                }
                Value::Object(map)
            }
            NodeKind::Sequence(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    /// Depth-first visit of every scalar below (and including) this node.
    pub fn scalars(&self, visit: &mut impl FnMut(&Scalar, &ops::Range<usize>)) {
        match &self.kind {
            NodeKind::Scalar(scalar) => visit(scalar, &self.span),
            NodeKind::Mapping(entries) => entries.iter().for_each(|e| e.value.scalars(visit)),
            NodeKind::Sequence(items) => items.iter().for_each(|item| item.scalars(visit)),
        }
    }
}

/// One document of a YAML stream.
#[derive(Debug, Clone, PartialEq)]
pub struct YamlDocument {
    pub span: ops::Range<usize>,
    pub root: Result<YamlNode, LoadError>,
}

/// Splits a stream on `---` / `...` marker lines, skipping documents that hold
/// only blank lines, comments or directives.
pub fn split_documents(text: &str) -> Vec<ops::Range<usize>> {
    let mut documents = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end();
        let is_marker = ["---", "..."].iter().any(|marker| {
            trimmed == *marker
                || (trimmed.starts_with(marker)
                    && trimmed[3..].starts_with(|c: char| c.is_whitespace()))
        });
        if is_marker {
            documents.push(start..offset);
            start = offset + line.len();
        }
        offset += line.len();
    }
    documents.push(start..text.len());
    documents
        .into_iter()
        .filter(|span| has_content(&text[span.clone()]))
        .collect()
}

fn has_content(chunk: &str) -> bool {
    chunk.lines().any(|line| {
        let line = line.trim();
        !line.is_empty() && !line.starts_with('#') && !line.starts_with('%')
    })
}

pub fn parse_stream(text: &str) -> Vec<YamlDocument> {
    split_documents(text)
        .into_iter()
        .map(|span| {
            let chunk = &text[span.clone()];
            let locator = Locator::new(chunk, span.start);
            let root = marked_yaml::parse_yaml(0, chunk)
                .map(|node| locator.convert(&node))
                .map_err(|err| locator.load_error(&err.to_string()));
            YamlDocument { span, root }
        })
        .collect()
}

/// Maps `marked-yaml` markers in one document chunk to absolute offsets.
struct Locator<'a> {
    text: &'a str,
    base: usize,
    line_starts: Vec<usize>,
}

impl<'a> Locator<'a> {
    fn new(text: &'a str, base: usize) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, byte)| *byte == b'\n')
                .map(|(idx, _)| idx + 1),
        );
        Self {
            text,
            base,
            line_starts,
        }
    }

    fn line_bounds(&self, line: usize) -> (usize, usize) {
        let start = self
            .line_starts
            .get(line)
            .copied()
            .unwrap_or(self.text.len());
        let end = self
            .line_starts
            .get(line + 1)
            .map(|next| next - 1)
            .unwrap_or(self.text.len());
        (start, end.max(start))
    }

    fn line_of(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next.saturating_sub(1),
        }
    }

    /// Local offset of a one-based marker, advanced past inline whitespace.
    fn marker_offset(&self, marker: Option<&Marker>) -> usize {
        let Some(marker) = marker else {
            return 0;
        };
        let (start, end) = self.line_bounds(marker.line().saturating_sub(1));
        let line = &self.text[start..end];
        let column = line
            .char_indices()
            .nth(marker.column().saturating_sub(1))
            .map(|(idx, _)| idx)
            .unwrap_or(line.len());
        let skipped = line[column..]
            .find(|c: char| c != ' ' && c != '\t')
            .unwrap_or(line.len() - column);
        start + column + skipped
    }

    fn convert(&self, node: &Node) -> YamlNode {
        match node {
            Node::Scalar(scalar) => {
                let (scalar, span) = self.scalar(scalar);
                YamlNode {
                    kind: NodeKind::Scalar(scalar),
                    span,
                }
            }
            Node::Mapping(mapping) => {
                let start = self.marker_offset(mapping.span().start());
                let entries: Vec<Entry> = mapping
                    .iter()
                    .map(|(key, value)| {
                        let (_, key_span) = self.scalar(key);
                        Entry {
                            key: key.as_str().to_string(),
                            key_span,
                            value: self.convert(value),
                        }
                    })
                    .collect();
                let spans = entries
                    .iter()
                    .flat_map(|entry| [entry.key_span.clone(), entry.value.span.clone()]);
                let span = self.extent(start, spans, mapping.span().end());
                YamlNode {
                    kind: NodeKind::Mapping(entries),
                    span,
                }
            }
            Node::Sequence(sequence) => {
                let start = self.marker_offset(sequence.span().start());
                let items: Vec<YamlNode> = sequence.iter().map(|item| self.convert(item)).collect();
                let span = self.extent(
                    start,
                    items.iter().map(|item| item.span.clone()),
                    sequence.span().end(),
                );
                YamlNode {
                    kind: NodeKind::Sequence(items),
                    span,
                }
            }
        }
    }

    fn extent(
        &self,
        start: usize,
        children: impl Iterator<Item = ops::Range<usize>>,
        end_marker: Option<&Marker>,
    ) -> ops::Range<usize> {
        let absolute = self.base + start;
        let mut span = absolute..absolute;
        let mut empty = true;
        for child in children {
            empty = false;
            span.start = span.start.min(child.start);
            span.end = span.end.max(child.end);
        }
        if empty {
            // Flow collections such as `{}` end on their closing bracket.
            if let Some(end) = end_marker {
                span.end = (self.base + self.marker_offset(Some(end))).max(span.start);
            }
        }
        span
    }

    fn scalar(&self, node: &MarkedScalarNode) -> (Scalar, ops::Range<usize>) {
        let text = node.as_str().to_string();
        let hint = self.marker_offset(node.span().start());
        let (_, line_end) = self.line_bounds(self.line_of(hint));
        let bytes = self.text.as_bytes();
        let is_quote = |idx: usize| matches!(bytes.get(idx), Some(b'"' | b'\''));
        let hint = if !is_quote(hint) && hint > 0 && is_quote(hint - 1) {
            hint - 1
        } else {
            hint
        };
        match bytes.get(hint) {
            Some(quote @ (b'"' | b'\'')) => {
                let end = self.closing_quote(hint + 1, *quote);
                let (style, escapes) = if *quote == b'"' {
                    (ScalarStyle::DoubleQuoted, Escapes::Backslash)
                } else {
                    (ScalarStyle::SingleQuoted, Escapes::DoubledQuote)
                };
                let body = hint + 1..end.saturating_sub(1).max(hint + 1);
                let raw = &self.text[body.clone()];
                let (segments, _) = align(&text, raw, self.base + body.start, escapes);
                let scalar = Scalar {
                    text,
                    style,
                    segments,
                };
                (scalar, self.base + hint..self.base + end)
            }
            Some(indicator @ (b'|' | b'>')) => {
                let style = if *indicator == b'|' {
                    ScalarStyle::Literal
                } else {
                    ScalarStyle::Folded
                };
                self.block_scalar(text, style, hint)
            }
            _ => {
                let first_line = text.lines().next().unwrap_or_default();
                let line = &self.text[hint.min(line_end)..line_end];
                let start = match line.find(first_line) {
                    Some(found) => hint + found,
                    None => hint,
                };
                let start = start.min(self.text.len());
                let (segments, consumed) =
                    align(&text, &self.text[start..], self.base + start, Escapes::None);
                let first_line_len = first_line.len().min(line_end.saturating_sub(start));
                let end = (start + consumed.max(first_line_len)).min(self.text.len());
                let scalar = Scalar {
                    text,
                    style: ScalarStyle::Plain,
                    segments,
                };
                (scalar, self.base + start..self.base + end)
            }
        }
    }

    fn closing_quote(&self, from: usize, quote: u8) -> usize {
        let bytes = self.text.as_bytes();
        let mut idx = from;
        while idx < bytes.len() {
            match bytes[idx] {
                b'\\' if quote == b'"' => idx += 2,
                b'\'' if quote == b'\'' && bytes.get(idx + 1) == Some(&b'\'') => idx += 2,
                byte if byte == quote => return idx + 1,
                _ => idx += 1,
            }
        }
        bytes.len()
    }

    fn block_scalar(
        &self,
        text: String,
        style: ScalarStyle,
        indicator: usize,
    ) -> (Scalar, ops::Range<usize>) {
        let first = self.line_of(indicator) + 1;
        let mut content_lines = Vec::new();
        let mut indent = None;
        for line in first..self.line_starts.len() {
            let (start, end) = self.line_bounds(line);
            let content = &self.text[start..end];
            if content.trim().is_empty() {
                continue;
            }
            let width = content.len() - content.trim_start().len();
            match indent {
                None => indent = Some(width),
                Some(expected) if width < expected => break,
                Some(_) => {}
            }
            content_lines.push((start, end));
        }

        let end = content_lines
            .last()
            .map(|(_, end)| *end)
            .unwrap_or(indicator + 1);
        let segments = match content_lines.first() {
            Some((start, _)) => {
                let raw = &self.text[*start..end];
                align(&text, raw, self.base + start, Escapes::None).0
            }
            None => Vec::new(),
        };
        let scalar = Scalar {
            text,
            style,
            segments,
        };
        (scalar, self.base + indicator..self.base + end)
    }

    fn load_error(&self, message: &str) -> LoadError {
        static POSITION: OnceLock<Option<Regex>> = OnceLock::new();
        let pattern = POSITION.get_or_init(|| {
            Regex::new(r"^((?:\d+:)+)\s*(.*)$|line (\d+),? column (\d+)").ok()
        });

        let mut line_col = None;
        let mut text = message.trim().to_string();
        let captures = pattern
            .as_ref()
            .and_then(|pattern| pattern.captures(message.trim()));
        if let Some(captures) = captures {
            if let Some(prefix) = captures.get(1) {
                let numbers: Vec<usize> = prefix
                    .as_str()
                    .split(':')
                    .filter_map(|n| n.parse().ok())
                    .collect();
                if numbers.len() >= 2 {
                    line_col = Some((numbers[numbers.len() - 2], numbers[numbers.len() - 1]));
                }
                if let Some(rest) = captures.get(2) {
                    text = rest.as_str().to_string();
                }
            } else if let (Some(line), Some(col)) = (captures.get(3), captures.get(4)) {
                line_col = line.as_str().parse().ok().zip(col.as_str().parse().ok());
            }
        }

        let start = match line_col {
            Some((line, column)) => {
                let (start, end) = self.line_bounds(line.saturating_sub(1));
                (start + column.saturating_sub(1)).min(end)
            }
            None => 0,
        };
        let (_, line_end) = self.line_bounds(self.line_of(start));
        let end = if line_end > start { line_end } else { start };
        LoadError::Syntax {
            message: text,
            span: self.base + start..self.base + end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escapes {
    None,
    /// Double-quoted: `\n`, `\x41`, `\u00e9`, and `\` line continuations.
    Backslash,
    /// Single-quoted: `''` stands for one quote.
    DoubledQuote,
}

/// Byte length of the escape sequence at the start of `raw`.
fn escape_len(raw: &str) -> usize {
    match raw[1..].chars().next() {
        Some('x') => 4,
        Some('u') => 6,
        Some('U') => 10,
        Some(ch) => 1 + ch.len_utf8(),
        None => 1,
    }
    .min(raw.len())
}

/// Walks the decoded scalar `text` alongside its `raw` source, recording a
/// segment wherever the two stop advancing together.
///
/// Returns the segments and the raw bytes consumed. Alignment stops at the
/// first character the source cannot account for; later offsets then extend
/// the last segment.
fn align(text: &str, raw: &str, base: usize, escapes: Escapes) -> (Vec<(usize, usize)>, usize) {
    let mut segments = Vec::new();
    let mut next = None;
    let mut r = 0;
    let mut map = |t: usize, r: usize, width: usize, next: &mut Option<(usize, usize)>| {
        if *next != Some((t, r)) {
            segments.push((t, base + r));
        }
        *next = Some((t + width, r + width));
    };

    'text: for (t, c) in text.char_indices() {
        loop {
            let Some(rc) = raw[r..].chars().next() else {
                break 'text;
            };
            let rest = &raw[r..];
            if escapes == Escapes::Backslash && rc == '\\' {
                let after = rest[1..].trim_start_matches([' ', '\t']);
                if after.starts_with(['\n', '\r']) {
                    let continued = after.trim_start_matches(['\r', '\n']);
                    let continued = continued.trim_start_matches([' ', '\t']);
                    r = raw.len() - continued.len();
                    continue;
                }
                map(t, r, c.len_utf8(), &mut next);
                r += escape_len(rest);
                continue 'text;
            }
            if escapes == Escapes::DoubledQuote && rest.starts_with("''") {
                map(t, r, c.len_utf8(), &mut next);
                r += 2;
                continue 'text;
            }
            if rc == c {
                map(t, r, c.len_utf8(), &mut next);
                r += rc.len_utf8();
                continue 'text;
            }
            if matches!(rc, ' ' | '\t' | '\r' | '\n') {
                let gap = rest.len() - rest.trim_start_matches([' ', '\t', '\r', '\n']).len();
                if c == ' ' && rest[..gap].contains('\n') {
                    // A single line break folded into a space.
                    map(t, r, c.len_utf8(), &mut next);
                    r += gap;
                    next = None;
                    continue 'text;
                }
                r += rc.len_utf8();
                continue;
            }
            break 'text;
        }
    }

    if segments.is_empty() {
        segments.push((0, base));
    }
    (segments, r)
}

/// YAML core-schema coercion for plain scalars.
pub fn coerce_plain(text: &str) -> Value {
    match text {
        "" | "~" | "null" | "Null" | "NULL" => return Value::Null,
        "true" | "True" | "TRUE" => return Value::Bool(true),
        "false" | "False" | "FALSE" => return Value::Bool(false),
        _ => {}
    }
    if let Some(hex) = text.strip_prefix("0x") {
        if let Ok(value) = i64::from_str_radix(hex, 16) {
            return Value::from(value);
        }
    }
    if let Some(octal) = text.strip_prefix("0o") {
        if let Ok(value) = i64::from_str_radix(octal, 8) {
            return Value::from(value);
        }
    }
    let numeric = text.chars().any(|c| c.is_ascii_digit())
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
    if numeric {
        if let Ok(value) = text.parse::<i64>() {
            return Value::from(value);
        }
        if let Some(number) = text.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(number);
        }
    }
    Value::String(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(text: &str) -> YamlNode {
        let mut documents = parse_stream(text);
        assert_eq!(documents.len(), 1);
        documents.remove(0).root.unwrap()
    }

    #[test]
    fn splits_streams_and_skips_empty_documents() {
        let text = "---\n# only a comment\n---\na: 1\n---\nb: 2\n...\n";
        let spans = split_documents(text);
        assert_eq!(spans.len(), 2);
        assert_eq!(&text[spans[0].clone()], "a: 1\n");
        assert_eq!(&text[spans[1].clone()], "b: 2\n");
    }

    #[test]
    fn locates_plain_and_quoted_scalars() {
        let text = "kind: Workflow\nmetadata:\n  name: \"demo\"\n  namespace: 'ns'\n";
        let node = root(text);
        let kind = node.get("kind").unwrap();
        assert_eq!(&text[kind.span.clone()], "Workflow");
        let name = node.get("metadata").unwrap().get("name").unwrap();
        assert_eq!(&text[name.span.clone()], "\"demo\"");
        assert_eq!(name.as_scalar().unwrap().style, ScalarStyle::DoubleQuoted);
        let entry = node.get("metadata").unwrap().entry("namespace").unwrap();
        assert_eq!(&text[entry.key_span.clone()], "namespace");
    }

    #[test]
    fn maps_expression_offsets_inside_quotes() {
        let text = "value: \"=inputs.a + 1\"\n";
        let node = root(text);
        let scalar = node.get("value").unwrap().as_scalar().unwrap();
        let offset = scalar.source_offset(1);
        assert_eq!(&text[offset..offset + 6], "inputs");
    }

    #[test]
    fn maps_literal_block_lines() {
        let text = "value: |\n  =inputs.a +\n    inputs.b\nnext: 1\n";
        let node = root(text);
        let value = node.get("value").unwrap();
        let scalar = value.as_scalar().unwrap();
        assert_eq!(scalar.style, ScalarStyle::Literal);
        let second = scalar.text.find("inputs.b").unwrap();
        let offset = scalar.source_offset(second);
        assert_eq!(&text[offset..offset + 8], "inputs.b");
        assert!(text[value.span.clone()].ends_with("inputs.b"));
    }

    #[test]
    fn maps_offsets_after_escapes() {
        let text = "value: \"=\\\"a\\\" + inputs.b\\x41 + inputs.c\"\n";
        let node = root(text);
        let scalar = node.get("value").unwrap().as_scalar().unwrap();
        assert_eq!(scalar.text, "=\"a\" + inputs.bA + inputs.c");
        for needle in ["inputs.b", "inputs.c"] {
            let offset = scalar.source_offset(scalar.text.find(needle).unwrap());
            assert_eq!(&text[offset..offset + needle.len()], needle);
        }

        let text = "value: '=''it''s'' + inputs.d'\n";
        let node = root(text);
        let scalar = node.get("value").unwrap().as_scalar().unwrap();
        let offset = scalar.source_offset(scalar.text.find("inputs.d").unwrap());
        assert_eq!(&text[offset..offset + 8], "inputs.d");
    }

    #[test]
    fn maps_folded_plain_scalars() {
        let text = "value: =inputs.a +\n  inputs.b\nnext: 1\n";
        let node = root(text);
        let value = node.get("value").unwrap();
        let scalar = value.as_scalar().unwrap();
        assert_eq!(scalar.text, "=inputs.a + inputs.b");
        let offset = scalar.source_offset(scalar.text.find("inputs.b").unwrap());
        assert_eq!(&text[offset..offset + 8], "inputs.b");
        assert_eq!(&text[value.span.clone()], "=inputs.a +\n  inputs.b");
    }

    #[test]
    fn maps_folded_double_quoted_lines() {
        let text = "value: \"=inputs.a +\n  inputs.b\"\n";
        let node = root(text);
        let scalar = node.get("value").unwrap().as_scalar().unwrap();
        let offset = scalar.source_offset(scalar.text.find("inputs.b").unwrap());
        assert_eq!(&text[offset..offset + 8], "inputs.b");
    }

    #[test]
    fn coerces_plain_scalars_only() {
        let node = root("a: 1\nb: '1'\nc: 2.5\nd: true\ne:\nf: 1e3\ng: 12abc\n");
        let value = node.to_json();
        assert_eq!(value["a"], serde_json::json!(1));
        assert_eq!(value["b"], serde_json::json!("1"));
        assert_eq!(value["c"], serde_json::json!(2.5));
        assert_eq!(value["d"], serde_json::json!(true));
        assert_eq!(value["e"], Value::Null);
        assert_eq!(value["f"], serde_json::json!(1000.0));
        assert_eq!(value["g"], serde_json::json!("12abc"));
    }

    #[test]
    fn syntax_errors_stay_in_their_document() {
        let text = "a: [1, 2\n---\nb: 2\n";
        let documents = parse_stream(text);
        assert_eq!(documents.len(), 2);
        let error = documents[0].root.as_ref().unwrap_err();
        assert!(error.span().end <= documents[0].span.end);
        assert!(documents[1].root.is_ok());
    }

    #[test]
    fn node_spans_cover_children() {
        let text = "steps:\n  - label: a\n    ref: {kind: ValueFunction, name: f}\n";
        let node = root(text);
        let step = &node.get("steps").unwrap().as_sequence().unwrap()[0];
        let covered = &text[step.span.clone()];
        assert!(covered.starts_with("label"));
        assert!(covered.ends_with("name: f") || covered.ends_with('f'));
    }
}
