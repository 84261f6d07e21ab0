//! Positions and ranges in document text.
//!
//! Columns are byte offsets within a line, lines are zero-based. Every range also
//! carries the absolute byte span so callers can slice the source directly.

use std::ops;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Range {
    pub span: ops::Range<usize>,
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(span: ops::Range<usize>, start: Position, end: Position) -> Self {
        Self { span, start, end }
    }

    /// True when `position` falls inside the range, end inclusive so a cursor
    /// sitting just after the last character still resolves.
    pub fn contains(&self, position: Position) -> bool {
        self.start <= position && position <= self.end
    }

    /// True when `other` lies entirely within this range.
    pub fn encloses(&self, other: &Range) -> bool {
        self.span.start <= other.span.start && other.span.end <= self.span.end
    }

    pub fn is_empty(&self) -> bool {
        self.span.start >= self.span.end
    }
}

/// Converts byte offsets to line/column positions for one text.
#[derive(Debug, Clone)]
pub struct SourceLocation {
    line_starts: Vec<usize>,
    len: usize,
}

impl SourceLocation {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (idx, byte) in text.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(idx + 1);
            }
        }
        Self {
            line_starts,
            len: text.len(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Byte offset where `line` begins, clamped to the end of the text.
    pub fn line_start(&self, line: usize) -> usize {
        self.line_starts.get(line).copied().unwrap_or(self.len)
    }

    pub fn byte_to_position(&self, offset: usize) -> Position {
        let offset = offset.min(self.len);
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next.saturating_sub(1),
        };
        Position::new(line, offset - self.line_starts[line])
    }

    pub fn position_to_byte(&self, position: Position) -> usize {
        let start = self.line_start(position.line);
        let end = self
            .line_starts
            .get(position.line + 1)
            .map(|next| next.saturating_sub(1))
            .unwrap_or(self.len);
        (start + position.column).min(end)
    }

    pub fn range(&self, span: ops::Range<usize>) -> Range {
        let start = self.byte_to_position(span.start);
        let end = self.byte_to_position(span.end);
        Range::new(span, start, end)
    }
}
