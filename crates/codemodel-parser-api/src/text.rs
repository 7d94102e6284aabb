//! Byte ranges and line/column positions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open byte range `[start, end)` within a file's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

impl fmt::Display for TextRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// 1-based line and column (column counted in bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineCol {
    pub line: usize,
    pub column: usize,
}

impl LineCol {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for LineCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Maps byte offsets to line/column positions for one version of a text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineIndex {
    /// Byte offset at which each line starts; always begins with 0.
    line_starts: Vec<usize>,
    len: usize,
}

impl Default for LineIndex {
    fn default() -> Self {
        Self::new("")
    }
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            line_starts,
            len: text.len(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Length in bytes of the indexed text
    pub fn text_len(&self) -> usize {
        self.len
    }

    /// Offsets past the end of the text clamp to the end.
    pub fn line_col(&self, offset: usize) -> LineCol {
        let offset = offset.min(self.len);
        let line = match self.line_starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(next) => next - 1,
        };
        LineCol::new(line + 1, offset - self.line_starts[line] + 1)
    }

    pub fn offset(&self, pos: LineCol) -> Option<usize> {
        let start = *self.line_starts.get(pos.line.checked_sub(1)?)?;
        let offset = start + pos.column.checked_sub(1)?;
        (offset <= self.len).then_some(offset)
    }

    pub fn range_line_cols(&self, range: TextRange) -> (LineCol, LineCol) {
        (self.line_col(range.start), self.line_col(range.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_col_lookup() {
        let index = LineIndex::new("ab\ncde\n\nf");
        assert_eq!(index.line_count(), 4);
        assert_eq!(index.line_col(0), LineCol::new(1, 1));
        assert_eq!(index.line_col(2), LineCol::new(1, 3));
        assert_eq!(index.line_col(3), LineCol::new(2, 1));
        assert_eq!(index.line_col(7), LineCol::new(3, 1));
        assert_eq!(index.line_col(8), LineCol::new(4, 1));
        assert_eq!(index.line_col(100), LineCol::new(4, 2));
    }

    #[test]
    fn test_offset_round_trip() {
        let index = LineIndex::new("int a;\nint b;\n");
        assert_eq!(index.offset(LineCol::new(2, 5)), Some(11));
        assert_eq!(index.offset(LineCol::new(0, 1)), None);
        assert_eq!(index.offset(LineCol::new(9, 1)), None);
    }

    #[test]
    fn test_range_basics() {
        let r = TextRange::new(4, 10);
        assert_eq!(r.len(), 6);
        assert!(r.contains(4));
        assert!(!r.contains(10));
        assert!(TextRange::new(5, 5).is_empty());
    }
}
