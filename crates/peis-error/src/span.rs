//! Span - Source code location
//!
//! Every token, syntax node and diagnostic label carries a [`Span`] so errors
//! found deep in the optimizing pipeline still point back at the source text.

/// A position in a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// Line (1-indexed)
    pub line: u32,
    /// Column (1-indexed)
    pub column: u32,
    /// Byte offset from the beginning of the file
    pub offset: usize,
}

impl Position {
    pub fn new(line: u32, column: u32, offset: usize) -> Self {
        Self { line, column, offset }
    }
}

/// A region of a source file (start to end)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
    /// Source file ID in the [`SourceCache`](crate::SourceCache)
    pub file_id: u32,
}

impl Span {
    pub fn new(start: Position, end: Position, file_id: u32) -> Self {
        Self { start, end, file_id }
    }

    /// Span of a single position
    pub fn point(pos: Position, file_id: u32) -> Self {
        Self {
            start: pos,
            end: pos,
            file_id,
        }
    }

    /// Span covering `self` up to the end of `other`
    pub fn to(self, other: Span) -> Span {
        debug_assert_eq!(self.file_id, other.file_id, "spans from different files");
        Span {
            start: if self.start.offset <= other.start.offset {
                self.start
            } else {
                other.start
            },
            end: if self.end.offset >= other.end.offset {
                self.end
            } else {
                other.end
            },
            file_id: self.file_id,
        }
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.end.offset.saturating_sub(self.start.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Types that know where they came from in the source
pub trait Spanned {
    fn span(&self) -> Span;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_to_covers_both() {
        let a = Span::new(Position::new(1, 1, 0), Position::new(1, 6, 5), 0);
        let b = Span::new(Position::new(2, 3, 12), Position::new(2, 9, 18), 0);

        let joined = a.to(b);
        assert_eq!(joined.start.offset, 0);
        assert_eq!(joined.end.offset, 18);
        assert_eq!(joined.len(), 18);
    }

    #[test]
    fn test_point_span_is_empty() {
        let span = Span::point(Position::new(3, 4, 20), 1);
        assert!(span.is_empty());
        assert_eq!(span.file_id, 1);
    }
}
