use std::ops::Range;

/// The union of element ranges touched since the last upload.
///
/// Tracked as a single span: marking `2` and `7` makes `[2, 8)` dirty. The
/// span is never narrower than what was touched and never extends past its
/// first and last touched element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirtyRange {
    start: usize,
    end: usize,
}

impl DirtyRange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// Number of elements in the span.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn range(&self) -> Option<Range<usize>> {
        (!self.is_empty()).then_some(self.start..self.end)
    }

    pub fn mark(&mut self, index: usize) {
        self.mark_range(index..index + 1);
    }

    pub fn mark_range(&mut self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        if self.is_empty() {
            self.start = range.start;
            self.end = range.end;
        } else {
            self.start = self.start.min(range.start);
            self.end = self.end.max(range.end);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::single(&[4], 4..5)]
    #[case::adjacent(&[4, 5], 4..6)]
    #[case::gap(&[7, 2], 2..8)]
    #[case::repeated(&[3, 3, 3], 3..4)]
    fn test_union(#[case] marks: &[usize], #[case] expected: Range<usize>) {
        let mut dirty = DirtyRange::new();
        for &index in marks {
            dirty.mark(index);
        }
        assert_eq!(dirty.range(), Some(expected));
    }

    #[test]
    fn test_reset_empties() {
        let mut dirty = DirtyRange::new();
        dirty.mark(9);
        dirty.reset();
        assert!(dirty.is_empty());
        assert_eq!(dirty.len(), 0);
        assert_eq!(dirty.range(), None);
    }

    #[test]
    fn test_empty_range_is_ignored() {
        let mut dirty = DirtyRange::new();
        dirty.mark_range(5..5);
        assert!(dirty.is_empty());
        dirty.mark(0);
        assert_eq!(dirty.range(), Some(0..1));
    }
}
