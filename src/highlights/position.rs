/// Maps byte offsets of one text snapshot to character offsets and
/// zero-based line numbers.
pub struct PositionIndex {
    char_starts: Vec<usize>,
    line_starts: Vec<usize>,
    len: usize,
}

impl PositionIndex {
    pub fn new(text: &str) -> Self {
        let char_starts = text.char_indices().map(|(i, _)| i).collect();
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();

        Self {
            char_starts,
            line_starts,
            len: text.len(),
        }
    }

    /// Character offset of a byte offset. Offsets past the end clamp to the
    /// character count.
    pub fn char_offset(&self, byte: usize) -> usize {
        if byte >= self.len {
            return self.char_starts.len();
        }
        match self.char_starts.binary_search(&byte) {
            Ok(i) => i,
            Err(i) => i,
        }
    }

    pub fn line_of(&self, byte: usize) -> usize {
        match self.line_starts.binary_search(&byte) {
            Ok(i) => i,
            Err(i) => i - 1,
        }
    }
}
