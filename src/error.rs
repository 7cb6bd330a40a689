use std::fmt;

/// A paragraph boundary or style range that does not fit the text buffer.
///
/// Offsets are UTF-16 code units. `offset` is the specific index that failed
/// validation; `start..end` is the whole range it belongs to and `len` the
/// buffer length at the time of the check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at offset {offset} (range {start}..{end}, buffer length {len})")]
pub struct InvalidRangeError {
    kind: InvalidRangeKind,
    offset: usize,
    start: usize,
    end: usize,
    len: usize,
}

#[expect(
    clippy::len_without_is_empty,
    reason = "`len` reports the buffer length the range was checked against."
)]
impl InvalidRangeError {
    pub(crate) fn new(
        kind: InvalidRangeKind,
        offset: usize,
        start: usize,
        end: usize,
        len: usize,
    ) -> Self {
        Self {
            kind,
            offset,
            start,
            end,
            len,
        }
    }

    pub fn kind(&self) -> InvalidRangeKind {
        self.kind
    }

    /// The offending UTF-16 offset.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Length of the text buffer in UTF-16 code units.
    pub fn len(&self) -> usize {
        self.len
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidRangeKind {
    /// The range ends before it starts.
    Reversed,
    /// An endpoint lies past the end of the buffer.
    OutOfBounds,
    /// An endpoint falls between the two halves of a surrogate pair.
    SplitsSurrogate,
}

impl fmt::Display for InvalidRangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InvalidRangeKind::Reversed => "range end precedes start",
            InvalidRangeKind::OutOfBounds => "offset out of bounds",
            InvalidRangeKind::SplitsSurrogate => "offset splits a surrogate pair",
        };
        f.write_str(text)
    }
}
