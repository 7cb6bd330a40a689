//! UTF-16 offset bookkeeping shared by the encoder and decoder.
//!
//! The remote text model indexes its buffer in UTF-16 code units, while Rust
//! strings are UTF-8. [`Utf16Buffer`] tracks the UTF-16 length while text is
//! appended so the encoder never rescans, and [`Utf16Index`] maps UTF-16
//! offsets back to byte offsets for the decoder.

use std::ops::Range;

use crate::error::{InvalidRangeError, InvalidRangeKind};
use crate::styled::StyleRange;

/// Growable text buffer that knows its own length in UTF-16 code units.
#[derive(Debug, Default, Clone)]
pub struct Utf16Buffer {
    text: String,
    len: usize,
}

impl Utf16Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `s` and return how many UTF-16 code units it occupied.
    pub fn append_text(&mut self, s: &str) -> usize {
        let added = utf16_len(s);
        self.text.push_str(s);
        self.len += added;
        added
    }

    pub fn push(&mut self, ch: char) -> usize {
        self.text.push(ch);
        let added = ch.len_utf16();
        self.len += added;
        added
    }

    /// Current length in UTF-16 code units.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

pub fn utf16_len(s: &str) -> usize {
    s.chars().map(char::len_utf16).sum()
}

/// Maps UTF-16 offsets of a string to byte offsets.
///
/// Offsets that fall between the halves of a surrogate pair map to `None`.
#[derive(Debug, Clone)]
pub struct Utf16Index {
    bytes: Vec<Option<usize>>,
}

impl Utf16Index {
    pub fn new(text: &str) -> Self {
        let mut bytes = Vec::with_capacity(text.len() + 1);
        for (byte, ch) in text.char_indices() {
            bytes.push(Some(byte));
            if ch.len_utf16() == 2 {
                bytes.push(None);
            }
        }
        bytes.push(Some(text.len()));
        Self { bytes }
    }

    /// Length of the indexed text in UTF-16 code units.
    pub fn len(&self) -> usize {
        self.bytes.len() - 1
    }

    /// Byte offset for a UTF-16 offset, if it lies on a character boundary.
    pub fn byte_offset(&self, offset: usize) -> Option<usize> {
        self.bytes.get(offset).copied().flatten()
    }

    /// Validate a range: ordered, in bounds, and not splitting a surrogate pair.
    pub fn check(&self, range: &Range<usize>) -> Result<(), InvalidRangeError> {
        let len = self.len();
        let fail = |kind, offset| {
            Err(InvalidRangeError::new(
                kind,
                offset,
                range.start,
                range.end,
                len,
            ))
        };
        if range.start > range.end {
            return fail(InvalidRangeKind::Reversed, range.start);
        }
        for offset in [range.start, range.end] {
            if offset > len {
                return fail(InvalidRangeKind::OutOfBounds, offset);
            }
            if self.byte_offset(offset).is_none() {
                return fail(InvalidRangeKind::SplitsSurrogate, offset);
            }
        }
        Ok(())
    }

    /// Slice `text` by a range that has already passed [`Utf16Index::check`].
    pub fn slice<'a>(&self, text: &'a str, range: &Range<usize>) -> &'a str {
        match (self.byte_offset(range.start), self.byte_offset(range.end)) {
            (Some(start), Some(end)) if start <= end => &text[start..end],
            _ => "",
        }
    }
}

/// Cut `range` at `cut`, returning the parts before and after it.
///
/// A side with zero length is `None`.
pub fn split_range_at(
    range: Range<usize>,
    cut: usize,
) -> (Option<Range<usize>>, Option<Range<usize>>) {
    let cut = cut.clamp(range.start, range.end.max(range.start));
    let left = range.start..cut;
    let right = cut..range.end;
    (
        (!left.is_empty()).then_some(left),
        (!right.is_empty()).then_some(right),
    )
}

/// Sort style ranges and coalesce same-kind ranges that touch or overlap.
///
/// Links only merge with links to the same target. Empty ranges are dropped.
/// Afterwards no two ranges of the same kind are adjacent or overlapping.
pub fn merge_adjacent(ranges: &mut Vec<StyleRange>) {
    ranges.retain(|style| !style.range.is_empty());
    ranges.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then(a.range.start.cmp(&b.range.start))
            .then(a.range.end.cmp(&b.range.end))
    });

    let mut merged: Vec<StyleRange> = Vec::with_capacity(ranges.len());
    for style in ranges.drain(..) {
        match merged.last_mut() {
            Some(last) if last.kind == style.kind && style.range.start <= last.range.end => {
                last.range.end = last.range.end.max(style.range.end);
            }
            _ => merged.push(style),
        }
    }
    merged.sort_by(|a, b| {
        a.range
            .start
            .cmp(&b.range.start)
            .then(a.kind.cmp(&b.kind))
    });
    *ranges = merged;
}
