//! The flat, run-based text model used by the presentation service.
//!
//! A [`StyledText`] is one text buffer plus paragraph records and style
//! ranges over it. Every offset is a UTF-16 code unit index.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::InvalidRangeError;
use crate::offsets::Utf16Index;

/// Character written between two paragraphs.
pub const PARAGRAPH_SEPARATOR: char = '\n';

/// Character the remote model uses for a line break inside a paragraph.
pub const LINE_BREAK: char = '\u{000B}';

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListKind {
    #[default]
    None,
    Bullet,
    Number,
}

impl ListKind {
    pub fn is_list(self) -> bool {
        self != ListKind::None
    }
}

/// Metadata for one contiguous paragraph of the buffer.
///
/// `range` includes the trailing paragraph separator, except for the last
/// paragraph of the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphRecord {
    pub range: Range<usize>,
    #[serde(default)]
    pub heading_level: u8,
    #[serde(default)]
    pub list_kind: ListKind,
    #[serde(default)]
    pub nesting_depth: usize,
    /// Number the enclosing ordered list starts counting from, if not 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_start: Option<u64>,
}

impl ParagraphRecord {
    pub fn plain(range: Range<usize>) -> Self {
        Self {
            range,
            heading_level: 0,
            list_kind: ListKind::None,
            nesting_depth: 0,
            list_start: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StyleKind {
    Bold,
    Italic,
    Strike,
    Code,
    Link {
        #[serde(rename = "linkHref")]
        href: String,
    },
}

impl StyleKind {
    pub fn link_href(&self) -> Option<&str> {
        match self {
            StyleKind::Link { href } => Some(href),
            _ => None,
        }
    }
}

/// One formatting kind applied to a half-open range of the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRange {
    pub range: Range<usize>,
    #[serde(flatten)]
    pub kind: StyleKind,
}

impl StyleRange {
    pub fn new(range: Range<usize>, kind: StyleKind) -> Self {
        Self { range, kind }
    }
}

/// Flat text buffer with paragraph metadata and style ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyledText {
    pub text: String,
    pub paragraphs: Vec<ParagraphRecord>,
    pub styles: Vec<StyleRange>,
}

impl StyledText {
    /// Length of the buffer in UTF-16 code units.
    pub fn len_utf16(&self) -> usize {
        self.text.encode_utf16().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Check every paragraph boundary and style range against the buffer.
    pub fn validate(&self) -> Result<(), InvalidRangeError> {
        let index = Utf16Index::new(&self.text);
        for paragraph in &self.paragraphs {
            index.check(&paragraph.range)?;
        }
        for style in &self.styles {
            index.check(&style.range)?;
        }
        Ok(())
    }

    /// Render this buffer as Markdown with the default settings.
    pub fn to_markdown(&self) -> Result<String, InvalidRangeError> {
        crate::decode::decode(&self.text, &self.paragraphs, &self.styles)
    }
}

/// Paragraph records for a buffer that carries no paragraph metadata: one
/// plain record per separator-delimited line.
pub fn paragraphs_from_text(text: &str) -> Vec<ParagraphRecord> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut records = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for ch in text.chars() {
        offset += ch.len_utf16();
        if ch == PARAGRAPH_SEPARATOR {
            records.push(ParagraphRecord::plain(start..offset));
            start = offset;
        }
    }
    if start < offset {
        records.push(ParagraphRecord::plain(start..offset));
    }
    records
}
