//! Run view of the flat model, as the presentation service reads and writes
//! text: maximal stretches of identical formatting, each with its own style.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::InvalidRangeError;
use crate::offsets::{Utf16Buffer, Utf16Index, merge_adjacent};
use crate::styled::{ParagraphRecord, StyleKind, StyleRange, StyledText, paragraphs_from_text};

/// Font families treated as code when reading runs back.
pub const MONOSPACE_FONTS: &[&str] = &[
    "courier new",
    "courier",
    "monospace",
    "consolas",
    "monaco",
    "lucida console",
    "dejavu sans mono",
    "source code pro",
    "fira code",
    "jetbrains mono",
];

pub fn is_monospace(font_family: &str) -> bool {
    let family = font_family.trim().to_lowercase();
    MONOSPACE_FONTS.contains(&family.as_str())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunStyle {
    pub bold: bool,
    pub italic: bool,
    pub strikethrough: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl RunStyle {
    fn is_code(&self) -> bool {
        self.font_family.as_deref().is_some_and(is_monospace)
    }
}

/// A stretch of text with one style. Indices are UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRun {
    pub start_index: usize,
    pub end_index: usize,
    pub content: String,
    #[serde(default)]
    pub style: RunStyle,
}

impl StyledText {
    /// Split the buffer into maximal runs of identical formatting.
    ///
    /// Indices are shifted by `base`, the insertion point inside the target
    /// text container. Code is expressed as the `code_font` family.
    pub fn runs(&self, base: usize, code_font: &str) -> Result<Vec<TextRun>, InvalidRangeError> {
        self.validate()?;
        let index = Utf16Index::new(&self.text);

        let mut cuts: Vec<usize> = self
            .styles
            .iter()
            .flat_map(|style| [style.range.start, style.range.end])
            .chain([0, index.len()])
            .collect();
        cuts.sort_unstable();
        cuts.dedup();

        let mut runs: Vec<(Range<usize>, RunStyle)> = Vec::new();
        for cut in cuts.windows(2) {
            let range = cut[0]..cut[1];
            let style = self.style_at(range.start, code_font);
            match runs.last_mut() {
                Some((last, last_style)) if *last_style == style => last.end = range.end,
                _ => runs.push((range, style)),
            }
        }

        Ok(runs
            .into_iter()
            .map(|(range, style)| TextRun {
                start_index: base + range.start,
                end_index: base + range.end,
                content: index.slice(&self.text, &range).to_string(),
                style,
            })
            .collect())
    }

    fn style_at(&self, offset: usize, code_font: &str) -> RunStyle {
        let mut style = RunStyle::default();
        let mut link_start = 0;
        for range in self.styles.iter().filter(|s| s.range.contains(&offset)) {
            match &range.kind {
                StyleKind::Bold => style.bold = true,
                StyleKind::Italic => style.italic = true,
                StyleKind::Strike => style.strikethrough = true,
                StyleKind::Code => style.font_family = Some(code_font.to_string()),
                StyleKind::Link { href } => {
                    if style.link.is_none() || range.range.start >= link_start {
                        link_start = range.range.start;
                        style.link = Some(href.clone());
                    }
                }
            }
        }
        style
    }

    /// Rebuild the flat model from runs read off the presentation service.
    ///
    /// Runs are concatenated in `start_index` order; their text decides the
    /// offsets. Monospace families become code. With no paragraph records,
    /// one plain record per line is derived.
    pub fn from_runs(runs: &[TextRun], paragraphs: Vec<ParagraphRecord>) -> Self {
        let mut ordered: Vec<&TextRun> = runs.iter().collect();
        ordered.sort_by_key(|run| run.start_index);

        let mut buffer = Utf16Buffer::new();
        let mut styles = Vec::new();
        for run in ordered {
            let start = buffer.len();
            let end = start + buffer.append_text(&run.content);
            let style = &run.style;
            let kinds = [
                style.bold.then_some(StyleKind::Bold),
                style.italic.then_some(StyleKind::Italic),
                style.strikethrough.then_some(StyleKind::Strike),
                style.is_code().then_some(StyleKind::Code),
                style
                    .link
                    .clone()
                    .map(|href| StyleKind::Link { href }),
            ];
            styles.extend(
                kinds
                    .into_iter()
                    .flatten()
                    .map(|kind| StyleRange::new(start..end, kind)),
            );
        }
        merge_adjacent(&mut styles);

        let text = buffer.into_string();
        let paragraphs = if paragraphs.is_empty() {
            paragraphs_from_text(&text)
        } else {
            paragraphs
        };
        Self {
            text,
            paragraphs,
            styles,
        }
    }
}
