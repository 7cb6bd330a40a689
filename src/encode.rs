//! Block tree to flat styled text.
//!
//! Both the block walk and the inline walk use explicit work stacks, so the
//! nesting depth of the input is bounded only by memory.

use std::collections::HashMap;

use crate::block::{Block, List, Span};
use crate::offsets::{Utf16Buffer, merge_adjacent};
use crate::styled::{
    LINE_BREAK, ListKind, PARAGRAPH_SEPARATOR, ParagraphRecord, StyleKind, StyleRange, StyledText,
};

/// Flatten a block tree into text, paragraph records and style ranges.
///
/// An empty tree yields an empty buffer with no paragraph records.
pub fn encode(blocks: &[Block]) -> StyledText {
    let mut encoder = Encoder::default();
    let mut work: Vec<(&Block, Context)> = blocks
        .iter()
        .rev()
        .map(|block| (block, Context::default()))
        .collect();

    while let Some((block, context)) = work.pop() {
        match block {
            Block::Paragraph { content } => encoder.paragraph(content, context.record(0)),
            Block::Heading { level, content } => {
                encoder.paragraph(content, context.record((*level).clamp(1, 6)));
            }
            Block::List(list) => {
                let inner = context.enter_list(list);
                for item in list.items.iter().rev() {
                    work.extend(item.blocks.iter().rev().map(|child| (child, inner)));
                }
            }
            Block::ListItem(item) => {
                log::debug!("list item outside a list, encoding as plain paragraphs");
                let inner = context.orphan();
                work.extend(item.blocks.iter().rev().map(|child| (child, inner)));
            }
            Block::Blockquote { blocks } => {
                let inner = context.enter_quote();
                work.extend(blocks.iter().rev().map(|child| (child, inner)));
            }
        }
    }

    encoder.finish()
}

#[derive(Debug, Clone, Copy, Default)]
struct Context {
    lists: usize,
    quotes: usize,
    list: Option<ListContext>,
}

#[derive(Debug, Clone, Copy)]
struct ListContext {
    ordered: bool,
    start: Option<u64>,
}

impl Context {
    fn enter_list(self, list: &List) -> Self {
        Self {
            lists: self.lists + 1,
            list: Some(ListContext {
                ordered: list.ordered,
                start: list.start,
            }),
            ..self
        }
    }

    /// Paragraphs inside a quote are indented, but are not list items.
    fn enter_quote(self) -> Self {
        Self {
            quotes: self.quotes + 1,
            list: None,
            ..self
        }
    }

    fn orphan(self) -> Self {
        Self {
            lists: 0,
            list: None,
            ..self
        }
    }

    /// Paragraph metadata for this context; the range is filled in later.
    fn record(self, heading_level: u8) -> ParagraphRecord {
        let (list_kind, nesting_depth, list_start) = match self.list {
            Some(list) => (
                if list.ordered {
                    ListKind::Number
                } else {
                    ListKind::Bullet
                },
                self.lists.saturating_sub(1) + self.quotes,
                list.start.filter(|&start| list.ordered && start != 1),
            ),
            None => (ListKind::None, self.lists + self.quotes, None),
        };
        ParagraphRecord {
            range: 0..0,
            heading_level,
            list_kind,
            nesting_depth,
            list_start,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InlineStyle<'a> {
    Bold,
    Italic,
    Strike,
    Link(&'a str),
}

enum Step<'a> {
    Enter(&'a Span),
    Leave(InlineStyle<'a>),
}

/// Styles in effect at the current point of the inline walk.
///
/// A kind stays active while its counter is above zero. Entering a nested
/// span of the same kind raises the counter instead of opening a second
/// range, so `**a **b** c**` produces a single bold range.
#[derive(Default)]
struct ActiveStyles<'a> {
    bold: usize,
    italic: usize,
    strike: usize,
    links: Vec<&'a str>,
}

impl<'a> ActiveStyles<'a> {
    fn enter(&mut self, style: InlineStyle<'a>) {
        match style {
            InlineStyle::Bold => self.bold += 1,
            InlineStyle::Italic => self.italic += 1,
            InlineStyle::Strike => self.strike += 1,
            InlineStyle::Link(href) => self.links.push(href),
        }
    }

    fn leave(&mut self, style: InlineStyle<'a>) {
        match style {
            InlineStyle::Bold => self.bold = self.bold.saturating_sub(1),
            InlineStyle::Italic => self.italic = self.italic.saturating_sub(1),
            InlineStyle::Strike => self.strike = self.strike.saturating_sub(1),
            InlineStyle::Link(_) => {
                self.links.pop();
            }
        }
    }

    fn kinds(&self, code: bool) -> Vec<StyleKind> {
        let mut kinds = Vec::with_capacity(5);
        if self.bold > 0 {
            kinds.push(StyleKind::Bold);
        }
        if self.italic > 0 {
            kinds.push(StyleKind::Italic);
        }
        if self.strike > 0 {
            kinds.push(StyleKind::Strike);
        }
        if code {
            kinds.push(StyleKind::Code);
        }
        // The innermost link wins
        if let Some(href) = self.links.last() {
            kinds.push(StyleKind::Link {
                href: (*href).to_string(),
            });
        }
        kinds
    }
}

#[derive(Default)]
struct Encoder {
    buffer: Utf16Buffer,
    paragraphs: Vec<ParagraphRecord>,
    styles: Vec<StyleRange>,
    // Index of the most recent range of each kind
    last: HashMap<StyleKind, usize>,
}

impl Encoder {
    fn paragraph(&mut self, content: &[Span], mut record: ParagraphRecord) {
        if let Some(previous) = self.paragraphs.last_mut() {
            previous.range.end += self.buffer.push(PARAGRAPH_SEPARATOR);
        }
        let start = self.buffer.len();
        self.inline(content);
        record.range = start..self.buffer.len();
        self.paragraphs.push(record);
    }

    fn inline(&mut self, content: &[Span]) {
        let mut active = ActiveStyles::default();
        let mut steps: Vec<Step> = content.iter().rev().map(Step::Enter).collect();

        while let Some(step) = steps.pop() {
            let span = match step {
                Step::Leave(style) => {
                    active.leave(style);
                    continue;
                }
                Step::Enter(span) => span,
            };
            let (style, children) = match span {
                Span::Text(text) => {
                    self.emit(text, &active, false);
                    continue;
                }
                Span::Code(text) => {
                    self.emit(text, &active, true);
                    continue;
                }
                Span::LineBreak => {
                    self.emit(LINE_BREAK.encode_utf8(&mut [0; 4]), &active, false);
                    continue;
                }
                Span::Strong(children) => (InlineStyle::Bold, children),
                Span::Emphasis(children) => (InlineStyle::Italic, children),
                Span::Strike(children) => (InlineStyle::Strike, children),
                Span::Link { href, content } => (InlineStyle::Link(href.as_str()), content),
            };
            active.enter(style);
            steps.push(Step::Leave(style));
            steps.extend(children.iter().rev().map(Step::Enter));
        }
    }

    fn emit(&mut self, text: &str, active: &ActiveStyles, code: bool) {
        if text.is_empty() {
            return;
        }
        let start = self.buffer.len();
        let end = start + self.buffer.append_text(text);
        for kind in active.kinds(code) {
            self.extend_or_open(kind, start..end);
        }
    }

    fn extend_or_open(&mut self, kind: StyleKind, range: std::ops::Range<usize>) {
        if let Some(&index) = self.last.get(&kind) {
            let previous = &mut self.styles[index];
            if previous.range.end == range.start {
                previous.range.end = range.end;
                return;
            }
        }
        self.last.insert(kind.clone(), self.styles.len());
        self.styles.push(StyleRange::new(range, kind));
    }

    fn finish(mut self) -> StyledText {
        merge_adjacent(&mut self.styles);
        log::trace!(
            "encoded {} paragraphs with {} style ranges",
            self.paragraphs.len(),
            self.styles.len()
        );
        StyledText {
            text: self.buffer.into_string(),
            paragraphs: self.paragraphs,
            styles: self.styles,
        }
    }
}
