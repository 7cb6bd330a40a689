//! Flat styled text back to Markdown.
//!
//! Each paragraph is cut into segments at every style boundary. Walking the
//! segments keeps a stack of open markers: a marker that is no longer wanted
//! closes together with everything opened after it, and styles that are
//! still active are reopened, so overlapping ranges always come out as well
//! nested Markdown.
//!
//! Some layouts have no Markdown spelling at all. A `**` squeezed between a
//! period and a letter neither opens nor closes, and two styles cannot both
//! end right before a letter unless they share a delimiter run. Every
//! paragraph is read back through the parser, and while the result differs
//! from what was written, the style whose marker failed gives up the
//! character next to that marker.

use std::ops::Range;

use crate::config::{DecodeConfig, ParseConfig};
use crate::encode::encode;
use crate::error::InvalidRangeError;
use crate::offsets::{Utf16Buffer, Utf16Index, merge_adjacent, split_range_at, utf16_len};
use crate::parser::parse;
use crate::styled::{
    LINE_BREAK, ListKind, PARAGRAPH_SEPARATOR, ParagraphRecord, StyleKind, StyleRange, StyledText,
    paragraphs_from_text,
};

/// Largest number CommonMark accepts in an ordered list marker.
const MAX_ORDINAL: u64 = 999_999_999;

/// Render a flat buffer as Markdown with the default settings.
pub fn decode(
    text: &str,
    paragraphs: &[ParagraphRecord],
    styles: &[StyleRange],
) -> Result<String, InvalidRangeError> {
    decode_with_config(text, paragraphs, styles, &DecodeConfig::default())
}

/// Render a flat buffer as Markdown.
///
/// Every paragraph and style range is validated up front; a range that is
/// reversed, out of bounds, or splits a surrogate pair is the only error.
/// When `paragraphs` is empty the records are derived from the separators.
pub fn decode_with_config(
    text: &str,
    paragraphs: &[ParagraphRecord],
    styles: &[StyleRange],
    config: &DecodeConfig,
) -> Result<String, InvalidRangeError> {
    let index = Utf16Index::new(text);
    for paragraph in paragraphs {
        index.check(&paragraph.range)?;
    }
    for style in styles {
        index.check(&style.range)?;
    }

    let derived;
    let paragraphs = if paragraphs.is_empty() {
        derived = paragraphs_from_text(text);
        &derived
    } else {
        paragraphs
    };
    let mut styles = styles.to_vec();
    merge_adjacent(&mut styles);

    let bullet = config.bullet_marker();
    let mut lists = ListState::default();
    let mut out = String::new();
    // Whether the last paragraph written was a list item, and its quote depth
    let mut previous: Option<(bool, usize)> = None;

    for record in paragraphs {
        let content = content_range(text, &index, &record.range);
        let heading = record.heading_level > 0;
        let is_list = !heading && record.list_kind.is_list();
        let layout = layout_paragraph(text, &index, &content, &styles, heading);
        if layout.tokens.is_empty() && !heading && !is_list {
            continue;
        }

        let prefix = line_prefix(record, &mut lists, bullet);
        if let Some((was_list, quote)) = previous {
            let same_list = was_list && is_list && quote == prefix.quote;
            out.push_str(if same_list { "\n" } else { "\n\n" });
        }
        let inline = layout.render(&prefix);
        if inline.is_empty() {
            out.push_str(prefix.lead.trim_end());
        } else {
            out.push_str(&prefix.lead);
            out.push_str(&inline);
        }
        previous = Some((is_list, prefix.quote));
    }

    log::trace!(
        "decoded {} paragraphs with {} style ranges",
        paragraphs.len(),
        styles.len()
    );
    Ok(out)
}

/// The paragraph's range without its trailing separator.
fn content_range(text: &str, index: &Utf16Index, range: &Range<usize>) -> Range<usize> {
    if index.slice(text, range).ends_with(PARAGRAPH_SEPARATOR) {
        range.start..range.end - 1
    } else {
        range.clone()
    }
}

// ---------------------------------------------------------------------------
// Line prefixes
// ---------------------------------------------------------------------------

/// What goes before a paragraph's first line and after each hard break.
struct Prefix {
    lead: String,
    continuation: String,
    heading: bool,
    quote: usize,
}

/// Running list numbering and content columns, one entry per depth.
#[derive(Default)]
struct ListState {
    counters: Vec<(ListKind, u64)>,
    columns: Vec<usize>,
    // Quote depth of the last plain paragraph. List items that follow it at
    // that depth or deeper are written inside the quote.
    quote: usize,
}

impl ListState {
    fn reset(&mut self) {
        self.counters.clear();
        self.columns.clear();
    }

    fn next_number(&mut self, depth: usize, kind: ListKind, start: Option<u64>) -> u64 {
        self.counters.truncate(depth + 1);
        match self.counters.get_mut(depth) {
            Some((running, number)) if *running == kind => {
                *number = number.saturating_add(1).min(MAX_ORDINAL);
                *number
            }
            _ => {
                let start = start.unwrap_or(1).min(MAX_ORDINAL);
                self.counters.resize(depth, (ListKind::None, 0));
                self.counters.push((kind, start));
                start
            }
        }
    }

    /// Indent for an item at `depth`: the content column of its parent item.
    /// Depths with no parent on record nest one level below the deepest one.
    fn indent(&mut self, depth: usize, marker_width: usize) -> usize {
        let fill = self.columns.last().copied().unwrap_or(0);
        self.columns.resize(depth, fill);
        let indent = self.columns.last().copied().unwrap_or(0);
        self.columns.push(indent + marker_width);
        indent
    }
}

fn line_prefix(record: &ParagraphRecord, lists: &mut ListState, bullet: char) -> Prefix {
    if record.heading_level > 0 || !record.list_kind.is_list() {
        if record.heading_level > 0 && record.list_kind.is_list() {
            log::debug!("paragraph has both heading and list metadata, keeping the heading");
        }
        lists.reset();
        // A heading with list metadata ignores the depth that came with it
        let quote = if record.list_kind.is_list() {
            0
        } else {
            record.nesting_depth
        };
        lists.quote = quote;
        let quote_prefix = "> ".repeat(quote);
        let lead = if record.heading_level > 0 {
            let level = usize::from(record.heading_level.min(6));
            format!("{quote_prefix}{} ", "#".repeat(level))
        } else {
            quote_prefix.clone()
        };
        return Prefix {
            lead,
            continuation: quote_prefix,
            heading: record.heading_level > 0,
            quote,
        };
    }

    let quote = if record.nesting_depth >= lists.quote {
        lists.quote
    } else {
        0
    };
    if quote != lists.quote {
        lists.reset();
        lists.quote = quote;
    }
    let depth = record.nesting_depth - quote;
    let marker = match record.list_kind {
        ListKind::Number => {
            let number = lists.next_number(depth, record.list_kind, record.list_start);
            format!("{number}. ")
        }
        _ => {
            lists.next_number(depth, record.list_kind, None);
            format!("{bullet} ")
        }
    };
    let indent = lists.indent(depth, marker.len());
    let quote_prefix = "> ".repeat(quote);
    Prefix {
        lead: format!("{quote_prefix}{}{marker}", " ".repeat(indent)),
        continuation: format!("{quote_prefix}{}", " ".repeat(indent + marker.len())),
        heading: false,
        quote,
    }
}

// ---------------------------------------------------------------------------
// Paragraph layout
// ---------------------------------------------------------------------------

/// A paragraph's tokens and delimiters, checked to read back as written.
struct Layout<'a> {
    tokens: Vec<Token<'a>>,
    delimiters: Vec<Delimiter>,
}

impl Layout<'_> {
    fn render(&self, prefix: &Prefix) -> String {
        let mut markdown = render_inline(
            &self.tokens,
            &self.delimiters,
            prefix.heading,
            &prefix.continuation,
        )
        .markdown;
        if prefix.heading {
            escape_closing_hashes(&mut markdown);
        }
        markdown
    }
}

/// Lay out one paragraph so that parsing the result gives back exactly the
/// styles it was written with.
///
/// Each failed read-back takes coverage away from one style, so the loop
/// ends at the latest when no styles are left.
fn layout_paragraph<'a>(
    text: &'a str,
    index: &Utf16Index,
    content: &Range<usize>,
    styles: &[StyleRange],
    heading: bool,
) -> Layout<'a> {
    let mut clipped = clip_styles(styles, content);
    loop {
        let (tokens, pairs) = segment_paragraph(text, index, content, &clipped);
        let delimiters = choose_delimiters(&tokens, pairs.len());
        let rendered = render_inline(&tokens, &delimiters, heading, "");
        let Some(reimported) = read_back_mismatch(&rendered) else {
            return Layout { tokens, delimiters };
        };

        let trimmed = misplaced_marker(&tokens, &delimiters).is_some_and(|(pair, side)| {
            let source = &pairs[pair].source;
            let cut = match side {
                Side::Opening => char_range_at(text, index, source.start),
                Side::Closing => char_range_before(text, index, source.end),
            };
            log::trace!(
                "{:?} marker at {source:?} cannot flank, trimming {cut:?}",
                pairs[pair].kind
            );
            cut.is_some_and(|cut| remove_coverage(&mut clipped, &pairs[pair].kind, &cut))
        });
        let repaired = trimmed
            || lost_pair(&pairs, &rendered, &reimported).is_some_and(|pair| {
                remove_coverage(&mut clipped, &pairs[pair].kind, &pairs[pair].source)
            });
        if !repaired {
            log::debug!(
                "paragraph at {}..{} does not read back as written",
                content.start,
                content.end
            );
            return Layout { tokens, delimiters };
        }
    }
}

/// Style ranges cut down to the paragraph's content.
fn clip_styles(styles: &[StyleRange], content: &Range<usize>) -> Vec<StyleRange> {
    styles
        .iter()
        .filter_map(|style| {
            let (_, after_start) = split_range_at(style.range.clone(), content.start);
            let (inside, _) = split_range_at(after_start?, content.end);
            Some(StyleRange::new(inside?, style.kind.clone()))
        })
        .collect()
}

/// Parse a rendered paragraph again. `None` when it reads back as planned,
/// otherwise what the parser made of it.
fn read_back_mismatch(rendered: &Rendered) -> Option<StyledText> {
    let config = ParseConfig {
        strip_frontmatter: false,
    };
    let reimported = encode(&parse(&rendered.markdown, &config));
    (reimported.text != rendered.text || reimported.styles != rendered.styles)
        .then_some(reimported)
}

/// The first pair whose stretch did not come back with its style, or the
/// first pair at all when the difference lies elsewhere.
fn lost_pair(pairs: &[Pair], rendered: &Rendered, reimported: &StyledText) -> Option<usize> {
    let survived = |pair: usize| {
        let planned = &rendered.planned[pair];
        reimported.styles.iter().any(|style| {
            style.kind == pairs[pair].kind
                && style.range.start <= planned.start
                && planned.end <= style.range.end
        })
    };
    (0..pairs.len())
        .find(|&pair| !survived(pair))
        .or_else(|| (!pairs.is_empty()).then_some(0))
}

/// Take `cut` out of every range of `kind`. Returns whether anything changed.
fn remove_coverage(styles: &mut Vec<StyleRange>, kind: &StyleKind, cut: &Range<usize>) -> bool {
    let mut changed = false;
    let mut kept = Vec::with_capacity(styles.len() + 1);
    for style in styles.drain(..) {
        if style.kind != *kind || style.range.end <= cut.start || cut.end <= style.range.start {
            kept.push(style);
            continue;
        }
        changed = true;
        let (before, _) = split_range_at(style.range.clone(), cut.start);
        let (_, after) = split_range_at(style.range.clone(), cut.end);
        kept.extend(
            [before, after]
                .into_iter()
                .flatten()
                .map(|range| StyleRange::new(range, style.kind.clone())),
        );
    }
    *styles = kept;
    changed
}

/// UTF-16 range of the character starting at `offset`.
fn char_range_at(text: &str, index: &Utf16Index, offset: usize) -> Option<Range<usize>> {
    let ch = text.get(index.byte_offset(offset)?..)?.chars().next()?;
    Some(offset..offset + ch.len_utf16())
}

/// UTF-16 range of the character ending at `offset`.
fn char_range_before(text: &str, index: &Utf16Index, offset: usize) -> Option<Range<usize>> {
    let ch = text.get(..index.byte_offset(offset)?)?.chars().next_back()?;
    Some(offset - ch.len_utf16()..offset)
}

// ---------------------------------------------------------------------------
// Inline segmentation
// ---------------------------------------------------------------------------

/// Inline markers, in the order they nest when opened at the same offset
/// and closed at the same offset (outermost first).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Mark {
    Link(String),
    Strike,
    Bold,
    Italic,
}

impl Mark {
    fn is_emphasis(&self) -> bool {
        matches!(self, Mark::Bold | Mark::Italic)
    }

    fn style_kind(&self) -> StyleKind {
        match self {
            Mark::Link(href) => StyleKind::Link { href: href.clone() },
            Mark::Strike => StyleKind::Strike,
            Mark::Bold => StyleKind::Bold,
            Mark::Italic => StyleKind::Italic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Code(&'a str),
    // The usize ties an opener to its closer
    Open(Mark, usize),
    Close(Mark, usize),
}

/// One opened marker: the style it writes and the source stretch it covers.
#[derive(Debug)]
struct Pair {
    kind: StyleKind,
    source: Range<usize>,
}

/// Cut one paragraph into tokens, returning them with their marker pairs.
fn segment_paragraph<'a>(
    text: &'a str,
    index: &Utf16Index,
    content: &Range<usize>,
    clipped: &[StyleRange],
) -> (Vec<Token<'a>>, Vec<Pair>) {
    let code: Vec<&Range<usize>> = clipped
        .iter()
        .filter(|style| style.kind == StyleKind::Code)
        .map(|style| &style.range)
        .collect();

    // Code is atomic: no cuts inside it
    let mut cuts: Vec<usize> = clipped
        .iter()
        .flat_map(|style| [style.range.start, style.range.end])
        .chain([content.start, content.end])
        .filter(|&offset| !code.iter().any(|r| r.start < offset && offset < r.end))
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut builder = TokenBuilder::new(content.start);
    for cut in cuts.windows(2) {
        let segment = cut[0]..cut[1];
        let is_code = code.iter().any(|r| r.start == segment.start);
        let desired = marks_at(clipped, segment.start);
        builder.segment(index.slice(text, &segment), segment.start, is_code, &desired);
    }
    builder.finish()
}

/// Marks wanted at `offset`, each with the end of its range. At most one
/// link applies: the one that started last.
fn marks_at(styles: &[StyleRange], offset: usize) -> Vec<(Mark, usize)> {
    let mut marks = Vec::new();
    let mut link: Option<&StyleRange> = None;
    for style in styles.iter().filter(|s| s.range.contains(&offset)) {
        let end = style.range.end;
        match &style.kind {
            StyleKind::Bold => marks.push((Mark::Bold, end)),
            StyleKind::Italic => marks.push((Mark::Italic, end)),
            StyleKind::Strike => marks.push((Mark::Strike, end)),
            StyleKind::Code => {}
            StyleKind::Link { .. } => {
                if link.is_none_or(|current| style.range.start >= current.range.start) {
                    link = Some(style);
                }
            }
        }
    }
    if let Some(style) = link
        && let Some(href) = style.kind.link_href()
    {
        marks.push((Mark::Link(href.to_string()), style.range.end));
    }
    marks
}

struct Frame {
    mark: Mark,
    pair: usize,
}

struct TokenBuilder<'a> {
    tokens: Vec<Token<'a>>,
    stack: Vec<Frame>,
    // Whitespace not yet written; it goes after any closers
    pending: Vec<&'a str>,
    pairs: Vec<Pair>,
    // Source offset just past the last text or code written
    cursor: usize,
}

impl<'a> TokenBuilder<'a> {
    fn new(start: usize) -> Self {
        Self {
            tokens: Vec::new(),
            stack: Vec::new(),
            pending: Vec::new(),
            pairs: Vec::new(),
            cursor: start,
        }
    }

    fn segment(&mut self, text: &'a str, start: usize, is_code: bool, desired: &[(Mark, usize)]) {
        if is_code {
            self.close_unwanted(desired);
            self.flush_pending();
            self.open_missing(desired, start);
            self.tokens.push(Token::Code(text));
            self.cursor = start + utf16_len(text);
            return;
        }

        let core = text.trim_matches(char::is_whitespace);
        if core.is_empty() {
            // Whitespace never opens markers
            self.close_unwanted(desired);
            self.pending.push(text);
            return;
        }
        let lead = &text[..text.len() - text.trim_start_matches(char::is_whitespace).len()];
        let trail = &text[lead.len() + core.len()..];

        self.close_unwanted(desired);
        if !lead.is_empty() {
            self.pending.push(lead);
        }
        self.flush_pending();
        let core_start = start + utf16_len(lead);
        self.open_missing(desired, core_start);
        self.tokens.push(Token::Text(core));
        self.cursor = core_start + utf16_len(core);
        if !trail.is_empty() {
            self.pending.push(trail);
        }
    }

    /// Close the first open marker that is no longer wanted, and every marker
    /// opened after it.
    fn close_unwanted(&mut self, desired: &[(Mark, usize)]) {
        let keep = self
            .stack
            .iter()
            .position(|frame| !desired.iter().any(|(mark, _)| *mark == frame.mark))
            .unwrap_or(self.stack.len());
        while self.stack.len() > keep {
            if let Some(frame) = self.stack.pop() {
                self.pairs[frame.pair].source.end = self.cursor;
                self.tokens.push(Token::Close(frame.mark, frame.pair));
            }
        }
    }

    /// Open wanted markers that are not open yet, longest-lived outermost.
    fn open_missing(&mut self, desired: &[(Mark, usize)], at: usize) {
        let mut missing: Vec<&(Mark, usize)> = desired
            .iter()
            .filter(|(mark, _)| !self.stack.iter().any(|frame| frame.mark == *mark))
            .collect();
        missing.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        for (mark, _) in missing {
            let pair = self.pairs.len();
            self.pairs.push(Pair {
                kind: mark.style_kind(),
                source: at..at,
            });
            self.tokens.push(Token::Open(mark.clone(), pair));
            self.stack.push(Frame {
                mark: mark.clone(),
                pair,
            });
        }
    }

    fn flush_pending(&mut self) {
        // Leading whitespace of a paragraph is dropped
        if self.tokens.is_empty() {
            self.pending.clear();
            return;
        }
        for text in self.pending.drain(..) {
            self.tokens.push(Token::Text(text));
        }
    }

    fn finish(mut self) -> (Vec<Token<'a>>, Vec<Pair>) {
        self.close_unwanted(&[]);
        (self.tokens, self.pairs)
    }
}

// ---------------------------------------------------------------------------
// Delimiters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Star,
    Underscore,
}

impl Delimiter {
    fn flipped(self) -> Self {
        match self {
            Delimiter::Star => Delimiter::Underscore,
            Delimiter::Underscore => Delimiter::Star,
        }
    }
}

/// Pick `*` or `_` for every emphasis pair.
///
/// A closing run directly followed by an opening run of the same character
/// reads as one delimiter run, so one side of every such contact switches
/// character. A switch never creates a new contact, and `_` is never put
/// against an alphanumeric character.
fn choose_delimiters(tokens: &[Token], pairs: usize) -> Vec<Delimiter> {
    let mut delimiters = vec![Delimiter::Star; pairs];
    let mut opened_at = vec![0; pairs];
    let mut closed_at = vec![0; pairs];
    for (position, token) in tokens.iter().enumerate() {
        match token {
            Token::Open(_, pair) => opened_at[*pair] = position,
            Token::Close(_, pair) => closed_at[*pair] = position,
            _ => {}
        }
    }

    for position in 1..tokens.len() {
        let (Token::Close(closer, closing), Token::Open(opener, opening)) =
            (&tokens[position - 1], &tokens[position])
        else {
            continue;
        };
        if !closer.is_emphasis()
            || !opener.is_emphasis()
            || delimiters[*closing] != delimiters[*opening]
        {
            continue;
        }
        let switched = [*closing, *opening].into_iter().find(|&pair| {
            switch_fits(tokens, &delimiters, pair, opened_at[pair], closed_at[pair])
        });
        match switched {
            Some(pair) => delimiters[pair] = delimiters[pair].flipped(),
            None => {
                log::debug!("emphasis markers touch at token {position} and cannot be separated")
            }
        }
    }
    delimiters
}

/// Whether `pair` can change character without closing against an opener
/// of the new character, or putting `_` next to an alphanumeric.
fn switch_fits(
    tokens: &[Token],
    delimiters: &[Delimiter],
    pair: usize,
    opened: usize,
    closed: usize,
) -> bool {
    let flipped = delimiters[pair].flipped();
    let ch = match flipped {
        Delimiter::Star => '*',
        Delimiter::Underscore => '_',
    };
    let closer_before = opened
        .checked_sub(1)
        .and_then(|position| tokens.get(position))
        .is_some_and(|token| {
            matches!(token, Token::Close(..)) && marker_char(token, delimiters) == Some(ch)
        });
    let opener_after = tokens.get(closed + 1).is_some_and(|token| {
        matches!(token, Token::Open(..)) && marker_char(token, delimiters) == Some(ch)
    });
    if closer_before || opener_after {
        return false;
    }
    flipped == Delimiter::Star
        || (classify(edge_before(tokens, delimiters, opened)) != CharClass::Other
            && classify(edge_after(tokens, delimiters, closed)) != CharClass::Other)
}

/// The character a marker is written with, for markers that follow the
/// delimiter run rules. Links do not.
fn delimiter_char(mark: &Mark, delimiter: Delimiter) -> Option<char> {
    match (mark, delimiter) {
        (Mark::Link(_), _) => None,
        (Mark::Strike, _) => Some('~'),
        (_, Delimiter::Star) => Some('*'),
        (_, Delimiter::Underscore) => Some('_'),
    }
}

fn marker_char(token: &Token, delimiters: &[Delimiter]) -> Option<char> {
    match token {
        Token::Open(mark, pair) | Token::Close(mark, pair) => {
            delimiter_char(mark, delimiters[*pair])
        }
        Token::Text(_) | Token::Code(_) => None,
    }
}

/// First or last character a token writes.
fn outer_char(token: &Token, delimiters: &[Delimiter], last: bool) -> Option<char> {
    match token {
        Token::Text(text) if last => text.chars().next_back(),
        Token::Text(text) => text.chars().next(),
        Token::Code(_) => Some('`'),
        Token::Open(..) => marker_char(token, delimiters).or(Some('[')),
        Token::Close(..) => marker_char(token, delimiters).or(Some(')')),
    }
}

/// Last character written before the token at `position`.
fn edge_before(tokens: &[Token], delimiters: &[Delimiter], position: usize) -> Option<char> {
    outer_char(tokens.get(position.checked_sub(1)?)?, delimiters, true)
}

/// First character written after the token at `position`.
fn edge_after(tokens: &[Token], delimiters: &[Delimiter], position: usize) -> Option<char> {
    outer_char(tokens.get(position + 1)?, delimiters, false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Space,
    Punctuation,
    Other,
}

/// How CommonMark sees a character next to a delimiter run. Line edges
/// count as whitespace.
fn classify(ch: Option<char>) -> CharClass {
    match ch {
        None => CharClass::Space,
        Some(ch) if ch.is_whitespace() => CharClass::Space,
        Some(ch) if ch.is_alphanumeric() => CharClass::Other,
        Some(_) => CharClass::Punctuation,
    }
}

/// Left- and right-flanking for a delimiter run between `before` and `after`.
fn flanking(before: Option<char>, after: Option<char>) -> (bool, bool) {
    let (before, after) = (classify(before), classify(after));
    let left = after != CharClass::Space
        && (after != CharClass::Punctuation || before != CharClass::Other);
    let right = before != CharClass::Space
        && (before != CharClass::Punctuation || after != CharClass::Other);
    (left, right)
}

fn can_open(ch: char, before: Option<char>, after: Option<char>) -> bool {
    let (left, right) = flanking(before, after);
    match ch {
        '_' => left && (!right || classify(before) == CharClass::Punctuation),
        _ => left,
    }
}

fn can_close(ch: char, before: Option<char>, after: Option<char>) -> bool {
    let (left, right) = flanking(before, after);
    match ch {
        '_' => right && (!left || classify(after) == CharClass::Punctuation),
        _ => right,
    }
}

enum Side {
    Opening,
    Closing,
}

/// The first marker whose delimiter run cannot open or close where it
/// stands, with the side of its pair that failed.
fn misplaced_marker(tokens: &[Token], delimiters: &[Delimiter]) -> Option<(usize, Side)> {
    let mut start = 0;
    while start < tokens.len() {
        let Some(ch) = marker_char(&tokens[start], delimiters) else {
            start += 1;
            continue;
        };
        let end = start
            + tokens[start..]
                .iter()
                .take_while(|token| marker_char(token, delimiters) == Some(ch))
                .count();
        let before = edge_before(tokens, delimiters, start);
        let after = edge_after(tokens, delimiters, end - 1);
        for token in &tokens[start..end] {
            match token {
                Token::Open(_, pair) if !can_open(ch, before, after) => {
                    return Some((*pair, Side::Opening));
                }
                Token::Close(_, pair) if !can_close(ch, before, after) => {
                    return Some((*pair, Side::Closing));
                }
                _ => {}
            }
        }
        start = end;
    }
    None
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// A paragraph written out, next to the text and styles it should read
/// back as.
struct Rendered {
    markdown: String,
    text: String,
    styles: Vec<StyleRange>,
    // Read-back range of each marker pair
    planned: Vec<Range<usize>>,
}

fn render_inline(
    tokens: &[Token],
    delimiters: &[Delimiter],
    heading: bool,
    continuation: &str,
) -> Rendered {
    let mut writer = Writer {
        out: String::new(),
        plain: Utf16Buffer::new(),
        heading,
        continuation,
        at_line_start: true,
    };
    let mut styles = Vec::new();
    let mut planned = vec![0..0; delimiters.len()];
    for token in tokens {
        match token {
            Token::Text(text) => writer.text(text),
            Token::Code(code) => {
                let start = writer.plain.len();
                writer.code(code);
                styles.push(StyleRange::new(start..writer.plain.len(), StyleKind::Code));
            }
            Token::Open(mark, pair) => {
                if matches!(mark, Mark::Link(_)) && writer.out.ends_with('!') {
                    // `![` would start an image
                    writer.out.pop();
                    writer.out.push_str("\\!");
                }
                writer.markup(marker(mark, delimiters[*pair]));
                planned[*pair].start = writer.plain.len();
            }
            Token::Close(mark, pair) => {
                match mark {
                    Mark::Link(href) => {
                        writer.markup("](");
                        writer.markup(&link_destination(href));
                        writer.markup(")");
                    }
                    _ => writer.markup(marker(mark, delimiters[*pair])),
                }
                planned[*pair].end = writer.plain.len();
                styles.push(StyleRange::new(planned[*pair].clone(), mark.style_kind()));
            }
        }
    }
    merge_adjacent(&mut styles);
    Rendered {
        markdown: writer.out,
        text: writer.plain.into_string(),
        styles,
        planned,
    }
}

fn marker(mark: &Mark, delimiter: Delimiter) -> &'static str {
    match (mark, delimiter) {
        (Mark::Bold, Delimiter::Star) => "**",
        (Mark::Bold, Delimiter::Underscore) => "__",
        (Mark::Italic, Delimiter::Star) => "*",
        (Mark::Italic, Delimiter::Underscore) => "_",
        (Mark::Strike, _) => "~~",
        (Mark::Link(_), _) => "[",
    }
}

/// Markdown being written, and the plain text it stands for.
struct Writer<'c> {
    out: String,
    plain: Utf16Buffer,
    heading: bool,
    continuation: &'c str,
    at_line_start: bool,
}

impl Writer<'_> {
    fn markup(&mut self, markup: &str) {
        self.out.push_str(markup);
        self.at_line_start = false;
    }

    fn text(&mut self, text: &str) {
        let breaks = text.matches([LINE_BREAK, PARAGRAPH_SEPARATOR]).count();
        for (line, piece) in text.split([LINE_BREAK, PARAGRAPH_SEPARATOR]).enumerate() {
            if line > 0 {
                self.line_break();
            }
            let mut piece = piece;
            if self.at_line_start {
                piece = piece.trim_start_matches([' ', '\t']);
            }
            // Spaces before a hard break are dropped
            if line < breaks && !self.heading {
                piece = piece.trim_end_matches([' ', '\t']);
            }
            if piece.is_empty() {
                continue;
            }
            let rest = if self.at_line_start {
                escape_line_start(&mut self.out, piece)
            } else {
                piece
            };
            escape_inline(&mut self.out, rest);
            self.plain.append_text(piece);
            self.at_line_start = false;
        }
    }

    fn line_break(&mut self) {
        if self.heading {
            self.out.push(' ');
            self.plain.push(' ');
        } else {
            self.out.push_str("\\\n");
            self.out.push_str(self.continuation);
            self.plain.push(LINE_BREAK);
            self.at_line_start = true;
        }
    }

    fn code(&mut self, code: &str) {
        let code: String = code
            .chars()
            .map(|ch| match ch {
                LINE_BREAK | PARAGRAPH_SEPARATOR => ' ',
                _ => ch,
            })
            .collect();

        let mut longest = 0;
        let mut run = 0;
        for ch in code.chars() {
            if ch == '`' {
                run += 1;
                longest = longest.max(run);
            } else {
                run = 0;
            }
        }
        let fence = "`".repeat(longest + 1);
        let pad = code.starts_with('`')
            || code.ends_with('`')
            || (code.starts_with(' ') && code.ends_with(' ') && !code.trim().is_empty());

        self.out.push_str(&fence);
        if pad {
            self.out.push(' ');
        }
        self.out.push_str(&code);
        if pad {
            self.out.push(' ');
        }
        self.out.push_str(&fence);
        self.plain.append_text(&code);
        self.at_line_start = false;
    }
}

/// Escape whatever at the start of a line would begin a block construct.
/// Writes the escaped head and returns the part still to be written.
fn escape_line_start<'a>(out: &mut String, line: &'a str) -> &'a str {
    let mut chars = line.chars();
    match chars.next() {
        Some(ch @ ('#' | '>' | '-' | '+' | '=')) => {
            out.push('\\');
            out.push(ch);
            return chars.as_str();
        }
        Some(_) => {}
        None => return line,
    }

    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if (1..=9).contains(&digits) && matches!(line.as_bytes().get(digits), Some(b'.' | b')')) {
        out.push_str(&line[..digits]);
        out.push('\\');
        out.push_str(&line[digits..=digits]);
        return &line[digits + 1..];
    }
    line
}

fn escape_inline(out: &mut String, text: &str) {
    for ch in text.chars() {
        if matches!(ch, '\\' | '*' | '_' | '~' | '`' | '[' | ']' | '<' | '&') {
            out.push('\\');
        }
        out.push(ch);
    }
}

/// Keep a heading's trailing `#`s from reading as a closing sequence.
fn escape_closing_hashes(markdown: &mut String) {
    let body_len = markdown.trim_end_matches('#').len();
    if body_len < markdown.len() && !markdown[..body_len].ends_with('\\') {
        markdown.insert(body_len, '\\');
    }
}

fn link_destination(href: &str) -> String {
    let mut escaped = String::with_capacity(href.len());
    for ch in href.chars() {
        if matches!(ch, '\\' | '&' | '<' | '>') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    if href.contains([' ', '(', ')', '<', '>']) {
        format!("<{escaped}>")
    } else {
        escaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvalidRangeKind;
    use pretty_assertions::assert_eq;

    fn list(range: Range<usize>, kind: ListKind, depth: usize) -> ParagraphRecord {
        ParagraphRecord {
            list_kind: kind,
            nesting_depth: depth,
            ..ParagraphRecord::plain(range)
        }
    }

    fn one_paragraph(text: &str, styles: &[StyleRange]) -> String {
        let len = text.encode_utf16().count();
        decode(text, &[ParagraphRecord::plain(0..len)], styles).unwrap()
    }

    fn link(href: &str) -> StyleKind {
        StyleKind::Link { href: href.into() }
    }

    fn read_back(markdown: &str) -> Vec<StyleRange> {
        crate::markdown_to_styled(markdown).styles
    }

    #[test]
    fn heading_and_paragraph() {
        let paragraphs = vec![
            ParagraphRecord {
                heading_level: 2,
                ..ParagraphRecord::plain(0..6)
            },
            ParagraphRecord::plain(6..10),
        ];
        assert_eq!(
            decode("Title\nBody", &paragraphs, &[]).unwrap(),
            "## Title\n\nBody"
        );
    }

    #[test]
    fn list_counter_resets_after_plain_paragraph() {
        let text = "a\nb\nc\nx\nd\ne";
        let mut paragraphs: Vec<ParagraphRecord> = (0..6)
            .map(|i| list(i * 2..i * 2 + 2, ListKind::Number, 0))
            .collect();
        paragraphs[3].list_kind = ListKind::None;
        paragraphs[5].range.end = 11;
        assert_eq!(
            decode(text, &paragraphs, &[]).unwrap(),
            "1. a\n2. b\n3. c\n\nx\n\n1. d\n2. e"
        );
    }

    #[test]
    fn list_start_is_honoured() {
        let paragraphs = vec![
            ParagraphRecord {
                list_start: Some(4),
                ..list(0..2, ListKind::Number, 0)
            },
            ParagraphRecord {
                list_start: Some(4),
                ..list(2..3, ListKind::Number, 0)
            },
        ];
        assert_eq!(decode("a\nb", &paragraphs, &[]).unwrap(), "4. a\n5. b");
    }

    #[test]
    fn nested_lists_indent_to_parent_content() {
        let paragraphs = vec![
            list(0..4, ListKind::Bullet, 0),
            list(4..8, ListKind::Number, 1),
            list(8..14, ListKind::Bullet, 2),
            list(14..18, ListKind::Bullet, 0),
        ];
        assert_eq!(
            decode("one\ntwo\nthree\nfour", &paragraphs, &[]).unwrap(),
            "- one\n  1. two\n     - three\n- four"
        );
    }

    #[test]
    fn heading_wins_over_list() {
        let paragraphs = vec![ParagraphRecord {
            heading_level: 3,
            ..list(0..1, ListKind::Bullet, 2)
        }];
        assert_eq!(decode("x", &paragraphs, &[]).unwrap(), "### x");
    }

    #[test]
    fn indented_plain_paragraph_is_quoted() {
        let paragraphs = vec![
            list(0..7, ListKind::None, 1),
            list(7..13, ListKind::None, 2),
        ];
        assert_eq!(
            decode("quoted\ndeeper", &paragraphs, &[]).unwrap(),
            "> quoted\n\n> > deeper"
        );
    }

    #[test]
    fn empty_paragraphs_are_skipped() {
        assert_eq!(
            decode(
                "a\n\nb",
                &[
                    list(0..2, ListKind::Number, 0),
                    ParagraphRecord::plain(2..3),
                    list(3..4, ListKind::Number, 0),
                ],
                &[]
            )
            .unwrap(),
            "1. a\n2. b"
        );
    }

    #[test]
    fn empty_list_item_keeps_marker() {
        let paragraphs = vec![
            list(0..1, ListKind::Bullet, 0),
            list(1..2, ListKind::Bullet, 0),
        ];
        assert_eq!(decode("\nb", &paragraphs, &[]).unwrap(), "-\n- b");
    }

    #[test]
    fn missing_paragraphs_are_derived() {
        assert_eq!(decode("x\ny", &[], &[]).unwrap(), "x\n\ny");
        assert_eq!(decode("", &[], &[]).unwrap(), "");
    }

    #[test]
    fn basic_styles() {
        assert_eq!(
            one_paragraph(
                "bold italic gone",
                &[
                    StyleRange::new(0..4, StyleKind::Bold),
                    StyleRange::new(5..11, StyleKind::Italic),
                    StyleRange::new(12..16, StyleKind::Strike),
                ]
            ),
            "**bold** *italic* ~~gone~~"
        );
    }

    #[test]
    fn same_range_bold_italic() {
        assert_eq!(
            one_paragraph(
                "both",
                &[
                    StyleRange::new(0..4, StyleKind::Italic),
                    StyleRange::new(0..4, StyleKind::Bold),
                ]
            ),
            "***both***"
        );
    }

    #[test]
    fn overlap_reopens_italic() {
        assert_eq!(
            one_paragraph(
                "abcdefghij",
                &[
                    StyleRange::new(0..6, StyleKind::Bold),
                    StyleRange::new(2..10, StyleKind::Italic),
                ]
            ),
            "__ab*cdef*__*ghij*"
        );
    }

    #[test]
    fn overlap_reopens_bold() {
        assert_eq!(
            one_paragraph(
                "abcdefgh",
                &[
                    StyleRange::new(0..4, StyleKind::Italic),
                    StyleRange::new(2..6, StyleKind::Bold),
                ]
            ),
            "_ab**cd**_**ef**gh"
        );
    }

    #[test]
    fn touching_bold_and_italic() {
        assert_eq!(
            one_paragraph(
                "abcd",
                &[
                    StyleRange::new(0..2, StyleKind::Bold),
                    StyleRange::new(2..4, StyleKind::Italic),
                ]
            ),
            "__ab__*cd*"
        );
    }

    #[test]
    fn whitespace_stays_outside_markers() {
        assert_eq!(
            one_paragraph("title  next", &[StyleRange::new(0..7, StyleKind::Bold)]),
            "**title**  next"
        );
        assert_eq!(
            one_paragraph("a  b", &[StyleRange::new(1..3, StyleKind::Italic)]),
            "a  b"
        );
        assert_eq!(
            one_paragraph(" lead", &[StyleRange::new(0..5, StyleKind::Bold)]),
            "**lead**"
        );
    }

    #[test]
    fn same_kind_overlaps_are_merged() {
        assert_eq!(
            one_paragraph(
                "abcdefgh",
                &[
                    StyleRange::new(0..5, StyleKind::Bold),
                    StyleRange::new(3..8, StyleKind::Bold),
                ]
            ),
            "**abcdefgh**"
        );
    }

    #[test]
    fn code_is_atomic() {
        assert_eq!(
            one_paragraph(
                "a code b",
                &[
                    StyleRange::new(0..8, StyleKind::Bold),
                    StyleRange::new(2..6, StyleKind::Code),
                    StyleRange::new(3..4, StyleKind::Italic),
                ]
            ),
            "**a `code` b**"
        );
    }

    #[test]
    fn code_fence_outgrows_backticks() {
        assert_eq!(
            one_paragraph("a`b", &[StyleRange::new(0..3, StyleKind::Code)]),
            "``a`b``"
        );
        assert_eq!(
            one_paragraph("`x", &[StyleRange::new(0..2, StyleKind::Code)]),
            "`` `x ``"
        );
        assert_eq!(
            one_paragraph("*raw*", &[StyleRange::new(0..5, StyleKind::Code)]),
            "`*raw*`"
        );
    }

    #[test]
    fn links() {
        assert_eq!(
            one_paragraph("see docs", &[StyleRange::new(4..8, link("https://x.io"))]),
            "see [docs](https://x.io)"
        );
        assert_eq!(
            one_paragraph("file", &[StyleRange::new(0..4, link("my file (1).md"))]),
            "[file](<my file (1).md>)"
        );
        assert_eq!(
            one_paragraph("wow!link", &[StyleRange::new(4..8, link("u"))]),
            "wow\\![link](u)"
        );
    }

    #[test]
    fn link_opens_outside_other_styles() {
        assert_eq!(
            one_paragraph(
                "a",
                &[
                    StyleRange::new(0..1, StyleKind::Strike),
                    StyleRange::new(0..1, link("u")),
                ]
            ),
            "[~~a~~](u)"
        );
    }

    #[test]
    fn adjacent_links_stay_separate() {
        assert_eq!(
            one_paragraph(
                "onetwo",
                &[
                    StyleRange::new(0..3, link("a")),
                    StyleRange::new(3..6, link("b")),
                ]
            ),
            "[one](a)[two](b)"
        );
    }

    #[test]
    fn structural_text_is_escaped() {
        assert_eq!(
            one_paragraph("1. *not* a list", &[]),
            "1\\. \\*not\\* a list"
        );
        assert_eq!(one_paragraph("# tag", &[]), "\\# tag");
        assert_eq!(one_paragraph("- dash", &[]), "\\- dash");
        assert_eq!(one_paragraph("---", &[]), "\\---");
        assert_eq!(one_paragraph("snake_case [x]", &[]), "snake\\_case \\[x\\]");
    }

    #[test]
    fn hard_breaks_use_continuation() {
        let paragraphs = vec![list(0..3, ListKind::Bullet, 0)];
        assert_eq!(
            decode("a\u{b}b", &paragraphs, &[]).unwrap(),
            "- a\\\n  b"
        );
        assert_eq!(one_paragraph("a\u{b}# b", &[]), "a\\\n\\# b");

        let heading = vec![ParagraphRecord {
            heading_level: 1,
            ..ParagraphRecord::plain(0..3)
        }];
        assert_eq!(decode("a\u{b}b", &heading, &[]).unwrap(), "# a b");
    }

    #[test]
    fn emoji_offsets() {
        assert_eq!(
            one_paragraph("😀 hi", &[StyleRange::new(3..5, StyleKind::Bold)]),
            "😀 **hi**"
        );
    }

    #[test]
    fn custom_bullet() {
        let config = DecodeConfig { bullet: '*' };
        let paragraphs = vec![list(0..1, ListKind::Bullet, 0)];
        assert_eq!(
            decode_with_config("a", &paragraphs, &[], &config).unwrap(),
            "* a"
        );
    }

    #[test]
    fn reversed_range_is_rejected() {
        let err = decode(
            "abcdef",
            &[ParagraphRecord::plain(0..6)],
            &[StyleRange::new(5..3, StyleKind::Bold)],
        )
        .unwrap_err();
        assert_eq!(err.kind(), InvalidRangeKind::Reversed);
        assert_eq!(err.offset(), 5);
    }

    #[test]
    fn surrogate_split_is_rejected() {
        let err = decode(
            "😀",
            &[ParagraphRecord::plain(0..2)],
            &[StyleRange::new(0..1, StyleKind::Bold)],
        )
        .unwrap_err();
        assert_eq!(err.kind(), InvalidRangeKind::SplitsSurrogate);
        assert_eq!(err.len(), 2);
    }

    #[test]
    fn out_of_bounds_paragraph_is_rejected() {
        let err = decode("ab", &[ParagraphRecord::plain(0..3)], &[]).unwrap_err();
        assert_eq!(err.kind(), InvalidRangeKind::OutOfBounds);
    }

    #[test]
    fn punctuation_moves_outside_markers() {
        let bold = [StyleRange::new(0..4, StyleKind::Bold)];
        assert_eq!(one_paragraph("foo.bar", &bold), "**foo**.bar");

        let italic = [StyleRange::new(3..7, StyleKind::Italic)];
        assert_eq!(one_paragraph("foo.bar", &italic), "foo.*bar*");

        let wrapped = [StyleRange::new(1..4, StyleKind::Bold)];
        let markdown = one_paragraph("a(b)c", &wrapped);
        assert_eq!(markdown, "a(**b**)c");
        assert_eq!(
            read_back(&markdown),
            vec![StyleRange::new(2..3, StyleKind::Bold)]
        );
    }

    #[test]
    fn punctuation_stays_inside_next_to_spaces() {
        let styles = [StyleRange::new(4..8, StyleKind::Bold)];
        let markdown = one_paragraph("say (hi) now", &styles);
        assert_eq!(markdown, "say **(hi)** now");
        assert_eq!(read_back(&markdown), styles.to_vec());
    }

    #[test]
    fn alternating_styles_never_touch_underscores() {
        let styles = [
            StyleRange::new(0..1, StyleKind::Bold),
            StyleRange::new(1..2, StyleKind::Italic),
            StyleRange::new(2..3, StyleKind::Bold),
        ];
        let markdown = one_paragraph("abc", &styles);
        assert_eq!(markdown, "__a__*b*__c__");
        assert_eq!(read_back(&markdown), styles.to_vec());

        let styles = [
            StyleRange::new(0..1, StyleKind::Italic),
            StyleRange::new(1..2, StyleKind::Bold),
            StyleRange::new(2..3, StyleKind::Italic),
        ];
        let markdown = one_paragraph("abc", &styles);
        assert_eq!(markdown, "_a_**b**_c_");
        assert_eq!(read_back(&markdown), styles.to_vec());
    }

    #[test]
    fn strike_gives_way_when_both_end_before_a_letter() {
        // `~~` cannot close between `**` and a letter
        let styles = [
            StyleRange::new(0..1, StyleKind::Strike),
            StyleRange::new(0..1, StyleKind::Bold),
        ];
        let markdown = one_paragraph("ab", &styles);
        assert_eq!(markdown, "**a**b");
        assert_eq!(
            read_back(&markdown),
            vec![StyleRange::new(0..1, StyleKind::Bold)]
        );
    }

    #[test]
    fn list_numbers_stay_within_marker_limit() {
        let paragraphs = vec![
            ParagraphRecord {
                list_start: Some(u64::MAX),
                ..list(0..2, ListKind::Number, 0)
            },
            list(2..3, ListKind::Number, 0),
        ];
        assert_eq!(
            decode("a\nb", &paragraphs, &[]).unwrap(),
            "999999999. a\n999999999. b"
        );
    }

    #[test]
    fn list_after_quoted_text_stays_quoted() {
        let paragraphs = vec![
            list(0..2, ListKind::None, 1),
            list(2..4, ListKind::Bullet, 1),
            list(4..6, ListKind::Bullet, 2),
            list(6..7, ListKind::Bullet, 0),
        ];
        assert_eq!(
            decode("a\nb\nc\nd", &paragraphs, &[]).unwrap(),
            "> a\n\n> - b\n>   - c\n\n- d"
        );
    }

    #[test]
    fn heading_keeps_trailing_hashes() {
        let heading = vec![ParagraphRecord {
            heading_level: 2,
            ..ParagraphRecord::plain(0..4)
        }];
        assert_eq!(decode("C# #", &heading, &[]).unwrap(), "## C# \\#");
    }

    #[test]
    fn link_destination_escapes_entities() {
        let markdown = one_paragraph("q", &[StyleRange::new(0..1, link("a&amp;b"))]);
        assert_eq!(markdown, "[q](a\\&amp;b)");
        assert_eq!(
            read_back(&markdown),
            vec![StyleRange::new(0..1, link("a&amp;b"))]
        );
    }
}
