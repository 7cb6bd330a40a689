use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};

use crate::block::{Block, List, ListItem, Span};
use crate::config::ParseConfig;

/// Strip YAML frontmatter from the beginning of markdown content
fn strip_frontmatter(markdown: &str) -> &str {
    if !markdown.starts_with("---") {
        return markdown;
    }
    // Find the closing ---
    if let Some(end) = markdown[3..].find("\n---") {
        // Skip past the closing --- and any trailing newline
        let after_frontmatter = &markdown[3 + end + 4..];
        after_frontmatter.trim_start_matches('\n')
    } else {
        markdown
    }
}

/// Parse markdown text into a list of blocks
pub fn parse(markdown: &str, config: &ParseConfig) -> Vec<Block> {
    let markdown = if config.strip_frontmatter {
        strip_frontmatter(markdown)
    } else {
        markdown
    };
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options);
    let mut state = ParseState::default();

    for event in parser {
        process_event(event, &mut state);
    }

    state.finish()
}

#[derive(Default)]
struct ParseState {
    // Finished top-level blocks
    blocks: Vec<Block>,
    // Open block containers, innermost last
    containers: Vec<Container>,

    // Current inline content being built
    spans: Vec<Span>,
    // Open inline spans, each with the content collected before it started
    span_stack: Vec<(InlineKind, Vec<Span>)>,

    // Current heading level (if in a heading)
    heading_level: Option<u8>,

    // Code block state
    in_code_block: bool,
    code_content: String,
}

enum Container {
    Quote(Vec<Block>),
    List(List),
    Item(ListItem),
}

enum InlineKind {
    Strong,
    Emphasis,
    Strike,
    Link(String),
}

impl ParseState {
    /// Close any inline spans left open and hand back the collected content.
    ///
    /// Unclosed spans are flattened into their parent as plain content.
    fn take_inline(&mut self) -> Vec<Span> {
        while let Some((_, mut parent)) = self.span_stack.pop() {
            log::trace!("flattening unclosed inline span");
            parent.append(&mut self.spans);
            self.spans = parent;
        }
        std::mem::take(&mut self.spans)
    }

    /// Turn loose inline content (tight list items) into a paragraph.
    fn flush_inline(&mut self) {
        if self.heading_level.is_some() {
            return;
        }
        let content = self.take_inline();
        if !content.is_empty() {
            self.push_block(Block::Paragraph { content });
        }
    }

    fn push_block(&mut self, block: Block) {
        match self.containers.last_mut() {
            Some(Container::Quote(blocks)) => blocks.push(block),
            Some(Container::Item(item)) => item.blocks.push(block),
            Some(Container::List(list)) => list.items.push(ListItem {
                blocks: vec![block],
            }),
            None => self.blocks.push(block),
        }
    }

    fn open(&mut self, container: Container) {
        self.flush_inline();
        self.containers.push(container);
    }

    fn close(&mut self) {
        self.flush_inline();
        let Some(container) = self.containers.pop() else {
            return;
        };
        match container {
            Container::Quote(blocks) => self.push_block(Block::Blockquote { blocks }),
            Container::List(list) => self.push_block(Block::List(list)),
            Container::Item(item) => match self.containers.last_mut() {
                Some(Container::List(list)) => list.items.push(item),
                _ => self.push_block(Block::ListItem(item)),
            },
        }
    }

    fn open_inline(&mut self, kind: InlineKind) {
        let outer = std::mem::take(&mut self.spans);
        self.span_stack.push((kind, outer));
    }

    fn close_inline(&mut self) {
        let Some((kind, mut parent)) = self.span_stack.pop() else {
            return;
        };
        let content = std::mem::take(&mut self.spans);
        parent.push(match kind {
            InlineKind::Strong => Span::Strong(content),
            InlineKind::Emphasis => Span::Emphasis(content),
            InlineKind::Strike => Span::Strike(content),
            InlineKind::Link(href) => Span::Link { href, content },
        });
        self.spans = parent;
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush_inline();
        while !self.containers.is_empty() {
            self.close();
        }
        self.blocks
    }
}

fn process_event(event: Event, state: &mut ParseState) {
    match event {
        // Headings
        Event::Start(Tag::Heading { level, .. }) => {
            state.flush_inline();
            state.heading_level = Some(heading_level_to_u8(level));
        }
        Event::End(TagEnd::Heading(_)) => {
            if let Some(level) = state.heading_level.take() {
                let content = state.take_inline();
                state.push_block(Block::Heading { level, content });
            }
        }

        // Paragraphs
        Event::Start(Tag::Paragraph) => state.flush_inline(),
        Event::End(TagEnd::Paragraph) => {
            let content = state.take_inline();
            state.push_block(Block::Paragraph { content });
        }

        // Text content
        Event::Text(text) => {
            if state.in_code_block {
                state.code_content.push_str(&text);
            } else {
                state.spans.push(Span::Text(text.into_string()));
            }
        }
        Event::Code(code) => {
            state.spans.push(Span::Code(code.into_string()));
        }
        // Raw HTML is not modelled; keep it as literal text
        Event::InlineHtml(html) | Event::Html(html) => {
            let html = html.trim_end_matches('\n');
            if !html.is_empty() {
                state.spans.push(Span::Text(html.to_string()));
            }
        }
        Event::End(TagEnd::HtmlBlock) => state.flush_inline(),

        // Inline formatting
        Event::Start(Tag::Strong) => state.open_inline(InlineKind::Strong),
        Event::Start(Tag::Emphasis) => state.open_inline(InlineKind::Emphasis),
        Event::Start(Tag::Strikethrough) => state.open_inline(InlineKind::Strike),
        Event::Start(Tag::Link { dest_url, .. }) => {
            state.open_inline(InlineKind::Link(dest_url.into_string()));
        }
        Event::End(TagEnd::Strong)
        | Event::End(TagEnd::Emphasis)
        | Event::End(TagEnd::Strikethrough)
        | Event::End(TagEnd::Link) => state.close_inline(),

        // Code blocks become one code-styled paragraph per line
        Event::Start(Tag::CodeBlock(_)) => {
            state.flush_inline();
            state.in_code_block = true;
            state.code_content.clear();
        }
        Event::End(TagEnd::CodeBlock) => {
            state.in_code_block = false;
            let content = std::mem::take(&mut state.code_content);
            for line in content.lines().filter(|line| !line.trim().is_empty()) {
                state.push_block(Block::Paragraph {
                    content: vec![Span::Code(line.to_string())],
                });
            }
        }

        // Containers
        Event::Start(Tag::BlockQuote(_)) => state.open(Container::Quote(Vec::new())),
        Event::Start(Tag::List(first_item)) => state.open(Container::List(List {
            ordered: first_item.is_some(),
            start: first_item,
            items: Vec::new(),
        })),
        Event::Start(Tag::Item) => state.open(Container::Item(ListItem::default())),
        Event::End(TagEnd::BlockQuote(_)) | Event::End(TagEnd::List(_)) | Event::End(TagEnd::Item) => {
            state.close();
        }

        // Soft/hard breaks
        Event::SoftBreak => {
            state.spans.push(Span::Text(" ".to_string()));
        }
        Event::HardBreak => {
            state.spans.push(Span::LineBreak);
        }

        // Images keep only their alt text, which arrives as text events
        Event::Start(Tag::Image { .. }) | Event::End(TagEnd::Image) => {}

        // Rules and footnotes carry no text
        _ => {}
    }
}

fn heading_level_to_u8(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_default(markdown: &str) -> Vec<Block> {
        parse(markdown, &ParseConfig::default())
    }

    fn text(value: &str) -> Span {
        Span::text(value)
    }

    #[test]
    fn heading_and_paragraph() {
        assert_eq!(
            parse_default("## Title\n\nHello world"),
            vec![
                Block::Heading {
                    level: 2,
                    content: vec![text("Title")],
                },
                Block::paragraph(vec![text("Hello world")]),
            ]
        );
    }

    #[test]
    fn nested_inline_spans() {
        assert_eq!(
            parse_default("a **b *c* ~~d~~** [e](http://x.io)"),
            vec![Block::paragraph(vec![
                text("a "),
                Span::Strong(vec![
                    text("b "),
                    Span::Emphasis(vec![text("c")]),
                    text(" "),
                    Span::Strike(vec![text("d")]),
                ]),
                text(" "),
                Span::Link {
                    href: "http://x.io".into(),
                    content: vec![text("e")],
                },
            ])]
        );
    }

    #[test]
    fn tight_list_items_get_paragraphs() {
        assert_eq!(
            parse_default("- one\n  - two\n- three"),
            vec![Block::List(List {
                ordered: false,
                start: None,
                items: vec![
                    ListItem {
                        blocks: vec![
                            Block::paragraph(vec![text("one")]),
                            Block::List(List {
                                ordered: false,
                                start: None,
                                items: vec![ListItem {
                                    blocks: vec![Block::paragraph(vec![text("two")])],
                                }],
                            }),
                        ],
                    },
                    ListItem {
                        blocks: vec![Block::paragraph(vec![text("three")])],
                    },
                ],
            })]
        );
    }

    #[test]
    fn ordered_list_start() {
        let blocks = parse_default("3. c\n4. d");
        let Block::List(list) = &blocks[0] else {
            panic!("expected list, got {blocks:?}");
        };
        assert!(list.ordered);
        assert_eq!(list.start, Some(3));
        assert_eq!(list.items.len(), 2);
    }

    #[test]
    fn blockquote_nesting() {
        assert_eq!(
            parse_default("> outer\n>\n> > inner"),
            vec![Block::Blockquote {
                blocks: vec![
                    Block::paragraph(vec![text("outer")]),
                    Block::Blockquote {
                        blocks: vec![Block::paragraph(vec![text("inner")])],
                    },
                ],
            }]
        );
    }

    #[test]
    fn breaks_and_code() {
        assert_eq!(
            parse_default("one\ntwo  \nthree `x`"),
            vec![Block::paragraph(vec![
                text("one"),
                text(" "),
                text("two"),
                Span::LineBreak,
                text("three "),
                Span::Code("x".into()),
            ])]
        );
    }

    #[test]
    fn images_keep_alt_text() {
        assert_eq!(
            parse_default("see ![a cat](cat.png) here"),
            vec![Block::paragraph(vec![
                text("see "),
                text("a cat"),
                text(" here"),
            ])]
        );
    }

    #[test]
    fn code_block_lines() {
        assert_eq!(
            parse_default("```\nlet a;\n\nlet b;\n```"),
            vec![
                Block::paragraph(vec![Span::Code("let a;".into())]),
                Block::paragraph(vec![Span::Code("let b;".into())]),
            ]
        );
    }

    #[test]
    fn frontmatter_is_stripped() {
        let blocks = parse_default("---\ntitle: x\n---\n\nBody");
        assert_eq!(blocks, vec![Block::paragraph(vec![text("Body")])]);

        let kept = parse(
            "---\ntitle: x\n---\n\nBody",
            &ParseConfig {
                strip_frontmatter: false,
            },
        );
        assert_ne!(kept, blocks);
    }

    #[test]
    fn empty_input() {
        assert!(parse_default("").is_empty());
        assert!(parse_default("   \n\n").is_empty());
    }
}
