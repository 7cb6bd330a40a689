/// Inline text spans with formatting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    Text(String),
    Emphasis(Vec<Span>),
    Strong(Vec<Span>),
    Strike(Vec<Span>),
    Code(String),
    Link { href: String, content: Vec<Span> },
    LineBreak,
}

impl Span {
    pub fn text(value: impl Into<String>) -> Self {
        Span::Text(value.into())
    }
}

/// A single list item, which owns the blocks nested inside it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListItem {
    pub blocks: Vec<Block>,
}

/// A list (ordered or unordered)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct List {
    pub ordered: bool,
    /// First number of an ordered list, when the source spelled one out.
    pub start: Option<u64>,
    pub items: Vec<ListItem>,
}

/// Block-level elements parsed from Markdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph {
        content: Vec<Span>,
    },
    Heading {
        level: u8,
        content: Vec<Span>,
    },
    List(List),
    /// An item outside of any list. Only hand-built trees produce these; the
    /// encoder treats the contents as top-level paragraphs.
    ListItem(ListItem),
    Blockquote {
        blocks: Vec<Block>,
    },
}

impl Block {
    pub fn paragraph(content: Vec<Span>) -> Self {
        Block::Paragraph { content }
    }
}
