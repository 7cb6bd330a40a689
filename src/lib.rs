mod block;
mod config;
mod decode;
mod encode;
mod error;
mod offsets;
mod parser;
mod runs;
mod styled;

pub use block::{Block, List, ListItem, Span};
pub use config::{Config, DecodeConfig, ParseConfig, RunsConfig};
pub use decode::{decode, decode_with_config};
pub use encode::encode;
pub use error::{InvalidRangeError, InvalidRangeKind};
pub use runs::{MONOSPACE_FONTS, RunStyle, TextRun, is_monospace};
pub use styled::{
    LINE_BREAK, ListKind, PARAGRAPH_SEPARATOR, ParagraphRecord, StyleKind, StyleRange, StyledText,
    paragraphs_from_text,
};

/// Parse markdown text into a vector of blocks.
pub fn parse(markdown: &str) -> Vec<Block> {
    parse_with_config(markdown, &ParseConfig::default())
}

/// Parse markdown text into a vector of blocks with custom parse settings.
pub fn parse_with_config(markdown: &str, config: &ParseConfig) -> Vec<Block> {
    parser::parse(markdown, config)
}

/// Convert markdown to flat styled text.
pub fn markdown_to_styled(markdown: &str) -> StyledText {
    encode(&parse(markdown))
}

/// Convert markdown to flat styled text with custom parse settings.
pub fn markdown_to_styled_with_config(markdown: &str, config: &Config) -> StyledText {
    encode(&parse_with_config(markdown, &config.parse))
}

/// Convert flat styled text to markdown.
pub fn styled_to_markdown(styled: &StyledText) -> Result<String, InvalidRangeError> {
    styled.to_markdown()
}

/// Convert flat styled text to markdown with custom decode settings.
pub fn styled_to_markdown_with_config(
    styled: &StyledText,
    config: &Config,
) -> Result<String, InvalidRangeError> {
    decode_with_config(
        &styled.text,
        &styled.paragraphs,
        &styled.styles,
        &config.decode,
    )
}
