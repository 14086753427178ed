//! Structural document events exchanged between parsers and sinks.

/// A structural element that is opened and closed around its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Title,
    Author,
    /// Section heading, level 1 to 6.
    Heading(u8),
    Paragraph,
    List,
    NumberedList,
    ListItem,
    /// Preformatted text; whitespace is significant.
    Verbatim,
    Emphasis,
    Strong,
    Monospace,
    Link(String),
}

impl Block {
    /// Inline blocks live inside a paragraph, heading or list item.
    pub fn is_inline(&self) -> bool {
        matches!(
            self,
            Block::Emphasis | Block::Strong | Block::Monospace | Block::Link(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start(Block),
    End(Block),
    /// Character data. Sinks escape it for their target syntax.
    Text(String),
    LineBreak,
    HorizontalRule,
}

impl Event {
    pub fn text(text: impl Into<String>) -> Self {
        Event::Text(text.into())
    }
}

/// Clamp a heading level into the supported range.
pub fn heading_level(level: usize) -> u8 {
    level.clamp(1, 6) as u8
}
