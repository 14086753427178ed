//! Markdown parser (via `pulldown-cmark`) and sink.
//!
//! Title and author travel in YAML-style front matter:
//!
//! ```text
//! ---
//! title: User Guide
//! author: Jane Doe
//! ---
//! ```
//!
//! Macros are HTML comments of the form `<!-- MACRO{toc|section=1} -->`.

use super::backend::{read_all, MacroSink, ParseError, Parser, Sink, SinkFactory};
use super::events::{heading_level, Block, Event};
use super::writer::TextWriter;
use crate::macros::MacroFormatter;
use encoding_rs::Encoding;
use pulldown_cmark::{Event as Md, Options, Parser as CommonMark, Tag};
use std::io::{self, BufRead, Write};

pub struct MarkdownParser;

impl Parser for MarkdownParser {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn parse(&self, reader: &mut dyn BufRead, sink: &mut dyn MacroSink) -> Result<(), ParseError> {
        let text = read_all(reader)?;
        let mut options = Options::empty();
        options.insert(Options::ENABLE_YAML_STYLE_METADATA_BLOCKS);
        options.insert(Options::ENABLE_STRIKETHROUGH);

        // One entry per open tag; `None` for tags without a block equivalent.
        let mut stack: Vec<Option<Block>> = Vec::new();
        let mut metadata: Option<String> = None;
        let mut verbatim: Option<String> = None;

        for event in CommonMark::new_ext(&text, options) {
            match event {
                Md::Start(Tag::MetadataBlock(_)) => {
                    metadata = Some(String::new());
                    stack.push(None);
                }
                Md::Start(tag) => {
                    let block = block_for(&tag);
                    if let Some(block) = &block {
                        sink.event(&Event::Start(block.clone()))?;
                        if *block == Block::Verbatim {
                            verbatim = Some(String::new());
                        }
                    }
                    stack.push(block);
                }
                Md::End(_) => {
                    if let Some(front) = metadata.take() {
                        emit_front_matter(&front, sink)?;
                    }
                    if let Some(body) = verbatim.take() {
                        let body = body.strip_suffix('\n').unwrap_or(&body);
                        sink.event(&Event::text(body))?;
                    }
                    if let Some(Some(block)) = stack.pop() {
                        sink.event(&Event::End(block))?;
                    }
                }
                Md::Text(t) => match (&mut metadata, &mut verbatim) {
                    (Some(front), _) => front.push_str(&t),
                    (_, Some(body)) => body.push_str(&t),
                    _ => sink.event(&Event::text(t.as_ref()))?,
                },
                Md::Code(code) => {
                    sink.event(&Event::Start(Block::Monospace))?;
                    sink.event(&Event::text(code.as_ref()))?;
                    sink.event(&Event::End(Block::Monospace))?;
                }
                Md::Html(html) | Md::InlineHtml(html) => {
                    if let Some(invocation) = MacroFormatter::COMMENT.parse(&html) {
                        sink.execute_macro(&invocation)?;
                    } else if !html.trim_start().starts_with("<!--") {
                        sink.raw_text(&html)?;
                    }
                }
                Md::SoftBreak => sink.event(&Event::text(" "))?,
                Md::HardBreak => sink.event(&Event::LineBreak)?,
                Md::Rule => sink.event(&Event::HorizontalRule)?,
                Md::InlineMath(math) | Md::DisplayMath(math) => {
                    sink.event(&Event::text(math.as_ref()))?
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn block_for(tag: &Tag<'_>) -> Option<Block> {
    match tag {
        Tag::Paragraph => Some(Block::Paragraph),
        Tag::Heading { level, .. } => Some(Block::Heading(heading_level(*level as usize))),
        Tag::CodeBlock(_) => Some(Block::Verbatim),
        Tag::List(Some(_)) => Some(Block::NumberedList),
        Tag::List(None) => Some(Block::List),
        Tag::Item => Some(Block::ListItem),
        Tag::Emphasis => Some(Block::Emphasis),
        Tag::Strong => Some(Block::Strong),
        Tag::Link { dest_url, .. } => Some(Block::Link(dest_url.to_string())),
        _ => None,
    }
}

/// `title:` and `author:` keys become title and author blocks.
fn emit_front_matter(front: &str, sink: &mut dyn MacroSink) -> io::Result<()> {
    for line in front.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let block = match key.trim().to_ascii_lowercase().as_str() {
            "title" => Block::Title,
            "author" => Block::Author,
            _ => continue,
        };
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        sink.event(&Event::Start(block.clone()))?;
        sink.event(&Event::text(value))?;
        sink.event(&Event::End(block))?;
    }
    Ok(())
}

pub struct MarkdownSinkFactory;

impl SinkFactory for MarkdownSinkFactory {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn create_sink<'w>(
        &self,
        out: Box<dyn Write + 'w>,
        encoding: &'static Encoding,
    ) -> io::Result<Box<dyn Sink + 'w>> {
        Ok(Box::new(MarkdownSink::new(TextWriter::new(out, encoding))))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Open {
    Nothing,
    Title,
    Author,
    Heading(u8),
    Paragraph,
    Item,
    Verbatim,
}

pub struct MarkdownSink<'w> {
    out: TextWriter<'w>,
    title: Option<String>,
    author: Option<String>,
    front_matter_written: bool,
    open: Open,
    buf: String,
    /// Open lists: numbered flag and the last item number.
    lists: Vec<(bool, usize)>,
    mono: usize,
    links: Vec<String>,
}

impl<'w> MarkdownSink<'w> {
    pub fn new(out: TextWriter<'w>) -> Self {
        Self {
            out,
            title: None,
            author: None,
            front_matter_written: false,
            open: Open::Nothing,
            buf: String::new(),
            lists: Vec::new(),
            mono: 0,
            links: Vec::new(),
        }
    }

    fn write_front_matter(&mut self) -> io::Result<()> {
        if self.front_matter_written {
            return Ok(());
        }
        self.front_matter_written = true;
        if self.title.is_none() && self.author.is_none() {
            return Ok(());
        }
        let mut front = String::from("---\n");
        if let Some(title) = &self.title {
            front.push_str(&format!("title: {title}\n"));
        }
        if let Some(author) = &self.author {
            front.push_str(&format!("author: {author}\n"));
        }
        front.push_str("---\n\n");
        self.out.write_str(&front)
    }

    fn begin(&mut self, open: Open) -> io::Result<()> {
        self.finish()?;
        if !matches!(open, Open::Title | Open::Author) {
            self.write_front_matter()?;
        }
        self.open = open;
        self.buf.clear();
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        let open = std::mem::replace(&mut self.open, Open::Nothing);
        let text = std::mem::take(&mut self.buf);
        match open {
            Open::Nothing => Ok(()),
            Open::Title => {
                self.title = Some(text.trim().to_string());
                Ok(())
            }
            Open::Author => {
                self.author = Some(text.trim().to_string());
                Ok(())
            }
            Open::Heading(level) => {
                let hashes = "#".repeat(usize::from(level));
                self.out.write_str(&format!("{hashes} {}\n\n", text.trim()))
            }
            Open::Paragraph => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(());
                }
                self.out.write_str(&format!("{}\n\n", guard_leading(text)))
            }
            Open::Item => {
                let depth = self.lists.len().max(1);
                let marker = match self.lists.last_mut() {
                    Some((true, n)) => {
                        *n += 1;
                        format!("{n}.")
                    }
                    _ => "-".to_string(),
                };
                let indent = "  ".repeat(depth - 1);
                self.out.write_str(&format!("{indent}{marker} {}\n", text.trim()))
            }
            Open::Verbatim => {
                let body = text.trim_end_matches('\n');
                self.out.write_str(&format!("```\n{body}\n```\n\n"))
            }
        }
    }

    fn ensure_open(&mut self) -> io::Result<()> {
        if self.open == Open::Nothing {
            self.begin(Open::Paragraph)?;
        }
        Ok(())
    }

    fn push_markup(&mut self, markup: &str) -> io::Result<()> {
        self.ensure_open()?;
        self.buf.push_str(markup);
        Ok(())
    }
}

fn guard_leading(text: &str) -> String {
    match text.chars().next() {
        Some('#' | '-' | '+' | '=') => format!("\\{text}"),
        _ => text.to_string(),
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '`' | '*' | '_' | '[' | ']' | '<' | '>' => {
                out.push('\\');
                out.push(c);
            }
            '\n' | '\r' => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

impl Sink for MarkdownSink<'_> {
    fn event(&mut self, event: &Event) -> io::Result<()> {
        match event {
            Event::Start(block) => match block {
                Block::Title => self.begin(Open::Title),
                Block::Author => self.begin(Open::Author),
                Block::Heading(level) => self.begin(Open::Heading(*level)),
                Block::Paragraph => {
                    if self.open == Open::Item {
                        if !self.buf.is_empty() {
                            self.buf.push(' ');
                        }
                        Ok(())
                    } else {
                        self.begin(Open::Paragraph)
                    }
                }
                Block::List | Block::NumberedList => {
                    self.finish()?;
                    self.write_front_matter()?;
                    self.lists.push((*block == Block::NumberedList, 0));
                    Ok(())
                }
                Block::ListItem => self.begin(Open::Item),
                Block::Verbatim => self.begin(Open::Verbatim),
                Block::Emphasis => self.push_markup("*"),
                Block::Strong => self.push_markup("**"),
                Block::Monospace => {
                    self.mono += 1;
                    self.push_markup("`")
                }
                Block::Link(href) => {
                    self.links.push(href.clone());
                    self.push_markup("[")
                }
            },
            Event::End(block) => match block {
                Block::Paragraph if self.open == Open::Item => Ok(()),
                Block::List | Block::NumberedList => {
                    self.finish()?;
                    self.lists.pop();
                    if self.lists.is_empty() {
                        self.out.write_str("\n")?;
                    }
                    Ok(())
                }
                Block::Emphasis => self.push_markup("*"),
                Block::Strong => self.push_markup("**"),
                Block::Monospace => {
                    self.mono = self.mono.saturating_sub(1);
                    self.push_markup("`")
                }
                Block::Link(_) => {
                    let href = self.links.pop().unwrap_or_default();
                    self.push_markup(&format!("]({href})"))
                }
                _ => self.finish(),
            },
            Event::Text(text) => {
                self.ensure_open()?;
                match self.open {
                    Open::Verbatim => self.buf.push_str(text),
                    Open::Title | Open::Author => self.buf.push_str(&text.replace('\n', " ")),
                    _ if self.mono > 0 => self.buf.push_str(&text.replace('\n', " ")),
                    _ => self.buf.push_str(&escape(text)),
                }
                Ok(())
            }
            Event::LineBreak => {
                if self.open == Open::Verbatim {
                    self.buf.push('\n');
                    Ok(())
                } else {
                    self.push_markup("\\\n")
                }
            }
            Event::HorizontalRule => {
                self.begin(Open::Nothing)?;
                self.out.write_str("***\n\n")
            }
        }
    }

    fn raw_text(&mut self, text: &str) -> io::Result<()> {
        if self.open == Open::Nothing {
            self.write_front_matter()?;
            self.out.write_str(&format!("{}\n\n", text.trim_end()))
        } else {
            self.buf.push_str(text);
            Ok(())
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        if self.out.is_closed() {
            return Ok(());
        }
        self.finish()?;
        self.write_front_matter()?;
        self.out.close()
    }
}
