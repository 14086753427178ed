//! XML parsers for XHTML5, XDOC and FML (via `quick-xml`).
//!
//! All three dialects share one walker. Each element is classified into an
//! [`Action`] and unknown elements are transparent containers. Text directly
//! inside a container is wrapped in an implicit paragraph, and whitespace is
//! collapsed everywhere except in verbatim blocks.
//!
//! | Element | XHTML5 | XDOC | FML |
//! |---------|--------|------|-----|
//! | document title | `<title>` | `<properties><title>` | `<faqs title="">` |
//! | author | `<meta name="author">` | `<properties><author>` | |
//! | headings | `<h1>`..`<h6>` | `<section name="">`, `<subsection name="">` | `<part><title>`, `<question>` |
//! | verbatim | `<pre>` | `<source>`, `<pre>` | `<pre>` |
//! | macros | `<!-- MACRO{..} -->` | `<macro name=""><param name="" value=""/></macro>` | comment form |

use super::backend::{read_all, MacroSink, ParseError, Parser};
use super::events::{heading_level, Block, Event};
use crate::macros::{MacroFormatter, MacroInvocation};
use quick_xml::events::{BytesStart, Event as Xml};
use quick_xml::Reader;
use std::io::{self, BufRead};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Xhtml5,
    Xdoc,
    Fml,
}

pub struct XmlParser {
    dialect: Dialect,
}

impl XmlParser {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }
}

impl Parser for XmlParser {
    fn name(&self) -> &'static str {
        match self.dialect {
            Dialect::Xhtml5 => "xhtml5",
            Dialect::Xdoc => "xdoc",
            Dialect::Fml => "fml",
        }
    }

    fn is_xml(&self) -> bool {
        true
    }

    fn parse(&self, reader: &mut dyn BufRead, sink: &mut dyn MacroSink) -> Result<(), ParseError> {
        let text = read_all(reader)?;
        let mut xml = Reader::from_str(&text);
        let mut walker = Walker::new(self.dialect, sink);
        loop {
            match xml.read_event()? {
                Xml::Start(e) => walker.open(&e, false)?,
                Xml::Empty(e) => walker.open(&e, true)?,
                Xml::End(_) => walker.close()?,
                Xml::Text(t) => {
                    let raw = String::from_utf8_lossy(&t);
                    let text = quick_xml::escape::unescape(&raw)
                        .map(|t| t.into_owned())
                        .unwrap_or_else(|_| raw.to_string());
                    walker.text(&text)?;
                }
                Xml::CData(c) => walker.text(&String::from_utf8_lossy(&c))?,
                Xml::Comment(c) => walker.comment(&String::from_utf8_lossy(&c))?,
                Xml::Eof => break,
                _ => {}
            }
        }
        walker.finish()?;
        Ok(())
    }
}

/// What an element means for the event stream.
#[derive(Debug, Clone, PartialEq)]
enum Action {
    /// Transparent; closes any implicit paragraph at both ends.
    Container,
    /// Element with no effect on its surroundings once handled.
    Inert,
    /// Element and everything inside it is ignored.
    Skip,
    Block(Block),
    /// Heading whose text is an attribute (XDOC sections).
    Section(u8, String),
    /// Document title given as an attribute (FML `<faqs>`).
    TitleAttribute(String),
    Author(String),
    Break,
    Rule,
    Macro(String),
    Param(String, String),
}

fn classify(dialect: Dialect, name: &str, e: &BytesStart<'_>) -> Action {
    match (dialect, name) {
        (Dialect::Xdoc, "section") => Action::Section(1, attribute(e, "name").unwrap_or_default()),
        (Dialect::Xdoc, "subsection") => {
            Action::Section(2, attribute(e, "name").unwrap_or_default())
        }
        (Dialect::Xdoc, "source") => Action::Block(Block::Verbatim),
        (Dialect::Xdoc, "macro") => Action::Macro(attribute(e, "name").unwrap_or_default()),
        (Dialect::Xdoc, "param") => Action::Param(
            attribute(e, "name").unwrap_or_default(),
            attribute(e, "value").unwrap_or_default(),
        ),
        (Dialect::Fml, "faqs") => match attribute(e, "title") {
            Some(title) => Action::TitleAttribute(title),
            None => Action::Container,
        },
        (Dialect::Fml, "title") => Action::Block(Block::Heading(1)),
        (Dialect::Fml, "question") => Action::Block(Block::Heading(2)),
        (_, "title") => Action::Block(Block::Title),
        (_, "author") => Action::Block(Block::Author),
        (_, "meta") => match attribute(e, "name") {
            Some(n) if n.eq_ignore_ascii_case("author") => {
                Action::Author(attribute(e, "content").unwrap_or_default())
            }
            _ => Action::Inert,
        },
        (_, "p") => Action::Block(Block::Paragraph),
        (_, "ul") => Action::Block(Block::List),
        (_, "ol") => Action::Block(Block::NumberedList),
        (_, "li") => Action::Block(Block::ListItem),
        (_, "pre") => Action::Block(Block::Verbatim),
        (_, "em" | "i") => Action::Block(Block::Emphasis),
        (_, "strong" | "b") => Action::Block(Block::Strong),
        (_, "code" | "tt" | "kbd" | "samp") => Action::Block(Block::Monospace),
        (_, "a") => match attribute(e, "href") {
            Some(href) => Action::Block(Block::Link(href)),
            None => Action::Inert,
        },
        (_, "br") => Action::Break,
        (_, "hr") => Action::Rule,
        (_, "script" | "style" | "link") => Action::Skip,
        (_, h) if h.len() == 2 && h.starts_with('h') => match h[1..].parse::<usize>() {
            Ok(level @ 1..=6) => Action::Block(Block::Heading(heading_level(level))),
            _ => Action::Container,
        },
        _ => Action::Container,
    }
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name.as_bytes())
        .map(|a| match a.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
        })
}

struct Walker<'s> {
    dialect: Dialect,
    sink: &'s mut dyn MacroSink,
    stack: Vec<Action>,
    /// Collapsed text not yet emitted.
    pending: String,
    /// Open blocks that accept text.
    text_depth: usize,
    verbatim: usize,
    skip: usize,
    implicit: bool,
    /// Nothing emitted since the innermost block opened.
    block_start: bool,
    macro_call: Option<MacroInvocation>,
}

impl<'s> Walker<'s> {
    fn new(dialect: Dialect, sink: &'s mut dyn MacroSink) -> Self {
        Self {
            dialect,
            sink,
            stack: Vec::new(),
            pending: String::new(),
            text_depth: 0,
            verbatim: 0,
            skip: 0,
            implicit: false,
            block_start: true,
            macro_call: None,
        }
    }

    fn emit(&mut self, event: Event) -> io::Result<()> {
        self.sink.event(&event)
    }

    fn flush_text(&mut self, trim_end: bool) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        let mut text = pending.as_str();
        if self.verbatim == 0 {
            if self.block_start {
                text = text.trim_start();
            }
            if trim_end {
                text = text.trim_end();
            }
        }
        if !text.is_empty() {
            self.block_start = false;
            self.sink.event(&Event::text(text))?;
        }
        Ok(())
    }

    fn text(&mut self, text: &str) -> io::Result<()> {
        if self.skip > 0 || self.macro_call.is_some() {
            return Ok(());
        }
        if self.verbatim > 0 {
            self.pending.push_str(text);
            return Ok(());
        }
        if self.text_depth == 0 && !self.implicit {
            if text.trim().is_empty() {
                return Ok(());
            }
            self.ensure_paragraph()?;
        }
        for c in text.chars() {
            if c.is_whitespace() {
                if !self.pending.ends_with(' ') {
                    self.pending.push(' ');
                }
            } else {
                self.pending.push(c);
            }
        }
        Ok(())
    }

    fn ensure_paragraph(&mut self) -> io::Result<()> {
        if self.text_depth == 0 && !self.implicit {
            self.emit(Event::Start(Block::Paragraph))?;
            self.implicit = true;
            self.block_start = true;
        }
        Ok(())
    }

    fn end_implicit(&mut self) -> io::Result<()> {
        if self.implicit {
            self.flush_text(true)?;
            self.emit(Event::End(Block::Paragraph))?;
            self.implicit = false;
            self.block_start = true;
        }
        Ok(())
    }

    fn open(&mut self, e: &BytesStart<'_>, empty: bool) -> io::Result<()> {
        if self.skip > 0 {
            if !empty {
                self.skip += 1;
                self.stack.push(Action::Skip);
            }
            return Ok(());
        }
        let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
        let mut action = classify(self.dialect, &name, e);
        if self.verbatim > 0 && matches!(action, Action::Block(Block::Monospace)) {
            action = Action::Inert;
        }

        match &action {
            Action::Skip => {
                if !empty {
                    self.skip += 1;
                }
            }
            Action::Container => self.end_implicit()?,
            Action::Inert => {}
            Action::Block(block) if block.is_inline() => {
                self.ensure_paragraph()?;
                self.flush_text(false)?;
                self.start_block(block.clone())?;
            }
            Action::Block(block) => {
                self.end_implicit()?;
                self.flush_text(true)?;
                self.start_block(block.clone())?;
            }
            Action::Section(level, name) => {
                self.end_implicit()?;
                self.flush_text(true)?;
                let heading = Block::Heading(*level);
                self.emit(Event::Start(heading.clone()))?;
                self.emit(Event::text(name.trim()))?;
                self.emit(Event::End(heading))?;
                self.block_start = true;
            }
            Action::TitleAttribute(title) => {
                self.emit(Event::Start(Block::Title))?;
                self.emit(Event::text(title.trim()))?;
                self.emit(Event::End(Block::Title))?;
            }
            Action::Author(author) => {
                self.emit(Event::Start(Block::Author))?;
                self.emit(Event::text(author.trim()))?;
                self.emit(Event::End(Block::Author))?;
            }
            Action::Break => {
                if self.text_depth > 0 || self.implicit {
                    self.flush_text(false)?;
                    self.emit(Event::LineBreak)?;
                    self.block_start = true;
                }
            }
            Action::Rule => {
                self.end_implicit()?;
                self.flush_text(true)?;
                self.emit(Event::HorizontalRule)?;
            }
            Action::Macro(name) => {
                self.end_implicit()?;
                self.flush_text(true)?;
                self.macro_call = Some(MacroInvocation::new(name.trim()));
            }
            Action::Param(key, value) => {
                if let Some(call) = self.macro_call.as_mut() {
                    call.parameters.push((key.clone(), value.clone()));
                }
            }
        }

        if empty {
            self.stack.push(action);
            self.close()
        } else {
            self.stack.push(action);
            Ok(())
        }
    }

    fn start_block(&mut self, block: Block) -> io::Result<()> {
        if block == Block::Verbatim {
            self.verbatim += 1;
        }
        self.text_depth += 1;
        self.emit(Event::Start(block))?;
        self.block_start = true;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let Some(action) = self.stack.pop() else {
            return Ok(());
        };
        match action {
            Action::Skip => self.skip = self.skip.saturating_sub(1),
            Action::Container | Action::Section(..) | Action::TitleAttribute(_) => {
                self.end_implicit()?
            }
            Action::Block(block) => {
                let inline = block.is_inline();
                self.flush_text(!inline)?;
                if block == Block::Verbatim {
                    self.verbatim = self.verbatim.saturating_sub(1);
                }
                self.text_depth = self.text_depth.saturating_sub(1);
                self.emit(Event::End(block))?;
                if !inline {
                    self.block_start = true;
                }
            }
            Action::Macro(_) => {
                if let Some(call) = self.macro_call.take() {
                    self.sink.execute_macro(&call)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn comment(&mut self, content: &str) -> io::Result<()> {
        if self.skip > 0 {
            return Ok(());
        }
        let normalized = format!("<!-- {} -->", content.trim());
        if let Some(call) = MacroFormatter::COMMENT.parse(&normalized) {
            if self.text_depth == 0 {
                self.end_implicit()?;
            }
            self.flush_text(false)?;
            self.sink.execute_macro(&call)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        while !self.stack.is_empty() {
            self.close()?;
        }
        self.end_implicit()?;
        self.flush_text(true)
    }
}
