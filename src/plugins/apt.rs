//! APT ("Almost Plain Text") parser and sink.
//!
//! ```text
//!  -----
//!  Document title
//!  -----
//!  Author
//!  -----
//!
//! Section title                  (column 0; `*` prefixes add levels)
//!
//!  Indented paragraph with <em>, <<strong>>, <<<mono>>> and
//!  {{{https://example.com}links}}. A trailing backslash forces a break.\
//!
//!  * bullet item
//!
//!  [[1]] numbered item
//!
//! +--
//! verbatim
//! +--
//!
//! =====
//!
//! %{toc|section=1}
//! ```

use super::backend::{read_all, MacroSink, ParseError, Parser, Sink, SinkFactory};
use super::events::{heading_level, Block, Event};
use super::writer::TextWriter;
use crate::macros::MacroFormatter;
use encoding_rs::Encoding;
use std::io::{self, BufRead, Write};

// ============================================================================
// Parser
// ============================================================================

pub struct AptParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Bullet,
    Numbered,
}

impl ListKind {
    fn block(self) -> Block {
        match self {
            ListKind::Bullet => Block::List,
            ListKind::Numbered => Block::NumberedList,
        }
    }
}

impl Parser for AptParser {
    fn name(&self) -> &'static str {
        "apt"
    }

    fn parse(&self, reader: &mut dyn BufRead, sink: &mut dyn MacroSink) -> Result<(), ParseError> {
        let text = read_all(reader)?;
        let lines: Vec<&str> = text.lines().collect();
        let mut pos = parse_header(&lines, sink)?;
        let mut list: Option<ListKind> = None;

        while pos < lines.len() {
            let line = lines[pos];
            let trimmed = line.trim();
            if trimmed.is_empty() {
                pos += 1;
                continue;
            }

            let indented = line.starts_with(char::is_whitespace);
            let item = if indented { list_item(trimmed) } else { None };
            if let Some(kind) = list {
                if item.map(|(k, _)| k) != Some(kind) {
                    sink.event(&Event::End(kind.block()))?;
                    list = None;
                }
            }

            if trimmed.starts_with("+--") {
                let start = pos;
                let mut body = Vec::new();
                pos += 1;
                loop {
                    match lines.get(pos) {
                        Some(l) if l.trim().starts_with("+--") => break,
                        Some(l) => body.push(*l),
                        None => {
                            return Err(ParseError::Syntax {
                                line: start + 1,
                                message: "unterminated verbatim block".into(),
                            });
                        }
                    }
                    pos += 1;
                }
                pos += 1;
                sink.event(&Event::Start(Block::Verbatim))?;
                sink.event(&Event::Text(body.join("\n")))?;
                sink.event(&Event::End(Block::Verbatim))?;
            } else if is_rule(trimmed) {
                sink.event(&Event::HorizontalRule)?;
                pos += 1;
            } else if let Some(invocation) = macro_line(trimmed) {
                sink.execute_macro(&invocation)?;
                pos += 1;
            } else if trimmed == "[]" {
                pos += 1;
            } else if !indented {
                let level = trimmed.chars().take_while(|c| *c == '*').count() + 1;
                let title = trimmed.trim_start_matches('*').trim();
                let block = Block::Heading(heading_level(level));
                sink.event(&Event::Start(block.clone()))?;
                emit_inline(title, sink)?;
                sink.event(&Event::End(block))?;
                pos += 1;
            } else if let Some((kind, first)) = item {
                if list.is_none() {
                    sink.event(&Event::Start(kind.block()))?;
                    list = Some(kind);
                }
                let mut text = first.to_string();
                pos += 1;
                while let Some(next) = lines.get(pos) {
                    if !continues_block(next) {
                        break;
                    }
                    text.push('\n');
                    text.push_str(next.trim());
                    pos += 1;
                }
                sink.event(&Event::Start(Block::ListItem))?;
                emit_inline(&text, sink)?;
                sink.event(&Event::End(Block::ListItem))?;
            } else {
                let mut text = trimmed.to_string();
                pos += 1;
                while let Some(next) = lines.get(pos) {
                    if !continues_block(next) {
                        break;
                    }
                    text.push('\n');
                    text.push_str(next.trim());
                    pos += 1;
                }
                sink.event(&Event::Start(Block::Paragraph))?;
                emit_inline(&text, sink)?;
                sink.event(&Event::End(Block::Paragraph))?;
            }
        }

        if let Some(kind) = list {
            sink.event(&Event::End(kind.block()))?;
        }
        Ok(())
    }
}

/// Title and author fields between dashed lines at the top of the file.
fn parse_header(lines: &[&str], sink: &mut dyn MacroSink) -> Result<usize, ParseError> {
    let Some(start) = lines.iter().position(|l| !l.trim().is_empty()) else {
        return Ok(lines.len());
    };
    if !is_dash_line(lines[start].trim()) {
        return Ok(start);
    }

    let mut fields: Vec<Vec<&str>> = vec![Vec::new()];
    let mut pos = start + 1;
    while let Some(line) = lines.get(pos) {
        let t = line.trim();
        if t.is_empty() {
            break;
        }
        if is_dash_line(t) {
            fields.push(Vec::new());
        } else if let Some(field) = fields.last_mut() {
            field.push(t);
        }
        pos += 1;
    }

    for (block, field) in [Block::Title, Block::Author].into_iter().zip(&fields) {
        if field.is_empty() {
            continue;
        }
        sink.event(&Event::Start(block.clone()))?;
        sink.event(&Event::Text(field.join(" ")))?;
        sink.event(&Event::End(block))?;
    }
    Ok(pos)
}

fn is_dash_line(t: &str) -> bool {
    t.len() >= 3 && t.chars().all(|c| c == '-')
}

fn is_rule(t: &str) -> bool {
    t.len() >= 3 && t.chars().all(|c| c == '=')
}

fn macro_line(t: &str) -> Option<crate::macros::MacroInvocation> {
    if t.starts_with("%{") {
        MacroFormatter::APT.parse(t)
    } else {
        None
    }
}

fn list_item(t: &str) -> Option<(ListKind, &str)> {
    if t == "*" {
        return Some((ListKind::Bullet, ""));
    }
    if let Some(rest) = t.strip_prefix("* ") {
        return Some((ListKind::Bullet, rest.trim()));
    }
    let rest = t.strip_prefix("[[")?;
    let (_, text) = rest.split_once("]]")?;
    Some((ListKind::Numbered, text.trim()))
}

/// True if `line` continues the current paragraph or list item.
fn continues_block(line: &str) -> bool {
    let t = line.trim();
    !t.is_empty()
        && line.starts_with(char::is_whitespace)
        && list_item(t).is_none()
        && !t.starts_with("+--")
        && !is_rule(t)
        && macro_line(t).is_none()
        && t != "[]"
}

fn emit_inline(text: &str, sink: &mut dyn MacroSink) -> io::Result<()> {
    let mut events = Vec::new();
    inline_events(text, &mut events);
    for event in &events {
        sink.event(event)?;
    }
    Ok(())
}

/// Split inline markup into events. Newlines become spaces unless escaped
/// by a trailing backslash, which forces a line break.
fn inline_events(text: &str, out: &mut Vec<Event>) {
    let mut plain = String::new();
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        if c == '\\' {
            let after = &rest[1..];
            match after.chars().next() {
                Some('\n') => {
                    flush_plain(&mut plain, out);
                    out.push(Event::LineBreak);
                    rest = &after[1..];
                }
                Some(next) => {
                    plain.push(next);
                    rest = &after[next.len_utf8()..];
                }
                None => rest = after,
            }
            continue;
        }
        if c == '\n' {
            plain.push(' ');
            rest = &rest[1..];
            continue;
        }
        if let Some((block, inner, consumed)) = markup(rest) {
            flush_plain(&mut plain, out);
            out.push(Event::Start(block.clone()));
            if block == Block::Monospace {
                out.push(Event::Text(inner.to_string()));
            } else {
                inline_events(inner, out);
            }
            out.push(Event::End(block));
            rest = &rest[consumed..];
            continue;
        }
        plain.push(c);
        rest = &rest[c.len_utf8()..];
    }
    flush_plain(&mut plain, out);
}

fn flush_plain(plain: &mut String, out: &mut Vec<Event>) {
    if !plain.is_empty() {
        out.push(Event::Text(std::mem::take(plain)));
    }
}

/// Recognize inline markup at the start of `s`.
/// Returns the block, its inner text, and the bytes consumed.
fn markup(s: &str) -> Option<(Block, &str, usize)> {
    if let Some(body) = s.strip_prefix("{{{") {
        let href_end = find_closing(body, "}")?;
        let after = &body[href_end + 1..];
        let text_end = find_closing(after, "}}")?;
        let href = unescape(&body[..href_end]);
        return Some((
            Block::Link(href),
            &after[..text_end],
            3 + href_end + 1 + text_end + 2,
        ));
    }
    if let Some(body) = s.strip_prefix("{{") {
        let end = find_closing(body, "}}")?;
        let inner = &body[..end];
        return Some((Block::Link(unescape(inner)), inner, 2 + end + 2));
    }
    let delimiters = [
        ("<<<", ">>>", Block::Monospace),
        ("<<", ">>", Block::Strong),
        ("<", ">", Block::Emphasis),
    ];
    for (open, close, block) in delimiters {
        if let Some(body) = s.strip_prefix(open) {
            if let Some(end) = find_closing(body, close) {
                if end > 0 {
                    return Some((block, &body[..end], open.len() + end + close.len()));
                }
            }
        }
    }
    None
}

fn find_closing(s: &str, close: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if s[i..].starts_with(close) {
            return Some(i);
        }
    }
    None
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

// ============================================================================
// Sink
// ============================================================================

pub struct AptSinkFactory;

impl SinkFactory for AptSinkFactory {
    fn name(&self) -> &'static str {
        "apt"
    }

    fn create_sink<'w>(
        &self,
        out: Box<dyn Write + 'w>,
        encoding: &'static Encoding,
    ) -> io::Result<Box<dyn Sink + 'w>> {
        Ok(Box::new(AptSink::new(TextWriter::new(out, encoding))))
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

pub struct AptSink<'w> {
    out: TextWriter<'w>,
    title: Option<String>,
    author: Option<String>,
    header_written: bool,
    open: Open,
    buf: String,
    /// Open lists with the next item number.
    lists: Vec<(ListKind, usize)>,
    mono: usize,
}

impl<'w> AptSink<'w> {
    pub fn new(out: TextWriter<'w>) -> Self {
        Self {
            out,
            title: None,
            author: None,
            header_written: false,
            open: Open::Nothing,
            buf: String::new(),
            lists: Vec::new(),
            mono: 0,
        }
    }

    fn write_header(&mut self) -> io::Result<()> {
        if self.header_written {
            return Ok(());
        }
        self.header_written = true;
        if self.title.is_none() && self.author.is_none() {
            return Ok(());
        }
        let mut header = String::from(" -----\n");
        header.push_str(&format!(" {}\n -----\n", self.title.as_deref().unwrap_or("")));
        if let Some(author) = &self.author {
            header.push_str(&format!(" {author}\n -----\n"));
        }
        header.push('\n');
        self.out.write_str(&header)
    }

    fn begin(&mut self, open: Open) -> io::Result<()> {
        self.finish()?;
        if !matches!(open, Open::Title | Open::Author) {
            self.write_header()?;
        }
        self.open = open;
        self.buf.clear();
        Ok(())
    }

    /// Write out the open block, if any.
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
                let text = text.trim();
                if text.is_empty() {
                    return Ok(());
                }
                let stars = "*".repeat(usize::from(level.saturating_sub(1)));
                self.out.write_str(&format!("{stars}{}\n\n", guard_leading(text)))
            }
            Open::Paragraph => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(());
                }
                self.out.write_str(&format!(" {}\n\n", guard_leading(text)))
            }
            Open::Item => {
                let depth = self.lists.len().max(1);
                let marker = match self.lists.last_mut() {
                    Some((ListKind::Numbered, n)) => {
                        *n += 1;
                        format!("[[{n}]]")
                    }
                    _ => "*".to_string(),
                };
                let indent = " ".repeat(depth);
                self.out.write_str(&format!("{indent}{marker} {}\n\n", text.trim()))
            }
            Open::Verbatim => {
                let body = text.trim_end_matches('\n');
                self.out.write_str(&format!("+--\n{body}\n+--\n\n"))
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

/// Escape a leading character that would otherwise start another block.
fn guard_leading(text: &str) -> String {
    match text.chars().next() {
        Some('*' | '[' | '+' | '%' | '=' | '-') => format!("\\{text}"),
        _ => text.to_string(),
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '<' | '>' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '\n' | '\r' => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

impl Sink for AptSink<'_> {
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
                    self.write_header()?;
                    let kind = if *block == Block::List {
                        ListKind::Bullet
                    } else {
                        ListKind::Numbered
                    };
                    self.lists.push((kind, 0));
                    Ok(())
                }
                Block::ListItem => self.begin(Open::Item),
                Block::Verbatim => self.begin(Open::Verbatim),
                Block::Emphasis => self.push_markup("<"),
                Block::Strong => self.push_markup("<<"),
                Block::Monospace => {
                    self.mono += 1;
                    self.push_markup("<<<")
                }
                Block::Link(href) => self.push_markup(&format!("{{{{{{{}}}", escape(href))),
            },
            Event::End(block) => match block {
                Block::Paragraph if self.open == Open::Item => Ok(()),
                Block::List | Block::NumberedList => {
                    self.finish()?;
                    self.lists.pop();
                    Ok(())
                }
                Block::Emphasis => self.push_markup(">"),
                Block::Strong => self.push_markup(">>"),
                Block::Monospace => {
                    self.mono = self.mono.saturating_sub(1);
                    self.push_markup(">>>")
                }
                Block::Link(_) => self.push_markup("}}"),
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
                    self.push_markup("\\\n ")
                }
            }
            Event::HorizontalRule => {
                self.begin(Open::Nothing)?;
                self.out.write_str("=====\n\n")
            }
        }
    }

    fn raw_text(&mut self, text: &str) -> io::Result<()> {
        if self.open == Open::Nothing {
            self.write_header()?;
            self.out.write_str(&format!("{text}\n\n"))
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
        self.write_header()?;
        self.out.close()
    }
}
