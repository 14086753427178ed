//! XHTML5 and XDOC sinks.
//!
//! Title and author are buffered until the first body event so they can be
//! written into `<head>` (XHTML5) or `<properties>` (XDOC). XDOC turns level 1
//! and 2 headings into nested `<section>` / `<subsection>` elements, which stay
//! open until a heading of the same or a higher level arrives.

use super::backend::{Sink, SinkFactory};
use super::events::{Block, Event};
use super::writer::TextWriter;
use encoding_rs::Encoding;
use quick_xml::escape::escape;
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlFlavor {
    Xhtml5,
    Xdoc,
}

pub struct XmlSinkFactory {
    flavor: XmlFlavor,
}

impl XmlSinkFactory {
    pub fn new(flavor: XmlFlavor) -> Self {
        Self { flavor }
    }
}

impl SinkFactory for XmlSinkFactory {
    fn name(&self) -> &'static str {
        match self.flavor {
            XmlFlavor::Xhtml5 => "xhtml5",
            XmlFlavor::Xdoc => "xdoc",
        }
    }

    fn create_sink<'w>(
        &self,
        out: Box<dyn Write + 'w>,
        encoding: &'static Encoding,
    ) -> io::Result<Box<dyn Sink + 'w>> {
        Ok(Box::new(XmlSink::new(
            TextWriter::new(out, encoding),
            self.flavor,
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Title,
    Author,
    SectionName(u8),
}

pub struct XmlSink<'w> {
    out: TextWriter<'w>,
    flavor: XmlFlavor,
    title: Option<String>,
    author: Option<String>,
    body_started: bool,
    capture: Option<(Capture, String)>,
    /// Open XDOC section levels.
    sections: Vec<u8>,
}

impl<'w> XmlSink<'w> {
    pub fn new(out: TextWriter<'w>, flavor: XmlFlavor) -> Self {
        Self {
            out,
            flavor,
            title: None,
            author: None,
            body_started: false,
            capture: None,
            sections: Vec::new(),
        }
    }

    fn start_body(&mut self) -> io::Result<()> {
        if self.body_started {
            return Ok(());
        }
        self.body_started = true;
        let mut head = format!(
            "<?xml version=\"1.0\" encoding=\"{}\"?>\n",
            self.out.encoding().name()
        );
        match self.flavor {
            XmlFlavor::Xhtml5 => {
                head.push_str("<!DOCTYPE html>\n<html xmlns=\"http://www.w3.org/1999/xhtml\">\n<head>\n");
                if let Some(title) = &self.title {
                    head.push_str(&format!("<title>{}</title>\n", escape(title.as_str())));
                }
                if let Some(author) = &self.author {
                    head.push_str(&format!(
                        "<meta name=\"author\" content=\"{}\" />\n",
                        escape(author.as_str())
                    ));
                }
                head.push_str("</head>\n<body>\n");
            }
            XmlFlavor::Xdoc => {
                head.push_str("<document xmlns=\"http://maven.apache.org/XDOC/2.0\">\n<properties>\n");
                if let Some(title) = &self.title {
                    head.push_str(&format!("<title>{}</title>\n", escape(title.as_str())));
                }
                if let Some(author) = &self.author {
                    head.push_str(&format!("<author>{}</author>\n", escape(author.as_str())));
                }
                head.push_str("</properties>\n<body>\n");
            }
        }
        self.out.write_str(&head)
    }

    fn write(&mut self, markup: &str) -> io::Result<()> {
        self.start_body()?;
        self.out.write_str(markup)
    }

    fn close_sections(&mut self, level: u8) -> io::Result<()> {
        while let Some(&open) = self.sections.last() {
            if open < level {
                break;
            }
            self.sections.pop();
            let tag = if open == 1 { "section" } else { "subsection" };
            self.out.write_str(&format!("</{tag}>\n"))?;
        }
        Ok(())
    }

    fn verbatim_tag(&self) -> &'static str {
        match self.flavor {
            XmlFlavor::Xhtml5 => "pre",
            XmlFlavor::Xdoc => "source",
        }
    }

    fn start(&mut self, block: &Block) -> io::Result<()> {
        // Markup inside a captured name has no place in an attribute.
        if self.capture.is_some() && block.is_inline() {
            return Ok(());
        }
        match block {
            Block::Title => {
                self.capture = Some((Capture::Title, String::new()));
                Ok(())
            }
            Block::Author => {
                self.capture = Some((Capture::Author, String::new()));
                Ok(())
            }
            Block::Heading(level) if self.flavor == XmlFlavor::Xdoc && *level <= 2 => {
                self.start_body()?;
                self.capture = Some((Capture::SectionName(*level), String::new()));
                Ok(())
            }
            Block::Heading(level) => self.write(&format!("<h{level}>")),
            Block::Paragraph => self.write("<p>"),
            Block::List => self.write("<ul>\n"),
            Block::NumberedList => self.write("<ol>\n"),
            Block::ListItem => self.write("<li>"),
            Block::Verbatim => {
                let tag = self.verbatim_tag();
                self.write(&format!("<{tag}>"))
            }
            Block::Emphasis => self.write("<em>"),
            Block::Strong => self.write("<strong>"),
            Block::Monospace => self.write("<code>"),
            Block::Link(href) => self.write(&format!("<a href=\"{}\">", escape(href.as_str()))),
        }
    }

    fn end(&mut self, block: &Block) -> io::Result<()> {
        if self.capture.is_some() && block.is_inline() {
            return Ok(());
        }
        match block {
            Block::Title | Block::Author => {
                if let Some((capture, text)) = self.capture.take() {
                    let text = Some(text.trim().to_string());
                    match capture {
                        Capture::Title => self.title = text,
                        Capture::Author => self.author = text,
                        Capture::SectionName(_) => {}
                    }
                }
                Ok(())
            }
            Block::Heading(level) if self.flavor == XmlFlavor::Xdoc && *level <= 2 => {
                let name = match self.capture.take() {
                    Some((_, text)) => text.trim().to_string(),
                    None => String::new(),
                };
                self.close_sections(*level)?;
                self.sections.push(*level);
                let tag = if *level == 1 { "section" } else { "subsection" };
                self.out
                    .write_str(&format!("<{tag} name=\"{}\">\n", escape(name.as_str())))
            }
            Block::Heading(level) => self.write(&format!("</h{level}>\n")),
            Block::Paragraph => self.write("</p>\n"),
            Block::List => self.write("</ul>\n"),
            Block::NumberedList => self.write("</ol>\n"),
            Block::ListItem => self.write("</li>\n"),
            Block::Verbatim => {
                let tag = self.verbatim_tag();
                self.write(&format!("</{tag}>\n"))
            }
            Block::Emphasis => self.write("</em>"),
            Block::Strong => self.write("</strong>"),
            Block::Monospace => self.write("</code>"),
            Block::Link(_) => self.write("</a>"),
        }
    }
}

impl Sink for XmlSink<'_> {
    fn event(&mut self, event: &Event) -> io::Result<()> {
        match event {
            Event::Start(block) => self.start(block),
            Event::End(block) => self.end(block),
            Event::Text(text) => match self.capture.as_mut() {
                Some((_, captured)) => {
                    captured.push_str(text);
                    Ok(())
                }
                None => self.write(&escape(text.as_str())),
            },
            Event::LineBreak => self.write("<br />"),
            Event::HorizontalRule => self.write("<hr />\n"),
        }
    }

    fn raw_text(&mut self, text: &str) -> io::Result<()> {
        self.write(text)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        if self.out.is_closed() {
            return Ok(());
        }
        self.start_body()?;
        self.close_sections(1)?;
        let tail = match self.flavor {
            XmlFlavor::Xhtml5 => "</body>\n</html>\n",
            XmlFlavor::Xdoc => "</body>\n</document>\n",
        };
        self.out.write_str(tail)?;
        self.out.close()
    }
}
