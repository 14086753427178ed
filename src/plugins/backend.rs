//! Plugin interfaces: parsers, sinks, and the registry that resolves them.
//!
//! The converter never inspects a plugin's internals. It asks a
//! [`FormatRegistry`] for a [`Parser`] and a [`SinkFactory`] keyed by
//! [`Format`], then drives the parser with the sink as event consumer.
//!
//! The production registry is
//! [`BuiltinRegistry`](super::registry::BuiltinRegistry).

use super::events::Event;
use crate::format::Format;
use crate::macros::MacroInvocation;
use encoding_rs::Encoding;
use std::fmt;
use std::io::{self, BufRead, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("malformed XML: {0}")]
    Xml(String),
}

impl From<quick_xml::Error> for ParseError {
    fn from(err: quick_xml::Error) -> Self {
        ParseError::Xml(err.to_string())
    }
}

/// Which half of a conversion a component serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Parser,
    Sink,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Parser => f.write_str("parser"),
            Role::Sink => f.write_str("sink"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no {role} available for format {format}")]
pub struct ComponentUnavailable {
    pub format: Format,
    pub role: Role,
}

/// Consumer of structural events that writes a target format.
///
/// `flush` and `close` are idempotent and safe to call after an error.
pub trait Sink {
    fn event(&mut self, event: &Event) -> io::Result<()>;

    /// Emit text verbatim, without escaping.
    fn raw_text(&mut self, text: &str) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;
}

/// A sink that also accepts macro invocations raised by a parser.
pub trait MacroSink: Sink {
    fn execute_macro(&mut self, invocation: &MacroInvocation) -> io::Result<()>;
}

/// Turns decoded document text into events.
pub trait Parser {
    fn name(&self) -> &'static str;

    /// XML parsers get their input decoded by an XML-aware reader that
    /// honors the document's own declaration.
    fn is_xml(&self) -> bool {
        false
    }

    fn parse(&self, reader: &mut dyn BufRead, sink: &mut dyn MacroSink) -> Result<(), ParseError>;
}

/// Creates sinks bound to an output stream and encoding.
pub trait SinkFactory {
    fn name(&self) -> &'static str;

    fn create_sink<'w>(
        &self,
        out: Box<dyn Write + 'w>,
        encoding: &'static Encoding,
    ) -> io::Result<Box<dyn Sink + 'w>>;
}

/// Resolves formats to plugin components.
pub trait FormatRegistry {
    fn resolve_parser(&self, format: Format) -> Result<Box<dyn Parser>, ComponentUnavailable>;

    fn resolve_sink_factory(
        &self,
        format: Format,
    ) -> Result<Box<dyn SinkFactory>, ComponentUnavailable>;
}

/// Read the whole input as text.
pub(crate) fn read_all(reader: &mut dyn BufRead) -> io::Result<String> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    Ok(text)
}
