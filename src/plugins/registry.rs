//! The built-in [`FormatRegistry`], keyed by [`Format`].
//!
//! Constructors are plain function pointers, so every lookup hands out a
//! fresh component and the registry itself holds no plugin state.

use super::apt::{AptParser, AptSinkFactory};
use super::backend::{ComponentUnavailable, FormatRegistry, Parser, Role, SinkFactory};
use super::markdown::{MarkdownParser, MarkdownSinkFactory};
use super::xml::{Dialect, XmlParser};
use super::xml_sink::{XmlFlavor, XmlSinkFactory};
use crate::format::Format;
use std::collections::HashMap;

pub type ParserConstructor = fn() -> Box<dyn Parser>;
pub type SinkFactoryConstructor = fn() -> Box<dyn SinkFactory>;

pub struct BuiltinRegistry {
    parsers: HashMap<Format, ParserConstructor>,
    sinks: HashMap<Format, SinkFactoryConstructor>,
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinRegistry {
    /// Registry with every built-in parser and sink.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_parser(Format::Apt, || Box::new(AptParser));
        registry.register_parser(Format::Fml, || Box::new(XmlParser::new(Dialect::Fml)));
        registry.register_parser(Format::Xdoc, || Box::new(XmlParser::new(Dialect::Xdoc)));
        registry.register_parser(Format::Xhtml5, || Box::new(XmlParser::new(Dialect::Xhtml5)));
        registry.register_parser(Format::Markdown, || Box::new(MarkdownParser));

        registry.register_sink(Format::Apt, || Box::new(AptSinkFactory));
        registry.register_sink(Format::Xdoc, || Box::new(XmlSinkFactory::new(XmlFlavor::Xdoc)));
        registry.register_sink(Format::Xhtml5, || {
            Box::new(XmlSinkFactory::new(XmlFlavor::Xhtml5))
        });
        registry.register_sink(Format::Markdown, || Box::new(MarkdownSinkFactory));
        registry
    }

    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
            sinks: HashMap::new(),
        }
    }

    pub fn register_parser(&mut self, format: Format, constructor: ParserConstructor) {
        self.parsers.insert(format, constructor);
    }

    pub fn register_sink(&mut self, format: Format, constructor: SinkFactoryConstructor) {
        self.sinks.insert(format, constructor);
    }

    pub fn without_parser(mut self, format: Format) -> Self {
        self.parsers.remove(&format);
        self
    }

    pub fn without_sink(mut self, format: Format) -> Self {
        self.sinks.remove(&format);
        self
    }
}

impl FormatRegistry for BuiltinRegistry {
    fn resolve_parser(&self, format: Format) -> Result<Box<dyn Parser>, ComponentUnavailable> {
        self.parsers
            .get(&format)
            .map(|construct| construct())
            .ok_or(ComponentUnavailable {
                format,
                role: Role::Parser,
            })
    }

    fn resolve_sink_factory(
        &self,
        format: Format,
    ) -> Result<Box<dyn SinkFactory>, ComponentUnavailable> {
        self.sinks
            .get(&format)
            .map(|construct| construct())
            .ok_or(ComponentUnavailable {
                format,
                role: Role::Sink,
            })
    }
}
