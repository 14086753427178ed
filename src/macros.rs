//! Macro invocations and their per-format textual form.
//!
//! Parsers report embedded macros (`%{toc}` in APT, `<!-- MACRO{toc} -->` in
//! Markdown and XML) as [`MacroInvocation`]s. Sinks have no macro primitive, so
//! [`FormattingMacroSink`] renders each invocation with the target format's
//! [`MacroFormatter`] and hands it to the sink as a single raw text node.
//!
//! ```text
//! APT        %{toc|section=2|fromDepth=1}
//! Markdown   <!-- MACRO{toc|section=2|fromDepth=1} -->
//! ```

use crate::format::Format;
use crate::plugins::{Event, MacroSink, Sink};
use std::io;
use tracing::debug;

/// Parameter keys used internally by macro execution, never rendered.
pub const RESERVED_PARAMETERS: [&str; 2] = ["sourceContent", "parser"];

/// A macro call found in a source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroInvocation {
    pub name: String,
    /// Parameters in source order.
    pub parameters: Vec<(String, String)>,
}

impl MacroInvocation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((key.into(), value.into()));
        self
    }

    /// Parameters without the reserved internal keys.
    pub fn visible_parameters(&self) -> impl Iterator<Item = &(String, String)> {
        self.parameters
            .iter()
            .filter(|(key, _)| !RESERVED_PARAMETERS.contains(&key.as_str()))
    }
}

/// Fixed template used to serialize macros for one output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroFormatter {
    pub prefix: &'static str,
    pub name_delimiter: &'static str,
    pub assign: &'static str,
    pub separator: &'static str,
    pub suffix: &'static str,
}

impl MacroFormatter {
    pub const APT: MacroFormatter = MacroFormatter {
        prefix: "%{",
        name_delimiter: "|",
        assign: "=",
        separator: "|",
        suffix: "}",
    };

    /// Comment form understood by the Markdown and XML parsers.
    pub const COMMENT: MacroFormatter = MacroFormatter {
        prefix: "<!-- MACRO{",
        name_delimiter: "|",
        assign: "=",
        separator: "|",
        suffix: "} -->",
    };

    pub fn for_format(format: Format) -> &'static MacroFormatter {
        match format {
            Format::Apt => &Self::APT,
            Format::Fml | Format::Xdoc | Format::Xhtml5 | Format::Markdown => &Self::COMMENT,
        }
    }

    /// Render a macro. Without visible parameters only `prefix name suffix`
    /// is produced.
    pub fn format<'p, I>(&self, name: &str, parameters: I) -> String
    where
        I: IntoIterator<Item = &'p (String, String)>,
    {
        let mut out = String::from(self.prefix);
        out.push_str(name);
        let mut first = true;
        for (key, value) in parameters {
            if RESERVED_PARAMETERS.contains(&key.as_str()) {
                continue;
            }
            out.push_str(if first { self.name_delimiter } else { self.separator });
            first = false;
            out.push_str(key);
            out.push_str(self.assign);
            out.push_str(value);
        }
        out.push_str(self.suffix);
        out
    }

    pub fn format_invocation(&self, invocation: &MacroInvocation) -> String {
        self.format(&invocation.name, &invocation.parameters)
    }

    /// Recognize a rendered macro. Surrounding whitespace is ignored.
    pub fn parse(&self, text: &str) -> Option<MacroInvocation> {
        let body = text
            .trim()
            .strip_prefix(self.prefix)?
            .strip_suffix(self.suffix)?;
        let (name, rest) = match body.split_once(self.name_delimiter) {
            Some((name, rest)) => (name, Some(rest)),
            None => (body, None),
        };
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return None;
        }
        let mut invocation = MacroInvocation::new(name);
        for pair in rest.into_iter().flat_map(|r| r.split(self.separator)) {
            if pair.trim().is_empty() {
                continue;
            }
            let (key, value) = pair.split_once(self.assign).unwrap_or((pair, ""));
            invocation = invocation.with_parameter(key.trim(), value.trim());
        }
        Some(invocation)
    }
}

/// Renders an invocation into the raw text handed to the sink.
pub type MacroRenderer<'w> = Box<dyn Fn(&MacroInvocation) -> String + 'w>;

/// Sink wrapper turning macro invocations into raw text.
pub struct FormattingMacroSink<'w> {
    inner: Box<dyn Sink + 'w>,
    render: MacroRenderer<'w>,
}

impl<'w> FormattingMacroSink<'w> {
    pub fn new(inner: Box<dyn Sink + 'w>, render: MacroRenderer<'w>) -> Self {
        Self { inner, render }
    }

    /// Wrap a sink with the template of its output format.
    pub fn for_format(inner: Box<dyn Sink + 'w>, format: Format) -> Self {
        let formatter = MacroFormatter::for_format(format);
        Self::new(inner, Box::new(move |m| formatter.format_invocation(m)))
    }
}

impl Sink for FormattingMacroSink<'_> {
    fn event(&mut self, event: &Event) -> io::Result<()> {
        self.inner.event(event)
    }

    fn raw_text(&mut self, text: &str) -> io::Result<()> {
        self.inner.raw_text(text)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }
}

impl MacroSink for FormattingMacroSink<'_> {
    fn execute_macro(&mut self, invocation: &MacroInvocation) -> io::Result<()> {
        let text = (self.render)(invocation);
        debug!(name = %invocation.name, rendered = %text, "macro");
        self.inner.raw_text(&text)
    }
}
