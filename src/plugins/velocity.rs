//! Keep Velocity template statements intact through a conversion.
//!
//! Documents under `src/site` are often Velocity templates. Escaping their
//! statements would break the template, so this wrapper splits text events
//! and hands comments, directives and references to the inner sink as raw
//! text.

use super::backend::Sink;
use super::events::Event;
use regex::Regex;
use std::io;
use std::sync::LazyLock;
use tracing::debug;

/// `$name`, `$name.prop.more`, or a `{...}` block.
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([a-zA-Z]\w*(\.\w*)*)|(\{[^}]*\})").expect("reference pattern is valid")
});

const DIRECTIVES: [&str; 12] = [
    "#set", "#if", "#else", "#end", "#foreach", "#include", "#parse", "#break", "#stop",
    "#evaluate", "#define", "#macro",
];

pub struct VelocitySink<'w> {
    inner: Box<dyn Sink + 'w>,
}

impl<'w> VelocitySink<'w> {
    pub fn new(inner: Box<dyn Sink + 'w>) -> Self {
        Self { inner }
    }

    fn line(&mut self, line: &str) -> io::Result<()> {
        let trimmed = line.trim();
        if trimmed.starts_with("##") {
            debug!(line, "velocity comment kept as raw text");
            return self.inner.raw_text(line);
        }
        if DIRECTIVES.iter().any(|d| trimmed.starts_with(d)) {
            debug!(line, "velocity directive kept as raw text");
            return self.inner.raw_text(line);
        }

        let mut start = 0;
        for m in REFERENCE.find_iter(line) {
            if start < m.start() {
                self.inner.event(&Event::text(&line[start..m.start()]))?;
            }
            debug!(reference = m.as_str(), "velocity reference kept as raw text");
            self.inner.raw_text(m.as_str())?;
            start = m.end();
        }
        if start < line.len() {
            self.inner.event(&Event::text(&line[start..]))?;
        }
        Ok(())
    }
}

impl Sink for VelocitySink<'_> {
    fn event(&mut self, event: &Event) -> io::Result<()> {
        let Event::Text(text) = event else {
            return self.inner.event(event);
        };
        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                self.inner.event(&Event::text("\n"))?;
            }
            self.line(line.strip_suffix('\r').unwrap_or(line))?;
        }
        Ok(())
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
