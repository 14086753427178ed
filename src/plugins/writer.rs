//! Encoding-aware output stream shared by the built-in sinks.

use crate::encoding::{encode, output_bom};
use encoding_rs::{Encoding, REPLACEMENT, UTF_8};
use std::io::{self, Write};

pub struct TextWriter<'w> {
    out: Option<Box<dyn Write + 'w>>,
    encoding: &'static Encoding,
    /// Nothing written yet; a UTF-16 stream still needs its byte-order mark.
    fresh: bool,
}

impl<'w> TextWriter<'w> {
    /// The decode-only replacement encoding writes UTF-8.
    pub fn new(out: Box<dyn Write + 'w>, encoding: &'static Encoding) -> Self {
        Self {
            out: Some(out),
            encoding: if encoding == REPLACEMENT { UTF_8 } else { encoding },
            fresh: true,
        }
    }

    /// The encoding bytes are actually written in.
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Encode and write. Unmappable characters become numeric character
    /// references.
    pub fn write_str(&mut self, text: &str) -> io::Result<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| io::Error::other("write after close"))?;
        if self.fresh {
            self.fresh = false;
            out.write_all(output_bom(self.encoding))?;
        }
        out.write_all(&encode(text, self.encoding))
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self.out.as_mut() {
            Some(out) => out.flush(),
            None => Ok(()),
        }
    }

    /// Flush and release the stream. Later calls do nothing.
    pub fn close(&mut self) -> io::Result<()> {
        match self.out.take() {
            Some(mut out) => out.flush(),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.out.is_none()
    }
}
