//! Re-indent XML output after conversion.
//!
//! Whitespace-only text that spans a line break is layout between block
//! elements and is dropped, then `quick-xml` re-indents by two spaces. All
//! other text is kept byte for byte, and `<pre>` / `<source>` content,
//! nested markup included, is written without indentation.

use crate::encoding::{decode_xml, encode, output_bom};
use quick_xml::events::{BytesText, Event};
use quick_xml::{Reader, Writer};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum PrettyError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("output is not valid text in its declared encoding")]
    Undecodable,
    #[error("formatted output is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

const PRESERVE: [&[u8]; 2] = [b"pre", b"source"];

/// Re-indent an XML document held in memory.
pub fn prettify(text: &str) -> Result<String, PrettyError> {
    let mut reader = Reader::from_str(text);
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    // Content of an open <pre>/<source>, written without indentation, and
    // the element depth inside it.
    let mut verbatim: Option<(Writer<Vec<u8>>, usize)> = None;

    loop {
        let event = reader.read_event()?;
        if matches!(event, Event::Eof) {
            break;
        }

        if let Some((inner, depth)) = verbatim.as_mut() {
            let closes = match &event {
                Event::Start(_) => {
                    *depth += 1;
                    false
                }
                Event::End(_) if *depth == 0 => true,
                Event::End(_) => {
                    *depth -= 1;
                    false
                }
                _ => false,
            };
            if !closes {
                inner.write_event(event)?;
                continue;
            }
            if let Some((inner, _)) = verbatim.take() {
                write_verbatim(&mut writer, inner)?;
            }
            writer.write_event(event)?;
            continue;
        }

        match &event {
            Event::Start(e) if PRESERVE.contains(&e.local_name().as_ref()) => {
                writer.write_event(event)?;
                verbatim = Some((Writer::new(Vec::new()), 0));
                continue;
            }
            Event::Text(t) => {
                let layout = t.iter().all(u8::is_ascii_whitespace) && t.contains(&b'\n');
                if layout {
                    continue;
                }
            }
            _ => {}
        }
        writer.write_event(event)?;
    }
    if let Some((inner, _)) = verbatim.take() {
        write_verbatim(&mut writer, inner)?;
    }

    let mut out = String::from_utf8(writer.into_inner())?;
    out.push('\n');
    Ok(out)
}

/// Emit buffered verbatim markup as one already-escaped text node, so the
/// indenting writer adds no line breaks inside it.
fn write_verbatim(writer: &mut Writer<Vec<u8>>, inner: Writer<Vec<u8>>) -> Result<(), PrettyError> {
    let raw = String::from_utf8(inner.into_inner())?;
    writer.write_event(Event::Text(BytesText::from_escaped(raw)))?;
    Ok(())
}

/// Re-indent an XML file in place, keeping its encoding.
pub fn prettify_file(path: &Path) -> Result<(), PrettyError> {
    let bytes = fs::read(path)?;
    let (text, encoding) = decode_xml(&bytes).ok_or(PrettyError::Undecodable)?;
    let formatted = prettify(&text)?;
    let mut encoded = output_bom(encoding).to_vec();
    encoded.extend_from_slice(&encode(&formatted, encoding));
    fs::write(path, encoded)?;
    debug!(path = %path.display(), "prettified output");
    Ok(())
}
