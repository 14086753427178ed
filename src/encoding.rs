//! Character encoding names, detection, and decoding.
//!
//! Detection runs exactly one of two detectors per file:
//!
//! 1. **XML**: if the content is well-formed XML, the byte-order mark or the
//!    `<?xml encoding="..."?>` declaration decides. A document with neither is
//!    UTF-8. This path is authoritative.
//! 2. **Statistical**: otherwise `chardetng` guesses from the first
//!    [`SAMPLE_LEN`] bytes and its answer is returned upper-cased.
//!
//! Labels are validated against the WHATWG encoding registry via
//! `encoding_rs`, which is also used for every decode and encode.

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, REPLACEMENT, UTF_16BE, UTF_16LE, UTF_8};
use regex::Regex;
use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};

/// Bytes fed to the statistical detector.
pub const SAMPLE_LEN: usize = 64 * 1024;

/// Only the head of a document is searched for an XML declaration.
const DECLARATION_WINDOW: usize = 1024;

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*<\?xml\s[^>]*?\bencoding\s*=\s*["']([A-Za-z][A-Za-z0-9._:\-]*)["']"#)
        .expect("declaration pattern is valid")
});

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("unknown character encoding '{0}'")]
    Unknown(String),
    #[error("character encoding '{0}' can only be read, not written")]
    NotWritable(String),
    #[error("cannot detect the character encoding of {}", .0.display())]
    Undetected(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A requested character encoding, or `auto` to detect it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EncodingName {
    #[default]
    Auto,
    Named(String),
}

impl EncodingName {
    /// Parse and validate a label. Empty and `auto` mean detect.
    pub fn parse(label: &str) -> Result<Self, EncodingError> {
        let label = label.trim();
        if label.is_empty() || label.eq_ignore_ascii_case("auto") {
            return Ok(EncodingName::Auto);
        }
        lookup(label)?;
        Ok(EncodingName::Named(label.to_string()))
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, EncodingName::Auto)
    }

    pub fn as_named(&self) -> Option<&str> {
        match self {
            EncodingName::Auto => None,
            EncodingName::Named(label) => Some(label),
        }
    }
}

impl FromStr for EncodingName {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EncodingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingName::Auto => f.write_str("auto"),
            EncodingName::Named(label) => f.write_str(label),
        }
    }
}

/// Resolve a label such as `utf-8`, `ISO-8859-1` or `latin1`.
pub fn lookup(label: &str) -> Result<&'static Encoding, EncodingError> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| EncodingError::Unknown(label.to_string()))
}

/// Resolve a label for output. Decode-only encodings are rejected.
pub fn lookup_output(label: &str) -> Result<&'static Encoding, EncodingError> {
    let encoding = lookup(label)?;
    if encoding == REPLACEMENT {
        return Err(EncodingError::NotWritable(label.to_string()));
    }
    Ok(encoding)
}

/// Encode `text` for output.
///
/// `encoding_rs` only decodes UTF-16, so both byte orders are written here
/// unit by unit. Elsewhere unmappable characters become numeric character
/// references.
pub fn encode<'a>(text: &'a str, encoding: &'static Encoding) -> Cow<'a, [u8]> {
    if encoding == UTF_16LE {
        Cow::Owned(text.encode_utf16().flat_map(u16::to_le_bytes).collect())
    } else if encoding == UTF_16BE {
        Cow::Owned(text.encode_utf16().flat_map(u16::to_be_bytes).collect())
    } else {
        encoding.encode(text).0
    }
}

/// Byte-order mark written ahead of output in `encoding`. Empty except for
/// UTF-16, which readers cannot sniff reliably without one.
pub fn output_bom(encoding: &'static Encoding) -> &'static [u8] {
    if encoding == UTF_16LE {
        b"\xFF\xFE"
    } else if encoding == UTF_16BE {
        b"\xFE\xFF"
    } else {
        b""
    }
}

/// Detect the encoding of a file.
pub fn detect_encoding(path: &Path) -> Result<String, EncodingError> {
    let bytes = fs::read(path)?;
    let label = detect_bytes(&bytes).ok_or_else(|| EncodingError::Undetected(path.to_path_buf()))?;
    debug!(path = %path.display(), encoding = %label, "detected encoding");
    Ok(label)
}

/// Detect the encoding of in-memory content. `None` for empty input.
pub fn detect_bytes(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    if let Some(label) = xml_encoding(bytes) {
        return Some(label);
    }
    let sample = &bytes[..bytes.len().min(SAMPLE_LEN)];
    let mut detector = EncodingDetector::new();
    detector.feed(sample, sample.len() == bytes.len());
    Some(detector.guess(None, true).name().to_uppercase())
}

/// The encoding a well-formed XML document declares or implies.
///
/// Returns the declared label as written, or the BOM / default encoding name
/// when there is no declaration. `None` if the content is not well-formed XML.
pub fn xml_encoding(bytes: &[u8]) -> Option<String> {
    let (text, encoding) = decode_xml(bytes)?;
    if !is_well_formed(&text) {
        return None;
    }
    Some(declared_encoding(&text).unwrap_or_else(|| encoding.name().to_string()))
}

/// Decode an XML document the way an XML reader would.
///
/// A byte-order mark wins, then a declared encoding, then UTF-8. Content
/// that does not decode cleanly under the chosen encoding yields `None`.
pub fn decode_xml(bytes: &[u8]) -> Option<(String, &'static Encoding)> {
    let (encoding, body) = match Encoding::for_bom(bytes) {
        Some((encoding, bom_len)) => (encoding, &bytes[bom_len..]),
        None => (sniff_xml_encoding(bytes)?, bytes),
    };
    let text = encoding.decode_without_bom_handling_and_without_replacement(body)?;
    Some((text.into_owned(), encoding))
}

fn sniff_xml_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    match bytes {
        [0x3C, 0x00, 0x3F, 0x00, ..] => return Some(UTF_16LE),
        [0x00, 0x3C, 0x00, 0x3F, ..] => return Some(UTF_16BE),
        _ => {}
    }
    let head = &bytes[..bytes.len().min(DECLARATION_WINDOW)];
    let head = String::from_utf8_lossy(head);
    match declared_encoding(&head) {
        // A UTF-16 declaration without a BOM was already handled above.
        Some(label) => lookup(&label).ok().map(|e| e.output_encoding()),
        None => Some(UTF_8),
    }
}

/// The `encoding` pseudo-attribute of a leading XML declaration.
pub fn declared_encoding(text: &str) -> Option<String> {
    DECLARATION
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// True if `text` is a single well-formed XML element tree.
pub fn is_well_formed(text: &str) -> bool {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(text);
    let mut depth = 0usize;
    let mut seen_root = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => {
                if depth == 0 && seen_root {
                    return false;
                }
                seen_root = true;
                depth += 1;
            }
            Ok(Event::Empty(_)) => {
                if depth == 0 && seen_root {
                    return false;
                }
                seen_root = true;
            }
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Text(t)) if depth == 0 => {
                if !t.iter().all(u8::is_ascii_whitespace) {
                    return false;
                }
            }
            Ok(Event::Eof) => return seen_root && depth == 0,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
}

/// Decode with an explicit encoding. Malformed sequences become U+FFFD.
pub fn decode<'a>(bytes: &'a [u8], encoding: &'static Encoding) -> Cow<'a, str> {
    let (text, actual, had_errors) = encoding.decode(bytes);
    if actual != encoding {
        debug!(declared = encoding.name(), bom = actual.name(), "byte-order mark overrides encoding");
    }
    if had_errors {
        warn!(encoding = actual.name(), "input contains malformed sequences, replaced with U+FFFD");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_auto_and_empty() {
        assert_eq!(EncodingName::parse("auto").unwrap(), EncodingName::Auto);
        assert_eq!(EncodingName::parse("AUTO").unwrap(), EncodingName::Auto);
        assert_eq!(EncodingName::parse("").unwrap(), EncodingName::Auto);
    }

    #[test]
    fn parse_validates_labels() {
        assert_eq!(
            EncodingName::parse("ISO-8859-1").unwrap().as_named(),
            Some("ISO-8859-1")
        );
        assert!(matches!(
            EncodingName::parse("klingon-8"),
            Err(EncodingError::Unknown(_))
        ));
    }

    #[test]
    fn lookup_accepts_aliases() {
        assert_eq!(lookup("utf8").unwrap(), UTF_8);
        assert_eq!(lookup("latin1").unwrap().name(), "windows-1252");
    }

    #[test]
    fn xml_declaration_is_authoritative() {
        let doc = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n<document>caf\xe9</document>";
        assert_eq!(detect_bytes(doc).as_deref(), Some("ISO-8859-1"));
    }

    #[test]
    fn xml_without_declaration_is_utf8() {
        assert_eq!(
            detect_bytes(b"<html><body/></html>").as_deref(),
            Some("UTF-8")
        );
    }

    #[test]
    fn xml_bom_selects_utf16() {
        let mut doc = vec![0xFF, 0xFE];
        for unit in "<faqs/>".encode_utf16() {
            doc.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(detect_bytes(&doc).as_deref(), Some("UTF-16LE"));
        let (text, encoding) = decode_xml(&doc).unwrap();
        assert_eq!(text, "<faqs/>");
        assert_eq!(encoding, UTF_16LE);
    }

    #[test]
    fn malformed_xml_falls_through_to_statistics() {
        let label = detect_bytes(b"<html><p>unclosed</html>").unwrap();
        assert_eq!(label, label.to_uppercase());
        assert_ne!(label, "");
    }

    #[test]
    fn plain_utf8_text_is_detected() {
        let text = "Überschrift\n\n  Größere Äpfel schmecken süß.\n".repeat(8);
        assert_eq!(detect_bytes(text.as_bytes()).as_deref(), Some("UTF-8"));
    }

    #[test]
    fn empty_content_is_undetected() {
        assert_eq!(detect_bytes(b""), None);
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.apt");
        fs::write(&path, "").unwrap();
        assert!(matches!(
            detect_encoding(&path),
            Err(EncodingError::Undetected(_))
        ));
    }

    #[test]
    fn declared_encoding_reads_single_quotes() {
        assert_eq!(
            declared_encoding("<?xml version='1.0' encoding='windows-1252'?><a/>").as_deref(),
            Some("windows-1252")
        );
        assert_eq!(declared_encoding("<a encoding=\"x\"/>"), None);
    }

    #[test]
    fn well_formedness() {
        assert!(is_well_formed("<?xml version=\"1.0\"?>\n<a><b/></a>\n"));
        assert!(!is_well_formed("<a></a><b></b>"));
        assert!(!is_well_formed("text <a/>"));
        assert!(!is_well_formed("<a><b></a>"));
        assert!(!is_well_formed(""));
    }

    #[test]
    fn decode_replaces_malformed_bytes() {
        assert_eq!(decode(b"ok \xff", UTF_8), "ok \u{FFFD}");
    }

    #[test]
    fn utf16_is_encoded_in_both_byte_orders() {
        assert_eq!(encode("a\u{e9}", UTF_16LE).as_ref(), b"a\x00\xe9\x00");
        assert_eq!(encode("a\u{e9}", UTF_16BE).as_ref(), b"\x00a\x00\xe9");
        assert_eq!(output_bom(UTF_16LE), b"\xFF\xFE");
        assert!(output_bom(UTF_8).is_empty());
    }

    #[test]
    fn utf16_output_decodes_back() {
        let mut bytes = output_bom(UTF_16BE).to_vec();
        bytes.extend_from_slice(&encode("<?xml version=\"1.0\" encoding=\"UTF-16BE\"?><a>\u{fc}</a>", UTF_16BE));
        let (text, encoding) = decode_xml(&bytes).unwrap();
        assert_eq!(encoding, UTF_16BE);
        assert!(text.ends_with("<a>\u{fc}</a>"));
    }

    #[test]
    fn decode_only_encodings_are_not_writable() {
        assert!(matches!(
            lookup_output("iso-2022-kr"),
            Err(EncodingError::NotWritable(_))
        ));
        assert_eq!(lookup_output("utf-16").unwrap(), UTF_16LE);
    }
}
