//! Markup formats and format auto-detection.
//!
//! [`Format`] is a closed set of dialects carrying only data: canonical name,
//! file extension, optional XML root element, and read/write capability.
//! Behavior (parsers and sinks) lives in the [`plugins`](crate::plugins)
//! registry keyed by this enum.
//!
//! ## Detection
//!
//! [`FormatDetector`] evaluates one rule per format, in a configurable order:
//!
//! | Format | Rule |
//! |--------|------|
//! | APT | extension `.apt` |
//! | FML | root element `<faqs>` |
//! | XDOC | root element `<document>` |
//! | XHTML5 | root element `<html>` |
//! | Markdown | extension `.md` |
//!
//! XML rules look at the first start tag only; content that is not XML simply
//! fails to match. Every rule is evaluated so that files matching more than one
//! rule can be reported instead of silently resolved.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("unknown format '{0}' (expected one of: apt, fml, xdoc, xhtml5, markdown)")]
    Unknown(String),
    #[error("cannot detect the format of {}", .0.display())]
    Undetected(PathBuf),
    #[error("{} matches several formats: {}", path.display(), format_list(matches))]
    Ambiguous { path: PathBuf, matches: Vec<Format> },
}

fn format_list(formats: &[Format]) -> String {
    formats
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A markup dialect known to the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Apt,
    Fml,
    Xdoc,
    Xhtml5,
    Markdown,
}

impl Format {
    /// Every format in declaration order. This is the default detection order.
    pub const ALL: [Format; 5] = [
        Format::Apt,
        Format::Fml,
        Format::Xdoc,
        Format::Xhtml5,
        Format::Markdown,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Format::Apt => "apt",
            Format::Fml => "fml",
            Format::Xdoc => "xdoc",
            Format::Xhtml5 => "xhtml5",
            Format::Markdown => "markdown",
        }
    }

    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Format::Apt => "apt",
            Format::Fml => "fml",
            Format::Xdoc => "xml",
            Format::Xhtml5 => "html",
            Format::Markdown => "md",
        }
    }

    /// Local name of the root element for XML-based formats.
    pub fn root_element(self) -> Option<&'static str> {
        match self {
            Format::Fml => Some("faqs"),
            Format::Xdoc => Some("document"),
            Format::Xhtml5 => Some("html"),
            Format::Apt | Format::Markdown => None,
        }
    }

    pub fn is_xml(self) -> bool {
        self.root_element().is_some()
    }

    pub fn can_read(self) -> bool {
        true
    }

    pub fn can_write(self) -> bool {
        !matches!(self, Format::Fml)
    }

    /// Formats that can be used as a conversion source.
    pub fn readable() -> impl Iterator<Item = Format> {
        Self::ALL.into_iter().filter(|f| f.can_read())
    }

    /// Formats that can be used as a conversion target.
    pub fn writable() -> impl Iterator<Item = Format> {
        Self::ALL.into_iter().filter(|f| f.can_write())
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Format::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| FormatError::Unknown(s.to_string()))
    }
}

/// A requested input format: either explicit or detected per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatRequest {
    #[default]
    Auto,
    Explicit(Format),
}

impl FormatRequest {
    pub fn explicit(self) -> Option<Format> {
        match self {
            FormatRequest::Auto => None,
            FormatRequest::Explicit(format) => Some(format),
        }
    }
}

impl fmt::Display for FormatRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatRequest::Auto => f.write_str("auto"),
            FormatRequest::Explicit(format) => format.fmt(f),
        }
    }
}

impl FromStr for FormatRequest {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() || s.trim().eq_ignore_ascii_case("auto") {
            Ok(FormatRequest::Auto)
        } else {
            s.parse().map(FormatRequest::Explicit)
        }
    }
}

/// Detects the format of a file by extension or by its first XML element.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatDetector {
    order: Vec<Format>,
    strict: bool,
}

impl Default for FormatDetector {
    fn default() -> Self {
        Self::new(Format::ALL.to_vec(), false)
    }
}

impl FormatDetector {
    pub fn new(order: Vec<Format>, strict: bool) -> Self {
        Self { order, strict }
    }

    pub fn order(&self) -> &[Format] {
        &self.order
    }

    /// Every format whose rule matches `path`, in detection order.
    ///
    /// An empty or unreadable file matches nothing.
    pub fn candidates(&self, path: &Path) -> Vec<Format> {
        let bytes = match fs::read(path) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                debug!(path = %path.display(), "empty file, no format rule applies");
                return Vec::new();
            }
            Err(err) => {
                debug!(path = %path.display(), %err, "unreadable file, no format rule applies");
                return Vec::new();
            }
        };

        // Parsed at most once, and only if an XML rule is in play.
        let mut root: Option<Option<String>> = None;
        let mut matches = Vec::new();
        for &format in &self.order {
            let matched = match format.root_element() {
                Some(expected) => root
                    .get_or_insert_with(|| first_element(&bytes))
                    .as_deref()
                    .is_some_and(|name| name == expected),
                None => has_extension(path, format.extension()),
            };
            if matched {
                matches.push(format);
            }
        }
        matches
    }

    /// Detect the format of `path`.
    ///
    /// The first matching rule wins. When several rules match, a warning names
    /// the others, or in strict mode the file is rejected as ambiguous.
    pub fn detect(&self, path: &Path) -> Result<Format, FormatError> {
        let matches = self.candidates(path);
        match matches.as_slice() {
            [] => Err(FormatError::Undetected(path.to_path_buf())),
            [only] => {
                debug!(path = %path.display(), format = %only, "detected format");
                Ok(*only)
            }
            [first, rest @ ..] => {
                if self.strict {
                    return Err(FormatError::Ambiguous {
                        path: path.to_path_buf(),
                        matches,
                    });
                }
                warn!(
                    path = %path.display(),
                    chosen = %first,
                    also = %format_list(rest),
                    "file matches several format rules, using the first"
                );
                Ok(*first)
            }
        }
    }
}

/// Case-insensitive extension comparison.
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// Local name of the first start tag, or `None` if the content is not XML.
///
/// Scanning stops at the first element. Non-whitespace text before it means
/// the file is not XML at all.
pub fn first_element(bytes: &[u8]) -> Option<String> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let (text, _) = crate::encoding::decode_xml(bytes)?;
    let mut reader = Reader::from_str(&text);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Text(t)) => {
                if !t.iter().all(u8::is_ascii_whitespace) {
                    return None;
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}
