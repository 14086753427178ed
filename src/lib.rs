//! # Doxconv
//!
//! Converts documentation between markup formats: APT, FML, XDOC, XHTML5 and
//! Markdown. A single file or a whole source tree is parsed into a stream of
//! structural events and written back out by a sink for the target format.
//!
//! # Architecture: Event Pipeline
//!
//! Every conversion, file or stream, runs the same pipeline:
//!
//! ```text
//! 1. Detect     path/bytes   →  format + encoding   (root element, extension, charset)
//! 2. Decode     bytes        →  text reader         (encoding_rs)
//! 3. Parse      text         →  events              (format parser)
//! 4. Render     events       →  output file         (format sink, macro rendering)
//! 5. Finish     output file  →  output file         (pretty-printing, source removal, VCS move)
//! ```
//!
//! Parsers and sinks never see each other. A parser pushes [`plugins::Event`]s
//! into a [`plugins::MacroSink`], so any readable format can be converted into
//! any writable one, and a wrapping sink can alter the stream in between
//! (Velocity preservation, macro rendering).
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`format`] | The format enum, parsing of format names and per-file detection |
//! | [`encoding`] | Encoding labels, charset detection and decoding of input bytes |
//! | [`macros`] | Rendering of `%{name\|param=value}` macros into output markup |
//! | [`convert`] | The conversion driver: file and stream conversion, errors, the report |
//! | [`batch`] | Directory walking and conversion of every matching file in a tree |
//! | [`postprocess`] | Source removal and version-controlled renames after a conversion |
//! | [`command`] | External process execution behind a runner trait |
//! | [`pretty`] | Re-indentation of XML output |
//! | [`config`] | `doxconv.toml` loading, validation and stock defaults |
//! | [`output`] | CLI output formatting for reports and errors |
//! | [`plugins`] | Parsers, sinks and the registry that resolves them per format |
//!
//! # Design Decisions
//!
//! ## One Event Model
//!
//! All formats share the block/event vocabulary in [`plugins::events`]. A
//! format's expressiveness is whatever subset of it the format can parse or
//! write; unsupported events are dropped by the sink, never rejected.
//!
//! ## Registry as a Trait
//!
//! The converter asks a [`plugins::FormatRegistry`] for parsers and sinks
//! instead of matching on formats itself. The built-in registry covers every
//! format; tests substitute registries that lack a component to exercise the
//! unavailable-component path.
//!
//! ## External Commands Behind a Runner
//!
//! VCS renames shell out to the configured program (`git` by default) through
//! [`command::CommandRunner`], so post-processing is tested without a
//! repository by recording the commands instead of running them.

pub mod batch;
pub mod command;
pub mod config;
pub mod convert;
pub mod encoding;
pub mod format;
pub mod macros;
pub mod output;
pub mod plugins;
pub mod postprocess;
pub mod pretty;

#[cfg(test)]
pub(crate) mod test_helpers;
