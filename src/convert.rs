//! The conversion orchestrator.
//!
//! One call to [`Converter::convert`] handles a single file or a whole
//! directory tree. Every file goes through the same stages:
//!
//! ```text
//! detect format → detect encoding → resolve parser/sink → resolve output path
//!   → read input → open output → parse into sink → [prettify] → post-process
//! ```
//!
//! Once every file is done the post-processing context is finalized exactly
//! once (the VCS commit). Any failure aborts the rest of the run.
//!
//! ## Cleanup
//!
//! [`drive`] releases the reader and then flushes and closes the sink on every
//! path, including after a parse error or a failing sink. Output written
//! before the failure stays on disk.
//!
//! ## Output placement
//!
//! The output target is treated as a directory when it already is one, when
//! its last segment has no extension, or when a batch preserves a relative
//! sub-directory. The file name is then `<input stem>.<target extension>`.

use crate::batch;
use crate::command::{CommandError, CommandRunner};
use crate::config::{ConverterConfig, VcsConfig};
use crate::encoding::{self, decode, decode_xml, detect_bytes, EncodingError, EncodingName};
use crate::format::{Format, FormatDetector, FormatError, FormatRequest};
use crate::macros::FormattingMacroSink;
use crate::plugins::{
    ComponentUnavailable, FormatRegistry, MacroSink, ParseError, Parser, Sink, VelocitySink,
};
use crate::postprocess::{PostProcess, PostProcessContext, PostProcessError};
use crate::pretty::{prettify_file, PrettyError};
use encoding_rs::{Encoding, UTF_8};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Errors
// ============================================================================

/// Where in the per-file pipeline a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DetectFormat,
    DetectEncoding,
    ResolveComponents,
    ResolveOutput,
    Enumerate,
    OpenInput,
    OpenOutput,
    Parse,
    Prettify,
    PostProcess,
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Stage::DetectFormat => "detecting the format",
            Stage::DetectEncoding => "detecting the encoding",
            Stage::ResolveComponents => "resolving parser and sink",
            Stage::ResolveOutput => "preparing the output location",
            Stage::Enumerate => "listing input files",
            Stage::OpenInput => "reading the input",
            Stage::OpenOutput => "opening the output",
            Stage::Parse => "converting",
            Stage::Prettify => "formatting the output",
            Stage::PostProcess => "post-processing",
            Stage::Finalize => "finalizing post-processing",
        };
        f.write_str(text)
    }
}

#[derive(Error, Debug)]
pub enum FailureCause {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Pretty(#[from] PrettyError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("cannot detect the format of {}", path.display())]
    FormatUndetected { path: PathBuf },
    #[error("{} matches several formats: {}", path.display(), names(candidates))]
    AmbiguousFormat {
        path: PathBuf,
        candidates: Vec<Format>,
    },
    #[error("cannot detect the character encoding of {}", path.display())]
    EncodingUndetected { path: PathBuf },
    #[error(transparent)]
    ComponentUnavailable(#[from] ComponentUnavailable),
    #[error("{stage} {} failed", path.display())]
    ConversionFailed {
        path: PathBuf,
        stage: Stage,
        #[source]
        source: FailureCause,
    },
    #[error("no {format} files found under {}", root.display())]
    NoMatchingFiles { root: PathBuf, format: Format },
    #[error("external command failed while post-processing {}", path.display())]
    ExternalProcessFailed {
        path: PathBuf,
        #[source]
        source: CommandError,
    },
    #[error("{0}")]
    Configuration(String),
}

fn names(formats: &[Format]) -> String {
    formats
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ConvertError {
    /// True when the converted output was already written before the
    /// failure, so it may exist on disk even though the call failed.
    pub fn output_may_exist(&self) -> bool {
        match self {
            ConvertError::ExternalProcessFailed { .. } => true,
            ConvertError::ConversionFailed { stage, .. } => matches!(
                stage,
                Stage::Prettify | Stage::PostProcess | Stage::Finalize
            ),
            _ => false,
        }
    }

    fn failed(path: &Path, stage: Stage, source: impl Into<FailureCause>) -> Self {
        ConvertError::ConversionFailed {
            path: path.to_path_buf(),
            stage,
            source: source.into(),
        }
    }

    fn post_process(path: &Path, stage: Stage, err: PostProcessError) -> Self {
        match err {
            PostProcessError::Command(source) => ConvertError::ExternalProcessFailed {
                path: path.to_path_buf(),
                source,
            },
            PostProcessError::Io { source, .. } => ConvertError::failed(path, stage, source),
            PostProcessError::ConflictingPolicies => ConvertError::Configuration(err.to_string()),
        }
    }

    fn encoding(path: &Path, err: EncodingError) -> Self {
        match err {
            EncodingError::Undetected(path) => ConvertError::EncodingUndetected { path },
            EncodingError::Unknown(_) | EncodingError::NotWritable(_) => {
                ConvertError::Configuration(err.to_string())
            }
            EncodingError::Io(source) => ConvertError::failed(path, Stage::DetectEncoding, source),
        }
    }
}

impl From<FormatError> for ConvertError {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::Undetected(path) => ConvertError::FormatUndetected { path },
            FormatError::Ambiguous { path, matches } => ConvertError::AmbiguousFormat {
                path,
                candidates: matches,
            },
            FormatError::Unknown(_) => ConvertError::Configuration(err.to_string()),
        }
    }
}

// ============================================================================
// Input and output specs
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    pub path: PathBuf,
    pub format: FormatRequest,
    pub encoding: EncodingName,
}

impl InputSpec {
    /// `encoding` is a label or `auto`; unknown labels are rejected here.
    pub fn new(
        path: impl Into<PathBuf>,
        format: FormatRequest,
        encoding: &str,
    ) -> Result<Self, ConvertError> {
        if let Some(format) = format.explicit().filter(|f| !f.can_read()) {
            return Err(ConvertError::Configuration(format!(
                "format {format} cannot be used as input"
            )));
        }
        let encoding = EncodingName::parse(encoding)
            .map_err(|e| ConvertError::Configuration(e.to_string()))?;
        Ok(Self {
            path: path.into(),
            format,
            encoding,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    pub path: PathBuf,
    pub format: Format,
    /// `Auto` inherits the input's encoding.
    pub encoding: EncodingName,
}

impl OutputSpec {
    pub fn new(path: impl Into<PathBuf>, format: Format, encoding: &str) -> Result<Self, ConvertError> {
        if !format.can_write() {
            return Err(ConvertError::Configuration(format!(
                "format {format} cannot be used as output"
            )));
        }
        let encoding = EncodingName::parse(encoding)
            .map_err(|e| ConvertError::Configuration(e.to_string()))?;
        if let Some(label) = encoding.as_named() {
            encoding::lookup_output(label).map_err(|e| ConvertError::Configuration(e.to_string()))?;
        }
        Ok(Self {
            path: path.into(),
            format,
            encoding,
        })
    }
}

/// A pre-opened input. The format must be explicit.
pub struct StreamInput<'a> {
    pub reader: &'a mut dyn Read,
    pub format: FormatRequest,
    pub encoding: EncodingName,
}

pub struct StreamOutput<'a> {
    pub writer: &'a mut dyn Write,
    pub format: Format,
    pub encoding: EncodingName,
}

// ============================================================================
// Options and results
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Re-indent XML outputs.
    pub pretty: bool,
    pub preserve_velocity: bool,
    pub post_process: PostProcess,
    pub detector: FormatDetector,
    /// Directory names skipped by batch conversion.
    pub excludes: Vec<String>,
    pub vcs: VcsConfig,
}

impl ConvertOptions {
    pub fn from_config(config: &ConverterConfig) -> Self {
        Self {
            pretty: config.output.pretty,
            preserve_velocity: config.output.preserve_velocity,
            post_process: PostProcess::None,
            detector: FormatDetector::new(
                config.detection.order.clone(),
                config.detection.strict,
            ),
            excludes: config.batch.excludes.clone(),
            vcs: config.vcs.clone(),
        }
    }
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::from_config(&ConverterConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedFile {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: Format,
    /// Resolved input encoding label.
    pub encoding: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionReport {
    pub from: FormatRequest,
    pub to: Format,
    pub files: Vec<ConvertedFile>,
    /// Outputs restored after the VCS commit.
    pub renamed: usize,
}

// ============================================================================
// Converter
// ============================================================================

/// Placeholder path used in errors about streams.
const STREAM: &str = "<stream>";

pub struct Converter<'a> {
    registry: &'a dyn FormatRegistry,
    runner: &'a dyn CommandRunner,
    options: ConvertOptions,
}

impl<'a> Converter<'a> {
    pub fn new(
        registry: &'a dyn FormatRegistry,
        runner: &'a dyn CommandRunner,
        options: ConvertOptions,
    ) -> Self {
        Self {
            registry,
            runner,
            options,
        }
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Convert a file or every matching file under a directory.
    ///
    /// Post-processing state lives only for the duration of this call.
    pub fn convert(
        &self,
        input: &InputSpec,
        output: &OutputSpec,
    ) -> Result<ConversionReport, ConvertError> {
        if !input.path.exists() {
            return Err(ConvertError::Configuration(format!(
                "input {} does not exist",
                input.path.display()
            )));
        }
        let mut context = PostProcessContext::new(self.options.post_process, self.options.vcs.clone());

        let converted = if input.path.is_dir() {
            batch::convert_all(self, &mut context, input, output)
        } else {
            self.convert_file(&mut context, input, output, None).map(|file| vec![file])
        };
        let finalized = converted.and_then(|files| {
            context
                .finalize(self.runner)
                .map(|renamed| (files, renamed))
                .map_err(|e| ConvertError::post_process(&input.path, Stage::Finalize, e))
        });
        let (files, renamed) = match finalized {
            Ok(done) => done,
            Err(err) => {
                // Parked outputs go back in place; none are lost under a temporary name.
                for stuck in context.abandon() {
                    warn!(
                        temporary = %stuck.temporary.display(),
                        target = %stuck.target.display(),
                        "could not restore converted output"
                    );
                }
                return Err(err);
            }
        };

        Ok(ConversionReport {
            from: input.format,
            to: output.format,
            files,
            renamed,
        })
    }

    /// Convert one file. `relative_dir` is set in batch mode and mirrors the
    /// file's place in the input tree under the output root.
    pub(crate) fn convert_file(
        &self,
        context: &mut PostProcessContext,
        input: &InputSpec,
        output: &OutputSpec,
        relative_dir: Option<&Path>,
    ) -> Result<ConvertedFile, ConvertError> {
        let path = input.path.as_path();

        let format = match input.format {
            FormatRequest::Explicit(format) => format,
            FormatRequest::Auto => self.options.detector.detect(path)?,
        };
        let label = match &input.encoding {
            EncodingName::Named(label) => label.clone(),
            EncodingName::Auto => {
                encoding::detect_encoding(path).map_err(|e| ConvertError::encoding(path, e))?
            }
        };
        debug!(path = %path.display(), %format, encoding = %label, "resolved input");

        let parser = self.registry.resolve_parser(format)?;
        let factory = self.registry.resolve_sink_factory(output.format)?;
        debug!(parser = parser.name(), sink = factory.name(), "resolved components");

        let out_path = resolve_output_path(path, &output.path, output.format, relative_dir)
            .map_err(|e| ConvertError::failed(path, Stage::ResolveOutput, e))?;

        let bytes = fs::read(path).map_err(|e| ConvertError::failed(path, Stage::OpenInput, e))?;
        let text = decode_input(parser.as_ref(), &bytes, Some(&label));
        let out_encoding = output_encoding(&output.encoding, Some(&label))?;

        let file = File::create(&out_path)
            .map_err(|e| ConvertError::failed(&out_path, Stage::OpenOutput, e))?;
        let sink = factory
            .create_sink(Box::new(BufWriter::new(file)), out_encoding)
            .map_err(|e| ConvertError::failed(&out_path, Stage::OpenOutput, e))?;
        let mut sink = self.wrap_sink(sink, output.format);

        drive(parser.as_ref(), Box::new(io::Cursor::new(text)), &mut sink)
            .map_err(|e| ConvertError::failed(path, Stage::Parse, e))?;

        if self.options.pretty && output.format.is_xml() {
            prettify_file(&out_path).map_err(|e| ConvertError::failed(&out_path, Stage::Prettify, e))?;
        }

        context
            .after_conversion(self.runner, path, &out_path)
            .map_err(|e| ConvertError::post_process(path, Stage::PostProcess, e))?;

        info!(input = %path.display(), output = %out_path.display(), "converted");
        Ok(ConvertedFile {
            input: path.to_path_buf(),
            output: out_path,
            format,
            encoding: label,
        })
    }

    /// Convert between pre-opened streams. No beautification or
    /// post-processing applies.
    pub fn convert_stream(
        &self,
        input: StreamInput<'_>,
        output: StreamOutput<'_>,
    ) -> Result<(), ConvertError> {
        let stream = Path::new(STREAM);
        let format = input.format.explicit().ok_or_else(|| {
            ConvertError::Configuration("stream input needs an explicit format".into())
        })?;
        if !output.format.can_write() {
            return Err(ConvertError::Configuration(format!(
                "format {} cannot be used as output",
                output.format
            )));
        }

        let mut bytes = Vec::new();
        input
            .reader
            .read_to_end(&mut bytes)
            .map_err(|e| ConvertError::failed(stream, Stage::OpenInput, e))?;
        let label = match &input.encoding {
            EncodingName::Named(label) => label.clone(),
            EncodingName::Auto => detect_bytes(&bytes).ok_or_else(|| ConvertError::EncodingUndetected {
                path: stream.to_path_buf(),
            })?,
        };

        let parser = self.registry.resolve_parser(format)?;
        let factory = self.registry.resolve_sink_factory(output.format)?;
        let text = decode_input(parser.as_ref(), &bytes, Some(&label));
        let out_encoding = output_encoding(&output.encoding, Some(&label))?;

        let sink = factory
            .create_sink(Box::new(output.writer), out_encoding)
            .map_err(|e| ConvertError::failed(stream, Stage::OpenOutput, e))?;
        let mut sink = self.wrap_sink(sink, output.format);
        drive(parser.as_ref(), Box::new(io::Cursor::new(text)), &mut sink)
            .map_err(|e| ConvertError::failed(stream, Stage::Parse, e))
    }

    /// Velocity preservation first, then macro rendering for the target format.
    fn wrap_sink<'w>(&self, sink: Box<dyn Sink + 'w>, format: Format) -> FormattingMacroSink<'w> {
        let sink: Box<dyn Sink + 'w> = if self.options.preserve_velocity {
            Box::new(VelocitySink::new(sink))
        } else {
            sink
        };
        FormattingMacroSink::for_format(sink, format)
    }
}

// ============================================================================
// Pipeline helpers
// ============================================================================

/// Run `parser` over `reader` into `sink`.
///
/// The reader is dropped and the sink flushed and closed whatever happens.
/// The first error wins.
pub fn drive(
    parser: &dyn Parser,
    mut reader: Box<dyn BufRead + '_>,
    sink: &mut dyn MacroSink,
) -> Result<(), FailureCause> {
    let parsed = parser.parse(&mut *reader, sink);
    drop(reader);
    let flushed = sink.flush();
    let closed = sink.close();
    parsed?;
    flushed?;
    closed?;
    Ok(())
}

/// Decode input for a parser.
///
/// XML parsers re-derive the encoding from the document itself. Others use
/// the resolved label, or UTF-8 when it is missing or unknown.
fn decode_input(parser: &dyn Parser, bytes: &[u8], label: Option<&str>) -> String {
    if parser.is_xml() {
        if let Some((text, encoding)) = decode_xml(bytes) {
            debug!(encoding = encoding.name(), "decoded as XML");
            return text;
        }
        warn!("document does not decode under its own XML declaration, reading it leniently");
    }
    let encoding = match label.map(encoding::lookup) {
        Some(Ok(encoding)) => encoding,
        Some(Err(err)) => {
            warn!(%err, "falling back to UTF-8");
            UTF_8
        }
        None => UTF_8,
    };
    decode(bytes, encoding).into_owned()
}

/// `Auto` inherits the input label; an input label that cannot be written
/// means UTF-8.
fn output_encoding(
    requested: &EncodingName,
    input_label: Option<&str>,
) -> Result<&'static Encoding, ConvertError> {
    match requested {
        EncodingName::Named(label) => {
            encoding::lookup_output(label).map_err(|e| ConvertError::Configuration(e.to_string()))
        }
        EncodingName::Auto => Ok(input_label
            .and_then(|label| encoding::lookup_output(label).ok())
            .unwrap_or(UTF_8)),
    }
}

/// Where the converted form of `input` is written.
pub fn resolve_output_path(
    input: &Path,
    target: &Path,
    format: Format,
    relative_dir: Option<&Path>,
) -> io::Result<PathBuf> {
    let as_directory = target.is_dir() || target.extension().is_none() || relative_dir.is_some();
    if !as_directory {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        return Ok(target.to_path_buf());
    }

    let dir = match relative_dir {
        Some(relative) => target.join(relative),
        None => target.to_path_buf(),
    };
    fs::create_dir_all(&dir)?;
    let mut name = input.file_stem().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(format.extension());
    Ok(dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::tests::RecordingRunner;
    use crate::plugins::backend::tests::{EmptyRegistry, Recorded, RecordingSink};
    use crate::plugins::{BuiltinRegistry, SinkFactory};
    use tempfile::TempDir;

    const XHTML: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<html><head><title>Doc</title></head>\
                         <body><h1>Intro</h1><p>Some <em>text</em>.</p></body></html>\n";

    const APT: &str = " -----\n Guide\n -----\n Ann\n -----\n\nIntro\n\n Hello <<world>>.\n\n * one\n\n * two\n";

    fn converter<'a>(
        registry: &'a dyn FormatRegistry,
        runner: &'a RecordingRunner,
        options: ConvertOptions,
    ) -> Converter<'a> {
        Converter::new(registry, runner, options)
    }

    fn write(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn auto_input(path: &Path) -> InputSpec {
        InputSpec::new(path, FormatRequest::Auto, "auto").unwrap()
    }

    #[test]
    fn xhtml_auto_detected_into_output_directory() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "doc.xhtml", XHTML.as_bytes());
        let out_dir = tmp.path().join("out");
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();

        let report = converter(&registry, &runner, ConvertOptions::default())
            .convert(
                &auto_input(&input),
                &OutputSpec::new(&out_dir, Format::Apt, "auto").unwrap(),
            )
            .unwrap();

        let expected = out_dir.join("doc.apt");
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].output, expected);
        assert_eq!(report.files[0].format, Format::Xhtml5);
        assert_eq!(report.files[0].encoding, "UTF-8");
        let apt = fs::read_to_string(&expected).unwrap();
        assert!(apt.contains(" Doc\n"));
        assert!(apt.contains("Intro\n"));
        assert!(apt.contains(" Some <text>.\n"));
    }

    #[test]
    fn unknown_extension_is_format_undetected() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "x.unknown", b"just some words");
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let err = converter(&registry, &runner, ConvertOptions::default())
            .convert(
                &auto_input(&input),
                &OutputSpec::new(tmp.path().join("out"), Format::Apt, "auto").unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, ConvertError::FormatUndetected { path } if path == input));
    }

    #[test]
    fn missing_input_is_configuration_error() {
        let tmp = TempDir::new().unwrap();
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let err = converter(&registry, &runner, ConvertOptions::default())
            .convert(
                &auto_input(&tmp.path().join("nope.apt")),
                &OutputSpec::new(tmp.path().join("out"), Format::Markdown, "auto").unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, ConvertError::Configuration(_)));
    }

    #[test]
    fn explicit_output_file_and_parent_creation() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "guide.apt", APT.as_bytes());
        let target = tmp.path().join("deep/nested/readme.md");
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();

        converter(&registry, &runner, ConvertOptions::default())
            .convert(
                &InputSpec::new(&input, FormatRequest::Explicit(Format::Apt), "UTF-8").unwrap(),
                &OutputSpec::new(&target, Format::Markdown, "auto").unwrap(),
            )
            .unwrap();

        let md = fs::read_to_string(&target).unwrap();
        assert!(md.starts_with("---\ntitle: Guide\nauthor: Ann\n---\n"));
        assert!(md.contains("# Intro\n"));
        assert!(md.contains("Hello **world**."));
        assert!(md.contains("- one\n- two\n"));
    }

    #[test]
    fn output_encoding_inherits_input() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "cafe.apt", b"Caf\xe9\n\n Cr\xe8me br\xfbl\xe9e.\n");
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let report = converter(&registry, &runner, ConvertOptions::default())
            .convert(
                &InputSpec::new(&input, FormatRequest::Explicit(Format::Apt), "ISO-8859-1").unwrap(),
                &OutputSpec::new(tmp.path().join("out"), Format::Xhtml5, "auto").unwrap(),
            )
            .unwrap();
        let bytes = fs::read(&report.files[0].output).unwrap();
        assert!(bytes.starts_with(b"<?xml version=\"1.0\" encoding=\"windows-1252\"?>"));
        assert!(bytes.windows(5).any(|w| w == b"Caf\xe9<"));
    }

    #[test]
    fn explicit_output_encoding_wins() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "cafe.apt", b"Caf\xe9\n");
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let report = converter(&registry, &runner, ConvertOptions::default())
            .convert(
                &InputSpec::new(&input, FormatRequest::Explicit(Format::Apt), "ISO-8859-1").unwrap(),
                &OutputSpec::new(tmp.path().join("out"), Format::Markdown, "UTF-8").unwrap(),
            )
            .unwrap();
        let md = fs::read_to_string(&report.files[0].output).unwrap();
        assert!(md.contains("# Café"));
    }

    #[test]
    fn utf16_output_is_written_as_utf16() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "doc.apt", "Caf\u{e9}\n\n Body.\n".as_bytes());
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let options = ConvertOptions {
            pretty: true,
            ..ConvertOptions::default()
        };
        let report = converter(&registry, &runner, options)
            .convert(
                &InputSpec::new(&input, FormatRequest::Explicit(Format::Apt), "UTF-8").unwrap(),
                &OutputSpec::new(tmp.path().join("doc.html"), Format::Xhtml5, "UTF-16").unwrap(),
            )
            .unwrap();

        let bytes = fs::read(&report.files[0].output).unwrap();
        assert!(bytes.starts_with(b"\xFF\xFE<\x00?\x00"));
        let (text, encoding) = decode_xml(&bytes).unwrap();
        assert_eq!(encoding, encoding_rs::UTF_16LE);
        assert!(text.contains("encoding=\"UTF-16LE\""), "{text}");
        assert!(text.contains("Caf\u{e9}"));
    }

    #[test]
    fn decode_only_output_encoding_rejected_when_building_specs() {
        assert!(matches!(
            OutputSpec::new("out", Format::Apt, "iso-2022-kr"),
            Err(ConvertError::Configuration(_))
        ));
    }

    #[test]
    fn unknown_encoding_label_rejected_when_building_specs() {
        assert!(matches!(
            InputSpec::new("a.apt", FormatRequest::Auto, "klingon-8"),
            Err(ConvertError::Configuration(_))
        ));
        assert!(matches!(
            OutputSpec::new("out", Format::Apt, "klingon-8"),
            Err(ConvertError::Configuration(_))
        ));
    }

    #[test]
    fn read_only_format_rejected_as_output() {
        assert!(matches!(
            OutputSpec::new("out", Format::Fml, "auto"),
            Err(ConvertError::Configuration(_))
        ));
    }

    #[test]
    fn missing_sink_is_component_unavailable_and_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "a.apt", APT.as_bytes());
        let registry = BuiltinRegistry::new().without_sink(Format::Markdown);
        let runner = RecordingRunner::default();
        let out_dir = tmp.path().join("out");
        let err = converter(&registry, &runner, ConvertOptions::default())
            .convert(
                &auto_input(&input),
                &OutputSpec::new(&out_dir, Format::Markdown, "auto").unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, ConvertError::ComponentUnavailable(_)));
        assert!(!out_dir.exists());
    }

    #[test]
    fn empty_registry_has_no_parser() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "a.apt", APT.as_bytes());
        let runner = RecordingRunner::default();
        let err = converter(&EmptyRegistry, &runner, ConvertOptions::default())
            .convert(
                &auto_input(&input),
                &OutputSpec::new(tmp.path().join("out"), Format::Markdown, "auto").unwrap(),
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "no parser available for format apt");
    }

    #[test]
    fn parse_error_is_conversion_failed() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "bad.apt", b"Title\n\n+--\nnever closed\n");
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let err = converter(&registry, &runner, ConvertOptions::default())
            .convert(
                &auto_input(&input),
                &OutputSpec::new(tmp.path().join("out"), Format::Markdown, "auto").unwrap(),
            )
            .unwrap_err();
        match &err {
            ConvertError::ConversionFailed { stage, source, .. } => {
                assert_eq!(*stage, Stage::Parse);
                assert!(matches!(source, FailureCause::Parse(ParseError::Syntax { .. })));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!err.output_may_exist());
    }

    /// Registry whose sinks all record into one shared log.
    struct RecordingRegistry {
        sink: RecordingSink,
    }

    struct RecordingFactory(RecordingSink);

    impl SinkFactory for RecordingFactory {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn create_sink<'w>(
            &self,
            _out: Box<dyn Write + 'w>,
            _encoding: &'static Encoding,
        ) -> io::Result<Box<dyn Sink + 'w>> {
            Ok(Box::new(self.0.clone()))
        }
    }

    impl FormatRegistry for RecordingRegistry {
        fn resolve_parser(&self, format: Format) -> Result<Box<dyn Parser>, ComponentUnavailable> {
            BuiltinRegistry::new().resolve_parser(format)
        }

        fn resolve_sink_factory(
            &self,
            _format: Format,
        ) -> Result<Box<dyn SinkFactory>, ComponentUnavailable> {
            Ok(Box::new(RecordingFactory(self.sink.clone())))
        }
    }

    #[test]
    fn sink_is_flushed_and_closed_after_parse_error() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "bad.apt", b"Title\n\n+--\nnever closed\n");
        let registry = RecordingRegistry {
            sink: RecordingSink::default(),
        };
        let log = registry.sink.log();
        let runner = RecordingRunner::default();
        converter(&registry, &runner, ConvertOptions::default())
            .convert(
                &auto_input(&input),
                &OutputSpec::new(tmp.path().join("out"), Format::Markdown, "auto").unwrap(),
            )
            .unwrap_err();
        let recorded = log.lock().unwrap().clone();
        assert_eq!(&recorded[recorded.len() - 2..], &[Recorded::Flush, Recorded::Close]);
    }

    #[test]
    fn sink_is_closed_after_sink_error() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "a.apt", APT.as_bytes());
        let registry = RecordingRegistry {
            sink: RecordingSink::failing(),
        };
        let log = registry.sink.log();
        let runner = RecordingRunner::default();
        let err = converter(&registry, &runner, ConvertOptions::default())
            .convert(
                &auto_input(&input),
                &OutputSpec::new(tmp.path().join("out"), Format::Markdown, "auto").unwrap(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ConvertError::ConversionFailed { stage: Stage::Parse, .. }
        ));
        assert_eq!(log.lock().unwrap().last(), Some(&Recorded::Close));
    }

    #[test]
    fn macros_are_rendered_for_target_format() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "a.apt", b"Title\n\n%{toc|section=2|sourceContent=x}\n");
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let report = converter(&registry, &runner, ConvertOptions::default())
            .convert(
                &auto_input(&input),
                &OutputSpec::new(tmp.path().join("out"), Format::Markdown, "auto").unwrap(),
            )
            .unwrap();
        let md = fs::read_to_string(&report.files[0].output).unwrap();
        assert!(md.contains("<!-- MACRO{toc|section=2} -->"), "{md}");
        assert!(!md.contains("sourceContent"));
    }

    #[test]
    fn pretty_applies_to_xml_outputs() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "a.apt", APT.as_bytes());
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let options = ConvertOptions {
            pretty: true,
            ..ConvertOptions::default()
        };
        let report = converter(&registry, &runner, options)
            .convert(
                &auto_input(&input),
                &OutputSpec::new(tmp.path().join("out"), Format::Xdoc, "auto").unwrap(),
            )
            .unwrap();
        let xml = fs::read_to_string(&report.files[0].output).unwrap();
        assert!(xml.contains("\n  <properties>\n    <title>Guide</title>"), "{xml}");
    }

    #[test]
    fn remove_source_policy_deletes_input() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "a.apt", APT.as_bytes());
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let options = ConvertOptions {
            post_process: PostProcess::RemoveSource,
            ..ConvertOptions::default()
        };
        let report = converter(&registry, &runner, options)
            .convert(
                &auto_input(&input),
                &OutputSpec::new(tmp.path(), Format::Markdown, "auto").unwrap(),
            )
            .unwrap();
        assert!(!input.exists());
        assert!(report.files[0].output.exists());
    }

    #[test]
    fn vcs_policy_moves_commits_and_restores() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "a.apt", APT.as_bytes());
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let options = ConvertOptions {
            post_process: PostProcess::VcsRename,
            ..ConvertOptions::default()
        };
        let report = converter(&registry, &runner, options)
            .convert(
                &auto_input(&input),
                &OutputSpec::new(tmp.path(), Format::Markdown, "auto").unwrap(),
            )
            .unwrap();
        assert_eq!(report.renamed, 1);
        assert_eq!(runner.subcommands(), vec!["mv", "commit"]);
        assert!(!input.exists());
        let md = fs::read_to_string(tmp.path().join("a.md")).unwrap();
        assert!(md.contains("# Intro"));
        assert!(!tmp.path().join("a.md.tmp").exists());
    }

    #[test]
    fn vcs_failure_reports_output_may_exist() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "a.apt", APT.as_bytes());
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::failing("git");
        let options = ConvertOptions {
            post_process: PostProcess::VcsRename,
            ..ConvertOptions::default()
        };
        let err = converter(&registry, &runner, options)
            .convert(
                &auto_input(&input),
                &OutputSpec::new(tmp.path().join("out"), Format::Markdown, "auto").unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, ConvertError::ExternalProcessFailed { .. }));
        assert!(err.output_may_exist());
    }

    #[test]
    fn strict_detection_rejects_ambiguous_file() {
        let tmp = TempDir::new().unwrap();
        // An `.md` file whose content is an XHTML document matches two rules.
        let input = write(tmp.path(), "page.md", b"<html><body><p>x</p></body></html>");
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let options = ConvertOptions {
            detector: FormatDetector::new(Format::ALL.to_vec(), true),
            ..ConvertOptions::default()
        };
        let err = converter(&registry, &runner, options)
            .convert(
                &auto_input(&input),
                &OutputSpec::new(tmp.path().join("out"), Format::Apt, "auto").unwrap(),
            )
            .unwrap_err();
        match err {
            ConvertError::AmbiguousFormat { candidates, .. } => {
                assert_eq!(candidates, vec![Format::Xhtml5, Format::Markdown]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn stream_conversion() {
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let mut reader = io::Cursor::new(b"# Title\n\nSome *text*.\n".to_vec());
        let mut out = Vec::new();
        converter(&registry, &runner, ConvertOptions::default())
            .convert_stream(
                StreamInput {
                    reader: &mut reader,
                    format: FormatRequest::Explicit(Format::Markdown),
                    encoding: EncodingName::Auto,
                },
                StreamOutput {
                    writer: &mut out,
                    format: Format::Apt,
                    encoding: EncodingName::Auto,
                },
            )
            .unwrap();
        let apt = String::from_utf8(out).unwrap();
        assert!(apt.contains("Title\n"));
        assert!(apt.contains(" Some <text>.\n"));
    }

    #[test]
    fn stream_needs_explicit_format() {
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let mut reader = io::Cursor::new(Vec::new());
        let mut out = Vec::new();
        let err = converter(&registry, &runner, ConvertOptions::default())
            .convert_stream(
                StreamInput {
                    reader: &mut reader,
                    format: FormatRequest::Auto,
                    encoding: EncodingName::Auto,
                },
                StreamOutput {
                    writer: &mut out,
                    format: Format::Apt,
                    encoding: EncodingName::Auto,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ConvertError::Configuration(_)));
    }

    #[test]
    fn empty_stream_encoding_is_undetected() {
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let mut reader = io::Cursor::new(Vec::new());
        let mut out = Vec::new();
        let err = converter(&registry, &runner, ConvertOptions::default())
            .convert_stream(
                StreamInput {
                    reader: &mut reader,
                    format: FormatRequest::Explicit(Format::Apt),
                    encoding: EncodingName::Auto,
                },
                StreamOutput {
                    writer: &mut out,
                    format: Format::Markdown,
                    encoding: EncodingName::Auto,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ConvertError::EncodingUndetected { .. }));
    }

    #[test]
    fn output_path_rules() {
        let tmp = TempDir::new().unwrap();
        let input = Path::new("/docs/guide.apt");

        // Existing directory, even with a dot in its name.
        let existing = tmp.path().join("site.v2");
        fs::create_dir(&existing).unwrap();
        assert_eq!(
            resolve_output_path(input, &existing, Format::Markdown, None).unwrap(),
            existing.join("guide.md")
        );

        // No extension: created as a directory.
        let fresh = tmp.path().join("fresh");
        assert_eq!(
            resolve_output_path(input, &fresh, Format::Xdoc, None).unwrap(),
            fresh.join("guide.xml")
        );
        assert!(fresh.is_dir());

        // A literal file target.
        let file = tmp.path().join("a/b/out.html");
        assert_eq!(
            resolve_output_path(input, &file, Format::Xhtml5, None).unwrap(),
            file
        );
        assert!(tmp.path().join("a/b").is_dir());

        // Batch mode mirrors the relative directory, even for a file-like target.
        let root = tmp.path().join("out.d");
        assert_eq!(
            resolve_output_path(input, &root, Format::Apt, Some(Path::new("sub/dir"))).unwrap(),
            root.join("sub/dir/guide.apt")
        );
    }

    #[test]
    fn output_may_exist_only_after_output_was_written() {
        let parse = ConvertError::failed(Path::new("a"), Stage::Parse, io::Error::other("x"));
        let pretty = ConvertError::failed(Path::new("a"), Stage::Prettify, io::Error::other("x"));
        let post = ConvertError::failed(Path::new("a"), Stage::PostProcess, io::Error::other("x"));
        assert!(!parse.output_may_exist());
        assert!(pretty.output_may_exist());
        assert!(post.output_may_exist());
        assert!(!ConvertError::Configuration("x".into()).output_may_exist());
    }
}
