//! CLI output formatting.
//!
//! Every converted file is listed with its positional index, the input path
//! relative to the input root and the output path. The resolved format and
//! encoding follow on an indented context line:
//!
//! ```text
//! Converting auto → markdown
//! 001 index.apt → out/index.md
//!     apt, UTF-8
//! 002 guide/usage.apt → out/guide/usage.md
//!     apt, UTF-8
//!
//! Converted 2 files
//! ```
//!
//! Errors are printed as `FATAL ERROR:` followed by the cause chain when
//! requested, or a hint on how to see it.
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout or stderr.
//! Format functions are pure: no I/O, no side effects.

use crate::convert::ConversionReport;
use crate::format::Format;
use std::error::Error;
use std::path::Path;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// Path relative to `root`, or the path itself when it is not under it.
fn relative_display(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.display().to_string(),
        _ => path.display().to_string(),
    }
}

// ============================================================================
// Conversion report
// ============================================================================

pub fn format_report(report: &ConversionReport, input_root: &Path) -> Vec<String> {
    let mut lines = vec![format!("Converting {} → {}", report.from, report.to)];
    for (i, file) in report.files.iter().enumerate() {
        lines.push(format!(
            "{} {} → {}",
            format_index(i + 1),
            relative_display(&file.input, input_root),
            file.output.display()
        ));
        lines.push(format!("    {}, {}", file.format, file.encoding));
    }
    lines.push(String::new());
    lines.push(format!("Converted {}", plural(report.files.len(), "file")));
    if report.renamed > 0 {
        lines.push(format!(
            "Committed version control renames, restored {}",
            plural(report.renamed, "output")
        ));
    }
    lines
}

pub fn print_report(report: &ConversionReport, input_root: &Path) {
    for line in format_report(report, input_root) {
        println!("{line}");
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Lines describing a fatal error.
///
/// With `show_chain` every `source()` is listed; otherwise a hint points to
/// `-e`. `output_may_exist` adds a note that converted files were already
/// written.
pub fn format_error(err: &dyn Error, show_chain: bool, output_may_exist: bool) -> Vec<String> {
    let mut lines = vec![format!("FATAL ERROR: {err}")];
    if show_chain {
        let mut source = err.source();
        while let Some(cause) = source {
            lines.push(format!("    Caused by: {cause}"));
            source = cause.source();
        }
    } else if err.source().is_some() {
        lines.push("    Re-run with -e to see the full error chain.".to_string());
    }
    if output_may_exist {
        lines.push("    Note: converted output was already written and may be incomplete.".to_string());
    }
    lines
}

pub fn print_error(err: &dyn Error, show_chain: bool, output_may_exist: bool) {
    for line in format_error(err, show_chain, output_may_exist) {
        eprintln!("{line}");
    }
}

// ============================================================================
// Help text
// ============================================================================

/// Supported formats, for `--help`.
pub fn format_supported_formats() -> Vec<String> {
    let names = |formats: &mut dyn Iterator<Item = Format>| {
        formats
            .map(|f| format!("{} (.{})", f.name(), f.extension()))
            .collect::<Vec<_>>()
            .join(", ")
    };
    vec![
        "Supported formats:".to_string(),
        format!("    read:  {}", names(&mut Format::readable())),
        format!("    write: {}", names(&mut Format::writable())),
    ]
}
