//! Directory conversion.
//!
//! Walks the input root for files with the source format's extension, in
//! file-name order so runs (and the VCS commits they produce) are
//! reproducible. Each file's directory relative to the root is mirrored under
//! the output root. Version control and build directories are skipped.

use crate::convert::{ConvertError, ConvertedFile, Converter, InputSpec, OutputSpec, Stage};
use crate::format::{has_extension, FormatRequest};
use crate::postprocess::PostProcessContext;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Directory names never descended into.
pub const DEFAULT_EXCLUDES: [&str; 7] = [".git", ".svn", ".hg", ".bzr", "CVS", "_darcs", "target"];

/// Files under `root` whose extension matches, sorted, excluded directories
/// pruned. The root itself is never excluded.
pub fn matching_files(
    root: &Path,
    extension: &str,
    excludes: &[String],
) -> Result<Vec<PathBuf>, walkdir::Error> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| excludes.iter().any(|x| x == name))
        });
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() && has_extension(entry.path(), extension) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Directory of `file` relative to `root`; empty for files directly in it.
pub fn relative_dir(root: &Path, file: &Path) -> PathBuf {
    file.parent()
        .and_then(|dir| dir.strip_prefix(root).ok())
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

/// Convert every matching file under `input.path`.
///
/// Stops at the first failure. Finalizing the post-processing context is
/// left to the caller.
pub fn convert_all(
    converter: &Converter<'_>,
    context: &mut PostProcessContext,
    input: &InputSpec,
    output: &OutputSpec,
) -> Result<Vec<ConvertedFile>, ConvertError> {
    let root = input.path.as_path();
    let format = input.format.explicit().ok_or_else(|| {
        ConvertError::Configuration(format!(
            "converting the directory {} needs an explicit input format",
            root.display()
        ))
    })?;

    let files = matching_files(root, format.extension(), &converter.options().excludes).map_err(
        |source| ConvertError::ConversionFailed {
            path: root.to_path_buf(),
            stage: Stage::Enumerate,
            source: source.into(),
        },
    )?;
    if files.is_empty() {
        return Err(ConvertError::NoMatchingFiles {
            root: root.to_path_buf(),
            format,
        });
    }
    info!(count = files.len(), root = %root.display(), %format, "converting directory");

    let mut converted = Vec::with_capacity(files.len());
    for file in files {
        let relative = relative_dir(root, &file);
        debug!(file = %file.display(), relative = %relative.display(), "batch entry");
        let file_input = InputSpec {
            path: file,
            format: FormatRequest::Explicit(format),
            encoding: input.encoding.clone(),
        };
        converted.push(converter.convert_file(context, &file_input, output, Some(&relative))?);
    }
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::tests::RecordingRunner;
    use crate::convert::ConvertOptions;
    use crate::format::Format;
    use crate::plugins::BuiltinRegistry;
    use crate::postprocess::PostProcess;
    use crate::test_helpers::{read_output, setup_fixtures, write_file};
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str, content: &str) {
        write_file(root, relative, content);
    }

    fn excludes() -> Vec<String> {
        DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()
    }

    fn apt_input(root: &Path) -> InputSpec {
        InputSpec::new(root, FormatRequest::Explicit(Format::Apt), "UTF-8").unwrap()
    }

    #[test]
    fn matches_extension_case_insensitively_and_sorted() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "b.apt", "B");
        touch(tmp.path(), "a.APT", "A");
        touch(tmp.path(), "notes.txt", "x");
        touch(tmp.path(), "sub/c.apt", "C");
        let files = matching_files(tmp.path(), "apt", &excludes()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.strip_prefix(tmp.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.APT"),
                PathBuf::from("b.apt"),
                PathBuf::from("sub/c.apt")
            ]
        );
    }

    #[test]
    fn excluded_directories_are_pruned() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "keep.apt", "K");
        touch(tmp.path(), ".git/objects/x.apt", "G");
        touch(tmp.path(), "target/site/y.apt", "T");
        touch(tmp.path(), "docs/CVS/z.apt", "C");
        let files = matching_files(tmp.path(), "apt", &excludes()).unwrap();
        assert_eq!(files, vec![tmp.path().join("keep.apt")]);
    }

    #[test]
    fn excluded_name_as_root_is_still_walked() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("target");
        touch(&root, "a.apt", "A");
        assert_eq!(matching_files(&root, "apt", &excludes()).unwrap().len(), 1);
    }

    #[test]
    fn relative_dir_of_nested_and_top_level_files() {
        let root = Path::new("/in");
        assert_eq!(relative_dir(root, Path::new("/in/a/b/x.apt")), PathBuf::from("a/b"));
        assert_eq!(relative_dir(root, Path::new("/in/x.apt")), PathBuf::new());
    }

    #[test]
    fn batch_mirrors_tree_and_ignores_other_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("in");
        touch(&root, "a.apt", "A\n\n Text a.\n");
        touch(&root, "b.apt", "B\n\n Text b.\n");
        touch(&root, "guide/c.apt", "C\n\n Text c.\n");
        touch(&root, "readme.txt", "not converted");
        let out = tmp.path().join("out");

        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let report = Converter::new(&registry, &runner, ConvertOptions::default())
            .convert(
                &apt_input(&root),
                &OutputSpec::new(&out, Format::Markdown, "auto").unwrap(),
            )
            .unwrap();

        assert_eq!(report.files.len(), 3);
        assert!(out.join("a.md").is_file());
        assert!(out.join("b.md").is_file());
        assert!(out.join("guide/c.md").is_file());
        assert!(!out.join("readme.md").exists());
        assert!(read_output(&out.join("guide/c.md")).contains("# C"));
    }

    #[test]
    fn empty_batch_is_no_matching_files() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "readme.txt", "x");
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let err = Converter::new(&registry, &runner, ConvertOptions::default())
            .convert(
                &apt_input(tmp.path()),
                &OutputSpec::new(tmp.path().join("out"), Format::Markdown, "auto").unwrap(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ConvertError::NoMatchingFiles { format: Format::Apt, .. }
        ));
    }

    #[test]
    fn directory_with_auto_format_is_configuration_error() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.apt", "A");
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let err = Converter::new(&registry, &runner, ConvertOptions::default())
            .convert(
                &InputSpec::new(tmp.path(), FormatRequest::Auto, "auto").unwrap(),
                &OutputSpec::new(tmp.path().join("out"), Format::Markdown, "auto").unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, ConvertError::Configuration(_)));
    }

    #[test]
    fn first_failure_aborts_remaining_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("in");
        touch(&root, "a.apt", "A\n\n+--\nunterminated\n");
        touch(&root, "b.apt", "B\n");
        let out = tmp.path().join("out");
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let err = Converter::new(&registry, &runner, ConvertOptions::default())
            .convert(
                &apt_input(&root),
                &OutputSpec::new(&out, Format::Markdown, "auto").unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, ConvertError::ConversionFailed { .. }));
        assert!(!out.join("b.md").exists());
    }

    #[test]
    fn vcs_batch_commits_once() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("in");
        touch(&root, "a.apt", "A\n");
        touch(&root, "sub/b.apt", "B\n");
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let options = ConvertOptions {
            post_process: PostProcess::VcsRename,
            ..ConvertOptions::default()
        };
        let report = Converter::new(&registry, &runner, options)
            .convert(
                &apt_input(&root),
                &OutputSpec::new(&root, Format::Markdown, "auto").unwrap(),
            )
            .unwrap();
        assert_eq!(report.renamed, 2);
        assert_eq!(runner.subcommands(), vec!["mv", "mv", "commit"]);
        assert!(read_output(&root.join("sub/b.md")).contains("# B"));
        assert!(!root.join("sub/b.apt").exists());
    }

    #[test]
    fn aborted_vcs_batch_restores_parked_outputs() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("in");
        touch(&root, "a.apt", "A\n\n Text a.\n");
        touch(&root, "b.apt", "B\n\n+--\nunterminated\n");
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let options = ConvertOptions {
            post_process: PostProcess::VcsRename,
            ..ConvertOptions::default()
        };
        let err = Converter::new(&registry, &runner, options)
            .convert(
                &apt_input(&root),
                &OutputSpec::new(&root, Format::Markdown, "auto").unwrap(),
            )
            .unwrap_err();

        assert!(matches!(err, ConvertError::ConversionFailed { .. }));
        // a.apt was moved onto a.md; its converted content is back in place.
        assert!(read_output(&root.join("a.md")).contains("# A"));
        assert!(!root.join("a.md.tmp").exists());
        assert_eq!(runner.subcommands(), vec!["mv"]);
    }

    #[test]
    fn fixture_tree_converts_to_xhtml() {
        let tmp = setup_fixtures();
        let root = tmp.path().join("docs");
        let out = tmp.path().join("site");
        let registry = BuiltinRegistry::new();
        let runner = RecordingRunner::default();
        let report = Converter::new(&registry, &runner, ConvertOptions::default())
            .convert(
                &InputSpec::new(&root, FormatRequest::Explicit(Format::Apt), "auto").unwrap(),
                &OutputSpec::new(&out, Format::Xhtml5, "UTF-8").unwrap(),
            )
            .unwrap();
        assert_eq!(report.files.len(), 2);
        let index = read_output(&out.join("index.html"));
        assert!(index.contains("<title>Doxconv</title>"));
        assert!(out.join("guide/usage.html").is_file());
    }
}
