//! What happens to source files once their conversion has succeeded.
//!
//! | Policy | Per file | Once per run |
//! |--------|----------|--------------|
//! | [`PostProcess::None`] | nothing | nothing |
//! | [`PostProcess::RemoveSource`] | delete the input | nothing |
//! | [`PostProcess::VcsRename`] | park output, `git mv input output` | commit, then restore parked outputs |
//!
//! The VCS variant keeps history across an extension change. The version
//! control system must see a rename, so the freshly written output is first
//! parked under a temporary sibling name and the *source* is moved onto the
//! output path:
//!
//! ```text
//! after_conversion:  doc.md  → doc.md.tmp         (park new content)
//!                    git mv doc.apt doc.md         (old content, new name)
//! finalize:          git commit -m "..."
//!                    doc.md.tmp → doc.md           (new content replaces old)
//! ```
//!
//! The pending renames live in a [`PostProcessContext`] created for a single
//! top-level conversion call, never in global state.

use crate::command::{CommandError, CommandRunner, CommandSpec};
use crate::config::VcsConfig;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PostProcessError {
    #[error("removing sources and renaming them via version control are mutually exclusive")]
    ConflictingPolicies,
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Command(#[from] CommandError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostProcess {
    #[default]
    None,
    RemoveSource,
    VcsRename,
}

impl PostProcess {
    /// Map the two CLI switches onto a policy. Both at once is an error.
    pub fn from_flags(remove_source: bool, vcs_rename: bool) -> Result<Self, PostProcessError> {
        match (remove_source, vcs_rename) {
            (true, true) => Err(PostProcessError::ConflictingPolicies),
            (true, false) => Ok(PostProcess::RemoveSource),
            (false, true) => Ok(PostProcess::VcsRename),
            (false, false) => Ok(PostProcess::None),
        }
    }
}

/// A converted output parked until the VCS commit has happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRename {
    pub temporary: PathBuf,
    pub target: PathBuf,
}

pub struct PostProcessContext {
    policy: PostProcess,
    vcs: VcsConfig,
    pending: Vec<PendingRename>,
    /// Where the commit runs: the directory of the first moved source.
    commit_dir: Option<PathBuf>,
}

impl PostProcessContext {
    pub fn new(policy: PostProcess, vcs: VcsConfig) -> Self {
        Self {
            policy,
            vcs,
            pending: Vec::new(),
            commit_dir: None,
        }
    }

    pub fn policy(&self) -> PostProcess {
        self.policy
    }

    pub fn pending(&self) -> &[PendingRename] {
        &self.pending
    }

    /// Apply the policy to one successfully converted file.
    pub fn after_conversion(
        &mut self,
        runner: &dyn CommandRunner,
        input: &Path,
        output: &Path,
    ) -> Result<(), PostProcessError> {
        match self.policy {
            PostProcess::None => Ok(()),
            PostProcess::RemoveSource => {
                if same_file(input, output) {
                    warn!(path = %input.display(), "source is also the output, not removing it");
                    return Ok(());
                }
                fs::remove_file(input).map_err(|source| PostProcessError::Io {
                    path: input.to_path_buf(),
                    source,
                })?;
                debug!(path = %input.display(), "removed source");
                Ok(())
            }
            PostProcess::VcsRename => self.vcs_move(runner, input, output),
        }
    }

    fn vcs_move(
        &mut self,
        runner: &dyn CommandRunner,
        input: &Path,
        output: &Path,
    ) -> Result<(), PostProcessError> {
        if same_file(input, output) {
            warn!(path = %input.display(), "source is also the output, nothing to rename");
            return Ok(());
        }
        let temporary = temporary_path(output, &self.vcs.temp_suffix);
        if temporary.exists() {
            return Err(PostProcessError::Io {
                path: temporary,
                source: io::Error::new(io::ErrorKind::AlreadyExists, "temporary file already exists"),
            });
        }
        fs::rename(output, &temporary).map_err(|source| PostProcessError::Io {
            path: output.to_path_buf(),
            source,
        })?;

        let dir = input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let spec = CommandSpec::new(&self.vcs.program)
            .arg("mv")
            .arg(absolute(input))
            .arg(absolute(output))
            .current_dir(&dir);
        if let Err(err) = runner.run(&spec) {
            if let Err(restore) = fs::rename(&temporary, output) {
                warn!(
                    temporary = %temporary.display(),
                    err = %restore,
                    "converted output left parked after the move failed"
                );
            }
            return Err(err.into());
        }

        debug!(
            temporary = %temporary.display(),
            target = %output.display(),
            "parked converted output until commit"
        );
        self.commit_dir.get_or_insert(dir);
        self.pending.push(PendingRename {
            temporary,
            target: output.to_path_buf(),
        });
        Ok(())
    }

    /// Give up on a run that failed before [`finalize`](Self::finalize)
    /// completed. Parked outputs are moved back onto their targets without a
    /// commit, so the moves made so far stay staged. Returns the renames that
    /// could not be undone.
    pub fn abandon(&mut self) -> Vec<PendingRename> {
        self.commit_dir = None;
        let mut stuck = Vec::new();
        for rename in std::mem::take(&mut self.pending) {
            match fs::rename(&rename.temporary, &rename.target) {
                Ok(()) => warn!(
                    target = %rename.target.display(),
                    "restored converted output, its move is staged but not committed"
                ),
                Err(err) => {
                    debug!(temporary = %rename.temporary.display(), %err, "restore failed");
                    stuck.push(rename);
                }
            }
        }
        stuck
    }

    /// Run the once-per-run step. Returns how many parked outputs were
    /// restored. Does nothing unless VCS moves are pending.
    pub fn finalize(&mut self, runner: &dyn CommandRunner) -> Result<usize, PostProcessError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let mut spec = CommandSpec::new(&self.vcs.program)
            .arg("commit")
            .arg("-m")
            .arg(OsString::from(&self.vcs.commit_message));
        if let Some(dir) = self.commit_dir.take() {
            spec = spec.current_dir(dir);
        }
        runner.run(&spec)?;

        let pending = std::mem::take(&mut self.pending);
        for (i, rename) in pending.iter().enumerate() {
            if let Err(source) = fs::rename(&rename.temporary, &rename.target) {
                // The rest stay pending for `abandon`.
                self.pending = pending[i..].to_vec();
                return Err(PostProcessError::Io {
                    path: rename.temporary.clone(),
                    source,
                });
            }
        }
        info!(count = pending.len(), "committed renames and restored converted outputs");
        Ok(pending.len())
    }
}

/// `doc.md` + `.tmp` → `doc.md.tmp`
fn temporary_path(output: &Path, suffix: &str) -> PathBuf {
    let mut name = output.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    output.with_file_name(name)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
