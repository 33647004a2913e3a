// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dotfile placement.
//!
//! Copies dotfiles shipped next to a plan into their destination. A copy
//! step is satisfied once every destination holds exactly the source
//! content, so unchanged dotfiles are never rewritten, and only the
//! destinations that differ get backed up and overwritten.
//!
//! A source that is itself a symlink places the content it points to.
//! Symlinks inside a source directory are placed as symlinks.

use crate::{
    probe::{resolve_link, same_content},
    step::{Apply, ApplyError, ProbeState, ProvisioningStep, StepCategory},
};

use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};
use walkdir::WalkDir;

/// One source to destination pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl Placement {
    fn probe(&self) -> ProbeState {
        same_content(&self.source, &self.destination)
    }
}

/// Resolve glob pattern into placements.
///
/// A pattern matching exactly one path that is not a glob copies that path
/// onto `destination` itself. Otherwise every match is copied into the
/// `destination` directory under its own file name.
///
/// # Errors
///
/// - Return [`FilesError::Pattern`] if pattern is invalid.
/// - Return [`FilesError::NoMatch`] if pattern matches nothing.
pub fn resolve(pattern: &str, destination: impl AsRef<Path>) -> Result<Vec<Placement>> {
    let mut sources = Vec::new();
    for entry in glob::glob(pattern)? {
        sources.push(entry?);
    }
    if sources.is_empty() {
        return Err(FilesError::NoMatch(pattern.into()));
    }

    let destination = destination.as_ref();
    let literal = sources.len() == 1 && !pattern.contains(['*', '?', '[']);
    if literal {
        return Ok(vec![Placement {
            source: sources.remove(0),
            destination: destination.into(),
        }]);
    }

    Ok(sources
        .into_iter()
        .filter_map(|source| {
            let name = source.file_name()?.to_owned();
            Some(Placement {
                destination: destination.join(name),
                source,
            })
        })
        .collect())
}

/// Copy source onto destination, replacing whatever is there.
///
/// Directories are copied whole.
///
/// # Errors
///
/// - Return [`ApplyError::Io`] if source cannot be resolved, or if anything
///   cannot be removed, created, or copied.
#[instrument(skip(placement), level = "debug")]
pub fn place(placement: &Placement) -> Result<(), ApplyError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |err: std::io::Error| ApplyError::Io { source: err, path }
    };

    let source = resolve_link(&placement.source)?;
    let destination = &placement.destination;
    if let Ok(meta) = fs::symlink_metadata(destination) {
        debug!("replace {:?}", destination.display());
        if meta.is_dir() {
            fs::remove_dir_all(destination).map_err(io_err(destination))?;
        } else {
            fs::remove_file(destination).map_err(io_err(destination))?;
        }
    }
    if let Some(parent) = destination.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        mkdirp::mkdirp(parent).map_err(io_err(parent))?;
    }

    for entry in WalkDir::new(&source).follow_root_links(false) {
        let entry = entry.map_err(|err| ApplyError::Io {
            source: err.into(),
            path: source.clone(),
        })?;
        let relative = entry.path().strip_prefix(&source).unwrap_or(Path::new(""));
        let target = if relative.as_os_str().is_empty() {
            destination.clone()
        } else {
            destination.join(relative)
        };

        let kind = entry.file_type();
        if kind.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(io_err(entry.path()))?;
            std::os::unix::fs::symlink(link, &target).map_err(io_err(&target))?;
        } else if kind.is_dir() {
            fs::create_dir_all(&target).map_err(io_err(&target))?;
        } else {
            fs::copy(entry.path(), &target).map_err(io_err(&target))?;
        }
    }

    Ok(())
}

struct CopyFiles {
    placements: Vec<Placement>,
}

impl CopyFiles {
    fn pending(&self) -> impl Iterator<Item = &Placement> {
        self.placements
            .iter()
            .filter(|placement| placement.probe() != ProbeState::Present)
    }
}

impl Apply for CopyFiles {
    fn apply(&self) -> Result<(), ApplyError> {
        for placement in self.pending() {
            place(placement)?;
        }

        Ok(())
    }

    fn targets(&self) -> Vec<PathBuf> {
        self.pending()
            .map(|placement| placement.destination.clone())
            .collect()
    }
}

/// Step that copies files into place unless they already match.
pub fn copy_files(id: impl Into<String>, placements: Vec<Placement>) -> ProvisioningStep {
    let description = format!(
        "copy {}",
        placements
            .iter()
            .map(|placement| placement.destination.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let probe_placements = placements.clone();
    let probe = move || ProbeState::all(probe_placements.iter().map(Placement::probe));

    ProvisioningStep::new(id, probe, CopyFiles { placements })
        .description(description)
        .category(StepCategory::FileMutation)
}

/// Dotfile placement error types.
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Glob pattern is invalid.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Glob match cannot be read.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),

    /// Glob pattern matches nothing.
    #[error("pattern {0:?} matches no files")]
    NoMatch(String),
}

/// Friendly result alias :3
pub type Result<T, E = FilesError> = std::result::Result<T, E>;
