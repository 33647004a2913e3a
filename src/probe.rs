// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Filesystem state probing.
//!
//! Read-only checks that tell whether a path already holds what a step wants
//! it to hold. Content is compared through a __fingerprint__, a SHA-256 digest
//! over a file's bytes, or over every entry of a directory tree in sorted
//! order. The same fingerprint verifies backups.
//!
//! Package and login shell probes live next to their adapters in
//! [`system`](crate::system).

use sha2::{Digest, Sha256};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

use crate::step::{ApplyError, ProbeState};

/// Opaque content digest of a file or directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Display for Fingerprint {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.0)
    }
}

/// Compute fingerprint of path.
///
/// Files hash their bytes. Symlinks hash their target, not what they point
/// to. Directories hash each entry's relative path, kind, and content in
/// file name order.
///
/// Returns `None` if nothing exists at the path.
///
/// # Errors
///
/// - Return [`ProbeError::Read`] if any entry cannot be read.
/// - Return [`ProbeError::Walk`] if directory traversal fails.
pub fn fingerprint(path: impl AsRef<Path>) -> Result<Option<Fingerprint>> {
    let path = path.as_ref();
    match fs::symlink_metadata(path) {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(ProbeError::Read {
                source: err,
                path: path.into(),
            })
        }
    }

    let mut hasher = Sha256::new();
    for entry in WalkDir::new(path).follow_root_links(false).sort_by_file_name() {
        let entry = entry?;
        let relative = entry.path().strip_prefix(path).unwrap_or(entry.path());
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0]);

        let kind = entry.file_type();
        if kind.is_symlink() {
            let target = fs::read_link(entry.path()).map_err(|err| ProbeError::Read {
                source: err,
                path: entry.path().into(),
            })?;
            hasher.update(b"l");
            hasher.update(target.to_string_lossy().as_bytes());
        } else if kind.is_dir() {
            hasher.update(b"d");
        } else {
            let data = fs::read(entry.path()).map_err(|err| ProbeError::Read {
                source: err,
                path: entry.path().into(),
            })?;
            hasher.update(b"f");
            hasher.update(data.len().to_le_bytes());
            hasher.update(&data);
        }
        hasher.update([0]);
    }

    Ok(Some(Fingerprint(hex::encode(hasher.finalize()))))
}

/// Resolve path through a symlink sitting at the path itself.
///
/// Returns the canonical target when path is a symlink that resolves, and
/// path unchanged otherwise, including for dangling links. Symlinks further
/// down a directory tree are left alone.
///
/// # Errors
///
/// - Return [`ProbeError::Read`] if path or its link target cannot be
///   inspected.
pub fn resolve_link(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let read_err = |err| ProbeError::Read {
        source: err,
        path: path.into(),
    };

    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => match fs::canonicalize(path) {
            Ok(target) => Ok(target),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(path.into()),
            Err(err) => Err(read_err(err)),
        },
        Ok(_) => Ok(path.into()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(path.into()),
        Err(err) => Err(read_err(err)),
    }
}

/// Probe whether anything exists at path.
pub fn exists(path: impl AsRef<Path>) -> ProbeState {
    match fs::symlink_metadata(path.as_ref()) {
        Ok(_) => ProbeState::Present,
        Err(err) if err.kind() == ErrorKind::NotFound => ProbeState::Absent,
        Err(err) => ProbeState::Unknown(format!(
            "cannot inspect {:?}: {err}",
            path.as_ref().display()
        )),
    }
}

/// Probe whether file contains a line equal to marker.
///
/// Missing file means absent. Leading and trailing whitespace on each line is
/// ignored.
pub fn contains_marker(path: impl AsRef<Path>, marker: impl AsRef<str>) -> ProbeState {
    match fs::read_to_string(path.as_ref()) {
        Ok(content) => {
            if content.lines().any(|line| line.trim() == marker.as_ref().trim()) {
                ProbeState::Present
            } else {
                ProbeState::Absent
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => ProbeState::Absent,
        Err(err) => ProbeState::Unknown(format!(
            "cannot read {:?}: {err}",
            path.as_ref().display()
        )),
    }
}

/// Probe whether path holds content identical to source.
///
/// Either side may be a symlink, in which case the content behind it is
/// compared. A missing source cannot be compared against, so it is unknown.
pub fn same_content(source: impl AsRef<Path>, path: impl AsRef<Path>) -> ProbeState {
    let resolved = |path: &Path| resolve_link(path).and_then(|target| fingerprint(&target));
    let expect = match resolved(source.as_ref()) {
        Ok(Some(expect)) => expect,
        Ok(None) => {
            return ProbeState::Unknown(format!(
                "source {:?} does not exist",
                source.as_ref().display()
            ))
        }
        Err(err) => return ProbeState::Unknown(err.to_string()),
    };

    match resolved(path.as_ref()) {
        Ok(Some(current)) if current == expect => ProbeState::Present,
        Ok(_) => ProbeState::Absent,
        Err(err) => ProbeState::Unknown(err.to_string()),
    }
}

/// State probing error types.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Entry cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Directory traversal failed.
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

impl From<ProbeError> for ApplyError {
    fn from(error: ProbeError) -> Self {
        match error {
            ProbeError::Read { source, path } => ApplyError::Io { source, path },
            ProbeError::Walk(err) => ApplyError::Io {
                path: err.path().map(Path::to_path_buf).unwrap_or_default(),
                source: err.into(),
            },
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = ProbeError> = std::result::Result<T, E>;
