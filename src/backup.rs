// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backup management.
//!
//! No existing resource is mutated without a prior, verified backup of that
//! exact resource. The backup manager snapshots files and whole directory
//! trees into the run's backup directory right before a step overwrites them.
//!
//! # Backup Directory Layout
//!
//! Each run owns one backup directory, `<state dir>/backups/<run stamp>`.
//! The directory is created on first use, so runs that never back anything up
//! leave nothing behind. Every snapshot becomes one entry named after the
//! flattened original path plus a timestamp, e.g.,
//! `home_blah_.zshrc.20251017-143000`. Entries are never overwritten: a name
//! clash gets a numeric suffix instead. Nothing in here is ever deleted
//! automatically, the operator owns recovery.
//!
//! A path that is itself a symlink is backed up by the content it points
//! to, since steps write through the link into that content. Symlinks inside
//! a backed up directory stay symlinks.

use crate::probe::{fingerprint, resolve_link, Fingerprint};

use chrono::{DateTime, Local};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};
use walkdir::WalkDir;

/// Snapshot of a resource taken before mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    /// Path that was backed up.
    pub original: PathBuf,

    /// Location of the snapshot.
    pub backup: PathBuf,

    /// When the snapshot was taken.
    pub taken_at: DateTime<Local>,

    /// Content fingerprint of the original at backup time.
    pub fingerprint: Fingerprint,
}

/// Snapshot resources into a lazily created backup directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
    created: bool,
}

impl BackupManager {
    /// Construct new backup manager rooted at the run's backup directory.
    ///
    /// Does not touch the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            created: false,
        }
    }

    /// Path to backup directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check if backup directory has been created by this manager.
    pub fn is_used(&self) -> bool {
        self.created
    }

    /// Back up path.
    ///
    /// Returns `None` without creating anything if path does not exist.
    /// Otherwise copies path, or the content behind it if path is a symlink,
    /// into the backup directory, verifies that the copy matches, and returns
    /// the record of it.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::Inspect`] if path cannot be inspected.
    /// - Return [`BackupError::CreateRoot`] if backup directory cannot be
    ///   created.
    /// - Return [`BackupError::Copy`] if any entry cannot be copied.
    /// - Return [`BackupError::Verify`] if copy differs from original.
    #[instrument(skip(self, path), level = "debug")]
    pub fn backup(&mut self, path: impl AsRef<Path>) -> Result<Option<BackupRecord>> {
        let original = path.as_ref();
        let inspect_err = |err| BackupError::Inspect {
            source: err,
            path: original.into(),
        };
        let source = resolve_link(original).map_err(inspect_err)?;
        let before = match fingerprint(&source) {
            Ok(Some(before)) => before,
            Ok(None) => return Ok(None),
            Err(err) => return Err(inspect_err(err)),
        };

        self.ensure_root()?;
        let taken_at = Local::now();
        let backup = self.entry_path(original, &taken_at);
        debug!("back up {:?} to {:?}", source.display(), backup.display());
        copy_tree(&source, &backup)?;

        let after = fingerprint(&backup).map_err(|err| BackupError::Inspect {
            source: err,
            path: backup.clone(),
        })?;
        if after.as_ref() != Some(&before) {
            return Err(BackupError::Verify {
                original: original.into(),
                backup,
            });
        }

        Ok(Some(BackupRecord {
            original: original.into(),
            backup,
            taken_at,
            fingerprint: before,
        }))
    }

    fn ensure_root(&mut self) -> Result<()> {
        if self.created {
            return Ok(());
        }

        mkdirp::mkdirp(&self.root).map_err(|err| BackupError::CreateRoot {
            source: err,
            root: self.root.clone(),
        })?;
        debug!("created backup directory {:?}", self.root.display());
        self.created = true;

        Ok(())
    }

    fn entry_path(&self, original: &Path, taken_at: &DateTime<Local>) -> PathBuf {
        let base = format!(
            "{}.{}",
            crate::path::flatten(original),
            taken_at.format("%Y%m%d-%H%M%S")
        );

        // INVARIANT: Never reuse an existing entry name.
        let mut candidate = self.root.join(&base);
        let mut bump = 1;
        while fs::symlink_metadata(&candidate).is_ok() {
            candidate = self.root.join(format!("{base}.{bump}"));
            bump += 1;
        }

        candidate
    }
}

fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_root_links(false) {
        let entry = entry.map_err(|err| BackupError::Copy {
            source: err.into(),
            path: source.into(),
        })?;
        let relative = entry.path().strip_prefix(source).unwrap_or(Path::new(""));
        let target = if relative.as_os_str().is_empty() {
            dest.to_path_buf()
        } else {
            dest.join(relative)
        };
        let copy_err = |err: std::io::Error| BackupError::Copy {
            source: err,
            path: entry.path().into(),
        };

        let kind = entry.file_type();
        if kind.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(copy_err)?;
            std::os::unix::fs::symlink(link, &target).map_err(copy_err)?;
        } else if kind.is_dir() {
            fs::create_dir(&target).or_else(|err| match err.kind() {
                ErrorKind::AlreadyExists => Ok(()),
                _ => Err(copy_err(err)),
            })?;
        } else {
            fs::copy(entry.path(), &target).map_err(copy_err)?;
        }
    }

    Ok(())
}

/// Backup error types.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Resource cannot be inspected.
    #[error("failed to inspect {:?} for backup", path.display())]
    Inspect {
        #[source]
        source: crate::probe::ProbeError,
        path: PathBuf,
    },

    /// Backup directory cannot be created.
    #[error("failed to create backup directory {:?}", root.display())]
    CreateRoot {
        #[source]
        source: std::io::Error,
        root: PathBuf,
    },

    /// Entry cannot be copied.
    #[error("failed to copy {:?} into backup", path.display())]
    Copy {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Backup content differs from original.
    #[error("backup {:?} does not match {:?}", backup.display(), original.display())]
    Verify { original: PathBuf, backup: PathBuf },
}

/// Friendly result alias :3
pub type Result<T, E = BackupError> = std::result::Result<T, E>;
