// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Shell profile blocks.
//!
//! Stepwise configures shells by appending __profile blocks__ to profile
//! files like `~/.zshrc`. A profile block is wrapped in a pair of marker
//! lines:
//!
//! ```text
//! # >>> rbenv >>>
//! eval "$(rbenv init - zsh)"
//! # <<< rbenv <<<
//! ```
//!
//! The opening marker is how Stepwise recognizes a block it already wrote.
//! Blocks are only ever appended. Existing lines are never edited or removed,
//! and a file that already holds the opening marker is left alone.

use crate::{
    probe::contains_marker,
    step::{Apply, ApplyError, ProbeState, ProvisioningStep, StepCategory},
};

use std::{
    fs::{read_to_string, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Marker-delimited block of profile content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileBlock {
    marker: String,
    content: String,
}

impl ProfileBlock {
    /// Construct new profile block.
    pub fn new(marker: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            content: content.into(),
        }
    }

    /// Opening marker line.
    pub fn opening(&self) -> String {
        format!("# >>> {} >>>", self.marker)
    }

    /// Closing marker line.
    pub fn closing(&self) -> String {
        format!("# <<< {} <<<", self.marker)
    }

    /// Probe whether file already holds this block.
    pub fn probe(&self, path: impl AsRef<Path>) -> ProbeState {
        contains_marker(path, self.opening())
    }

    /// Append block to file unless it is already there.
    ///
    /// Creates the file and its parent directories if missing. Returns
    /// whether anything was appended.
    ///
    /// # Errors
    ///
    /// - Return [`ProfileError::Read`] if file cannot be read.
    /// - Return [`ProfileError::Append`] if block cannot be appended.
    #[instrument(skip(self, path), fields(marker = %self.marker), level = "debug")]
    pub fn append_to(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        let existing = match read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
            Err(err) => {
                return Err(ProfileError::Read {
                    source: err,
                    path: path.into(),
                })
            }
        };

        let opening = self.opening();
        if existing.lines().any(|line| line.trim() == opening) {
            debug!("{:?} already holds block", path.display());
            return Ok(false);
        }

        // INVARIANT: Keep block on its own lines even if file lacks a final newline.
        let mut block = String::new();
        if !existing.is_empty() {
            if !existing.ends_with('\n') {
                block.push('\n');
            }
            block.push('\n');
        }
        block.push_str(&opening);
        block.push('\n');
        block.push_str(self.content.trim_end_matches('\n'));
        block.push('\n');
        block.push_str(&self.closing());
        block.push('\n');

        let append_err = |err| ProfileError::Append {
            source: err,
            path: path.into(),
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            mkdirp::mkdirp(parent).map_err(append_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(append_err)?;
        file.write_all(block.as_bytes()).map_err(append_err)?;
        debug!("appended block to {:?}", path.display());

        Ok(true)
    }
}

struct AppendBlock {
    block: ProfileBlock,
    files: Vec<PathBuf>,
}

impl AppendBlock {
    fn pending(&self) -> impl Iterator<Item = &PathBuf> {
        self.files
            .iter()
            .filter(|path| self.block.probe(path) != ProbeState::Present)
    }
}

impl Apply for AppendBlock {
    fn apply(&self) -> Result<(), ApplyError> {
        for path in self.pending() {
            self.block.append_to(path)?;
        }

        Ok(())
    }

    fn targets(&self) -> Vec<PathBuf> {
        self.pending().cloned().collect()
    }
}

/// Step that appends a profile block to every file lacking it.
pub fn append_profile_block(
    id: impl Into<String>,
    block: ProfileBlock,
    files: impl IntoIterator<Item = impl Into<PathBuf>>,
) -> ProvisioningStep {
    let files = files.into_iter().map(Into::into).collect::<Vec<PathBuf>>();
    let description = format!(
        "add {:?} block to {}",
        block.marker,
        files
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let probe_block = block.clone();
    let probe_files = files.clone();
    let probe = move || ProbeState::all(probe_files.iter().map(|path| probe_block.probe(path)));

    ProvisioningStep::new(id, probe, AppendBlock { block, files })
        .description(description)
        .category(StepCategory::FileMutation)
}

/// Profile block error types.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    /// Profile file cannot be read.
    #[error("failed to read profile {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Block cannot be appended to profile file.
    #[error("failed to append block to profile {:?}", path.display())]
    Append {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

impl From<ProfileError> for ApplyError {
    fn from(error: ProfileError) -> Self {
        match error {
            ProfileError::Read { source, path } | ProfileError::Append { source, path } => {
                ApplyError::Io { source, path }
            }
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = ProfileError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs::write;

    fn rbenv() -> ProfileBlock {
        ProfileBlock::new("rbenv", "eval \"$(rbenv init - zsh)\"\n")
    }

    #[sealed_test]
    fn append_block_exactly_once() -> anyhow::Result<()> {
        write(".zshrc", "export EDITOR=nvim")?;

        assert!(rbenv().append_to(".zshrc")?);
        assert!(!rbenv().append_to(".zshrc")?);

        let expect = indoc! {r#"
            export EDITOR=nvim

            # >>> rbenv >>>
            eval "$(rbenv init - zsh)"
            # <<< rbenv <<<
        "#};
        assert_eq!(read_to_string(".zshrc")?, expect);

        Ok(())
    }

    #[sealed_test]
    fn append_creates_missing_file() -> anyhow::Result<()> {
        assert!(rbenv().append_to(".bashrc")?);
        assert_eq!(
            read_to_string(".bashrc")?,
            "# >>> rbenv >>>\neval \"$(rbenv init - zsh)\"\n# <<< rbenv <<<\n"
        );
        Ok(())
    }

    #[sealed_test]
    fn step_targets_only_files_lacking_block() -> anyhow::Result<()> {
        write(".zshrc", "")?;
        write(".bashrc", "alias ll='ls -l'\n")?;
        rbenv().append_to(".zshrc")?;

        let step = append_profile_block("rbenv", rbenv(), [".zshrc", ".bashrc"]);
        assert_eq!(step.probe_state(), ProbeState::Absent);
        assert_eq!(step.backup_targets(), vec![PathBuf::from(".bashrc")]);

        step.apply.apply()?;
        assert_eq!(step.probe_state(), ProbeState::Present);
        assert!(step.backup_targets().is_empty());

        Ok(())
    }
}
