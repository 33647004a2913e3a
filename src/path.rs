// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::path::{Path, PathBuf};

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`PathError::NoWayHome`] if home directory path cannot be
///   determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(PathError::NoWayHome)
}

/// Determine default absolute path to run state directory.
///
/// Uses XDG Base Directory path `$XDG_STATE_HOME/stepwise` as the default
/// location for run logs and backups. Falls back to `$XDG_DATA_HOME/stepwise`
/// on platforms that lack a state directory. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`PathError::NoWayHome`] if home directory path cannot be
///   determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_state_dir() -> Result<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|path| path.join("stepwise"))
        .ok_or(PathError::NoWayHome)
}

/// Determine default absolute path to plan definition file.
///
/// Uses `$XDG_CONFIG_HOME/stepwise/plan.toml`. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`PathError::NoWayHome`] if home directory path cannot be
///   determined.
pub fn default_plan_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("stepwise").join("plan.toml"))
        .ok_or(PathError::NoWayHome)
}

/// Perform shell expansion on a path.
///
/// Expands `~` and environment variables. Relative results are joined onto
/// `base` so plan files can refer to paths next to themselves.
///
/// # Errors
///
/// - Return [`PathError::ShellExpansion`] if a referenced variable is unset.
pub fn expand(path: impl AsRef<str>, base: impl AsRef<Path>) -> Result<PathBuf> {
    let expanded = PathBuf::from(shellexpand::full(path.as_ref())?.into_owned());
    if expanded.is_relative() {
        return Ok(base.as_ref().join(expanded));
    }

    Ok(expanded)
}

/// Flatten a path into a single file name.
///
/// Used to name backup entries so that `/home/user/.zshrc` and
/// `/home/user/.config/.zshrc` never collide inside one backup directory.
pub fn flatten(path: impl AsRef<Path>) -> String {
    let flat = path
        .as_ref()
        .components()
        .filter_map(|part| match part {
            std::path::Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("_");

    if flat.is_empty() {
        "root".into()
    } else {
        flat
    }
}

/// Path resolution error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PathError {
    /// No way to determine user's home directory.
    ///
    /// # See Also
    ///
    /// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
    #[error("cannot determine absolute path to user's home directory")]
    NoWayHome,

    /// Failed to perform shell expansion on path.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

/// Friendly result alias :3
pub type Result<T, E = PathError> = std::result::Result<T, E>;
