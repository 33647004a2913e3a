// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Repository bootstrapping.
//!
//! Editor starter configurations and version managers are usually installed
//! by cloning a repository into a fixed path, e.g., LazyVim's starter into
//! `~/.config/nvim`, or rbenv into `~/.rbenv`. A clone is only considered to
//! be in place if the path opens as a repository whose `origin` remote points
//! at the expected URL.
//!
//! A clone never lands on top of existing content. Whatever sits at the path
//! gets backed up by the executor, then removed, then the clone happens.

use crate::{
    probe::exists,
    step::{Apply, ApplyError, ProbeState, ProvisioningStep, StepCategory},
};

use auth_git2::{GitAuthenticator, Prompter};
use git2::{build::RepoBuilder, Config, FetchOptions, RemoteCallbacks, Repository};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time,
};
use tracing::{debug, info, instrument};

/// Probe whether path holds a clone of URL.
pub fn probe_clone(url: &str, path: impl AsRef<Path>) -> ProbeState {
    let path = path.as_ref();
    match exists(path) {
        ProbeState::Present => {}
        missing_or_unknown => return missing_or_unknown,
    }

    // INVARIANT: Anything at the path that is not our clone must be replaced.
    let Ok(repository) = Repository::open(path) else {
        return ProbeState::Absent;
    };
    let matches = repository
        .find_remote("origin")
        .ok()
        .and_then(|remote| remote.url().map(|found| same_url(found, url)))
        .unwrap_or(false);

    if matches {
        ProbeState::Present
    } else {
        ProbeState::Absent
    }
}

fn same_url(left: &str, right: &str) -> bool {
    let normalize = |url: &str| url.trim_end_matches('/').trim_end_matches(".git").to_owned();
    normalize(left) == normalize(right)
}

/// Clone repository from URL into path.
///
/// Shows clone progress through a progress bar. If credentials are required
/// for the clone to continue, the operator is prompted for them while the
/// progress bar waits.
///
/// # Errors
///
/// - Return [`RepoError::NotEmpty`] if path already holds content.
/// - Return [`RepoError::Git2`] if libgit2 operations fail.
/// - Return [`RepoError::IndicatifStyleTemplate`] if progress bar style
///   cannot be set.
#[instrument(skip(url, path), level = "debug")]
pub fn clone_into(url: &str, path: impl AsRef<Path>, bar: ProgressBar) -> Result<Repository> {
    let path = path.as_ref();
    if fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_some()) {
        return Err(RepoError::NotEmpty { path: path.into() });
    }

    info!("clone {url} into {:?}", path.display());
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
    )?
    .progress_chars("-Cco.");
    bar.set_style(style);
    bar.set_message(url.to_string());
    bar.enable_steady_tick(time::Duration::from_millis(100));

    let prompter = IndicatifPrompter::new(bar);
    let authenticator = GitAuthenticator::default().set_prompter(prompter.clone());
    let config = Config::open_default()?;

    let mut throttle = time::Instant::now();
    let mut rc = RemoteCallbacks::new();
    rc.credentials(authenticator.credentials(&config));
    rc.transfer_progress(|progress| {
        let stats = progress.to_owned();
        if throttle.elapsed() > time::Duration::from_millis(10) {
            throttle = time::Instant::now();
            prompter.bar.set_length(stats.total_objects() as u64);
            prompter.bar.set_position(stats.received_objects() as u64);
        }
        true
    });

    let mut fo = FetchOptions::new();
    fo.remote_callbacks(rc);
    let repository = RepoBuilder::new().fetch_options(fo).clone(url, path);
    prompter.bar.finish_and_clear();

    Ok(repository?)
}

struct CloneRepository {
    url: String,
    path: PathBuf,
}

impl Apply for CloneRepository {
    fn apply(&self) -> Result<(), ApplyError> {
        match fs::symlink_metadata(&self.path) {
            Ok(meta) => {
                debug!("remove {:?} before clone", self.path.display());
                let removed = if meta.is_dir() {
                    fs::remove_dir_all(&self.path)
                } else {
                    fs::remove_file(&self.path)
                };
                removed.map_err(|err| ApplyError::Io {
                    source: err,
                    path: self.path.clone(),
                })?;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(ApplyError::Io {
                    source: err,
                    path: self.path.clone(),
                })
            }
        }

        clone_into(&self.url, &self.path, ProgressBar::new(0))?;
        Ok(())
    }

    fn targets(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }
}

/// Step that clones a repository into path unless it is already there.
pub fn clone_repository(
    id: impl Into<String>,
    url: impl Into<String>,
    path: impl Into<PathBuf>,
) -> ProvisioningStep {
    let url = url.into();
    let path = path.into();
    let description = format!("clone {url} into {}", path.display());

    let probe_url = url.clone();
    let probe_path = path.clone();
    let probe = move || probe_clone(&probe_url, &probe_path);

    ProvisioningStep::new(id, probe, CloneRepository { url, path })
        .description(description)
        .category(StepCategory::FileMutation)
}

/// Git2 authentication prompter for progress bar.
#[derive(Debug, Clone)]
pub struct IndicatifPrompter {
    pub(crate) bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| -> Option<String> {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| -> Option<String> {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

/// Repository bootstrapping error types.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// Clone destination already holds content.
    #[error("refusing to clone into non-empty path {:?}", path.display())]
    NotEmpty { path: PathBuf },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = RepoError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn url_comparison_ignores_git_suffix() {
        assert!(same_url(
            "https://github.com/LazyVim/starter.git",
            "https://github.com/LazyVim/starter"
        ));
        assert!(!same_url(
            "https://github.com/LazyVim/starter",
            "https://github.com/rbenv/rbenv"
        ));
    }

    #[sealed_test]
    fn probe_clone_states() -> anyhow::Result<()> {
        let url = "https://github.com/rbenv/rbenv.git";
        assert_eq!(probe_clone(url, ".rbenv"), ProbeState::Absent);

        fs::create_dir(".rbenv")?;
        fs::write(".rbenv/leftover", "old")?;
        assert_eq!(probe_clone(url, ".rbenv"), ProbeState::Absent);

        fs::remove_dir_all(".rbenv")?;
        let repository = Repository::init(".rbenv")?;
        repository.remote("origin", url)?;
        assert_eq!(probe_clone(url, ".rbenv"), ProbeState::Present);

        repository.remote_set_url("origin", "https://github.com/blah/blah.git")?;
        assert_eq!(probe_clone(url, ".rbenv"), ProbeState::Absent);

        Ok(())
    }

    #[sealed_test]
    fn refuse_clone_into_non_empty_path() -> anyhow::Result<()> {
        fs::create_dir("nvim")?;
        fs::write("nvim/init.lua", "-- mine")?;

        let result = clone_into("https://github.com/LazyVim/starter", "nvim", ProgressBar::hidden());
        assert!(matches!(result, Err(RepoError::NotEmpty { .. })));
        Ok(())
    }

    #[sealed_test]
    fn clone_from_local_repository() -> anyhow::Result<()> {
        let origin = Repository::init("origin")?;
        let signature = git2::Signature::now("John Doe", "john@doe.com")?;
        let tree = origin.find_tree(origin.index()?.write_tree()?)?;
        origin.commit(Some("HEAD"), &signature, &signature, "chore: init", &tree, &[])?;

        let url = std::env::current_dir()?.join("origin").display().to_string();
        let step = clone_repository("starter", url.as_str(), "clone");
        assert_eq!(step.probe_state(), ProbeState::Absent);

        step.apply.apply()?;
        assert_eq!(step.probe_state(), ProbeState::Present);

        Ok(())
    }
}
